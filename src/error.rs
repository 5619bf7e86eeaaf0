use quick_error::quick_error;
use std::io::Error as IOError;

quick_error! {
    /// Error type for all error variants originated by this crate.
    #[derive(Debug)]
    pub enum RoiError {
        /// Reading or writing a NIfTI file failed.
        Nifti(err: nifti::NiftiError) {
            from()
            source(err)
            display("NIfTI error: {}", err)
        }

        /// The target field of view does not contain any of the source data.
        BoundingBox {
            display("The field of view given by the target affine does not contain any of the data")
        }

        SingularAffine {
            display("Affine transform is singular and cannot be inverted")
        }

        ShapeMismatch(what: String) {
            display("Shape mismatch: {}", what)
        }

        UnknownAtlas(name: String) {
            display("Atlas '{}' not recognized. Please choose 'HarvardOxford', 'MSDL', 'Schaefer', or 'Cerebellum'.", name)
        }

        MissingAtlasFile(path: String) {
            display("Atlas file not found: {}", path)
        }

        /// The least squares fit of the probabilistic maps failed.
        LeastSquares(reason: String) {
            display("Least squares fit failed: {}", reason)
        }

        InvalidMaskerConfig(reason: String) {
            display("Invalid masker configuration: {}", reason)
        }

        InvalidPhenotype(reason: String) {
            display("Invalid phenotype table: {}", reason)
        }

        Csv(err: csv::Error) {
            from()
            source(err)
            display("CSV error: {}", err)
        }

        /// I/O Error
        Io(err: IOError) {
            from()
            source(err)
            display("I/O error: {}", err)
        }
    }
}

/// Alias type for results originated from this crate.
pub type Result<T> = ::std::result::Result<T, RoiError>;
