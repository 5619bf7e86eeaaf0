//! Brain volumes and fMRI time series stored in NIfTI-1 files ('.nii' and '.nii.gz').
//!
//! Parsing and writing is left to the `nifti` crate. This module adapts its objects into a
//! [`NiftiImage`]: the header, the voxel-to-world affine (sform, qform or the Analyze-style
//! fallback, as resolved by the header) and the voxel data as `f32`, with `scl_slope` and
//! `scl_inter` applied.

use ndarray::{Array2, Array4, ArrayView3, Axis, Ix3, Ix4};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use std::path::Path;

use crate::affine;
use crate::error::{Result, RoiError};

const UNITS_MSEC: u8 = 16;
const UNITS_USEC: u8 = 24;


/// Models a NIfTI image: header, voxel-to-world affine and the voxel data.
///
/// The data is stored with shape `[x, y, z, t]`, 3D images have a single volume.
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiImage {
    pub header: NiftiHeader,
    pub affine: Array2<f64>,
    pub data: Array4<f32>,
}


impl NiftiImage {

    /// Create an image from voxel data and an affine. The header carries the affine as sform.
    pub fn new(data: Array4<f32>, affine: Array2<f64>) -> NiftiImage {
        let mut header = NiftiHeader::default();
        header.pixdim[0] = 1.0;
        for axis in 0..3 {
            let col = affine.column(axis);
            header.pixdim[axis + 1] = (col[0] * col[0] + col[1] * col[1] + col[2] * col[2]).sqrt() as f32;
        }
        header.pixdim[4] = 0.0;
        header.xyzt_units = 0;
        header.scl_slope = 1.0;
        header.scl_inter = 0.0;
        let mut img = NiftiImage { header, affine, data };
        img.sync_sform();
        img
    }


    /// Read a NIfTI image from a file.
    /// If the file's name ends with ".gz", the file is assumed to need GZip decoding.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<NiftiImage> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = obj.header().clone();
        let volume = obj.into_volume().into_ndarray::<f32>()?;

        let data = match volume.ndim() {
            3 => volume
                .into_dimensionality::<Ix3>()
                .map_err(|e| RoiError::ShapeMismatch(e.to_string()))?
                .insert_axis(Axis(3)),
            4 => volume
                .into_dimensionality::<Ix4>()
                .map_err(|e| RoiError::ShapeMismatch(e.to_string()))?,
            n => return Err(RoiError::ShapeMismatch(format!("{}D images are not supported", n))),
        };
        let affine = header_affine(&header);

        Ok(NiftiImage { header, affine, data })
    }


    /// Spatial grid shape `[x, y, z]`.
    pub fn shape3(&self) -> [usize; 3] {
        let (nx, ny, nz, _) = self.data.dim();
        [nx, ny, nz]
    }


    /// Number of volumes (time points).
    pub fn num_volumes(&self) -> usize {
        self.data.len_of(Axis(3))
    }


    /// A view of the volume at time point `t`.
    pub fn volume(&self, t: usize) -> ArrayView3<f32> {
        self.data.index_axis(Axis(3), t)
    }


    /// Whether this image lives on the same voxel grid as `other`.
    pub fn same_grid(&self, other: &NiftiImage) -> bool {
        self.shape3() == other.shape3() && affine::allclose(&self.affine, &other.affine)
    }


    /// Repetition time in seconds, for time series with a positive `pixdim[4]`.
    pub fn repetition_time(&self) -> Option<f64> {
        let tr = self.header.pixdim[4] as f64;
        if !(tr > 0.0) || self.num_volumes() < 2 {
            return None;
        }
        match self.header.xyzt_units & 0x18 {
            UNITS_MSEC => Some(tr / 1e3),
            UNITS_USEC => Some(tr / 1e6),
            _ => Some(tr),
        }
    }


    /// Write the image as float32 single-file NIfTI, GZip compressed if the file name ends with ".gz".
    ///
    /// Images with a single volume are written as 3D.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut out = self.clone();
        out.sync_sform();
        out.header.scl_slope = 1.0;
        out.header.scl_inter = 0.0;

        let writer = WriterOptions::new(path.as_ref()).reference_header(&out.header);
        if self.num_volumes() == 1 {
            writer.write_nifti(&self.volume(0))?;
        } else {
            writer.write_nifti(&self.data)?;
        }
        Ok(())
    }


    /// Store `affine` in the sform fields of the header.
    fn sync_sform(&mut self) {
        let row = |r: usize| {
            [
                self.affine[[r, 0]] as f32,
                self.affine[[r, 1]] as f32,
                self.affine[[r, 2]] as f32,
                self.affine[[r, 3]] as f32,
            ]
        };
        let (x, y, z) = (row(0), row(1), row(2));
        self.header.srow_x = x;
        self.header.srow_y = y;
        self.header.srow_z = z;
        self.header.sform_code = self.header.sform_code.max(2);
    }
}


/// The voxel-to-world affine resolved by the header: sform if set, qform otherwise,
/// and the centered pixdim scaling as the last resort.
fn header_affine(header: &NiftiHeader) -> Array2<f64> {
    let m = header.affine::<f64>();
    Array2::from_shape_fn((4, 4), |(r, c)| m[(r, c)])
}


/// Read a NIfTI-1 image from a '.nii' or '.nii.gz' file.
///
/// # Examples
///
/// ```no_run
/// let img = roiseries::read_nifti("/path/to/sub-01_task-rest_bold.nii.gz").unwrap();
/// println!("{} volumes on a {:?} grid", img.num_volumes(), img.shape3());
/// ```
pub fn read_nifti<P: AsRef<Path>>(path: P) -> Result<NiftiImage> {
    NiftiImage::from_file(path)
}


/// Write a NIfTI-1 image as float32 to a '.nii' or '.nii.gz' file.
pub fn write_nifti<P: AsRef<Path>>(path: P, image: &NiftiImage) -> Result<()> {
    image.to_file(path)
}


#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn demo_image() -> NiftiImage {
        let data = Array4::from_shape_fn((4, 3, 2, 5), |(x, y, z, t)| {
            (x + 10 * y + 100 * z) as f32 + 0.5 * t as f32
        });
        let mut img = NiftiImage::new(data, affine::scaling([-2., 2., 2.], [90., -126., -72.]));
        img.header.pixdim[4] = 2.0;
        img.header.xyzt_units = 10;
        img
    }

    #[test]
    fn written_images_can_be_read_back() {
        let dir = tempdir().unwrap();
        let img = demo_image();

        for name in ["bold.nii", "bold.nii.gz"].iter() {
            let path = dir.path().join(name);
            write_nifti(&path, &img).unwrap();
            let back = read_nifti(&path).unwrap();

            assert_eq!(back.data.dim(), (4, 3, 2, 5));
            assert_eq!(back.data, img.data);
            assert_eq!(back.data[[3, 2, 1, 4]], 123.0 + 2.0);
            assert!(affine::allclose(&back.affine, &img.affine));
            assert_eq!(back.repetition_time(), Some(2.0));
        }
    }

    #[test]
    fn three_dimensional_images_have_one_volume() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("labels.nii");
        let data = Array4::from_shape_fn((3, 2, 2, 1), |(x, _, _, _)| x as f32);
        write_nifti(&path, &NiftiImage::new(data.clone(), affine::identity())).unwrap();

        let back = read_nifti(&path).unwrap();
        assert_eq!(back.num_volumes(), 1);
        assert_eq!(back.data, data);
        assert_eq!(back.repetition_time(), None);
    }

    #[test]
    fn repetition_time_honors_units() {
        let mut img = demo_image();
        img.header.pixdim[4] = 2000.0;
        img.header.xyzt_units = 2 | UNITS_MSEC;
        assert_eq!(img.repetition_time(), Some(2.0));
        img.header.pixdim[4] = 0.0;
        assert_eq!(img.repetition_time(), None);
    }

    #[test]
    fn truncated_files_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bold.nii");
        write_nifti(&path, &demo_image()).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 8);
        fs::write(&path, &bytes).unwrap();
        assert!(read_nifti(&path).is_err());
    }

    #[test]
    fn garbage_is_not_a_nifti_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.nii");
        fs::write(&path, vec![0u8; 400]).unwrap();
        assert!(read_nifti(&path).is_err());
    }

    #[test]
    fn affine_falls_back_to_qform() {
        let mut header = NiftiHeader::default();
        header.sform_code = 0;
        header.qform_code = 1;
        header.pixdim = [1., 3., 3., 3., 0., 0., 0., 0.];
        header.quatern_b = 0.;
        header.quatern_c = 0.;
        header.quatern_d = 0.;
        header.quatern_x = -10.;
        let a = header_affine(&header);
        assert_eq!(a[[0, 0]], 3.0);
        assert_eq!(a[[0, 3]], -10.0);
    }
}
