//! Extraction of region-of-interest (ROI) time series from preprocessed fMRI data.
//!
//! The focus of this package is on preparing data for functional connectivity analysis:
//! a brain atlas defines the regions, a masker reduces each 4D functional image to one
//! signal per region, and the signals are written as CSV files in a fixed directory layout.
//!
//! ```text
//! atlas (labels or maps)          functional runs (.nii.gz)
//!   │                                │
//!   └── masker ◄── resample ─────────┘
//!         │
//!         ├─ mean / least squares per region   [T, R]
//!         ├─ detrend
//!         └─ standardize (zscore_sample)
//!               │
//!               └─→ {subject}/{session}/{atlas}/{tasks}/{pooled|shape}/{id}.csv
//! ```
//!
//! # Examples
//!
//! ```no_run
//! use roiseries::{fetch_atlas, build_named_masker, read_nifti, AtlasName, Masker, MaskerConfig};
//!
//! let name = AtlasName::HarvardOxford;
//! let atlas = fetch_atlas(name, "atlases").unwrap();
//! let masker = build_named_masker(name, &atlas, MaskerConfig::for_atlas(name)).unwrap();
//! let img = read_nifti("sub-01_task-rest_bold.nii.gz").unwrap();
//! let signals = masker.transform(&img).unwrap();
//! println!("{} time points x {} regions", signals.nrows(), signals.ncols());
//! ```

pub mod affine;
pub mod atlas;
pub mod dataset;
pub mod error;
pub mod image;
pub mod masker;
pub mod output;
pub mod pipeline;
pub mod resample;
pub mod signal;
pub mod util;

pub use atlas::{fetch_atlas, load_labels_atlas, load_maps_atlas, Atlas, AtlasKind, AtlasName};
pub use dataset::{abide_subjects, read_file_ids, read_phenotypes, session_path, AbideSubject, BidsDataset, Phenotype, Run};
pub use error::{Result, RoiError};
pub use masker::{build_masker, build_named_masker, LabelsMasker, MapsMasker, Masker, MaskerConfig, MultiLabelsMasker, ResamplingTarget};
pub use image::{read_nifti, write_nifti, NiftiImage};
pub use output::{read_matrix_csv, write_matrix_csv, write_shape_csv, OutputLayout};
pub use pipeline::{extract_cohort, extract_session, extract_time_series, CohortJob, ExtractionReport, SessionJob};
pub use resample::{resample_to_grid, resample_to_img, Interpolation, ResampleCache};
pub use signal::Standardize;
