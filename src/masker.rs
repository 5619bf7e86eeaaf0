//! Maskers turn a 4D functional image into region signals, shaped `[T, R]` (time points by regions).
//!
//! * [`LabelsMasker`] averages all voxels carrying the same label value of a labels atlas.
//! * [`MapsMasker`] fits the probabilistic maps of a maps atlas to each volume by least squares.
//! * [`MultiLabelsMasker`] applies one labels masker to a series of images. The Schaefer
//!   parcellation is extracted this way, see [`build_named_masker`].
//!
//! Atlas and data are brought onto a common grid first, see [`ResamplingTarget`]. The
//! extracted signals are then cleaned with [`signal::clean`].

use log::{debug, info, warn};
use nalgebra::DMatrix;
use ndarray::{Array2, Axis};

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::atlas::{label_values, Atlas, AtlasName};
use crate::error::{Result, RoiError};
use crate::image::{read_nifti, NiftiImage};
use crate::resample::{resample_to_img, Interpolation, ResampleCache};
use crate::signal::{self, Standardize};


/// Which grid atlas and data are brought onto before extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResamplingTarget {
    /// Resample the atlas onto the grid of each functional image.
    Data,
    /// Resample each functional image onto the grid of the atlas.
    Labels,
}

impl FromStr for ResamplingTarget {
    type Err = RoiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "data" => Ok(ResamplingTarget::Data),
            "labels" | "maps" => Ok(ResamplingTarget::Labels),
            other => Err(RoiError::InvalidMaskerConfig(format!("unknown resampling target '{}'", other))),
        }
    }
}

impl fmt::Display for ResamplingTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResamplingTarget::Data => write!(f, "data"),
            ResamplingTarget::Labels => write!(f, "labels"),
        }
    }
}


/// Configuration shared by all maskers.
///
/// All fields are `pub`, so one can use struct-update syntax:
///
/// ```
/// use roiseries::{MaskerConfig, Standardize};
///
/// let cfg = MaskerConfig {
///     detrend: false,
///     standardize: Standardize::Zscore,
///     ..MaskerConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct MaskerConfig {
    /// Expected repetition time of the functional images in seconds, `None` to skip the check.
    ///
    /// Images whose header reports a different TR are processed anyway, with a warning.
    ///
    /// Default: `Some(2.0)` s.
    pub t_r: Option<f64>,

    /// Remove linear trends from the region signals.
    ///
    /// Default: `true`.
    pub detrend: bool,

    /// Standardization of the region signals after detrending.
    ///
    /// Default: [`Standardize::ZscoreSample`].
    pub standardize: Standardize,

    /// Default: [`ResamplingTarget::Data`].
    pub resampling_target: ResamplingTarget,

    /// Keep an all-zero column for atlas regions that contain no voxels on the common grid.
    /// If `false`, such regions are dropped from the output.
    ///
    /// Default: `true`.
    pub keep_masked_labels: bool,
}

impl Default for MaskerConfig {
    fn default() -> Self {
        Self {
            t_r: Some(2.0),
            detrend: true,
            standardize: Standardize::ZscoreSample,
            resampling_target: ResamplingTarget::Data,
            keep_masked_labels: true,
        }
    }
}

impl MaskerConfig {

    /// The extraction settings used with an atlas.
    ///
    /// The Schaefer parcellation is neither detrended nor checked against a repetition time,
    /// all other atlases use the [`Default`] settings.
    pub fn for_atlas(name: AtlasName) -> MaskerConfig {
        match name {
            AtlasName::Schaefer => MaskerConfig { t_r: None, detrend: false, ..MaskerConfig::default() },
            _ => MaskerConfig::default(),
        }
    }
}

impl fmt::Display for MaskerConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let t_r = self.t_r.map(|t| format!("{} s", t)).unwrap_or_else(|| String::from("unchecked"));
        write!(
            f,
            "t_r {}, detrend {}, standardize {}, resampling to {}, {} masked labels",
            t_r,
            self.detrend,
            self.standardize,
            self.resampling_target,
            if self.keep_masked_labels { "keeping" } else { "dropping" }
        )
    }
}


/// Extraction of region signals from functional images.
pub trait Masker {
    /// Extract the cleaned region signals of `img`, shaped `[T, R]`.
    fn transform(&self, img: &NiftiImage) -> Result<Array2<f64>>;

    /// Names of the regions, in column order.
    fn region_names(&self) -> Vec<String>;

    /// The settings the signals are extracted and cleaned with.
    fn config(&self) -> &MaskerConfig;

    /// Read a functional image from disk and extract its region signals.
    fn transform_file(&self, path: &Path) -> Result<Array2<f64>> {
        let img = read_nifti(path)?;
        info!("Extracting {} ({:?} x {} volumes)", path.display(), img.shape3(), img.num_volumes());
        self.transform(&img)
    }
}


fn check_repetition_time(img: &NiftiImage, config: &MaskerConfig) {
    if let (Some(expected), Some(tr)) = (config.t_r, img.repetition_time()) {
        if (tr - expected).abs() > 1e-3 {
            warn!("Image repetition time {} s differs from the configured t_r {} s", tr, expected);
        }
    }
}


/// Extracts region signals as the mean over all voxels of each label.
#[derive(Debug)]
pub struct LabelsMasker {
    labels_img: NiftiImage,
    names: BTreeMap<i32, String>,
    values: Vec<i32>,
    config: MaskerConfig,
    cache: ResampleCache,
}


impl LabelsMasker {

    /// Create a masker for a labels image. Region values are the distinct non-zero labels, in ascending order.
    pub fn new(labels_img: NiftiImage, names: BTreeMap<i32, String>, config: MaskerConfig) -> Result<LabelsMasker> {
        if labels_img.num_volumes() != 1 {
            return Err(RoiError::ShapeMismatch(String::from("labels image must be 3D")));
        }
        let values = label_values(&labels_img);
        if values.is_empty() {
            return Err(RoiError::InvalidMaskerConfig(String::from("labels image contains only background")));
        }
        debug!("Labels masker with {} regions", values.len());
        Ok(LabelsMasker { labels_img, names, values, config, cache: ResampleCache::new() })
    }


    /// The region values, in column order.
    pub fn label_values(&self) -> &[i32] {
        &self.values
    }
}


impl Masker for LabelsMasker {

    fn transform(&self, img: &NiftiImage) -> Result<Array2<f64>> {
        check_repetition_time(img, &self.config);

        let (labels, data): (Cow<NiftiImage>, Cow<NiftiImage>) = match self.config.resampling_target {
            ResamplingTarget::Data => (
                Cow::Owned(self.cache.resample(&self.labels_img, &img.affine, img.shape3(), Interpolation::Nearest)?),
                Cow::Borrowed(img),
            ),
            ResamplingTarget::Labels => (
                Cow::Borrowed(&self.labels_img),
                Cow::Owned(resample_to_img(img, &self.labels_img, Interpolation::Linear)?),
            ),
        };

        let column: HashMap<i32, usize> = self.values.iter().enumerate().map(|(i, v)| (*v, i)).collect();
        let n_t = data.num_volumes();
        let n_r = self.values.len();

        let mut sums = Array2::<f64>::zeros((n_t, n_r));
        let mut counts = vec![0usize; n_r];
        for ((x, y, z), label) in labels.volume(0).indexed_iter() {
            if !label.is_finite() {
                continue;
            }
            if let Some(&r) = column.get(&(label.round() as i32)) {
                counts[r] += 1;
                for t in 0..n_t {
                    sums[[t, r]] += data.data[[x, y, z, t]] as f64;
                }
            }
        }

        let mut kept: Vec<usize> = Vec::with_capacity(n_r);
        for (r, count) in counts.iter().enumerate() {
            if *count == 0 {
                warn!(
                    "Region {} ('{}') contains no voxels after resampling",
                    self.values[r],
                    self.names.get(&self.values[r]).map(String::as_str).unwrap_or("unnamed")
                );
                if self.config.keep_masked_labels {
                    kept.push(r);
                }
            } else {
                sums.column_mut(r).mapv_inplace(|v| v / *count as f64);
                kept.push(r);
            }
        }

        let mut signals = if kept.len() == n_r { sums } else { sums.select(Axis(1), &kept) };
        signal::clean(&mut signals, self.config.detrend, self.config.standardize);
        Ok(signals)
    }


    fn region_names(&self) -> Vec<String> {
        self.values
            .iter()
            .map(|v| self.names.get(v).cloned().unwrap_or_else(|| format!("label_{}", v)))
            .collect()
    }


    fn config(&self) -> &MaskerConfig {
        &self.config
    }
}


/// Extracts region signals by regressing each volume onto a set of probabilistic maps.
#[derive(Debug)]
pub struct MapsMasker {
    maps_img: NiftiImage,
    names: Vec<String>,
    config: MaskerConfig,
    cache: ResampleCache,
}


impl MapsMasker {

    pub fn new(maps_img: NiftiImage, names: Vec<String>, config: MaskerConfig) -> Result<MapsMasker> {
        if names.len() != maps_img.num_volumes() {
            return Err(RoiError::ShapeMismatch(format!(
                "{} maps but {} region names",
                maps_img.num_volumes(),
                names.len()
            )));
        }
        debug!("Maps masker with {} regions", names.len());
        Ok(MapsMasker { maps_img, names, config, cache: ResampleCache::new() })
    }
}


impl Masker for MapsMasker {

    fn transform(&self, img: &NiftiImage) -> Result<Array2<f64>> {
        check_repetition_time(img, &self.config);

        let (maps, data): (Cow<NiftiImage>, Cow<NiftiImage>) = match self.config.resampling_target {
            ResamplingTarget::Data => (
                Cow::Owned(self.cache.resample(&self.maps_img, &img.affine, img.shape3(), Interpolation::Linear)?),
                Cow::Borrowed(img),
            ),
            ResamplingTarget::Labels => (
                Cow::Borrowed(&self.maps_img),
                Cow::Owned(resample_to_img(img, &self.maps_img, Interpolation::Linear)?),
            ),
        };

        let n_r = maps.num_volumes();
        let n_t = data.num_volumes();

        // Restrict the regression to voxels covered by at least one map.
        let mut weights: Vec<f64> = Vec::new();
        let mut values: Vec<f64> = Vec::new();
        let mut n_vox = 0usize;
        let [nx, ny, nz] = maps.shape3();
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    let covered = (0..n_r).any(|r| maps.data[[x, y, z, r]] != 0.0);
                    if !covered {
                        continue;
                    }
                    n_vox += 1;
                    weights.extend((0..n_r).map(|r| maps.data[[x, y, z, r]] as f64));
                    values.extend((0..n_t).map(|t| data.data[[x, y, z, t]] as f64));
                }
            }
        }

        let design = DMatrix::from_row_slice(n_vox, n_r, &weights);
        let active: Vec<usize> = (0..n_r)
            .filter(|&r| design.column(r).iter().any(|w| *w != 0.0))
            .collect();
        for r in (0..n_r).filter(|r| !active.contains(r)) {
            warn!("Map {} ('{}') does not overlap the data after resampling", r, self.names[r]);
        }

        let mut signals = Array2::<f64>::zeros((n_t, n_r));
        if n_vox > 0 && n_r > 0 {
            let observed = DMatrix::from_row_slice(n_vox, n_t, &values);
            let solution = lstsq(design, &observed)?; // [R, T]
            for &r in &active {
                for t in 0..n_t {
                    signals[[t, r]] = solution[(r, t)];
                }
            }
        }

        if !self.config.keep_masked_labels && active.len() != n_r {
            signals = signals.select(Axis(1), &active);
        }
        signal::clean(&mut signals, self.config.detrend, self.config.standardize);
        Ok(signals)
    }


    fn region_names(&self) -> Vec<String> {
        self.names.clone()
    }


    fn config(&self) -> &MaskerConfig {
        &self.config
    }
}


/// Least squares solution of `design · x = observed` via SVD.
///
/// Singular values below `max(sv) · max(rows, cols) · ε` are treated as zero, so rank deficient
/// designs (collinear maps) give the solution of smallest norm.
fn lstsq(design: DMatrix<f64>, observed: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let (rows, cols) = design.shape();
    let svd = design.svd(true, true);
    let max_sv = svd.singular_values.iter().fold(0.0f64, |acc, v| acc.max(*v));
    let eps = max_sv * rows.max(cols) as f64 * f64::EPSILON;
    svd.solve(observed, eps).map_err(|e| RoiError::LeastSquares(e.to_string()))
}


/// Applies a single labels masker to several images, one after the other.
#[derive(Debug)]
pub struct MultiLabelsMasker {
    inner: LabelsMasker,
}


impl MultiLabelsMasker {

    pub fn new(labels_img: NiftiImage, names: BTreeMap<i32, String>, config: MaskerConfig) -> Result<MultiLabelsMasker> {
        Ok(MultiLabelsMasker { inner: LabelsMasker::new(labels_img, names, config)? })
    }


    /// Extract the region signals of every in-memory image, in order.
    pub fn transform_many(&self, imgs: &[NiftiImage]) -> Result<Vec<Array2<f64>>> {
        imgs.iter().map(|img| self.inner.transform(img)).collect()
    }
}


impl Masker for MultiLabelsMasker {

    fn transform(&self, img: &NiftiImage) -> Result<Array2<f64>> {
        self.inner.transform(img)
    }


    fn region_names(&self) -> Vec<String> {
        self.inner.region_names()
    }


    fn config(&self) -> &MaskerConfig {
        self.inner.config()
    }
}


/// Build the masker matching the kind of atlas: labels atlases get a [`LabelsMasker`],
/// maps atlases a [`MapsMasker`].
pub fn build_masker(atlas: &Atlas, config: MaskerConfig) -> Result<Box<dyn Masker>> {
    match atlas {
        Atlas::Labels { image, names, .. } => Ok(Box::new(LabelsMasker::new(image.clone(), names.clone(), config)?)),
        Atlas::Maps { image, names, .. } => Ok(Box::new(MapsMasker::new(image.clone(), names.clone(), config)?)),
    }
}


/// Build the masker used for a named atlas. The Schaefer parcellation gets a
/// [`MultiLabelsMasker`], every other atlas the masker of [`build_masker`].
pub fn build_named_masker(name: AtlasName, atlas: &Atlas, config: MaskerConfig) -> Result<Box<dyn Masker>> {
    match (name, atlas) {
        (AtlasName::Schaefer, Atlas::Labels { image, names, .. }) => {
            Ok(Box::new(MultiLabelsMasker::new(image.clone(), names.clone(), config)?))
        }
        _ => build_masker(atlas, config),
    }
}
