//! Resampling of images onto the voxel grid of another image.
//!
//! Used to bring an atlas onto the grid of the functional data (or vice versa) before
//! extracting region signals. Each target voxel is mapped to world coordinates with the
//! target affine and back into source voxel space with the inverse source affine.
//! Points falling outside the source volume receive a fill value of 0.

use log::{debug, warn};
use ndarray::{Array2, Array4, ArrayView3, Axis};
use ndarray_stats::QuantileExt;

use std::cell::RefCell;

use crate::affine;
use crate::error::{Result, RoiError};
use crate::image::NiftiImage;


/// Interpolation used when resampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// Nearest neighbour, required for label images so that no new label values appear.
    Nearest,
    /// Trilinear interpolation for continuous data like probabilistic maps or BOLD signal.
    Linear,
}


/// Resample `image` onto the grid given by `target_affine` and `target_shape`.
///
/// Returns a clone of the input if it already lives on the requested grid. 4D images are
/// resampled volume by volume. Linearly interpolated values are clipped to the range
/// spanned by the input data and 0.
///
/// # Errors
///
/// * [`RoiError::BoundingBox`] if the transformed input lies entirely outside the target field of view.
/// * [`RoiError::SingularAffine`] if the image affine cannot be inverted.
pub fn resample_to_grid(
    image: &NiftiImage,
    target_affine: &Array2<f64>,
    target_shape: [usize; 3],
    interpolation: Interpolation,
) -> Result<NiftiImage> {
    if image.shape3() == target_shape && affine::allclose(&image.affine, target_affine) {
        return Ok(image.clone());
    }

    if image.header.sform_code == 0 {
        warn!("The provided image has no sform in its header. Results may not be as expected.");
    }

    // Check that some of the data ends up in the target field of view.
    let source_in_target = affine::compose(&affine::inverse(target_affine)?, &image.affine);
    let bounds = affine::get_bounds(image.shape3(), &source_in_target);
    if bounds.iter().any(|&(_min, max)| max < 0.0) {
        return Err(RoiError::BoundingBox);
    }

    let target_to_source = affine::compose(&affine::inverse(&image.affine)?, target_affine);
    debug!(
        "Resampling {:?} x {} onto {:?} with {:?} interpolation",
        image.shape3(),
        image.num_volumes(),
        target_shape,
        interpolation
    );

    let clip = match interpolation {
        Interpolation::Linear => Some(value_range(image)),
        Interpolation::Nearest => None,
    };

    let [tx, ty, tz] = target_shape;
    let mut out = Array4::<f32>::zeros((tx, ty, tz, image.num_volumes()));
    for (t, mut out_vol) in out.axis_iter_mut(Axis(3)).enumerate() {
        let src_vol = image.volume(t);
        for ((x, y, z), v) in out_vol.indexed_iter_mut() {
            let p = affine::apply(&target_to_source, [x as f64, y as f64, z as f64]);
            let sampled = match interpolation {
                Interpolation::Nearest => sample_nearest(&src_vol, p),
                Interpolation::Linear => sample_linear(&src_vol, p),
            };
            *v = match clip {
                Some((lo, hi)) => sampled.max(lo).min(hi),
                None => sampled,
            };
        }
    }

    let mut resampled = NiftiImage::new(out, target_affine.clone());
    resampled.header.pixdim[4] = image.header.pixdim[4];
    resampled.header.xyzt_units = image.header.xyzt_units;
    Ok(resampled)
}


/// Resample `image` onto the grid of `reference`.
pub fn resample_to_img(
    image: &NiftiImage,
    reference: &NiftiImage,
    interpolation: Interpolation,
) -> Result<NiftiImage> {
    resample_to_grid(image, &reference.affine, reference.shape3(), interpolation)
}


/// `[min(data, 0), max(data, 0)]`, the clipping range for interpolated values.
fn value_range(image: &NiftiImage) -> (f32, f32) {
    let finite = image.data.mapv(|v| if v.is_finite() { v } else { 0.0 });
    let lo = finite.min().map(|v| *v).unwrap_or(0.0);
    let hi = finite.max().map(|v| *v).unwrap_or(0.0);
    (lo.min(0.0), hi.max(0.0))
}


fn sample_nearest(vol: &ArrayView3<f32>, p: [f64; 3]) -> f32 {
    let (nx, ny, nz) = vol.dim();
    let idx = |c: f64, n: usize| {
        let r = c.round();
        if r < 0.0 || r > (n - 1) as f64 {
            None
        } else {
            Some(r as usize)
        }
    };
    match (idx(p[0], nx), idx(p[1], ny), idx(p[2], nz)) {
        (Some(x), Some(y), Some(z)) => vol[[x, y, z]],
        _ => 0.0,
    }
}


fn sample_linear(vol: &ArrayView3<f32>, p: [f64; 3]) -> f32 {
    let dims = [vol.len_of(Axis(0)), vol.len_of(Axis(1)), vol.len_of(Axis(2))];
    let eps = 1e-6;
    for axis in 0..3 {
        if p[axis] < -eps || p[axis] > (dims[axis] - 1) as f64 + eps {
            return 0.0;
        }
    }

    let mut lo = [0usize; 3];
    let mut frac = [0.0f64; 3];
    for axis in 0..3 {
        let c = p[axis].max(0.0).min((dims[axis] - 1) as f64);
        let f = c.floor();
        lo[axis] = f as usize;
        frac[axis] = c - f;
    }

    let mut acc = 0.0f64;
    for corner in 0..8usize {
        let mut weight = 1.0f64;
        let mut idx = [0usize; 3];
        for axis in 0..3 {
            let upper = (corner >> axis) & 1 == 1;
            if upper {
                weight *= frac[axis];
                idx[axis] = (lo[axis] + 1).min(dims[axis] - 1);
            } else {
                weight *= 1.0 - frac[axis];
                idx[axis] = lo[axis];
            }
        }
        if weight > 0.0 {
            acc += weight * vol[idx] as f64;
        }
    }
    acc as f32
}


/// Memoizes the most recent resampling of one source image onto a target grid.
///
/// Maskers resample the same atlas onto the grid of every functional run. Runs of a
/// dataset almost always share one grid, so a single cached entry avoids repeating the work.
#[derive(Debug, Default)]
pub struct ResampleCache {
    entry: RefCell<Option<CacheEntry>>,
}

#[derive(Debug)]
struct CacheEntry {
    affine: Array2<f64>,
    shape: [usize; 3],
    interpolation: Interpolation,
    image: NiftiImage,
}


impl ResampleCache {

    pub fn new() -> ResampleCache {
        ResampleCache::default()
    }


    /// Resample `source` onto the given grid, re-using the cached result when the grid matches.
    pub fn resample(
        &self,
        source: &NiftiImage,
        target_affine: &Array2<f64>,
        target_shape: [usize; 3],
        interpolation: Interpolation,
    ) -> Result<NiftiImage> {
        if let Some(entry) = self.entry.borrow().as_ref() {
            if entry.shape == target_shape
                && entry.interpolation == interpolation
                && affine::allclose(&entry.affine, target_affine)
            {
                debug!("Re-using resampled image for grid {:?}", target_shape);
                return Ok(entry.image.clone());
            }
        }

        let image = resample_to_grid(source, target_affine, target_shape, interpolation)?;
        *self.entry.borrow_mut() = Some(CacheEntry {
            affine: target_affine.clone(),
            shape: target_shape,
            interpolation,
            image: image.clone(),
        });
        Ok(image)
    }


    /// Whether a resampled image is currently cached.
    pub fn is_populated(&self) -> bool {
        self.entry.borrow().is_some()
    }


    pub fn clear(&self) {
        self.entry.borrow_mut().take();
    }
}
