//! Helpers for 4x4 homogeneous affine transforms mapping voxel indices to world (scanner/MNI) coordinates.

use ndarray::Array2;

use crate::error::{Result, RoiError};

/// The 4x4 identity transform.
pub fn identity() -> Array2<f64> {
    Array2::eye(4)
}


/// Build an affine from a 3x3 linear part and a translation.
pub fn from_parts(linear: [[f64; 3]; 3], translation: [f64; 3]) -> Array2<f64> {
    let mut a = identity();
    for r in 0..3 {
        for c in 0..3 {
            a[[r, c]] = linear[r][c];
        }
        a[[r, 3]] = translation[r];
    }
    a
}


/// Build the diagonal affine for isotropic or anisotropic voxel sizes with the given origin offset.
pub fn scaling(zooms: [f64; 3], translation: [f64; 3]) -> Array2<f64> {
    from_parts(
        [[zooms[0], 0., 0.], [0., zooms[1], 0.], [0., 0., zooms[2]]],
        translation,
    )
}


/// Invert an affine transform. Only the upper 3x4 block is considered, the last row is assumed to be `[0, 0, 0, 1]`.
pub fn inverse(a: &Array2<f64>) -> Result<Array2<f64>> {
    let m = |r: usize, c: usize| a[[r, c]];
    let det = m(0, 0) * (m(1, 1) * m(2, 2) - m(1, 2) * m(2, 1))
        - m(0, 1) * (m(1, 0) * m(2, 2) - m(1, 2) * m(2, 0))
        + m(0, 2) * (m(1, 0) * m(2, 1) - m(1, 1) * m(2, 0));

    if det.abs() < 1e-12 || !det.is_finite() {
        return Err(RoiError::SingularAffine);
    }

    let inv_det = 1.0 / det;
    let mut lin = [[0.0f64; 3]; 3];
    lin[0][0] = (m(1, 1) * m(2, 2) - m(1, 2) * m(2, 1)) * inv_det;
    lin[0][1] = (m(0, 2) * m(2, 1) - m(0, 1) * m(2, 2)) * inv_det;
    lin[0][2] = (m(0, 1) * m(1, 2) - m(0, 2) * m(1, 1)) * inv_det;
    lin[1][0] = (m(1, 2) * m(2, 0) - m(1, 0) * m(2, 2)) * inv_det;
    lin[1][1] = (m(0, 0) * m(2, 2) - m(0, 2) * m(2, 0)) * inv_det;
    lin[1][2] = (m(0, 2) * m(1, 0) - m(0, 0) * m(1, 2)) * inv_det;
    lin[2][0] = (m(1, 0) * m(2, 1) - m(1, 1) * m(2, 0)) * inv_det;
    lin[2][1] = (m(0, 1) * m(2, 0) - m(0, 0) * m(2, 1)) * inv_det;
    lin[2][2] = (m(0, 0) * m(1, 1) - m(0, 1) * m(1, 0)) * inv_det;

    let mut t = [0.0f64; 3];
    for r in 0..3 {
        t[r] = -(lin[r][0] * m(0, 3) + lin[r][1] * m(1, 3) + lin[r][2] * m(2, 3));
    }
    Ok(from_parts(lin, t))
}


/// Compose two transforms, the result applies `second` first and then `first`.
pub fn compose(first: &Array2<f64>, second: &Array2<f64>) -> Array2<f64> {
    first.dot(second)
}


/// Apply an affine to a single 3D point.
pub fn apply(a: &Array2<f64>, p: [f64; 3]) -> [f64; 3] {
    let mut out = [0.0f64; 3];
    for r in 0..3 {
        out[r] = a[[r, 0]] * p[0] + a[[r, 1]] * p[1] + a[[r, 2]] * p[2] + a[[r, 3]];
    }
    out
}


/// Element-wise comparison with numpy `allclose` default tolerances.
pub fn allclose(a: &Array2<f64>, b: &Array2<f64>) -> bool {
    a.shape() == b.shape()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| (x - y).abs() <= 1e-8 + 1e-5 * y.abs())
}


/// Bounds of a voxel grid of the given shape after mapping through `affine`.
///
/// Returns `[(xmin, xmax), (ymin, ymax), (zmin, zmax)]` over the eight grid corners.
pub fn get_bounds(shape: [usize; 3], affine: &Array2<f64>) -> [(f64, f64); 3] {
    let hi = |n: usize| if n == 0 { 0.0 } else { (n - 1) as f64 };
    let mut bounds = [(f64::INFINITY, f64::NEG_INFINITY); 3];
    for &x in &[0.0, hi(shape[0])] {
        for &y in &[0.0, hi(shape[1])] {
            for &z in &[0.0, hi(shape[2])] {
                let p = apply(affine, [x, y, z]);
                for axis in 0..3 {
                    bounds[axis].0 = bounds[axis].0.min(p[axis]);
                    bounds[axis].1 = bounds[axis].1.max(p[axis]);
                }
            }
        }
    }
    bounds
}
