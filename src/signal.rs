//! Cleaning of extracted region signals.
//!
//! Signals are `[T, R]` arrays (time points by regions). Cleaning runs two steps, in order:
//!
//! 1. `detrend_inplace`, per region: remove the least-squares linear trend, including the mean.
//! 2. `standardize_inplace`, per region: z-score with `ddof = 1` (`ZscoreSample`),
//!    `ddof = 0` (`Zscore`), or percent signal change (`Psc`).
//!
//! Percent signal change needs the region means, so `clean` restores them after detrending.
use ndarray::{Array2, Axis};

use std::fmt;
use std::str::FromStr;

use crate::error::RoiError;

/// How region signals are standardized after extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Standardize {
    /// Leave the signals as they are.
    None,
    /// Zero mean, unit variance with the population std (`ddof = 0`).
    Zscore,
    /// Zero mean, unit variance with the sample std (`ddof = 1`).
    ZscoreSample,
    /// Percent signal change relative to each region's mean.
    Psc,
}

impl Default for Standardize {
    fn default() -> Self {
        Standardize::ZscoreSample
    }
}

impl FromStr for Standardize {
    type Err = RoiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "false" => Ok(Standardize::None),
            "zscore" => Ok(Standardize::Zscore),
            "zscore_sample" | "true" => Ok(Standardize::ZscoreSample),
            "psc" => Ok(Standardize::Psc),
            other => Err(RoiError::InvalidMaskerConfig(format!("unknown standardize strategy '{}'", other))),
        }
    }
}

impl fmt::Display for Standardize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Standardize::None => "none",
            Standardize::Zscore => "zscore",
            Standardize::ZscoreSample => "zscore_sample",
            Standardize::Psc => "psc",
        };
        write!(f, "{}", name)
    }
}


/// Remove the least-squares linear trend (and the mean) from every column.
pub fn detrend_inplace(signals: &mut Array2<f64>) {
    let n = signals.nrows();
    if n == 0 {
        return;
    }
    let t_mean = (n as f64 - 1.0) / 2.0;
    let t_ss: f64 = (0..n).map(|t| (t as f64 - t_mean).powi(2)).sum();

    for mut col in signals.axis_iter_mut(Axis(1)) {
        let mean = col.sum() / n as f64;
        let slope = if t_ss > 0.0 {
            col.iter()
                .enumerate()
                .map(|(t, &v)| (t as f64 - t_mean) * (v - mean))
                .sum::<f64>()
                / t_ss
        } else {
            0.0
        };
        for (t, v) in col.iter_mut().enumerate() {
            *v -= mean + slope * (t as f64 - t_mean);
        }
    }
}


/// Standardize every column with the given strategy.
///
/// Columns with zero variance become all zeros under the z-score strategies.
/// Signals with a single time point are left untouched by the z-score strategies,
/// as their variance is undefined.
pub fn standardize_inplace(signals: &mut Array2<f64>, method: Standardize) {
    let n = signals.nrows();
    match method {
        Standardize::None => {}
        Standardize::Zscore | Standardize::ZscoreSample => {
            if n <= 1 {
                return;
            }
            let ddof = if method == Standardize::Zscore { 0.0 } else { 1.0 };
            for mut col in signals.axis_iter_mut(Axis(1)) {
                let mean = col.sum() / n as f64;
                let var = col.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / (n as f64 - ddof);
                let std = var.sqrt();
                if std > f64::EPSILON {
                    col.mapv_inplace(|v| (v - mean) / std);
                } else {
                    col.fill(0.0);
                }
            }
        }
        Standardize::Psc => {
            for mut col in signals.axis_iter_mut(Axis(1)) {
                let mean = col.sum() / n.max(1) as f64;
                if mean.abs() > f64::EPSILON {
                    col.mapv_inplace(|v| (v - mean) / mean.abs() * 100.0);
                } else {
                    col.fill(0.0);
                }
            }
        }
    }
}


/// Detrend (if requested) and then standardize the region signals.
pub fn clean(signals: &mut Array2<f64>, detrend: bool, standardize: Standardize) {
    if detrend {
        let means = match standardize {
            Standardize::Psc if signals.nrows() > 0 => signals.mean_axis(Axis(0)),
            _ => None,
        };
        detrend_inplace(signals);
        if let Some(means) = means {
            *signals += &means;
        }
    }
    standardize_inplace(signals, standardize);
}


#[cfg(test)]
mod test {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn detrend_removes_linear_trend() {
        let mut data = Array2::from_shape_fn((50, 3), |(t, r)| 2.0 + 0.3 * t as f64 * (r + 1) as f64);
        detrend_inplace(&mut data);
        for v in data.iter() {
            approx::assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn detrend_keeps_oscillations() {
        let mut data = Array2::from_shape_fn((64, 1), |(t, _)| (t as f64 * 0.7).sin() + 0.1 * t as f64);
        detrend_inplace(&mut data);
        let mean = data.sum() / 64.0;
        approx::assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-10);
        assert!(data.iter().any(|v| v.abs() > 0.5));
    }

    #[test]
    fn zscore_sample_uses_ddof_one() {
        let mut data = Array2::from_shape_vec((4, 1), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        standardize_inplace(&mut data, Standardize::ZscoreSample);
        // sample std of 1..4 is sqrt(5/3)
        let std = (5.0f64 / 3.0).sqrt();
        approx::assert_abs_diff_eq!(data[[0, 0]], -1.5 / std, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(data[[3, 0]], 1.5 / std, epsilon = 1e-12);

        let out_var = data.iter().map(|v| v * v).sum::<f64>() / 3.0;
        approx::assert_abs_diff_eq!(out_var, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn zscore_uses_ddof_zero() {
        let mut data = Array2::from_shape_vec((2, 1), vec![1.0, 3.0]).unwrap();
        standardize_inplace(&mut data, Standardize::Zscore);
        assert_eq!(data[[0, 0]], -1.0);
        assert_eq!(data[[1, 0]], 1.0);
    }

    #[test]
    fn constant_columns_become_zero() {
        let mut data = Array2::from_elem((10, 2), 5.0);
        standardize_inplace(&mut data, Standardize::ZscoreSample);
        assert!(data.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn single_timepoint_is_left_alone() {
        let mut data = Array2::from_elem((1, 3), 4.0);
        standardize_inplace(&mut data, Standardize::ZscoreSample);
        assert!(data.iter().all(|v| *v == 4.0));
    }

    #[test]
    fn psc_is_relative_to_mean() {
        let mut data = Array2::from_shape_vec((2, 1), vec![90.0, 110.0]).unwrap();
        standardize_inplace(&mut data, Standardize::Psc);
        approx::assert_abs_diff_eq!(data[[0, 0]], -10.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(data[[1, 0]], 10.0, epsilon = 1e-12);
    }

    #[test]
    fn psc_after_detrend_is_relative_to_the_signal_mean() {
        let mut data = Array2::from_shape_vec((4, 1), vec![90.0, 110.0, 90.0, 110.0]).unwrap();
        clean(&mut data, true, Standardize::Psc);
        // trend 4 per sample around mean 100
        let expected = [-4.0, 12.0, -12.0, 4.0];
        for (v, e) in data.iter().zip(expected.iter()) {
            approx::assert_abs_diff_eq!(*v, *e, epsilon = 1e-10);
        }
    }

    #[test]
    fn clean_without_detrend_only_standardizes() {
        let mut data = Array2::from_shape_vec((2, 1), vec![1.0, 3.0]).unwrap();
        clean(&mut data, false, Standardize::Zscore);
        assert_eq!(data[[0, 0]], -1.0);
        assert_eq!(data[[1, 0]], 1.0);
    }

    #[test]
    fn strategies_parse_from_strings() {
        assert_eq!("zscore_sample".parse::<Standardize>().unwrap(), Standardize::ZscoreSample);
        assert_eq!("PSC".parse::<Standardize>().unwrap(), Standardize::Psc);
        assert_eq!("none".parse::<Standardize>().unwrap(), Standardize::None);
        assert!("minmax".parse::<Standardize>().is_err());
        assert_eq!(Standardize::Zscore.to_string(), "zscore");
    }
}
