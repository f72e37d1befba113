use std::fmt;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::{ResampleError, Result};

const PROB_EPS: f64 = 1e-12;

pub trait MathUtil {
    /// Linearly interpolated quantiles, position `q * (n - 1)`.
    fn quantile(&self, q: &[f64]) -> Vec<f64>;
    fn mean(&self) -> f64;
}

impl MathUtil for [f64] {
    fn quantile(&self, q: &[f64]) -> Vec<f64> {
        if self.is_empty() {
            return vec![f64::NAN; q.len()];
        }
        let n = self.len() as f64;
        let mut sorted = self.to_vec();
        sorted.par_sort_unstable_by(f64::total_cmp);
        q.iter()
            .map(|&quantile| {
                let m = 1.0 - quantile;
                let pos = quantile * n + m - 1.0;
                let j = (pos.floor().max(0.0) as usize).min(sorted.len() - 1);
                let g = pos.fract().max(0.0);
                if j + 1 < sorted.len() {
                    (1.0 - g) * sorted[j] + g * sorted[j + 1]
                } else {
                    sorted[j]
                }
            })
            .collect()
    }

    fn mean(&self) -> f64 {
        self.iter().sum::<f64>() / self.len() as f64
    }
}

#[inline(always)]
pub fn calculate_uplift(before: f64, after: f64) -> f64 {
    (after - before) / before
}

/// Median with linear interpolation; the default alternative statistic.
pub fn median(values: &[f64]) -> f64 {
    values.quantile(&[0.5])[0]
}

/// A named statistic over one sample, shareable across worker threads.
#[derive(Clone)]
pub struct Statistic {
    name: String,
    func: Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>,
}

impl Statistic {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn mean() -> Self {
        Self::new("mean", |x: &[f64]| x.mean())
    }

    pub fn median() -> Self {
        Self::new("median", median)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn eval(&self, sample: &[f64]) -> f64 {
        (self.func)(sample)
    }
}

impl Default for Statistic {
    fn default() -> Self {
        Self::mean()
    }
}

impl fmt::Debug for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statistic").field("name", &self.name).finish()
    }
}

/// Lower and upper quantile levels for a confidence level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBounds {
    pub left: f64,
    pub right: f64,
}

impl ConfidenceBounds {
    pub fn new(confidence_level: f64) -> Result<Self> {
        validate_confidence_level(confidence_level)?;
        let left = (1.0 - confidence_level) / 2.0;
        Ok(Self {
            left,
            right: 1.0 - left,
        })
    }

    /// Interval read from the empirical quantiles of `data`.
    pub fn interval(&self, data: &[f64]) -> ConfidenceInterval {
        let q = data.quantile(&[self.left, self.right]);
        ConfidenceInterval::new(q[0], q[1])
    }
}

pub(crate) fn validate_confidence_level(level: f64) -> Result<()> {
    if level.is_finite() && level > 0.0 && level < 1.0 {
        Ok(())
    } else {
        Err(ResampleError::config(format!(
            "confidence_level must be in (0, 1), got {level}"
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceInterval {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }

    pub fn as_tuple(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }
}

/// Which tail(s) the reported significance covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Sidedness {
    OneSided,
    #[default]
    TwoSided,
}

impl Sidedness {
    pub fn from_two_sided(two_sided: bool) -> Self {
        if two_sided {
            Sidedness::TwoSided
        } else {
            Sidedness::OneSided
        }
    }

    pub fn is_two_sided(self) -> bool {
        self == Sidedness::TwoSided
    }

    /// Folds a one-sided probability into the requested sidedness.
    ///
    /// `min(2p, 2 - 2p)` is exact only for a null distribution symmetric
    /// about the boundary.
    pub fn apply(self, p: f64) -> f64 {
        match self {
            Sidedness::OneSided => p,
            Sidedness::TwoSided => fold_two_sided(p),
        }
    }
}

#[inline]
pub fn fold_two_sided(p: f64) -> f64 {
    (2.0 - 2.0 * p).min(p * 2.0)
}

/// Add-one smoothed tail probability, never exactly zero.
#[inline]
pub fn add_one_pvalue(count: usize, n_resamples: usize) -> f64 {
    (count + 1) as f64 / (n_resamples + 1) as f64
}

fn standard_normal() -> Normal {
    // mean 0, sd 1 is always accepted
    Normal::new(0.0, 1.0).unwrap_or_else(|_| unreachable!())
}

pub fn norm_ppf(p: f64) -> f64 {
    standard_normal().inverse_cdf(p.clamp(PROB_EPS, 1.0 - PROB_EPS))
}

pub fn norm_cdf(z: f64) -> f64 {
    standard_normal().cdf(z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_matches_linear_interpolation() {
        let data = [4.0, 1.0, 3.0, 2.0, 5.0];
        let q = data.quantile(&[0.0, 0.25, 0.5, 1.0]);
        assert_eq!(q, vec![1.0, 2.0, 3.0, 5.0]);
        let q = [1.0, 2.0].quantile(&[0.5]);
        assert!((q[0] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn quantile_of_empty_is_nan() {
        let empty: [f64; 0] = [];
        assert!(empty.quantile(&[0.5])[0].is_nan());
    }

    #[test]
    fn named_statistics() {
        let data = [1.0, 2.0, 3.0, 10.0];
        assert_eq!(Statistic::mean().eval(&data), 4.0);
        assert_eq!(Statistic::median().eval(&data), 2.5);
        let max = Statistic::new("max", |x: &[f64]| x.iter().cloned().fold(f64::MIN, f64::max));
        assert_eq!(max.name(), "max");
        assert_eq!(max.eval(&data), 10.0);
    }

    #[test]
    fn bounds_sum_to_one() {
        let b = ConfidenceBounds::new(0.9).unwrap();
        assert!((b.left - 0.05).abs() < 1e-12);
        assert!((b.left + b.right - 1.0).abs() < 1e-12);
    }

    #[test]
    fn bounds_reject_out_of_range() {
        assert!(ConfidenceBounds::new(1.0).is_err());
        assert!(ConfidenceBounds::new(0.0).is_err());
        assert!(ConfidenceBounds::new(f64::NAN).is_err());
    }

    #[test]
    fn uplift_by_zero_is_not_special_cased() {
        assert!(calculate_uplift(0.0, 1.0).is_infinite());
        assert!(calculate_uplift(0.0, 0.0).is_nan());
        assert!((calculate_uplift(3.0, 4.0) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn folding() {
        assert!((fold_two_sided(0.01) - 0.02).abs() < 1e-12);
        assert!((fold_two_sided(0.99) - 0.02).abs() < 1e-12);
        assert!((fold_two_sided(0.5) - 1.0).abs() < 1e-12);
        assert_eq!(Sidedness::OneSided.apply(0.3), 0.3);
    }

    #[test]
    fn add_one_never_zero() {
        assert!((add_one_pvalue(0, 9) - 0.1).abs() < 1e-12);
        assert!((add_one_pvalue(9, 9) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn normal_helpers() {
        assert!(norm_ppf(0.5).abs() < 1e-9);
        assert!((norm_ppf(0.975) - 1.959964).abs() < 1e-5);
        assert!((norm_cdf(1.959964) - 0.975).abs() < 1e-5);
    }
}
