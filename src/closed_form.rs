//! Closed-form companions to the resampling tests.

use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF, StudentsT};

use crate::error::{ResampleError, Result};
use crate::tools::{norm_ppf, ConfidenceBounds, ConfidenceInterval, MathUtil};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TTestInterval {
    pub diff_ci: ConfidenceInterval,
    /// `diff_ci` relative to the control mean.
    pub uplift_ci: ConfidenceInterval,
}

fn sample_variance(x: &[f64]) -> f64 {
    let m = x.mean();
    x.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (x.len() - 1) as f64
}

/// Student-t interval for `mean(b) - mean(a)`.
///
/// The critical value uses `n_a + n_b - 2` degrees of freedom, the standard
/// error is the unpooled one.
pub fn ttest_confidence_interval(a: &[f64], b: &[f64], confidence_level: f64) -> Result<TTestInterval> {
    let bounds = ConfidenceBounds::new(confidence_level)?;
    if a.len() < 2 || b.len() < 2 {
        return Err(ResampleError::config("each sample needs at least 2 observations"));
    }
    let (n_a, n_b) = (a.len() as f64, b.len() as f64);
    let df = n_a + n_b - 2.0;
    let t = StudentsT::new(0.0, 1.0, df)
        .map_err(ResampleError::distribution)?
        .inverse_cdf(bounds.right);

    let m_a = a.mean();
    let diff = b.mean() - m_a;
    let se = (sample_variance(a) / n_a + sample_variance(b) / n_b).sqrt();
    let (lower, upper) = (diff - t * se, diff + t * se);
    Ok(TTestInterval {
        diff_ci: ConfidenceInterval::new(lower, upper),
        uplift_ci: ConfidenceInterval::new(lower / m_a, upper / m_a),
    })
}

/// Wilson score interval for a binomial proportion `p` observed over `n` trials.
pub fn binom_wilson_confidence_interval(p: f64, n: u64, confidence_level: f64) -> Result<ConfidenceInterval> {
    let bounds = ConfidenceBounds::new(confidence_level)?;
    if n == 0 {
        return Err(ResampleError::config("n must be positive"));
    }
    if !(0.0..=1.0).contains(&p) {
        return Err(ResampleError::config(format!("p must be in [0, 1], got {p}")));
    }
    let n = n as f64;
    let z = norm_ppf(bounds.right);
    let z2 = z * z;
    let center = p + z2 / (2.0 * n);
    let half = z * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt();
    let scale = 1.0 + z2 / n;
    Ok(ConfidenceInterval::new((center - half) / scale, (center + half) / scale))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GSquared {
    pub g_squared: f64,
    pub df: f64,
    pub pvalue: f64,
}

/// Log-likelihood ratio test of independence for an r x c contingency table.
pub fn g_squared(table: &[Vec<f64>]) -> Result<GSquared> {
    let rows = table.len();
    let cols = table.first().map_or(0, Vec::len);
    if rows < 2 || cols < 2 {
        return Err(ResampleError::config("contingency table must be at least 2 x 2"));
    }
    if table.iter().any(|r| r.len() != cols) {
        return Err(ResampleError::config("contingency table rows must have equal length"));
    }
    if table.iter().flatten().any(|&v| v.is_nan() || v < 0.0) {
        return Err(ResampleError::config("contingency table counts must be non-negative"));
    }

    let row_sums: Vec<f64> = table.iter().map(|r| r.iter().sum()).collect();
    let col_sums: Vec<f64> = (0..cols).map(|j| table.iter().map(|r| r[j]).sum()).collect();
    let total: f64 = row_sums.iter().sum();
    if row_sums.iter().chain(&col_sums).any(|&s| s == 0.0) {
        return Err(ResampleError::config("contingency table has an empty row or column"));
    }

    let mut g = 0.0;
    for (i, row) in table.iter().enumerate() {
        for (j, &observed) in row.iter().enumerate() {
            if observed > 0.0 {
                let expected = row_sums[i] * col_sums[j] / total;
                g += observed * (observed / expected).ln();
            }
        }
    }
    let g = 2.0 * g;
    let df = ((rows - 1) * (cols - 1)) as f64;
    let pvalue = ChiSquared::new(df).map_err(ResampleError::distribution)?.sf(g);
    Ok(GSquared {
        g_squared: g,
        df,
        pvalue,
    })
}
