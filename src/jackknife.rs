use rayon::prelude::*;
use serde::Serialize;

use crate::engine::Parallelism;
use crate::error::{ResampleError, Result};
use crate::tools::{norm_ppf, validate_confidence_level, ConfidenceInterval, MathUtil, Statistic};

/// Jackknife estimate of a statistic with its bias and standard error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JackknifeEstimate {
    /// Bias-corrected estimate, `observed - bias`.
    pub estimate: f64,
    pub bias: f64,
    pub se: f64,
    /// Normal approximation `estimate ± z * se`.
    pub ci: ConfidenceInterval,
}

/// Leave-one-out copies of `sample`, the i-th missing element i.
pub fn jackknife_samples(sample: &[f64]) -> impl Iterator<Item = Vec<f64>> + '_ {
    (0..sample.len()).map(move |i| leave_out(sample, i))
}

fn leave_out(sample: &[f64], i: usize) -> Vec<f64> {
    let mut v = Vec::with_capacity(sample.len().saturating_sub(1));
    v.extend_from_slice(&sample[..i]);
    v.extend_from_slice(&sample[i + 1..]);
    v
}

/// The statistic evaluated on each leave-one-out sample, in index order.
pub fn jackknife_replicates(sample: &[f64], statistic: &Statistic) -> Vec<f64> {
    (0..sample.len())
        .into_par_iter()
        .map(|i| statistic.eval(&leave_out(sample, i)))
        .collect()
}

/// [`jackknife_replicates`] under an explicit parallelism setting.
pub fn jackknife_replicates_with(
    sample: &[f64],
    statistic: &Statistic,
    parallelism: Parallelism,
) -> Result<Vec<f64>> {
    let replicate = |i: usize| statistic.eval(&leave_out(sample, i));
    if parallelism.is_sequential() {
        return Ok((0..sample.len()).map(replicate).collect());
    }
    match parallelism {
        Parallelism::Threads(workers) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers.get())
                .build()?;
            Ok(pool.install(|| (0..sample.len()).into_par_iter().map(replicate).collect()))
        }
        _ => Ok(jackknife_replicates(sample, statistic)),
    }
}

pub fn jackknife_estimate(
    sample: &[f64],
    statistic: &Statistic,
    confidence_level: f64,
) -> Result<JackknifeEstimate> {
    validate_confidence_level(confidence_level)?;
    if sample.len() < 2 {
        return Err(ResampleError::config(
            "jackknife needs at least 2 observations",
        ));
    }
    let n = sample.len() as f64;
    let observed = statistic.eval(sample);
    let replicates = jackknife_replicates(sample, statistic);
    let mean = replicates.mean();

    let bias = (n - 1.0) * (mean - observed);
    let estimate = observed - bias;
    let spread = replicates.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let se = ((n - 1.0) * spread).sqrt();

    let z = norm_ppf(1.0 - (1.0 - confidence_level) / 2.0);
    Ok(JackknifeEstimate {
        estimate,
        bias,
        se,
        ci: ConfidenceInterval::new(estimate - z * se, estimate + z * se),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leave_one_out_samples() {
        let s = [1.0, 2.0, 3.0];
        let all: Vec<Vec<f64>> = jackknife_samples(&s).collect();
        assert_eq!(all, vec![vec![2.0, 3.0], vec![1.0, 3.0], vec![1.0, 2.0]]);
        let reps = jackknife_replicates(&s, &Statistic::mean());
        assert_eq!(reps, vec![2.5, 2.0, 1.5]);
    }

    #[test]
    fn replicates_ignore_parallelism() {
        let s: Vec<f64> = (0..57).map(|i| ((i * 13) % 17) as f64 * 0.5).collect();
        let median = Statistic::median();
        let reference = jackknife_replicates(&s, &median);
        let two = std::num::NonZeroUsize::new(2).unwrap();
        for p in [Parallelism::Sequential, Parallelism::Threads(two), Parallelism::Available] {
            assert_eq!(jackknife_replicates_with(&s, &median, p).unwrap(), reference);
        }
    }

    #[test]
    fn mean_has_no_bias() {
        let s: Vec<f64> = (0..30).map(|i| ((i * 7) % 11) as f64).collect();
        let est = jackknife_estimate(&s, &Statistic::mean(), 0.95).unwrap();
        assert!(est.bias.abs() < 1e-9);
        assert!((est.estimate - s.mean()).abs() < 1e-9);
        // jackknife se of the mean is the usual s / sqrt(n)
        let var = s.iter().map(|v| (v - s.mean()).powi(2)).sum::<f64>() / 29.0;
        assert!((est.se - (var / 30.0).sqrt()).abs() < 1e-9);
        assert!(est.ci.contains(est.estimate));
        assert!((est.ci.upper - est.estimate - 1.959964 * est.se).abs() < 1e-5);
    }

    #[test]
    fn plug_in_variance_bias_is_corrected() {
        // the jackknife turns the 1/n variance into the unbiased 1/(n-1) one
        let s = [1.0, 4.0, 2.0, 8.0, 5.0];
        let plug_in = Statistic::new("var", |x: &[f64]| {
            let m = x.mean();
            x.iter().map(|v| (v - m).powi(2)).sum::<f64>() / x.len() as f64
        });
        let est = jackknife_estimate(&s, &plug_in, 0.9).unwrap();
        let m = s.mean();
        let unbiased = s.iter().map(|v| (v - m).powi(2)).sum::<f64>() / 4.0;
        assert!((est.estimate - unbiased).abs() < 1e-9);
        assert!(est.bias < 0.0);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(jackknife_estimate(&[1.0], &Statistic::mean(), 0.95).is_err());
        assert!(jackknife_estimate(&[1.0, 2.0], &Statistic::mean(), 1.0).is_err());
    }
}
