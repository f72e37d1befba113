//! Bootstrap confidence intervals for an arbitrary statistic.
//!
//! Three interval methods over the same case-resampled replicates:
//! percentile, pivotal (replicates reflected around the observed value) and
//! BCa, which shifts the nominal levels by a bias correction `z0` and an
//! acceleration `a` estimated from jackknife replicates.

use std::fmt;
use std::str::FromStr;

use rand::distributions::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{ResampleError, Result};
use crate::jackknife::jackknife_replicates_with;
use crate::tools::{
    norm_cdf, norm_ppf, ConfidenceBounds, ConfidenceInterval, MathUtil, Statistic,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiMethod {
    #[default]
    Percentile,
    Pivotal,
    Bca,
}

impl FromStr for CiMethod {
    type Err = ResampleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "percentile" => Ok(CiMethod::Percentile),
            "pivotal" => Ok(CiMethod::Pivotal),
            "bca" => Ok(CiMethod::Bca),
            other => Err(ResampleError::config(format!(
                "unknown method {other:?}, use percentile, pivotal or bca"
            ))),
        }
    }
}

impl fmt::Display for CiMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CiMethod::Percentile => "percentile",
            CiMethod::Pivotal => "pivotal",
            CiMethod::Bca => "bca",
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct BootstrapCiOptions {
    pub config: SessionConfig,
    pub method: CiMethod,
    /// Keep the replicate distribution in the result.
    pub return_dist: bool,
}

impl BootstrapCiOptions {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_method(mut self, method: CiMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_distribution(mut self, return_dist: bool) -> Self {
        self.return_dist = return_dist;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BcaDiagnostics {
    pub z0: f64,
    pub acceleration: f64,
    /// Nominal levels shifted by `z0` and `acceleration`.
    pub left_adjusted: f64,
    pub right_adjusted: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BootstrapCi {
    pub interval: ConfidenceInterval,
    pub distribution: Option<Vec<f64>>,
    pub bca: Option<BcaDiagnostics>,
}

/// `Φ(z0 + (z0 + z) / (1 - a (z0 + z)))` for one nominal level.
fn bca_level(level: f64, z0: f64, acceleration: f64) -> f64 {
    let z = norm_ppf(level);
    norm_cdf(z0 + (z0 + z) / (1.0 - acceleration * (z0 + z)))
}

/// BCa-adjusted quantile levels; `z0 = a = 0` returns the nominal ones.
pub fn bca_adjusted_levels(bounds: ConfidenceBounds, z0: f64, acceleration: f64) -> (f64, f64) {
    (
        bca_level(bounds.left, z0, acceleration),
        bca_level(bounds.right, z0, acceleration),
    )
}

/// Skewness-based acceleration from jackknife replicates, 0 when they do not vary.
pub fn acceleration(jackknife: &[f64]) -> f64 {
    let mean = jackknife.mean();
    let (sum2, sum3) = jackknife.iter().fold((0.0, 0.0), |(s2, s3), &j| {
        let d = mean - j;
        (s2 + d * d, s3 + d * d * d)
    });
    let denom = 6.0 * sum2.powf(1.5);
    if denom == 0.0 {
        warn!("jackknife replicates do not vary, acceleration set to 0");
        0.0
    } else {
        sum3 / denom
    }
}

fn bootstrap_replicates(sample: &[f64], statistic: &Statistic, config: &SessionConfig) -> Result<Vec<f64>> {
    let len = sample.len();
    let idx = Uniform::new(0, len);
    config.engine()?.resample_scalar(|rng| {
        let resampled: Vec<f64> = (0..len).map(|_| sample[idx.sample(rng)]).collect();
        statistic.eval(&resampled)
    })
}

/// Case-resampling bootstrap interval for `statistic` over one sample.
pub fn bootstrap_ci(
    sample: &[f64],
    statistic: &Statistic,
    options: &BootstrapCiOptions,
) -> Result<BootstrapCi> {
    let config = options.config.clone().validate()?;
    let bounds = ConfidenceBounds::new(config.confidence_level)?;
    if sample.is_empty() {
        return Err(ResampleError::config("sample must not be empty"));
    }
    if options.method == CiMethod::Bca && sample.len() < 2 {
        return Err(ResampleError::config("bca needs at least 2 observations"));
    }

    let observed = statistic.eval(sample);
    let replicates = bootstrap_replicates(sample, statistic, &config)?;

    let (interval, bca) = match options.method {
        CiMethod::Percentile => (bounds.interval(&replicates), None),
        CiMethod::Pivotal => {
            let reflected: Vec<f64> = replicates.iter().map(|r| 2.0 * observed - r).collect();
            (bounds.interval(&reflected), None)
        }
        CiMethod::Bca => {
            let below = replicates.iter().filter(|&&r| r < observed).count();
            let z0 = norm_ppf(below as f64 / replicates.len() as f64);
            let jackknife = jackknife_replicates_with(sample, statistic, config.parallelism)?;
            let acceleration = acceleration(&jackknife);
            let (left, right) = bca_adjusted_levels(bounds, z0, acceleration);
            debug!(z0, acceleration, left, right, "bca levels");
            let q = replicates.quantile(&[left, right]);
            (
                ConfidenceInterval::new(q[0], q[1]),
                Some(BcaDiagnostics {
                    z0,
                    acceleration,
                    left_adjusted: left,
                    right_adjusted: right,
                }),
            )
        }
    };

    info!(
        statistic = statistic.name(),
        method = %options.method,
        lower = interval.lower,
        upper = interval.upper,
        "bootstrap interval ready"
    );
    Ok(BootstrapCi {
        interval,
        distribution: options.return_dist.then_some(replicates),
        bca,
    })
}

/// Lifts a statistic over several equal-length columns into a function
/// returning its percentile bootstrap interval.
///
/// Each trial resamples whole rows so that values from the same
/// observation stay together.
pub fn bootstrap_wrapper<F>(
    statistic: F,
    config: SessionConfig,
    return_dist: bool,
) -> impl Fn(&[&[f64]]) -> Result<BootstrapCi>
where
    F: Fn(&[&[f64]]) -> f64 + Send + Sync,
{
    move |columns: &[&[f64]]| {
        let config = config.clone().validate()?;
        let bounds = ConfidenceBounds::new(config.confidence_level)?;
        let Some(first) = columns.first() else {
            return Err(ResampleError::config("pass at least one column"));
        };
        let len = first.len();
        if len == 0 {
            return Err(ResampleError::config("columns must not be empty"));
        }
        if columns.iter().any(|c| c.len() != len) {
            return Err(ResampleError::config("all columns must have the same length"));
        }

        let idx = Uniform::new(0, len);
        let replicates = config.engine()?.resample_scalar(|rng| {
            let rows: Vec<usize> = (0..len).map(|_| idx.sample(rng)).collect();
            let resampled: Vec<Vec<f64>> = columns
                .iter()
                .map(|c| rows.iter().map(|&r| c[r]).collect())
                .collect();
            let views: Vec<&[f64]> = resampled.iter().map(Vec::as_slice).collect();
            statistic(&views)
        })?;

        Ok(BootstrapCi {
            interval: bounds.interval(&replicates),
            distribution: return_dist.then_some(replicates),
            bca: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(method: CiMethod) -> BootstrapCiOptions {
        BootstrapCiOptions::new(SessionConfig::default().with_resamples(3_000).with_seed(17))
            .with_method(method)
    }

    fn skewed() -> Vec<f64> {
        (1..=60).map(|i| ((i * 13) % 17) as f64 + if i % 9 == 0 { 40.0 } else { 0.0 }).collect()
    }

    #[test]
    fn parses_methods() {
        assert_eq!("bca".parse::<CiMethod>().unwrap(), CiMethod::Bca);
        assert_eq!("pivotal".parse::<CiMethod>().unwrap(), CiMethod::Pivotal);
        assert_eq!(CiMethod::Percentile.to_string(), "percentile");
        assert!(matches!(
            "studentized".parse::<CiMethod>(),
            Err(ResampleError::Configuration(_))
        ));
    }

    #[test]
    fn zero_corrections_keep_nominal_levels() {
        let bounds = ConfidenceBounds::new(0.9).unwrap();
        let (l, r) = bca_adjusted_levels(bounds, 0.0, 0.0);
        assert!((l - 0.05).abs() < 1e-9);
        assert!((r - 0.95).abs() < 1e-9);
    }

    #[test]
    fn flat_jackknife_has_zero_acceleration() {
        assert_eq!(acceleration(&[2.0, 2.0, 2.0]), 0.0);
        // right-skewed replicates push the acceleration negative
        assert!(acceleration(&[1.0, 1.0, 1.0, 10.0]) < 0.0);
    }

    #[test]
    fn pivotal_reflects_percentile() {
        let s = skewed();
        let mean = s.mean();
        let pct = bootstrap_ci(&s, &Statistic::mean(), &options(CiMethod::Percentile)).unwrap();
        let piv = bootstrap_ci(&s, &Statistic::mean(), &options(CiMethod::Pivotal)).unwrap();
        assert!((piv.interval.lower - (2.0 * mean - pct.interval.upper)).abs() < 1e-9);
        assert!((piv.interval.upper - (2.0 * mean - pct.interval.lower)).abs() < 1e-9);
        assert!(pct.distribution.is_none());
    }

    #[test]
    fn bca_reports_diagnostics() {
        let s = skewed();
        let r = bootstrap_ci(
            &s,
            &Statistic::mean(),
            &options(CiMethod::Bca).with_distribution(true),
        )
        .unwrap();
        let diag = r.bca.unwrap();
        assert!(diag.z0.abs() < 0.5);
        assert!(diag.left_adjusted > 0.0 && diag.right_adjusted < 1.0);
        assert!(r.interval.lower < r.interval.upper);
        assert!(r.interval.contains(s.mean()));
        assert_eq!(r.distribution.unwrap().len(), 3_000);
    }

    #[test]
    fn bca_matches_across_parallelism() {
        let s = skewed();
        let run = |p: crate::engine::Parallelism| {
            let mut opts = options(CiMethod::Bca);
            opts.config = opts.config.with_parallelism(p);
            let r = bootstrap_ci(&s, &Statistic::median(), &opts).unwrap();
            (r.interval, r.bca.unwrap().acceleration)
        };
        let sequential = run(crate::engine::Parallelism::Sequential);
        assert_eq!(sequential, run(crate::engine::Parallelism::Available));
        let two = std::num::NonZeroUsize::new(2).unwrap();
        assert_eq!(sequential, run(crate::engine::Parallelism::Threads(two)));
    }

    #[test]
    fn rejects_empty_and_single_point_bca() {
        let stat = Statistic::mean();
        assert!(bootstrap_ci(&[], &stat, &options(CiMethod::Percentile)).is_err());
        assert!(bootstrap_ci(&[1.0], &stat, &options(CiMethod::Bca)).is_err());
        assert!(bootstrap_ci(&[1.0], &stat, &options(CiMethod::Percentile)).is_ok());
    }

    #[test]
    fn wrapper_resamples_rows_jointly() {
        let x: Vec<f64> = (0..40).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v + 1.0).collect();
        let slope = |cols: &[&[f64]]| {
            let (x, y) = (cols[0], cols[1]);
            let (mx, my) = (x.mean(), y.mean());
            let cov: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
            let var: f64 = x.iter().map(|a| (a - mx).powi(2)).sum();
            cov / var
        };
        let cfg = SessionConfig::default().with_resamples(500).with_seed(5);
        let ci = bootstrap_wrapper(slope, cfg, true);
        let r = ci(&[&x, &y]).unwrap();
        // exact linear relation survives any row resample
        assert!((r.interval.lower - 3.0).abs() < 1e-9);
        assert!((r.interval.upper - 3.0).abs() < 1e-9);
        assert_eq!(r.distribution.map(|d| d.len()), Some(500));

        assert!(ci(&[&x, &y[..10]]).is_err());
        assert!(ci(&[]).is_err());
    }
}
