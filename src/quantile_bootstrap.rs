//! Quantile comparison without resample-then-sort.
//!
//! The rank of the q-th order statistic of a bootstrap sample of size n is
//! Binomial(n + 1, q) distributed, so each trial draws one rank per arm and
//! reads the sorted sample at it.

use rand_distr::{Binomial, Distribution};
use tracing::info;

use crate::bootstrapping::diffs_and_uplifts;
use crate::config::{SessionConfig, DEFAULT_DRAWS};
use crate::engine::columns;
use crate::error::{ResampleError, Result};
use crate::session::{
    not_resampled, ChartData, ChartPanel, Ecdf, SessionCore, StrategyKnobs, TestParameters,
    TestReport,
};
use crate::tools::{add_one_pvalue, calculate_uplift, MathUtil, Sidedness};

#[derive(Debug, Clone)]
struct QuantileState {
    resample_a: Vec<f64>,
    resample_b: Vec<f64>,
    uplift: f64,
}

#[derive(Debug, Clone)]
pub struct QuantileBootstrapTest {
    core: SessionCore,
    q: f64,
    state: Option<QuantileState>,
}

fn rank_to_index(rank: u64, len: usize) -> usize {
    (rank as usize).min(len - 1)
}

impl QuantileBootstrapTest {
    pub const NAME: &'static str = "quantile_bootstrap";

    pub fn new(q: f64, config: SessionConfig) -> Result<Self> {
        if !(q > 0.0 && q < 1.0) {
            return Err(ResampleError::config(format!("q must be in (0, 1), got {q}")));
        }
        Ok(Self {
            core: SessionCore::new(config)?,
            q,
            state: None,
        })
    }

    pub fn default_config() -> SessionConfig {
        SessionConfig::default().with_resamples(DEFAULT_DRAWS)
    }

    pub fn q(&self) -> f64 {
        self.q
    }

    pub fn core(&self) -> &SessionCore {
        &self.core
    }

    pub(crate) fn core_mut(&mut self) -> &mut SessionCore {
        &mut self.core
    }

    pub fn set_confidence_level(&mut self, level: f64) -> Result<()> {
        self.core.set_confidence_level(level)
    }

    pub(crate) fn resample_samples(&mut self, samples: &[&[f64]]) -> Result<TestParameters> {
        match *samples {
            [a, b] => self.resample(a, b),
            _ => Err(ResampleError::config("quantile bootstrap takes exactly two samples")),
        }
    }

    pub fn resample(&mut self, sample_a: &[f64], sample_b: &[f64]) -> Result<TestParameters> {
        if sample_a.is_empty() || sample_b.is_empty() {
            return Err(ResampleError::config("samples must not be empty"));
        }
        let mut sorted_a = sample_a.to_vec();
        let mut sorted_b = sample_b.to_vec();
        sorted_a.sort_by(f64::total_cmp);
        sorted_b.sort_by(f64::total_cmp);

        let rank_a = Binomial::new(sorted_a.len() as u64 + 1, self.q)
            .map_err(ResampleError::distribution)?;
        let rank_b = Binomial::new(sorted_b.len() as u64 + 1, self.q)
            .map_err(ResampleError::distribution)?;

        let uplift = calculate_uplift(
            sorted_a.quantile(&[self.q])[0],
            sorted_b.quantile(&[self.q])[0],
        );

        let (len_a, len_b) = (sorted_a.len(), sorted_b.len());
        let rows = self.core.engine()?.resample(|rng| {
            [
                sorted_a[rank_to_index(rank_a.sample(rng), len_a)],
                sorted_b[rank_to_index(rank_b.sample(rng), len_b)],
            ]
        })?;
        let [resample_a, resample_b] = columns(&rows);

        info!(strategy = Self::NAME, q = self.q, uplift, "quantile draws ready");
        self.state = Some(QuantileState {
            resample_a,
            resample_b,
            uplift,
        });
        Ok(self.parameters())
    }

    fn state(&self) -> Result<&QuantileState> {
        self.state.as_ref().ok_or_else(|| not_resampled(Self::NAME))
    }

    pub fn compute(&self, sidedness: Sidedness) -> Result<TestReport> {
        let s = self.state()?;
        let wins = s
            .resample_b
            .iter()
            .zip(&s.resample_a)
            .filter(|(b, a)| b > a)
            .count();
        let p = add_one_pvalue(wins, s.resample_a.len());
        let (diffs, uplift_dist) = diffs_and_uplifts(&s.resample_a, &s.resample_b);

        let mut report = TestReport::pvalue(sidedness.apply(p), s.uplift, self.core.ci(&uplift_dist));
        report.control_ci = Some(self.core.ci(&s.resample_a));
        report.test_ci = Some(self.core.ci(&s.resample_b));
        report.diff_ci = Some(self.core.ci(&diffs));
        Ok(report)
    }

    pub fn charts(&self) -> Result<ChartData> {
        let s = self.state()?;
        let (diffs, uplift_dist) = diffs_and_uplifts(&s.resample_a, &s.resample_b);
        Ok(ChartData {
            panels: vec![
                ChartPanel::DensityOverlay {
                    title: format!("Distribution of q {} for each group", self.q),
                    control: s.resample_a.clone(),
                    test: s.resample_b.clone(),
                },
                ChartPanel::Density {
                    title: format!("Distribution of q {} differences (Test-Control)", self.q),
                    values: diffs,
                },
                ChartPanel::UpliftEcdf(Ecdf::new(&uplift_dist, s.uplift)),
            ],
        })
    }

    pub fn parameters(&self) -> TestParameters {
        self.core.parameters(
            Self::NAME,
            StrategyKnobs::QuantileBootstrap { q: self.q },
            self.state.as_ref().map(|s| s.uplift),
        )
    }

    pub fn resamples(&self) -> Result<(&[f64], &[f64])> {
        let s = self.state()?;
        Ok((&s.resample_a, &s.resample_b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(q: f64, seed: u64) -> QuantileBootstrapTest {
        let cfg = QuantileBootstrapTest::default_config()
            .with_resamples(5_000)
            .with_seed(seed);
        QuantileBootstrapTest::new(q, cfg).unwrap()
    }

    fn range(n: usize, offset: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 + offset).collect()
    }

    #[test]
    fn rejects_bad_q_and_inputs() {
        assert!(QuantileBootstrapTest::new(0.0, SessionConfig::default()).is_err());
        assert!(QuantileBootstrapTest::new(1.0, SessionConfig::default()).is_err());
        let mut t = session(0.5, 1);
        assert!(t.resample(&[], &[1.0]).is_err());
        assert!(t.resample_samples(&[&[1.0]]).is_err());
    }

    #[test]
    fn identical_seed_gives_identical_arrays() {
        let a = range(200, 0.0);
        let b = range(300, 5.0);
        let mut x = session(0.9, 99);
        let mut y = session(0.9, 99);
        x.resample(&a, &b).unwrap();
        y.resample(&a, &b).unwrap();
        assert_eq!(x.resamples().unwrap(), y.resamples().unwrap());
    }

    #[test]
    fn uplift_uses_raw_quantiles() {
        let a = range(101, 0.0); // median 50
        let b = range(101, 50.0); // median 100
        let mut t = session(0.5, 3);
        let params = t.resample(&a, &b).unwrap();
        assert!((params.uplift.unwrap() - 1.0).abs() < 1e-12);
        let r = t.compute(Sidedness::TwoSided).unwrap();
        assert!(r.control_ci.unwrap().contains(50.0));
        assert!(r.test_ci.unwrap().contains(100.0));
        assert!(r.significance < 0.01);
        let (ra, rb) = t.resamples().unwrap();
        assert!(ra.iter().all(|v| a.contains(v)));
        assert!(rb.iter().all(|v| b.contains(v)));
    }

    #[test]
    fn tiny_samples_stay_in_bounds() {
        let mut t = session(0.99, 4);
        t.resample(&[1.0], &[2.0, 3.0]).unwrap();
        let (ra, rb) = t.resamples().unwrap();
        assert!(ra.iter().all(|&v| v == 1.0));
        assert!(rb.iter().all(|&v| v == 2.0 || v == 3.0));
    }
}
