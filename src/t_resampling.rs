//! Parametric comparison of two means from summary statistics.
//!
//! Each arm's sampling distribution of the mean is a location-scale
//! Student-t. The draws only feed charts and interval display; the p-value
//! is analytic.

use rand_distr::{Distribution, StudentT};
use statrs::distribution::{ContinuousCDF, StudentsT};
use tracing::info;

use crate::bootstrapping::diffs_and_uplifts;
use crate::config::{SessionConfig, DEFAULT_DRAWS};
use crate::engine::columns;
use crate::error::{ResampleError, Result};
use crate::session::{
    not_resampled, ChartData, ChartPanel, Ecdf, SessionCore, StrategyKnobs, TestParameters,
    TestReport,
};
use crate::tools::{calculate_uplift, ConfidenceBounds, ConfidenceInterval, Sidedness};

#[derive(Debug, Clone)]
struct TState {
    mean: [f64; 2],
    sem: [f64; 2],
    n: [u64; 2],
    resample_a: Vec<f64>,
    resample_b: Vec<f64>,
    uplift: f64,
}

impl TState {
    fn delta_mean(&self) -> f64 {
        self.mean[1] - self.mean[0]
    }

    /// Standard error of the mean difference: pooled variance when
    /// `equal_var`, otherwise the Welch form.
    fn delta_se(&self, equal_var: bool) -> f64 {
        if equal_var {
            let [n0, n1] = self.n.map(|v| v as f64);
            let [v0, v1] = [self.sem[0].powi(2) * n0, self.sem[1].powi(2) * n1];
            let pooled = ((n0 - 1.0) * v0 + (n1 - 1.0) * v1) / (n0 + n1 - 2.0);
            (pooled * (1.0 / n0 + 1.0 / n1)).sqrt()
        } else {
            (self.sem[0].powi(2) + self.sem[1].powi(2)).sqrt()
        }
    }

    /// Pooled df, or Welch–Satterthwaite.
    fn df(&self, equal_var: bool) -> f64 {
        let [n0, n1] = self.n.map(|v| v as f64);
        if equal_var {
            n0 + n1 - 2.0
        } else {
            let [s0, s1] = self.sem;
            (s0.powi(2) + s1.powi(2)).powi(2)
                / (s0.powi(4) / (n0 - 1.0) + s1.powi(4) / (n1 - 1.0))
        }
    }
}

fn t_interval(bounds: ConfidenceBounds, loc: f64, scale: f64, df: f64) -> Result<ConfidenceInterval> {
    let t = StudentsT::new(loc, scale, df).map_err(ResampleError::distribution)?;
    Ok(ConfidenceInterval::new(
        t.inverse_cdf(bounds.left),
        t.inverse_cdf(bounds.right),
    ))
}

#[derive(Debug, Clone)]
pub struct TDistributionResamplingTest {
    core: SessionCore,
    state: Option<TState>,
}

impl TDistributionResamplingTest {
    pub const NAME: &'static str = "t_distribution_resampling";

    pub fn new(config: SessionConfig) -> Result<Self> {
        Ok(Self {
            core: SessionCore::new(config)?,
            state: None,
        })
    }

    pub fn default_config() -> SessionConfig {
        SessionConfig::default().with_resamples(DEFAULT_DRAWS)
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

    /// Control first in every slice.
    pub fn resample(&mut self, mean: &[f64], std: &[f64], n: &[u64]) -> Result<TestParameters> {
        let (&[m0, m1], &[s0, s1], &[n0, n1]) = (mean, std, n) else {
            return Err(ResampleError::config(
                "mean, std and n must have exactly 2 elements each",
            ));
        };
        if n0 < 2 || n1 < 2 {
            return Err(ResampleError::config("each arm needs at least 2 observations"));
        }
        if !(s0 > 0.0 && s1 > 0.0) {
            return Err(ResampleError::config("standard deviations must be positive"));
        }
        let sem = [s0 / (n0 as f64).sqrt(), s1 / (n1 as f64).sqrt()];
        let t_a = StudentT::new((n0 - 1) as f64).map_err(ResampleError::distribution)?;
        let t_b = StudentT::new((n1 - 1) as f64).map_err(ResampleError::distribution)?;

        let rows = self.core.engine()?.resample(|rng| {
            [
                m0 + sem[0] * t_a.sample(rng),
                m1 + sem[1] * t_b.sample(rng),
            ]
        })?;
        let [resample_a, resample_b] = columns(&rows);
        let uplift = calculate_uplift(m0, m1);

        info!(strategy = Self::NAME, uplift, "t draws ready");
        self.state = Some(TState {
            mean: [m0, m1],
            sem,
            n: [n0, n1],
            resample_a,
            resample_b,
            uplift,
        });
        Ok(self.parameters())
    }

    fn state(&self) -> Result<&TState> {
        self.state.as_ref().ok_or_else(|| not_resampled(Self::NAME))
    }

    /// `p = P(diff <= 0)` under a t with the chosen df, then folded.
    pub fn compute(&self, sidedness: Sidedness, equal_var: bool) -> Result<TestReport> {
        let s = self.state()?;
        let df = s.df(equal_var);
        let diff_dist =
            StudentsT::new(s.delta_mean(), s.delta_se(equal_var), df).map_err(ResampleError::distribution)?;
        let p = diff_dist.cdf(0.0);

        let bounds = self.core.bounds();
        let (diffs, uplift_dist) = diffs_and_uplifts(&s.resample_a, &s.resample_b);
        let mut report = TestReport::pvalue(sidedness.apply(p), s.uplift, self.core.ci(&uplift_dist));
        report.control_ci = Some(t_interval(bounds, s.mean[0], s.sem[0], (s.n[0] - 1) as f64)?);
        report.test_ci = Some(t_interval(bounds, s.mean[1], s.sem[1], (s.n[1] - 1) as f64)?);
        report.diff_ci = Some(self.core.ci(&diffs));
        report.df = Some(df);
        Ok(report)
    }

    pub fn charts(&self) -> Result<ChartData> {
        let s = self.state()?;
        let (diffs, uplift_dist) = diffs_and_uplifts(&s.resample_a, &s.resample_b);
        Ok(ChartData {
            panels: vec![
                ChartPanel::DensityOverlay {
                    title: "Distribution of Mean(s) for each group".into(),
                    control: s.resample_a.clone(),
                    test: s.resample_b.clone(),
                },
                ChartPanel::Density {
                    title: "Distribution of Mean(s) differences (Test-Control)".into(),
                    values: diffs,
                },
                ChartPanel::UpliftEcdf(Ecdf::new(&uplift_dist, s.uplift)),
            ],
        })
    }

    pub fn parameters(&self) -> TestParameters {
        let state = self.state.as_ref();
        self.core.parameters(
            Self::NAME,
            StrategyKnobs::TDistributionResampling {
                n: state.map(|s| s.n),
            },
            state.map(|s| s.uplift),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> TDistributionResamplingTest {
        let cfg = TDistributionResamplingTest::default_config()
            .with_resamples(20_000)
            .with_seed(8);
        TDistributionResamplingTest::new(cfg).unwrap()
    }

    #[test]
    fn validates_summary_inputs() {
        let mut t = session();
        assert!(t.resample(&[1.0], &[1.0, 1.0], &[10, 10]).is_err());
        assert!(t.resample(&[1.0, 2.0], &[1.0, 1.0], &[1, 10]).is_err());
        assert!(t.resample(&[1.0, 2.0], &[0.0, 1.0], &[10, 10]).is_err());
        assert!(t.compute(Sidedness::TwoSided, false).is_err());
    }

    #[test]
    fn equal_arms_give_unit_pvalue() {
        let mut t = session();
        t.resample(&[10.0, 10.0], &[2.0, 2.0], &[50, 50]).unwrap();
        let r = t.compute(Sidedness::TwoSided, false).unwrap();
        assert!((r.significance - 1.0).abs() < 1e-9);
        assert!(r.uplift.abs() < 1e-12);
        // equal variances and sizes: Welch df equals the pooled df
        assert!((r.df.unwrap() - 98.0).abs() < 1e-9);
    }

    #[test]
    fn welch_matches_reference_values() {
        let mut t = session();
        t.resample(&[10.0, 11.0], &[2.0, 4.0], &[30, 40]).unwrap();
        let welch = t.compute(Sidedness::TwoSided, false).unwrap();
        let pooled = t.compute(Sidedness::TwoSided, true).unwrap();
        assert!((pooled.df.unwrap() - 68.0).abs() < 1e-9);
        // sem^2 = 4/30 and 16/40
        let (a, b) = (4.0 / 30.0_f64, 16.0 / 40.0_f64);
        let expected_df = (a + b).powi(2) / (a * a / 29.0 + b * b / 39.0);
        assert!((welch.df.unwrap() - expected_df).abs() < 1e-9);
        // t = 1 / sqrt(a + b) ~ 1.37 -> two-sided p ~ 0.18
        assert!(welch.significance > 0.1 && welch.significance < 0.25);
        assert!((welch.uplift - 0.1).abs() < 1e-12);
    }

    #[test]
    fn pooled_variance_drives_equal_var_pvalue() {
        let mut t = session();
        t.resample(&[10.0, 11.0], &[2.0, 4.0], &[30, 40]).unwrap();
        let pooled = t.compute(Sidedness::TwoSided, true).unwrap();
        // sp^2 = (29 * 4 + 39 * 16) / 68
        let sp2: f64 = (29.0 * 4.0 + 39.0 * 16.0) / 68.0;
        let stat = 1.0 / (sp2 * (1.0 / 30.0 + 1.0 / 40.0)).sqrt();
        let expected = 2.0 * StudentsT::new(0.0, 1.0, 68.0).unwrap().cdf(-stat);
        assert!((pooled.significance - expected).abs() < 1e-9);
        assert!((pooled.significance - 0.2137).abs() < 1e-3);

        let welch = t.compute(Sidedness::TwoSided, false).unwrap();
        assert!((welch.significance - pooled.significance).abs() > 0.01);
    }

    #[test]
    fn analytic_intervals_contain_means() {
        let mut t = session();
        t.resample(&[5.0, 6.0], &[1.0, 1.0], &[100, 100]).unwrap();
        let r = t.compute(Sidedness::OneSided, false).unwrap();
        let c = r.control_ci.unwrap();
        assert!(c.contains(5.0));
        // 1.984 * 0.1 on either side
        assert!((c.upper - c.lower - 2.0 * 1.984 * 0.1).abs() < 0.01);
        assert!(r.diff_ci.unwrap().contains(1.0));
        assert!(r.significance < 1e-6);
    }
}
