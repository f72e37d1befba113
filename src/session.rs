//! Test sessions.
//!
//! A session is configured, then `resample`d with raw data, then `compute`d
//! any number of times. Confidence intervals are read from the stored
//! distributions at `compute` time with the bounds current at that moment,
//! so changing the confidence level needs no new resampling.

use serde::Serialize;

use crate::beta_bayes::{BetaBayesTest, Prior};
use crate::bootstrapping::EmpiricalBootstrapTest;
use crate::config::SessionConfig;
use crate::engine::ResamplingEngine;
use crate::error::{ResampleError, Result};
use crate::quantile_bootstrap::QuantileBootstrapTest;
use crate::t_resampling::TDistributionResamplingTest;
use crate::tools::{ConfidenceBounds, ConfidenceInterval, Sidedness};

/// Configuration and confidence bounds shared by every strategy.
#[derive(Debug, Clone)]
pub struct SessionCore {
    config: SessionConfig,
    bounds: ConfidenceBounds,
}

impl SessionCore {
    pub fn new(config: SessionConfig) -> Result<Self> {
        let config = config.validate()?;
        let bounds = ConfidenceBounds::new(config.confidence_level)?;
        Ok(Self { config, bounds })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn bounds(&self) -> ConfidenceBounds {
        self.bounds
    }

    /// Replaces the confidence level and recomputes the quantile bounds.
    pub fn set_confidence_level(&mut self, level: f64) -> Result<()> {
        self.bounds = ConfidenceBounds::new(level)?;
        self.config.confidence_level = level;
        Ok(())
    }

    pub fn ci(&self, data: &[f64]) -> ConfidenceInterval {
        self.bounds.interval(data)
    }

    pub fn engine(&self) -> Result<ResamplingEngine> {
        self.config.engine()
    }

    pub(crate) fn parameters(
        &self,
        strategy: &'static str,
        knobs: StrategyKnobs,
        uplift: Option<f64>,
    ) -> TestParameters {
        TestParameters {
            strategy,
            config: self.config.clone(),
            bounds: self.bounds,
            knobs,
            resampled: uplift.is_some(),
            uplift,
        }
    }
}

pub(crate) fn not_resampled(strategy: &str) -> ResampleError {
    ResampleError::InvalidState(format!("{strategy}: call resample before compute"))
}

/// Owned snapshot of a session's configuration and derived state.
#[derive(Debug, Clone, Serialize)]
pub struct TestParameters {
    pub strategy: &'static str,
    pub config: SessionConfig,
    pub bounds: ConfidenceBounds,
    pub knobs: StrategyKnobs,
    pub resampled: bool,
    pub uplift: Option<f64>,
}

impl TestParameters {
    pub fn to_json(&self) -> String {
        // plain data with string keys only
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyKnobs {
    BetaBayes {
        prior: Option<[f64; 4]>,
    },
    EmpiricalBootstrap {
        statistic: String,
        ratio: Option<bool>,
        match_max_length: Option<bool>,
        ind: Option<bool>,
    },
    QuantileBootstrap {
        q: f64,
    },
    TDistributionResampling {
        n: Option<[u64; 2]>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignificanceKind {
    /// Posterior probability that test beats control.
    Proba,
    Pvalue,
}

impl SignificanceKind {
    pub fn key(self) -> &'static str {
        match self {
            SignificanceKind::Proba => "proba",
            SignificanceKind::Pvalue => "pvalue",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReportValue {
    Scalar(f64),
    Interval(ConfidenceInterval),
}

/// Summary returned by `compute`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestReport {
    pub significance_kind: SignificanceKind,
    pub significance: f64,
    pub uplift: f64,
    pub uplift_ci: ConfidenceInterval,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_ci: Option<ConfidenceInterval>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_ci: Option<ConfidenceInterval>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_ci: Option<ConfidenceInterval>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub df: Option<f64>,
}

impl TestReport {
    pub(crate) fn pvalue(significance: f64, uplift: f64, uplift_ci: ConfidenceInterval) -> Self {
        Self {
            significance_kind: SignificanceKind::Pvalue,
            significance,
            uplift,
            uplift_ci,
            control_ci: None,
            test_ci: None,
            diff_ci: None,
            control_loss: None,
            test_loss: None,
            df: None,
        }
    }

    /// Ordered key/value view, the shape the readable formatter consumes.
    pub fn entries(&self) -> Vec<(&'static str, ReportValue)> {
        let mut out = vec![
            (self.significance_kind.key(), ReportValue::Scalar(self.significance)),
            ("uplift", ReportValue::Scalar(self.uplift)),
            ("uplift_ci", ReportValue::Interval(self.uplift_ci)),
        ];
        let intervals = [
            ("control_ci", self.control_ci),
            ("test_ci", self.test_ci),
            ("diff_ci", self.diff_ci),
        ];
        out.extend(
            intervals
                .into_iter()
                .filter_map(|(k, v)| v.map(|ci| (k, ReportValue::Interval(ci)))),
        );
        let scalars = [
            ("control_loss", self.control_loss),
            ("test_loss", self.test_loss),
            ("df", self.df),
        ];
        out.extend(
            scalars
                .into_iter()
                .filter_map(|(k, v)| v.map(|x| (k, ReportValue::Scalar(x)))),
        );
        out
    }

    pub fn get(&self, key: &str) -> Option<ReportValue> {
        self.entries()
            .into_iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }
}

/// Empirical CDF of an uplift distribution with a reference line at the
/// observed uplift. Points above `threshold` are the favourable tail.
#[derive(Debug, Clone, Serialize)]
pub struct Ecdf {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub reference: f64,
    pub threshold: f64,
}

impl Ecdf {
    pub fn new(distribution: &[f64], reference: f64) -> Self {
        let mut x = distribution.to_vec();
        x.sort_by(f64::total_cmp);
        let n = x.len() as f64;
        let y = (0..x.len()).map(|i| i as f64 / n).collect();
        Self {
            x,
            y,
            reference,
            threshold: 0.0,
        }
    }

    pub fn share_above_threshold(&self) -> f64 {
        let above = self.x.iter().filter(|&&v| v > self.threshold).count();
        above as f64 / self.x.len() as f64
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "panel", rename_all = "snake_case")]
pub enum ChartPanel {
    DensityOverlay {
        title: String,
        control: Vec<f64>,
        test: Vec<f64>,
    },
    Density {
        title: String,
        values: Vec<f64>,
    },
    Joint {
        title: String,
        control: Vec<f64>,
        test: Vec<f64>,
    },
    UpliftEcdf(Ecdf),
}

/// Read-only snapshot of the distributions a renderer needs.
#[derive(Debug, Clone, Serialize)]
pub struct ChartData {
    pub panels: Vec<ChartPanel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComputeOptions {
    pub sidedness: Sidedness,
    /// Pooled-variance degrees of freedom; only read by the t strategy.
    pub equal_var: bool,
}

impl ComputeOptions {
    pub fn one_sided() -> Self {
        Self {
            sidedness: Sidedness::OneSided,
            equal_var: false,
        }
    }

    pub fn two_sided() -> Self {
        Self::default()
    }

    pub fn with_equal_var(mut self, equal_var: bool) -> Self {
        self.equal_var = equal_var;
        self
    }
}

/// Raw input for [`TestSession::resample`], one shape per strategy.
#[derive(Debug, Clone)]
pub enum SessionInput {
    /// Successes and totals per arm, plus 0, 2 or 4 prior pseudo-counts.
    Proportions {
        nobs: Vec<u64>,
        counts: Vec<u64>,
        prior: Vec<f64>,
    },
    /// Two raw samples, or numerator/denominator pairs for both arms.
    ///
    /// `match_max_length` and `ind` only apply to the empirical bootstrap;
    /// the quantile bootstrap rejects anything but the defaults.
    Samples {
        samples: Vec<Vec<f64>>,
        match_max_length: bool,
        ind: bool,
    },
    /// Per-arm summary statistics.
    Summary {
        mean: Vec<f64>,
        std: Vec<f64>,
        n: Vec<u64>,
    },
}

impl SessionInput {
    pub fn samples(samples: Vec<Vec<f64>>) -> Self {
        SessionInput::Samples {
            samples,
            match_max_length: false,
            ind: true,
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            SessionInput::Proportions { .. } => "proportions",
            SessionInput::Samples { .. } => "samples",
            SessionInput::Summary { .. } => "summary",
        }
    }
}

/// One interface over every resampling strategy.
#[derive(Debug, Clone)]
pub enum TestSession {
    BetaBayes(BetaBayesTest),
    EmpiricalBootstrap(EmpiricalBootstrapTest),
    QuantileBootstrap(QuantileBootstrapTest),
    TDistributionResampling(TDistributionResamplingTest),
}

impl TestSession {
    pub fn strategy(&self) -> &'static str {
        match self {
            TestSession::BetaBayes(_) => BetaBayesTest::NAME,
            TestSession::EmpiricalBootstrap(_) => EmpiricalBootstrapTest::NAME,
            TestSession::QuantileBootstrap(_) => QuantileBootstrapTest::NAME,
            TestSession::TDistributionResampling(_) => TDistributionResamplingTest::NAME,
        }
    }

    pub fn resample(&mut self, input: SessionInput) -> Result<TestParameters> {
        let shape = input.shape();
        match (self, input) {
            (TestSession::BetaBayes(t), SessionInput::Proportions { nobs, counts, prior }) => {
                let prior = Prior::from_slice(&prior)?;
                t.resample(&nobs, &counts, prior)
            }
            (
                TestSession::EmpiricalBootstrap(t),
                SessionInput::Samples {
                    samples,
                    match_max_length,
                    ind,
                },
            ) => {
                let refs: Vec<&[f64]> = samples.iter().map(Vec::as_slice).collect();
                t.resample(&refs, match_max_length, ind)
            }
            (
                TestSession::QuantileBootstrap(t),
                SessionInput::Samples {
                    samples,
                    match_max_length,
                    ind,
                },
            ) => {
                if match_max_length || !ind {
                    return Err(ResampleError::config(
                        "quantile bootstrap resamples arms independently at their own sizes; \
                         ind and match_max_length are not supported",
                    ));
                }
                let refs: Vec<&[f64]> = samples.iter().map(Vec::as_slice).collect();
                t.resample_samples(&refs)
            }
            (TestSession::TDistributionResampling(t), SessionInput::Summary { mean, std, n }) => {
                t.resample(&mean, &std, &n)
            }
            (session, _) => Err(ResampleError::config(format!(
                "{} cannot resample {shape} input",
                session.strategy()
            ))),
        }
    }

    pub fn compute(&self, options: ComputeOptions) -> Result<TestReport> {
        match self {
            TestSession::BetaBayes(t) => t.compute(options.sidedness),
            TestSession::EmpiricalBootstrap(t) => t.compute(options.sidedness),
            TestSession::QuantileBootstrap(t) => t.compute(options.sidedness),
            TestSession::TDistributionResampling(t) => {
                t.compute(options.sidedness, options.equal_var)
            }
        }
    }

    pub fn charts(&self) -> Result<ChartData> {
        match self {
            TestSession::BetaBayes(t) => t.charts(),
            TestSession::EmpiricalBootstrap(t) => t.charts(),
            TestSession::QuantileBootstrap(t) => t.charts(),
            TestSession::TDistributionResampling(t) => t.charts(),
        }
    }

    pub fn parameters(&self) -> TestParameters {
        match self {
            TestSession::BetaBayes(t) => t.parameters(),
            TestSession::EmpiricalBootstrap(t) => t.parameters(),
            TestSession::QuantileBootstrap(t) => t.parameters(),
            TestSession::TDistributionResampling(t) => t.parameters(),
        }
    }

    pub fn set_confidence_level(&mut self, level: f64) -> Result<()> {
        self.core_mut().set_confidence_level(level)
    }

    fn core_mut(&mut self) -> &mut SessionCore {
        match self {
            TestSession::BetaBayes(t) => t.core_mut(),
            TestSession::EmpiricalBootstrap(t) => t.core_mut(),
            TestSession::QuantileBootstrap(t) => t.core_mut(),
            TestSession::TDistributionResampling(t) => t.core_mut(),
        }
    }
}

impl From<BetaBayesTest> for TestSession {
    fn from(t: BetaBayesTest) -> Self {
        TestSession::BetaBayes(t)
    }
}

impl From<EmpiricalBootstrapTest> for TestSession {
    fn from(t: EmpiricalBootstrapTest) -> Self {
        TestSession::EmpiricalBootstrap(t)
    }
}

impl From<QuantileBootstrapTest> for TestSession {
    fn from(t: QuantileBootstrapTest) -> Self {
        TestSession::QuantileBootstrap(t)
    }
}

impl From<TDistributionResamplingTest> for TestSession {
    fn from(t: TDistributionResamplingTest) -> Self {
        TestSession::TDistributionResampling(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Parallelism;

    fn config() -> SessionConfig {
        SessionConfig::default()
            .with_resamples(2_000)
            .with_seed(11)
            .with_parallelism(Parallelism::Sequential)
    }

    #[test]
    fn core_setter_recomputes_bounds() {
        let mut core = SessionCore::new(config()).unwrap();
        assert!((core.bounds().left - 0.025).abs() < 1e-12);
        core.set_confidence_level(0.8).unwrap();
        assert!((core.bounds().left - 0.1).abs() < 1e-12);
        assert!((core.bounds().right - 0.9).abs() < 1e-12);
        assert_eq!(core.config().confidence_level, 0.8);
        assert!(core.set_confidence_level(1.2).is_err());
        assert_eq!(core.config().confidence_level, 0.8);
    }

    #[test]
    fn compute_before_resample_is_invalid_state() {
        let sessions: Vec<TestSession> = vec![
            BetaBayesTest::new(config()).unwrap().into(),
            EmpiricalBootstrapTest::new(config()).unwrap().into(),
            QuantileBootstrapTest::new(0.5, config()).unwrap().into(),
            TDistributionResamplingTest::new(config()).unwrap().into(),
        ];
        for s in &sessions {
            assert!(matches!(
                s.compute(ComputeOptions::default()),
                Err(ResampleError::InvalidState(_))
            ));
            assert!(matches!(s.charts(), Err(ResampleError::InvalidState(_))));
            assert!(!s.parameters().resampled);
        }
    }

    #[test]
    fn mismatched_input_shape_is_rejected() {
        let mut s: TestSession = BetaBayesTest::new(config()).unwrap().into();
        let err = s
            .resample(SessionInput::samples(vec![vec![1.0], vec![2.0]]))
            .unwrap_err();
        assert!(matches!(err, ResampleError::Configuration(_)));
    }

    #[test]
    fn quantile_session_rejects_bootstrap_knobs() {
        let mut s: TestSession = QuantileBootstrapTest::new(0.5, config()).unwrap().into();
        let samples = vec![vec![1.0, 2.0, 3.0], vec![2.0, 3.0, 4.0]];
        for (match_max_length, ind) in [(true, true), (false, false)] {
            let err = s
                .resample(SessionInput::Samples {
                    samples: samples.clone(),
                    match_max_length,
                    ind,
                })
                .unwrap_err();
            assert!(matches!(err, ResampleError::Configuration(_)));
            assert!(!s.parameters().resampled);
        }
        assert!(s.resample(SessionInput::samples(samples)).unwrap().resampled);
    }

    #[test]
    fn dispatch_through_interface() {
        let mut s: TestSession = EmpiricalBootstrapTest::new(config()).unwrap().into();
        let params = s
            .resample(SessionInput::samples(vec![
                vec![1.0, 2.0, 3.0, 4.0, 5.0],
                vec![2.0, 3.0, 4.0, 5.0, 6.0],
            ]))
            .unwrap();
        assert!(params.resampled);
        assert_eq!(params.strategy, "empirical_bootstrap");
        let report = s.compute(ComputeOptions::two_sided()).unwrap();
        assert_eq!(report.significance_kind, SignificanceKind::Pvalue);
        assert_eq!(s.charts().unwrap().panels.len(), 3);

        let narrow_before = report.uplift_ci;
        s.set_confidence_level(0.5).unwrap();
        let narrow = s.compute(ComputeOptions::two_sided()).unwrap().uplift_ci;
        assert!(narrow.upper - narrow.lower <= narrow_before.upper - narrow_before.lower);
    }

    #[test]
    fn report_entries_are_ordered() {
        let mut r = TestReport::pvalue(0.04, 0.1, ConfidenceInterval::new(0.01, 0.2));
        r.diff_ci = Some(ConfidenceInterval::new(1.0, 2.0));
        r.df = Some(12.0);
        let keys: Vec<_> = r.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["pvalue", "uplift", "uplift_ci", "diff_ci", "df"]);
        assert_eq!(r.get("df"), Some(ReportValue::Scalar(12.0)));
        assert_eq!(r.get("test_loss"), None);
    }

    #[test]
    fn ecdf_shape() {
        let e = Ecdf::new(&[0.3, -0.1, 0.2, 0.1], 0.15);
        assert_eq!(e.x, vec![-0.1, 0.1, 0.2, 0.3]);
        assert_eq!(e.y, vec![0.0, 0.25, 0.5, 0.75]);
        assert!((e.share_above_threshold() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn parameters_serialize() {
        let t = QuantileBootstrapTest::new(0.9, config()).unwrap();
        let json = t.parameters().to_json();
        assert!(json.contains("\"strategy\":\"quantile_bootstrap\""));
        assert!(json.contains("\"q\":0.9"));
    }
}
