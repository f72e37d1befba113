//! Bayesian comparison of two conversion rates with Beta posteriors.

use rand_distr::{Beta, Distribution};
use tracing::info;

use crate::config::{SessionConfig, DEFAULT_DRAWS};
use crate::engine::columns;
use crate::error::{ResampleError, Result};
use crate::session::{
    not_resampled, ChartData, ChartPanel, Ecdf, SessionCore, SignificanceKind, StrategyKnobs,
    TestParameters, TestReport,
};
use crate::tools::{add_one_pvalue, calculate_uplift, MathUtil, Sidedness};

/// Beta prior pseudo-counts.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Prior {
    /// Beta(1, 1) for both arms.
    #[default]
    Flat,
    /// The same Beta(alpha, beta) for both arms.
    Shared { alpha: f64, beta: f64 },
    PerArm {
        control_alpha: f64,
        control_beta: f64,
        test_alpha: f64,
        test_beta: f64,
    },
}

impl Prior {
    /// Builds a prior from 0, 2 or 4 values.
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        match *values {
            [] => Ok(Prior::Flat),
            [alpha, beta] => Ok(Prior::Shared { alpha, beta }),
            [control_alpha, control_beta, test_alpha, test_beta] => Ok(Prior::PerArm {
                control_alpha,
                control_beta,
                test_alpha,
                test_beta,
            }),
            _ => Err(ResampleError::config(format!(
                "prior takes 0, 2 or 4 values, got {}",
                values.len()
            ))),
        }
    }

    /// `[control_alpha, control_beta, test_alpha, test_beta]`
    pub fn pseudo_counts(&self) -> [f64; 4] {
        match *self {
            Prior::Flat => [1.0; 4],
            Prior::Shared { alpha, beta } => [alpha, beta, alpha, beta],
            Prior::PerArm {
                control_alpha,
                control_beta,
                test_alpha,
                test_beta,
            } => [control_alpha, control_beta, test_alpha, test_beta],
        }
    }
}

#[derive(Debug, Clone)]
struct BetaBayesState {
    beta_control: Vec<f64>,
    beta_test: Vec<f64>,
    uplift_dist: Vec<f64>,
    uplift: f64,
    prior: [f64; 4],
}

/// Draws independent posterior samples for each arm and compares them
/// pointwise. The two posteriors are not modelled jointly.
#[derive(Debug, Clone)]
pub struct BetaBayesTest {
    core: SessionCore,
    state: Option<BetaBayesState>,
}

impl BetaBayesTest {
    pub const NAME: &'static str = "beta_bayes";

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

    /// `nobs` are successes and `counts` are totals, control first.
    pub fn resample(&mut self, nobs: &[u64], counts: &[u64], prior: Prior) -> Result<TestParameters> {
        let (&[control_a, test_a], &[control_total, test_total]) = (nobs, counts) else {
            return Err(ResampleError::config(
                "nobs and counts must have exactly 2 elements each",
            ));
        };
        if control_a > control_total || test_a > test_total {
            return Err(ResampleError::config("successes cannot exceed totals"));
        }
        let (control_b, test_b) = (control_total - control_a, test_total - test_a);
        let pr = prior.pseudo_counts();

        let control = Beta::new(control_a as f64 + pr[0], control_b as f64 + pr[1])
            .map_err(ResampleError::distribution)?;
        let test = Beta::new(test_a as f64 + pr[2], test_b as f64 + pr[3])
            .map_err(ResampleError::distribution)?;

        let cr_control = control_a as f64 / control_total as f64;
        let cr_test = test_a as f64 / test_total as f64;
        let uplift = calculate_uplift(cr_control, cr_test);

        let rows = self
            .core
            .engine()?
            .resample(|rng| [control.sample(rng), test.sample(rng)])?;
        let [beta_control, beta_test] = columns(&rows);
        let uplift_dist = beta_control
            .iter()
            .zip(&beta_test)
            .map(|(&c, &t)| calculate_uplift(c, t))
            .collect();

        info!(strategy = Self::NAME, cr_control, cr_test, uplift, "posterior draws ready");
        self.state = Some(BetaBayesState {
            beta_control,
            beta_test,
            uplift_dist,
            uplift,
            prior: pr,
        });
        Ok(self.parameters())
    }

    fn state(&self) -> Result<&BetaBayesState> {
        self.state.as_ref().ok_or_else(|| not_resampled(Self::NAME))
    }

    /// Probability that test beats control, with the expected loss of
    /// shipping either arm.
    pub fn compute(&self, sidedness: Sidedness) -> Result<TestReport> {
        let s = self.state()?;
        let n = s.beta_control.len();
        let wins = s
            .beta_test
            .iter()
            .zip(&s.beta_control)
            .filter(|(t, c)| t > c)
            .count();
        let p = add_one_pvalue(wins, n);

        let control_loss = s.uplift_dist.iter().map(|u| u.max(0.0)).sum::<f64>() / n as f64;
        let test_loss = s.uplift_dist.iter().map(|u| (-u).max(0.0)).sum::<f64>() / n as f64;

        let mut report = TestReport::pvalue(sidedness.apply(p), s.uplift, self.core.ci(&s.uplift_dist));
        if !sidedness.is_two_sided() {
            report.significance_kind = SignificanceKind::Proba;
        }
        report.control_loss = Some(control_loss);
        report.test_loss = Some(test_loss);
        Ok(report)
    }

    pub fn charts(&self) -> Result<ChartData> {
        let s = self.state()?;
        Ok(ChartData {
            panels: vec![
                ChartPanel::DensityOverlay {
                    title: "Beta Distributions for CR".into(),
                    control: s.beta_control.clone(),
                    test: s.beta_test.clone(),
                },
                ChartPanel::Joint {
                    title: "Joint Distribution".into(),
                    control: s.beta_control.clone(),
                    test: s.beta_test.clone(),
                },
                ChartPanel::UpliftEcdf(Ecdf::new(&s.uplift_dist, s.uplift)),
            ],
        })
    }

    pub fn parameters(&self) -> TestParameters {
        let state = self.state.as_ref();
        self.core.parameters(
            Self::NAME,
            StrategyKnobs::BetaBayes {
                prior: state.map(|s| s.prior),
            },
            state.map(|s| s.uplift),
        )
    }

    /// Posterior draws, control then test.
    pub fn posterior_draws(&self) -> Result<(&[f64], &[f64])> {
        let s = self.state()?;
        Ok((&s.beta_control, &s.beta_test))
    }

    pub fn posterior_means(&self) -> Result<(f64, f64)> {
        let s = self.state()?;
        Ok((s.beta_control.mean(), s.beta_test.mean()))
    }
}
