use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use tracing::info;

use crate::config::SessionConfig;
use crate::engine::columns;
use crate::error::{ResampleError, Result};
use crate::session::{
    not_resampled, ChartData, ChartPanel, Ecdf, SessionCore, StrategyKnobs, TestParameters,
    TestReport,
};
use crate::tools::{add_one_pvalue, calculate_uplift, Sidedness, Statistic};

#[derive(Debug, Clone)]
struct BootstrapState {
    control: Vec<f64>,
    test: Vec<f64>,
    uplift: f64,
    ratio: bool,
    match_max_length: bool,
    ind: bool,
}

/// Empirical bootstrap of a statistic in two arms.
///
/// Two samples compare `statistic(a)` with `statistic(b)`. Four samples are
/// numerator/denominator pairs per arm and compare `sum(num) / sum(den)`;
/// rows are resampled jointly so the pairing survives.
#[derive(Debug, Clone)]
pub struct EmpiricalBootstrapTest {
    core: SessionCore,
    statistic: Statistic,
    state: Option<BootstrapState>,
}

/// Index draws for one trial. Paired trials reuse the control draw.
fn draw_indices<R: Rng + ?Sized>(
    rng: &mut R,
    size_a: usize,
    size_b: usize,
    ind: bool,
    match_max_length: bool,
) -> (Vec<usize>, Option<Vec<usize>>) {
    let (len_a, len_b) = if ind && match_max_length {
        let m = size_a.max(size_b);
        (m, m)
    } else {
        (size_a, size_b)
    };
    let ids_a: Vec<usize> = Uniform::new(0, size_a).sample_iter(&mut *rng).take(len_a).collect();
    if !ind {
        return (ids_a, None);
    }
    let ids_b = Uniform::new(0, size_b).sample_iter(&mut *rng).take(len_b).collect();
    (ids_a, Some(ids_b))
}

fn ratio_of(numerator: &[f64], denominator: &[f64], ids: &[usize]) -> f64 {
    let (num, den) = ids
        .iter()
        .fold((0.0, 0.0), |(n, d), &i| (n + numerator[i], d + denominator[i]));
    num / den
}

fn ratio(numerator: &[f64], denominator: &[f64]) -> f64 {
    numerator.iter().sum::<f64>() / denominator.iter().sum::<f64>()
}

impl EmpiricalBootstrapTest {
    pub const NAME: &'static str = "empirical_bootstrap";

    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::with_statistic(Statistic::mean(), config)
    }

    pub fn with_statistic(statistic: Statistic, config: SessionConfig) -> Result<Self> {
        Ok(Self {
            core: SessionCore::new(config)?,
            statistic,
            state: None,
        })
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

    pub fn statistic(&self) -> &Statistic {
        &self.statistic
    }

    /// Resamples both arms.
    ///
    /// `ind = false` draws one index vector per trial and applies it to both
    /// arms, which requires equal lengths; `match_max_length` only matters for
    /// independent draws.
    pub fn resample(
        &mut self,
        samples: &[&[f64]],
        match_max_length: bool,
        ind: bool,
    ) -> Result<TestParameters> {
        let mut engine = self.core.engine()?;
        let (rows, uplift, ratio_mode) = match *samples {
            [a, b] => {
                check_arms(a.len(), b.len(), ind)?;
                let stat = &self.statistic;
                let uplift = calculate_uplift(stat.eval(a), stat.eval(b));
                let rows = engine.resample(|rng| {
                    let (ids_a, ids_b) = draw_indices(rng, a.len(), b.len(), ind, match_max_length);
                    let ids_b = ids_b.as_ref().unwrap_or(&ids_a);
                    let ga: Vec<f64> = ids_a.iter().map(|&i| a[i]).collect();
                    let gb: Vec<f64> = ids_b.iter().map(|&i| b[i]).collect();
                    [stat.eval(&ga), stat.eval(&gb)]
                })?;
                (rows, uplift, false)
            }
            [num_a, den_a, num_b, den_b] => {
                if num_a.len() != den_a.len() || num_b.len() != den_b.len() {
                    return Err(ResampleError::config(
                        "numerator and denominator must be the same length",
                    ));
                }
                check_arms(num_a.len(), num_b.len(), ind)?;
                let uplift = calculate_uplift(ratio(num_a, den_a), ratio(num_b, den_b));
                let rows = engine.resample(|rng| {
                    let (ids_a, ids_b) =
                        draw_indices(rng, num_a.len(), num_b.len(), ind, match_max_length);
                    let ids_b = ids_b.as_ref().unwrap_or(&ids_a);
                    [ratio_of(num_a, den_a, &ids_a), ratio_of(num_b, den_b, ids_b)]
                })?;
                (rows, uplift, true)
            }
            _ => {
                return Err(ResampleError::config(
                    "pass two samples for non-ratio metrics, or four for ratio metrics: \
                     numerator and denominator for control, then for treatment",
                ))
            }
        };

        let [control, test] = columns(&rows);
        info!(strategy = Self::NAME, uplift, ratio = ratio_mode, elapsed = ?engine.elapsed_time(), "bootstrap ready");
        self.state = Some(BootstrapState {
            control,
            test,
            uplift,
            ratio: ratio_mode,
            match_max_length,
            ind,
        });
        Ok(self.parameters())
    }

    fn state(&self) -> Result<&BootstrapState> {
        self.state.as_ref().ok_or_else(|| not_resampled(Self::NAME))
    }

    pub fn compute(&self, sidedness: Sidedness) -> Result<TestReport> {
        let s = self.state()?;
        let wins = s.test.iter().zip(&s.control).filter(|(t, c)| t > c).count();
        let p = add_one_pvalue(wins, s.control.len());
        let (diffs, uplift_dist) = diffs_and_uplifts(&s.control, &s.test);

        let mut report = TestReport::pvalue(sidedness.apply(p), s.uplift, self.core.ci(&uplift_dist));
        report.control_ci = Some(self.core.ci(&s.control));
        report.test_ci = Some(self.core.ci(&s.test));
        report.diff_ci = Some(self.core.ci(&diffs));
        Ok(report)
    }

    pub fn charts(&self) -> Result<ChartData> {
        let s = self.state()?;
        let name = if s.ratio { "ratio" } else { self.statistic.name() };
        let (diffs, uplift_dist) = diffs_and_uplifts(&s.control, &s.test);
        Ok(ChartData {
            panels: vec![
                ChartPanel::DensityOverlay {
                    title: format!("Distribution of {name}(s) for each group"),
                    control: s.control.clone(),
                    test: s.test.clone(),
                },
                ChartPanel::Density {
                    title: format!("Distribution of {name}(s) differences (Test-Control)"),
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
            StrategyKnobs::EmpiricalBootstrap {
                statistic: self.statistic.name().to_string(),
                ratio: state.map(|s| s.ratio),
                match_max_length: state.map(|s| s.match_max_length),
                ind: state.map(|s| s.ind),
            },
            state.map(|s| s.uplift),
        )
    }

    /// Per-trial statistic for control and test.
    pub fn distributions(&self) -> Result<(&[f64], &[f64])> {
        let s = self.state()?;
        Ok((&s.control, &s.test))
    }
}

fn check_arms(size_a: usize, size_b: usize, ind: bool) -> Result<()> {
    if size_a == 0 || size_b == 0 {
        return Err(ResampleError::config("samples must not be empty"));
    }
    if !ind && size_a != size_b {
        return Err(ResampleError::config(
            "paired samples must have the same size",
        ));
    }
    Ok(())
}

pub(crate) fn diffs_and_uplifts(control: &[f64], test: &[f64]) -> (Vec<f64>, Vec<f64>) {
    control
        .iter()
        .zip(test)
        .map(|(&c, &t)| (t - c, calculate_uplift(c, t)))
        .unzip()
}
