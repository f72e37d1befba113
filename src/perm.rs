use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::info;

use crate::config::SessionConfig;
use crate::error::{ResampleError, Result};
use crate::tools::{add_one_pvalue, ConfidenceBounds, ConfidenceInterval, Sidedness, Statistic};

/// Outcome of an independent two-sample permutation test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PermutationResult {
    pub pvalue: f64,
    /// `diff / statistic(control)`
    pub uplift: f64,
    /// `statistic(test) - statistic(control)`
    pub diff: f64,
    /// Interval of the permutation null distribution, informational only.
    pub permutation_diff_ci: ConfidenceInterval,
}

/// Independent two-sample permutation test.
///
/// Two samples compare `statistic`; four samples are numerator/denominator
/// pairs per arm and compare `sum(num) / sum(den)`, permuting whole rows.
/// The one-sided p-value is the add-one smoothed share of permuted
/// differences below the observed one.
pub fn permutation_test(
    samples: &[&[f64]],
    statistic: &Statistic,
    sidedness: Sidedness,
    config: &SessionConfig,
) -> Result<PermutationResult> {
    let config = config.clone().validate()?;
    let bounds = ConfidenceBounds::new(config.confidence_level)?;
    let mut engine = config.engine()?;

    let (vec_diffs, uplift, observed_diff): (Vec<f64>, f64, f64) = match *samples {
        [a, b] => {
            let (len_a, len_b) = (a.len(), b.len());
            check_nonempty(len_a, len_b)?;
            let mut combined: Vec<f64> = Vec::with_capacity(len_a + len_b);
            combined.extend_from_slice(a);
            combined.extend_from_slice(b);
            let len_comb = combined.len();
            let a_stat = statistic.eval(a);

            let observed_diff = statistic.eval(b) - a_stat;
            let uplift = observed_diff / a_stat;

            let vec_diffs = engine.resample_scalar(|rng| {
                let mut ids: Vec<usize> = (0..len_comb).collect();
                ids.shuffle(rng);
                let perm_a: Vec<f64> = ids[..len_a].iter().map(|&id| combined[id]).collect();
                let perm_b: Vec<f64> = ids[len_a..].iter().map(|&id| combined[id]).collect();
                statistic.eval(&perm_b) - statistic.eval(&perm_a)
            })?;

            (vec_diffs, uplift, observed_diff)
        }
        [num_a, den_a, num_b, den_b] => {
            let (len_a, len_b) = (num_a.len(), num_b.len());

            if len_a != den_a.len() || len_b != den_b.len() {
                return Err(ResampleError::config(
                    "numerator and denominator must be the same length",
                ));
            }
            check_nonempty(len_a, len_b)?;

            let (ratio_a, ratio_b) = (
                num_a.iter().sum::<f64>() / den_a.iter().sum::<f64>(),
                num_b.iter().sum::<f64>() / den_b.iter().sum::<f64>(),
            );

            let observed_diff = ratio_b - ratio_a;
            let uplift = observed_diff / ratio_a;

            let mut numerators = Vec::with_capacity(len_a + len_b);
            let mut denominators = Vec::with_capacity(len_a + len_b);

            numerators.extend_from_slice(num_a);
            denominators.extend_from_slice(den_a);
            numerators.extend_from_slice(num_b);
            denominators.extend_from_slice(den_b);

            let len_comb = numerators.len();

            let vec_diffs = engine.resample_scalar(|rng| {
                let mut ids: Vec<usize> = (0..len_comb).collect();
                ids.shuffle(rng);

                let sums = |part: &[usize]| {
                    part.iter().fold((0.0, 0.0), |(num, den), &id| {
                        (num + numerators[id], den + denominators[id])
                    })
                };
                let (sum_a_num, sum_a_den) = sums(&ids[..len_a]);
                let (sum_b_num, sum_b_den) = sums(&ids[len_a..]);

                (sum_b_num / sum_b_den) - (sum_a_num / sum_a_den)
            })?;

            (vec_diffs, uplift, observed_diff)
        }
        _ => {
            return Err(ResampleError::config(
                "pass two samples for non-ratio metrics, or four for ratio metrics: \
                 numerator and denominator for control, then for treatment",
            ));
        }
    };

    let below = vec_diffs.iter().filter(|&&d| observed_diff > d).count();
    let p = add_one_pvalue(below, vec_diffs.len());
    info!(observed_diff, uplift, p, elapsed = ?engine.elapsed_time(), "permutation test done");
    Ok(PermutationResult {
        pvalue: sidedness.apply(p),
        uplift,
        diff: observed_diff,
        permutation_diff_ci: bounds.interval(&vec_diffs),
    })
}

fn check_nonempty(len_a: usize, len_b: usize) -> Result<()> {
    if len_a == 0 || len_b == 0 {
        Err(ResampleError::config("samples must not be empty"))
    } else {
        Ok(())
    }
}
