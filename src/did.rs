//! Permutation difference-in-differences.
//!
//! The statistic is `(test_post - test_pre) - (control_post - control_pre)`
//! over per-cell sums. The null distribution shuffles the group label only,
//! keeping every row's stage fixed.

use std::collections::BTreeSet;

use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::info;

use crate::config::SessionConfig;
use crate::error::{ResampleError, Result};
use crate::tools::{add_one_pvalue, ConfidenceBounds, ConfidenceInterval, Sidedness};

/// Metric values for a DiD test.
#[derive(Debug, Clone, Copy)]
pub enum DidValues<'a> {
    Raw(&'a [f64]),
    Ratio {
        numerator: &'a [f64],
        denominator: &'a [f64],
    },
}

impl<'a> DidValues<'a> {
    /// One column for plain metrics, numerator and denominator for ratios.
    pub fn from_columns(columns: &[&'a [f64]], ratio: bool) -> Result<Self> {
        match (columns, ratio) {
            (&[values], false) => Ok(DidValues::Raw(values)),
            (&[numerator, denominator], true) => Ok(DidValues::Ratio {
                numerator,
                denominator,
            }),
            (_, true) => Err(ResampleError::config(
                "ratio metrics take two columns: numerator and denominator",
            )),
            (_, false) => Err(ResampleError::config("non-ratio metrics take one column")),
        }
    }

    fn len(&self) -> usize {
        match self {
            DidValues::Raw(v) => v.len(),
            DidValues::Ratio { numerator, .. } => numerator.len(),
        }
    }
}

/// A label column of either integer or string values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DidLabels {
    Int(Vec<i64>),
    Str(Vec<String>),
}

impl From<Vec<i64>> for DidLabels {
    fn from(v: Vec<i64>) -> Self {
        DidLabels::Int(v)
    }
}

impl From<Vec<String>> for DidLabels {
    fn from(v: Vec<String>) -> Self {
        DidLabels::Str(v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DidResult {
    pub stat: f64,
    pub pvalue: f64,
    /// Interval of the permutation null, informational only.
    pub null_ci: ConfidenceInterval,
}

/// Maps a two-valued label to 0/1 in sorted order.
fn encode<T: Ord + Clone>(labels: &[T], what: &str) -> Result<Vec<usize>> {
    let levels: Vec<T> = labels.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
    if levels.len() != 2 {
        return Err(ResampleError::config(format!(
            "{what} must take exactly 2 distinct values, got {}",
            levels.len()
        )));
    }
    Ok(labels
        .iter()
        .map(|l| usize::from(*l == levels[1]))
        .collect())
}

/// `table[group][stage]` sums.
fn sum_table(values: &[f64], groups: &[usize], stages: &[usize]) -> [[f64; 2]; 2] {
    let mut table = [[0.0; 2]; 2];
    for ((&v, &g), &s) in values.iter().zip(groups).zip(stages) {
        table[g][s] += v;
    }
    table
}

fn did(table: [[f64; 2]; 2]) -> f64 {
    (table[1][1] - table[1][0]) - (table[0][1] - table[0][0])
}

fn did_statistic(values: DidValues<'_>, groups: &[usize], stages: &[usize]) -> f64 {
    match values {
        DidValues::Raw(v) => did(sum_table(v, groups, stages)),
        DidValues::Ratio {
            numerator,
            denominator,
        } => {
            let num = sum_table(numerator, groups, stages);
            let den = sum_table(denominator, groups, stages);
            did(std::array::from_fn(|g| {
                std::array::from_fn(|s| num[g][s] / den[g][s])
            }))
        }
    }
}

/// Difference-in-differences with a group-label permutation null.
///
/// Labels are sorted: the first group value is control, the first stage
/// value is the pre period.
pub fn permutation_did<G, S>(
    values: DidValues<'_>,
    group_label: &[G],
    experiment_stage_label: &[S],
    sidedness: Sidedness,
    config: &SessionConfig,
) -> Result<DidResult>
where
    G: Ord + Clone,
    S: Ord + Clone,
{
    let config = config.clone().validate()?;
    let bounds = ConfidenceBounds::new(config.confidence_level)?;
    let n = values.len();
    let same_len = match values {
        DidValues::Raw(_) => true,
        DidValues::Ratio { denominator, .. } => denominator.len() == n,
    };
    if !same_len || group_label.len() != n || experiment_stage_label.len() != n {
        return Err(ResampleError::config("all arrays must have the same size"));
    }
    let groups = encode(group_label, "group_label")?;
    let stages = encode(experiment_stage_label, "experiment_stage_label")?;

    let true_did = did_statistic(values, &groups, &stages);

    let mut engine = config.engine()?;
    let stat = engine.resample_scalar(|rng| {
        let mut permuted = groups.clone();
        permuted.shuffle(rng);
        did_statistic(values, &permuted, &stages)
    })?;

    let below = stat.iter().filter(|&&d| true_did > d).count();
    let p = add_one_pvalue(below, stat.len());
    info!(stat = true_did, p, elapsed = ?engine.elapsed_time(), "did permutation done");
    Ok(DidResult {
        stat: true_did,
        pvalue: sidedness.apply(p),
        null_ci: bounds.interval(&stat),
    })
}

/// [`permutation_did`] over label columns whose element type is only
/// known at runtime.
pub fn permutation_did_labeled(
    values: DidValues<'_>,
    group_label: &DidLabels,
    experiment_stage_label: &DidLabels,
    sidedness: Sidedness,
    config: &SessionConfig,
) -> Result<DidResult> {
    use DidLabels::{Int, Str};
    match (group_label, experiment_stage_label) {
        (Int(g), Int(s)) => permutation_did(values, g, s, sidedness, config),
        (Int(g), Str(s)) => permutation_did(values, g, s, sidedness, config),
        (Str(g), Int(s)) => permutation_did(values, g, s, sidedness, config),
        (Str(g), Str(s)) => permutation_did(values, g, s, sidedness, config),
    }
}
