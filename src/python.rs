//! Python bindings, built with the `python` feature.

#![allow(clippy::too_many_arguments)]

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::beta_bayes::{BetaBayesTest, Prior};
use crate::bootstrap_ci::{bootstrap_ci as bootstrap_interval, BootstrapCiOptions, CiMethod};
use crate::bootstrapping::EmpiricalBootstrapTest;
use crate::config::SessionConfig;
use crate::did::{self, DidLabels, DidValues};
use crate::engine::Parallelism;
use crate::error::ResampleError;
use crate::jackknife;
use crate::perm;
use crate::quantile_bootstrap::QuantileBootstrapTest;
use crate::session::{ReportValue, TestReport};
use crate::t_resampling::TDistributionResamplingTest;
use crate::tools::{Sidedness, Statistic};

impl From<ResampleError> for PyErr {
    fn from(err: ResampleError) -> Self {
        match err {
            ResampleError::Configuration(_) | ResampleError::Distribution(_) => {
                PyValueError::new_err(err.to_string())
            }
            ResampleError::InvalidState(_) | ResampleError::ThreadPool(_) => {
                PyRuntimeError::new_err(err.to_string())
            }
        }
    }
}

fn session_config(
    confidence_level: f64,
    n_resamples: usize,
    random_state: Option<u64>,
    n_jobs: i64,
) -> SessionConfig {
    let cfg = SessionConfig::default()
        .with_confidence_level(confidence_level)
        .with_resamples(n_resamples)
        .with_parallelism(Parallelism::from_jobs(n_jobs));
    match random_state {
        Some(seed) => cfg.with_seed(seed),
        None => cfg,
    }
}

fn statistic_by_name(name: &str) -> PyResult<Statistic> {
    match name {
        "mean" => Ok(Statistic::mean()),
        "median" => Ok(Statistic::median()),
        other => Err(PyValueError::new_err(format!(
            "unknown statistic {other:?}, use mean or median"
        ))),
    }
}

fn as_slices(args: &[Vec<f64>]) -> Vec<&[f64]> {
    args.iter().map(Vec::as_slice).collect()
}

/// Integer or string label column.
#[derive(FromPyObject)]
enum Labels {
    Int(Vec<i64>),
    Str(Vec<String>),
}

impl From<Labels> for DidLabels {
    fn from(labels: Labels) -> Self {
        match labels {
            Labels::Int(v) => DidLabels::Int(v),
            Labels::Str(v) => DidLabels::Str(v),
        }
    }
}

fn report_dict<'py>(py: Python<'py>, report: &TestReport) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    for (key, value) in report.entries() {
        match value {
            ReportValue::Scalar(v) => dict.set_item(key, v)?,
            ReportValue::Interval(ci) => dict.set_item(key, ci.as_tuple())?,
        }
    }
    Ok(dict)
}

#[pyfunction(signature = (args, confidence_level = 0.95, n_resamples = 10_000, two_sided = true, statistic = "mean", random_state = None, n_jobs = -1))]
/// """
/// Independent two-sample permutation test.
///
/// Args:
///     args (List[List[float]]): two samples, or numerator/denominator pairs for control then test.
///     statistic (str): "mean" or "median", ignored for ratio metrics.
///
/// Returns:
///     dict: pvalue, uplift, diff and permutation_diff_ci.
/// """
pub fn permutation_test<'py>(
    py: Python<'py>,
    args: Vec<Vec<f64>>,
    confidence_level: f64,
    n_resamples: usize,
    two_sided: bool,
    statistic: &str,
    random_state: Option<u64>,
    n_jobs: i64,
) -> PyResult<Bound<'py, PyDict>> {
    let stat = statistic_by_name(statistic)?;
    let cfg = session_config(confidence_level, n_resamples, random_state, n_jobs);
    let r = py.allow_threads(|| {
        perm::permutation_test(&as_slices(&args), &stat, Sidedness::from_two_sided(two_sided), &cfg)
    })?;
    let dict = PyDict::new(py);
    dict.set_item("pvalue", r.pvalue)?;
    dict.set_item("uplift", r.uplift)?;
    dict.set_item("diff", r.diff)?;
    dict.set_item("permutation_diff_ci", r.permutation_diff_ci.as_tuple())?;
    Ok(dict)
}

#[pyfunction(signature = (values, group_label, experiment_stage_label, ratio = false, confidence_level = 0.95, n_resamples = 10_000, two_sided = true, random_state = None, n_jobs = -1))]
/// """
/// Difference-in-differences permutation test.
///
/// Args:
///     values (List[List[float]]): one metric column, or numerator and denominator when `ratio`.
///     group_label (List[int] | List[str]): two distinct values, the smaller one is control.
///     experiment_stage_label (List[int] | List[str]): two distinct values, the smaller one is pre.
///
/// Returns:
///     dict: stat, pvalue and null_ci.
/// """
pub fn permutation_did<'py>(
    py: Python<'py>,
    values: Vec<Vec<f64>>,
    group_label: Labels,
    experiment_stage_label: Labels,
    ratio: bool,
    confidence_level: f64,
    n_resamples: usize,
    two_sided: bool,
    random_state: Option<u64>,
    n_jobs: i64,
) -> PyResult<Bound<'py, PyDict>> {
    let cfg = session_config(confidence_level, n_resamples, random_state, n_jobs);
    let columns = as_slices(&values);
    let values = DidValues::from_columns(&columns, ratio)?;
    let (group_label, experiment_stage_label) =
        (DidLabels::from(group_label), DidLabels::from(experiment_stage_label));
    let r = py.allow_threads(|| {
        did::permutation_did_labeled(
            values,
            &group_label,
            &experiment_stage_label,
            Sidedness::from_two_sided(two_sided),
            &cfg,
        )
    })?;
    let dict = PyDict::new(py);
    dict.set_item("stat", r.stat)?;
    dict.set_item("pvalue", r.pvalue)?;
    dict.set_item("null_ci", r.null_ci.as_tuple())?;
    Ok(dict)
}

#[pyfunction(signature = (args, confidence_level = 0.95, n_resamples = 10_000, ind = true, match_max_length = false, two_sided = true, statistic = "mean", random_state = None, n_jobs = -1))]
/// """
/// Empirical bootstrap comparison of two samples or two ratio metrics.
///
/// Returns:
///     dict: pvalue, uplift, uplift_ci, control_ci, test_ci and diff_ci.
/// """
pub fn bootstrap<'py>(
    py: Python<'py>,
    args: Vec<Vec<f64>>,
    confidence_level: f64,
    n_resamples: usize,
    ind: bool,
    match_max_length: bool,
    two_sided: bool,
    statistic: &str,
    random_state: Option<u64>,
    n_jobs: i64,
) -> PyResult<Bound<'py, PyDict>> {
    let cfg = session_config(confidence_level, n_resamples, random_state, n_jobs);
    let mut test = EmpiricalBootstrapTest::with_statistic(statistic_by_name(statistic)?, cfg)?;
    let report = py.allow_threads(|| {
        test.resample(&as_slices(&args), match_max_length, ind)?;
        test.compute(Sidedness::from_two_sided(two_sided))
    })?;
    report_dict(py, &report)
}

#[pyfunction(signature = (nobs, counts, prior = vec![], confidence_level = 0.95, n_resamples = 100_000, two_sided = false, random_state = None, n_jobs = -1))]
/// """
/// Beta-binomial comparison of two conversion rates.
///
/// Args:
///     nobs (List[int]): successes per arm, control first.
///     counts (List[int]): totals per arm.
///     prior (List[float]): empty, one shared (alpha, beta) or one pair per arm.
///
/// Returns:
///     dict: proba (or pvalue when two-sided), uplift, uplift_ci, control_loss and test_loss.
/// """
pub fn beta_bayes<'py>(
    py: Python<'py>,
    nobs: Vec<u64>,
    counts: Vec<u64>,
    prior: Vec<f64>,
    confidence_level: f64,
    n_resamples: usize,
    two_sided: bool,
    random_state: Option<u64>,
    n_jobs: i64,
) -> PyResult<Bound<'py, PyDict>> {
    let cfg = session_config(confidence_level, n_resamples, random_state, n_jobs);
    let prior = Prior::from_slice(&prior)?;
    let mut test = BetaBayesTest::new(cfg)?;
    let report = py.allow_threads(|| {
        test.resample(&nobs, &counts, prior)?;
        test.compute(Sidedness::from_two_sided(two_sided))
    })?;
    report_dict(py, &report)
}

#[pyfunction(signature = (sample_a, sample_b, q = 0.5, confidence_level = 0.95, n_resamples = 100_000, two_sided = true, random_state = None, n_jobs = -1))]
/// """
/// Bootstrap comparison of the q-th quantile of two samples.
/// """
pub fn quantile_bootstrap<'py>(
    py: Python<'py>,
    sample_a: Vec<f64>,
    sample_b: Vec<f64>,
    q: f64,
    confidence_level: f64,
    n_resamples: usize,
    two_sided: bool,
    random_state: Option<u64>,
    n_jobs: i64,
) -> PyResult<Bound<'py, PyDict>> {
    let cfg = session_config(confidence_level, n_resamples, random_state, n_jobs);
    let mut test = QuantileBootstrapTest::new(q, cfg)?;
    let report = py.allow_threads(|| {
        test.resample(&sample_a, &sample_b)?;
        test.compute(Sidedness::from_two_sided(two_sided))
    })?;
    report_dict(py, &report)
}

#[pyfunction(signature = (mean, std, n, equal_var = false, confidence_level = 0.95, n_resamples = 100_000, two_sided = true, random_state = None, n_jobs = -1))]
/// """
/// Comparison of two means given per-arm mean, standard deviation and size.
/// """
pub fn t_distribution_resampling<'py>(
    py: Python<'py>,
    mean: Vec<f64>,
    std: Vec<f64>,
    n: Vec<u64>,
    equal_var: bool,
    confidence_level: f64,
    n_resamples: usize,
    two_sided: bool,
    random_state: Option<u64>,
    n_jobs: i64,
) -> PyResult<Bound<'py, PyDict>> {
    let cfg = session_config(confidence_level, n_resamples, random_state, n_jobs);
    let mut test = TDistributionResamplingTest::new(cfg)?;
    let report = py.allow_threads(|| {
        test.resample(&mean, &std, &n)?;
        test.compute(Sidedness::from_two_sided(two_sided), equal_var)
    })?;
    report_dict(py, &report)
}

#[pyfunction(signature = (sample, statistic = "mean", confidence_level = 0.95, n_resamples = 10_000, method = "percentile", return_dist = false, random_state = None, n_jobs = -1))]
/// """
/// Bootstrap confidence interval of a statistic.
///
/// Args:
///     method (str): "percentile", "pivotal" or "bca".
///
/// Returns:
///     Tuple[float, float], or (interval, distribution) when `return_dist`.
/// """
pub fn bootstrap_ci<'py>(
    py: Python<'py>,
    sample: Vec<f64>,
    statistic: &str,
    confidence_level: f64,
    n_resamples: usize,
    method: &str,
    return_dist: bool,
    random_state: Option<u64>,
    n_jobs: i64,
) -> PyResult<Bound<'py, PyAny>> {
    let stat = statistic_by_name(statistic)?;
    let options = BootstrapCiOptions::new(session_config(
        confidence_level,
        n_resamples,
        random_state,
        n_jobs,
    ))
    .with_method(method.parse::<CiMethod>()?)
    .with_distribution(return_dist);
    let r = py.allow_threads(|| bootstrap_interval(&sample, &stat, &options))?;
    match r.distribution {
        Some(dist) => (r.interval.as_tuple(), dist)
            .into_pyobject(py)
            .map(Bound::into_any)
            .map_err(Into::into),
        None => r
            .interval
            .as_tuple()
            .into_pyobject(py)
            .map(Bound::into_any)
            .map_err(Into::into),
    }
}

#[pyfunction(signature = (sample, statistic = "mean", confidence_level = 0.95))]
/// """
/// Jackknife estimate, bias, standard error and normal interval of a statistic.
/// """
pub fn jackknife_estim<'py>(
    py: Python<'py>,
    sample: Vec<f64>,
    statistic: &str,
    confidence_level: f64,
) -> PyResult<Bound<'py, PyDict>> {
    let stat = statistic_by_name(statistic)?;
    let r = jackknife::jackknife_estimate(&sample, &stat, confidence_level)?;
    let dict = PyDict::new(py);
    dict.set_item("estim", r.estimate)?;
    dict.set_item("bias", r.bias)?;
    dict.set_item("se", r.se)?;
    dict.set_item("ci", r.ci.as_tuple())?;
    Ok(dict)
}

#[pymodule]
fn resample_ab(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(permutation_test, m)?)?;
    m.add_function(wrap_pyfunction!(permutation_did, m)?)?;
    m.add_function(wrap_pyfunction!(bootstrap, m)?)?;
    m.add_function(wrap_pyfunction!(beta_bayes, m)?)?;
    m.add_function(wrap_pyfunction!(quantile_bootstrap, m)?)?;
    m.add_function(wrap_pyfunction!(t_distribution_resampling, m)?)?;
    m.add_function(wrap_pyfunction!(bootstrap_ci, m)?)?;
    m.add_function(wrap_pyfunction!(jackknife_estim, m)?)?;
    Ok(())
}
