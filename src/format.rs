//! Human-readable rendering of a [`TestReport`].

use std::fmt::Write;

use crate::session::{ReportValue, TestReport};

const PERCENT_KEYS: [&str; 4] = ["uplift", "proba", "test_loss", "control_loss"];

fn percent(v: f64) -> String {
    format!("{:.3}%", v * 100.0)
}

fn render(key: &str, value: ReportValue) -> String {
    match value {
        ReportValue::Interval(ci) if key == "uplift_ci" => {
            format!("{} - {}", percent(ci.lower), percent(ci.upper))
        }
        ReportValue::Interval(ci) => format!("{} - {}", ci.lower, ci.upper),
        ReportValue::Scalar(v) if PERCENT_KEYS.contains(&key) => percent(v),
        ReportValue::Scalar(v) => v.to_string(),
    }
}

/// One `key: value` line per report entry, in report order.
pub fn readable(report: &TestReport) -> String {
    let mut out = String::new();
    for (key, value) in report.entries() {
        // writing to a String cannot fail
        let _ = writeln!(out, "{key}: {}", render(key, value));
    }
    out
}
