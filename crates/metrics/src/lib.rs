//! Thin wrappers around Prometheus for registering and recording metrics
//! with a consistent naming convention across the workspace.
use std::sync::LazyLock;

use prometheus::Registry;

mod macros;
mod timer;

pub use prometheus::{
    Histogram,
    HistogramVec,
    IntCounter,
    IntCounterVec,
    IntGauge,
};
pub use timer::{
    StatusTimer,
    Timer,
};

/// Process-wide registry that every `register_metric_*!` macro invocation
/// registers into.
pub static METRICS_REGISTRY: LazyLock<Registry> =
    LazyLock::new(|| Registry::new_custom(Some("txndb".to_owned()), None).expect("bad prefix"));

#[doc(hidden)]
pub fn metric_name(name: &str) -> String {
    name.to_owned()
}

pub fn log_counter(counter: &IntCounter, amount: u64) {
    counter.inc_by(amount);
}

pub fn log_gauge(gauge: &IntGauge, value: i64) {
    gauge.set(value);
}

pub fn log_distribution(histogram: &Histogram, value: f64) {
    histogram.observe(value);
}
