//! Named metrics for the commit pipeline. Kept as one small module rather
//! than scattered `register_metric_*!` calls so the commit path's
//! instrumentation is all in one place.
use ::metrics::{
    log_counter,
    log_distribution,
    register_metric_counter,
    register_metric_histogram,
    Timer,
};

register_metric_histogram!(COMMIT_SECONDS, "Time to validate, persist, and publish a commit");
pub fn commit_timer() -> Timer {
    Timer::new(&COMMIT_SECONDS)
}

register_metric_counter!(COMMITS_TOTAL, "Number of commits successfully published");
pub fn log_commit() {
    log_counter(&COMMITS_TOTAL, 1);
}

register_metric_counter!(COMMIT_CONFLICTS_TOTAL, "Number of commits rejected for an OCC read/write conflict");
pub fn log_commit_conflict() {
    log_counter(&COMMIT_CONFLICTS_TOTAL, 1);
}

register_metric_histogram!(GC_SWEEP_SECONDS, "Time spent in one MVCC garbage collection sweep");
pub fn gc_sweep_timer() -> Timer {
    Timer::new(&GC_SWEEP_SECONDS)
}

register_metric_histogram!(COMMIT_WRITES_TOTAL, "Number of document writes in a published commit");
pub fn log_commit_writes(count: usize) {
    log_distribution(&COMMIT_WRITES_TOTAL, count as f64);
}
