use metrics::{
    register_metric_counter,
    IntCounter,
};

register_metric_counter!(
    OCC_ABORT_TOTAL,
    "Number of commits rejected by OCC validation"
);

register_metric_counter!(
    OUT_OF_RETENTION_TOTAL,
    "Number of reads rejected because their snapshot fell below the retention horizon"
);

pub fn log_occ_abort() {
    OCC_ABORT_TOTAL.inc();
}

pub fn log_out_of_retention() {
    OUT_OF_RETENTION_TOTAL.inc();
}
