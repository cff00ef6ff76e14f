pub use prometheus;

/// Register a histogram with the shared metrics registry and store it
/// in a static variable. The reported metric name is the lower_snake_case
/// spelling of the declared variable name.
#[macro_export]
macro_rules! register_metric_histogram {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::Histogram> =
            std::sync::LazyLock::new(|| {
                let name = $crate::metric_name(&stringify!($NAME).to_lowercase());
                #[allow(clippy::disallowed_macros)]
                $crate::prometheus::register_histogram_with_registry!(
                    name,
                    $HELP,
                    $crate::METRICS_REGISTRY,
                )
                .expect("metric registration failed")
            });
    };
}

/// Register an integer counter with the shared metrics registry and
/// store it in a static variable.
#[macro_export]
macro_rules! register_metric_counter {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::IntCounter> =
            std::sync::LazyLock::new(|| {
                let name = $crate::metric_name(&stringify!($NAME).to_lowercase());
                #[allow(clippy::disallowed_macros)]
                $crate::prometheus::register_int_counter_with_registry!(
                    name,
                    $HELP,
                    $crate::METRICS_REGISTRY,
                )
                .expect("metric registration failed")
            });
    };
}

/// Register an integer gauge with the shared metrics registry and
/// store it in a static variable.
#[macro_export]
macro_rules! register_metric_gauge {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::IntGauge> =
            std::sync::LazyLock::new(|| {
                let name = $crate::metric_name(&stringify!($NAME).to_lowercase());
                #[allow(clippy::disallowed_macros)]
                $crate::prometheus::register_int_gauge_with_registry!(
                    name,
                    $HELP,
                    $crate::METRICS_REGISTRY,
                )
                .expect("metric registration failed")
            });
    };
}
