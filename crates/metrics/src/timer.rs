use std::time::{
    Duration,
    Instant,
};

use prometheus::Histogram;

/// Records elapsed wall time into a histogram when dropped.
pub struct Timer {
    start: Instant,
    histogram: &'static Histogram,
}

impl Timer {
    pub fn new(histogram: &'static Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Consume the timer without recording, e.g. because the caller tracks
    /// success/failure via [`StatusTimer`] instead.
    pub fn finish(self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

/// A timer that records into one of two histograms depending on whether
/// [`StatusTimer::finish`] was called before drop. Defaults to the error
/// histogram, so forgetting to call `finish()` on a successful path is
/// caught as a (mislabeled) error rather than silently dropped.
pub struct StatusTimer {
    start: Instant,
    success_histogram: &'static Histogram,
    error_histogram: &'static Histogram,
    finished: bool,
}

impl StatusTimer {
    pub fn new(success_histogram: &'static Histogram, error_histogram: &'static Histogram) -> Self {
        Self {
            start: Instant::now(),
            success_histogram,
            error_histogram,
            finished: false,
        }
    }

    pub fn finish(mut self) {
        self.finished = true;
        self.success_histogram
            .observe(self.start.elapsed().as_secs_f64());
    }
}

impl Drop for StatusTimer {
    fn drop(&mut self) {
        if self.finished || std::thread::panicking() {
            return;
        }
        self.error_histogram
            .observe(self.start.elapsed().as_secs_f64());
    }
}
