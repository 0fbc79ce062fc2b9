//! Running-average wall-clock timers.

use std::time::{Duration, Instant};

use tracing::info;

/// Accumulates the duration of repeated operations and reports the
/// average when dropped. A disabled timer never reads the clock.
#[derive(Debug)]
pub struct AverageTimer {
    name: String,
    enabled: bool,
    total: Duration,
    count: u32,
    started: Option<Instant>,
}

impl AverageTimer {
    pub fn new(name: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            enabled,
            total: Duration::ZERO,
            count: 0,
            started: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn start(&mut self) {
        if self.enabled {
            self.started = Some(Instant::now());
        }
    }

    /// Close the interval opened by [`start`](Self::start).
    pub fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.total += started.elapsed();
            self.count += 1;
        }
    }

    /// Time one call of `f`.
    pub fn time<R>(&mut self, f: impl FnOnce() -> R) -> R {
        self.start();
        let result = f();
        self.stop();
        result
    }

    /// Number of completed intervals.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    /// Mean interval, zero before the first one completes.
    pub fn average(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count
        }
    }
}

impl Drop for AverageTimer {
    fn drop(&mut self) {
        if self.enabled && self.count > 0 {
            info!(
                "Timer {}: {} calls, average {:.3} ms, total {:.3} s",
                self.name,
                self.count,
                self.average().as_secs_f64() * 1e3,
                self.total.as_secs_f64()
            );
        }
    }
}
