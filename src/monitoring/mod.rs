use std::time::{Duration, Instant};
use tracing::debug;

/// Logs how long an operation took when dropped
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        debug!("[PERF] timer_start | name={}", name);
        Self {
            start: Instant::now(),
            name,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.elapsed().as_millis()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!(
            "[PERF] timer_end | name={} | duration_ms={}",
            self.name,
            self.elapsed_ms()
        );
    }
}

/// Run a block under a [`Timer`] named `$name`
#[macro_export]
macro_rules! timed_operation {
    ($name:expr, $block:block) => {{
        let _timer = $crate::monitoring::Timer::new($name);
        $block
    }};
}
