//! Lightweight per-operation cost accounting.
//!
//! Every operation on the control path has to fit a fixed time box, so the
//! simulator and bench builds record how long ticks, samples and snapshot
//! copies actually take. Enabled via `KS_TIMING` or programmatically.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

static ENABLED: AtomicBool = AtomicBool::new(false);

/// `KS_TIMING`, read once on first use.
static FROM_ENV: OnceLock<bool> = OnceLock::new();

/// Enable cost accounting globally.
pub fn enable_timing() {
    ENABLED.store(true, Ordering::Relaxed);
}

/// Disable cost accounting globally.
pub fn disable_timing() {
    ENABLED.store(false, Ordering::Relaxed);
}

/// Check if timing is enabled. Only the first call looks at the
/// environment; later calls are two loads.
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
        || *FROM_ENV.get_or_init(|| std::env::var_os("KS_TIMING").is_some())
}

/// A simple timer that measures elapsed time.
pub struct Timer {
    start: Instant,
    enabled: bool,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            enabled: is_enabled(),
        }
    }

    /// Stop the timer and return elapsed microseconds, or None when disabled.
    pub fn stop(self) -> Option<u64> {
        self.enabled
            .then(|| u64::try_from(self.start.elapsed().as_micros()).unwrap_or(u64::MAX))
    }

    /// Stop and fold the measurement into `acc`.
    pub fn stop_into(self, acc: &AccumulatingTimer) {
        if let Some(us) = self.stop() {
            acc.record_us(us);
        }
    }
}

/// Accumulating timer tracking total, count and worst case.
pub struct AccumulatingTimer {
    total_us: AtomicU64,
    count: AtomicU64,
    worst_us: AtomicU64,
}

impl Default for AccumulatingTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl AccumulatingTimer {
    pub const fn new() -> Self {
        Self {
            total_us: AtomicU64::new(0),
            count: AtomicU64::new(0),
            worst_us: AtomicU64::new(0),
        }
    }

    pub fn record_us(&self, us: u64) {
        self.total_us.fetch_add(us, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.worst_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn worst_us(&self) -> u64 {
        self.worst_us.load(Ordering::Relaxed)
    }

    pub fn average_us(&self) -> f64 {
        let count = self.count();
        if count > 0 {
            self.total_us.load(Ordering::Relaxed) as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn reset(&self) {
        self.total_us.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
        self.worst_us.store(0, Ordering::Relaxed);
    }

    pub fn summary(&self, label: &'static str) -> CostSummary {
        CostSummary {
            label,
            count: self.count(),
            average_us: self.average_us(),
            worst_us: self.worst_us(),
        }
    }
}

/// Snapshot of one accumulating timer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostSummary {
    pub label: &'static str,
    pub count: u64,
    pub average_us: f64,
    pub worst_us: u64,
}

/// Timers for the two execution contexts.
pub mod loop_timing {
    use super::{AccumulatingTimer, CostSummary};

    /// One control tick in the main context.
    pub static CONTROL_TICK: AccumulatingTimer = AccumulatingTimer::new();
    /// One sampler interrupt.
    pub static SAMPLER_TICK: AccumulatingTimer = AccumulatingTimer::new();
    /// Buffer snapshot copies (the only critical section).
    pub static SNAPSHOT_COPY: AccumulatingTimer = AccumulatingTimer::new();

    pub fn reset_all() {
        CONTROL_TICK.reset();
        SAMPLER_TICK.reset();
        SNAPSHOT_COPY.reset();
    }

    /// Summaries of every timer that recorded at least one call.
    pub fn summaries() -> Vec<CostSummary> {
        [
            CONTROL_TICK.summary("control tick"),
            SAMPLER_TICK.summary("sampler tick"),
            SNAPSHOT_COPY.summary("snapshot copy"),
        ]
        .into_iter()
        .filter(|s| s.count > 0)
        .collect()
    }
}
