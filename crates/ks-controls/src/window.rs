//! Time-proportioning window.
//!
//! An output with duty `d` is energized for the first `d/100` of every
//! window and off for the rest. Timestamps are main-loop milliseconds, so
//! the window has to cope with a jittery caller:
//!
//! - an expired window advances by exactly one length, keeping the phase
//!   on a fixed grid (no drift from late ticks)
//! - windows that went by entirely during a stall are dropped, never
//!   replayed, so a backlog cannot compound

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ControlError, ControlResult};

/// What [`ControlWindow::advance`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowAdvance {
    /// Still inside the current window.
    Running,
    /// Moved to the next window.
    Next,
    /// A stall outlasted whole windows; `dropped` of them were skipped.
    Skipped { dropped: u64 },
}

/// Fixed-length window converting a duty percentage into on/off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlWindow {
    length_ms: u64,
    start_ms: u64,
    /// Windows elapsed since creation, skipped ones included.
    completed: u64,
}

impl ControlWindow {
    /// Create a window of `length_ms` starting at `start_ms`.
    pub fn new(length_ms: u64, start_ms: u64) -> ControlResult<Self> {
        if length_ms == 0 {
            return Err(ControlError::InvalidArg {
                what: "window length must be positive",
            });
        }
        Ok(Self {
            length_ms,
            start_ms,
            completed: 0,
        })
    }

    pub fn length_ms(&self) -> u64 {
        self.length_ms
    }

    pub fn start_ms(&self) -> u64 {
        self.start_ms
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Milliseconds into the current window (0 if `now_ms` is before it).
    pub fn position_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.start_ms)
    }

    /// Roll the window forward if `now_ms` has left it.
    pub fn advance(&mut self, now_ms: u64) -> WindowAdvance {
        let elapsed = self.position_ms(now_ms);
        if elapsed < self.length_ms {
            return WindowAdvance::Running;
        }
        let windows = elapsed / self.length_ms;
        self.start_ms += windows * self.length_ms;
        self.completed += windows;
        if windows == 1 {
            WindowAdvance::Next
        } else {
            let dropped = windows - 1;
            warn!(dropped, window_ms = self.length_ms, "main loop stalled, windows skipped");
            WindowAdvance::Skipped { dropped }
        }
    }

    /// Whether an output at `duty_pct` is energized at `now_ms`.
    ///
    /// Call [`advance`](Self::advance) first in the same tick.
    pub fn is_on(&self, duty_pct: f64, now_ms: u64) -> bool {
        if duty_pct.is_nan() || duty_pct <= 0.0 {
            return false;
        }
        if duty_pct >= 100.0 {
            return true;
        }
        let on_ms = duty_pct / 100.0 * self.length_ms as f64;
        (self.position_ms(now_ms) as f64) < on_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_rejected() {
        assert!(ControlWindow::new(0, 0).is_err());
    }

    #[test]
    fn advance_by_exactly_one_length() {
        let mut w = ControlWindow::new(1000, 0).unwrap();
        assert_eq!(w.advance(999), WindowAdvance::Running);
        // Late tick: window still starts on the grid.
        assert_eq!(w.advance(1250), WindowAdvance::Next);
        assert_eq!(w.start_ms(), 1000);
        assert_eq!(w.position_ms(1250), 250);
    }

    #[test]
    fn stall_drops_missed_windows() {
        let mut w = ControlWindow::new(1000, 0).unwrap();
        assert_eq!(w.advance(4300), WindowAdvance::Skipped { dropped: 3 });
        assert_eq!(w.start_ms(), 4000);
        assert_eq!(w.completed(), 4);
        assert_eq!(w.advance(4900), WindowAdvance::Running);
    }

    #[test]
    fn duty_splits_window() {
        let w = ControlWindow::new(1000, 0).unwrap();
        assert!(w.is_on(30.0, 0));
        assert!(w.is_on(30.0, 299));
        assert!(!w.is_on(30.0, 300));
        assert!(!w.is_on(0.0, 0));
        assert!(w.is_on(100.0, 999));
        assert!(!w.is_on(f64::NAN, 0));
    }
}
