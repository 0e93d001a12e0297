//! Progress-emission throttle.
//!
//! Modeled as an invariant on a "last emitted at" timestamp rather than a
//! periodic sleep: a caller asks [`ProgressThrottle::should_emit`] at every
//! chunk boundary, and it answers truthfully whether 250ms have elapsed
//! since the last emission it approved — always answering yes for a forced
//! (final) emission regardless of the window.

use std::time::{Duration, Instant};

/// Minimum spacing between non-final progress emissions.
pub const THROTTLE_INTERVAL: Duration = Duration::from_millis(250);

pub struct ProgressThrottle {
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new() -> Self {
        Self { last_emit: None }
    }

    /// Returns `true` if a progress event should be emitted now, recording
    /// the emission time when it does. `force` bypasses the window — used
    /// for the chunk that completes the transfer, which must always emit.
    pub fn should_emit(&mut self, now: Instant, force: bool) -> bool {
        let due = match self.last_emit {
            None => true,
            Some(last) => now.duration_since(last) >= THROTTLE_INTERVAL,
        };
        if force || due {
            self.last_emit = Some(now);
            true
        } else {
            false
        }
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_emission_always_allowed() {
        let mut t = ProgressThrottle::new();
        assert!(t.should_emit(Instant::now(), false));
    }

    #[test]
    fn coalesces_within_window() {
        let mut t = ProgressThrottle::new();
        let t0 = Instant::now();
        assert!(t.should_emit(t0, false));
        assert!(!t.should_emit(t0 + Duration::from_millis(100), false));
        assert!(t.should_emit(t0 + Duration::from_millis(260), false));
    }

    #[test]
    fn forced_emission_ignores_window() {
        let mut t = ProgressThrottle::new();
        let t0 = Instant::now();
        assert!(t.should_emit(t0, false));
        assert!(t.should_emit(t0 + Duration::from_millis(10), true));
    }
}
