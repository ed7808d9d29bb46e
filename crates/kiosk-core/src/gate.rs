//! Hidden override gate: an action fires only after a key chord is pressed
//! more than `threshold` times, each press within `window` of the last.
//!
//! Each press restarts a debounce timer; if the timer fires first the count
//! silently returns to zero.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::config::GateConfig;

/// Counter state shared with the debounce task.
#[derive(Debug, Default)]
struct GateState {
    /// Presses since the last reset.
    count: u32,
    /// Bumped on every press and reset, so stale timers can tell they lost.
    epoch: u64,
    /// Cancels the pending debounce timer.
    timer: Option<CancellationToken>,
}

/// A press counter guarding one action.
#[derive(Debug, Clone)]
pub struct OverrideGate {
    /// Count must exceed this to fire.
    threshold: u32,
    /// Inactivity window before the count resets.
    window: Duration,
    /// Shared counter.
    state: Arc<Mutex<GateState>>,
}

impl OverrideGate {
    /// Create a gate that fires on press number `threshold + 1`.
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self {
            threshold,
            window,
            state: Arc::new(Mutex::new(GateState::default())),
        }
    }

    /// Create a gate from configuration.
    pub fn from_config(cfg: &GateConfig) -> Self {
        Self::new(cfg.threshold, cfg.window())
    }

    /// Presses counted so far.
    pub fn count(&self) -> u32 {
        self.state.lock().count
    }

    /// Register a press. Returns true when the guarded action should fire.
    ///
    /// Must be called from within a Tokio runtime; the debounce timer is a task.
    pub fn press(&self) -> bool {
        let mut st = self.state.lock();
        if let Some(t) = st.timer.take() {
            t.cancel();
        }
        st.count += 1;
        st.epoch += 1;
        if st.count > self.threshold {
            trace!(count = st.count, "gate_fired");
            st.count = 0;
            return true;
        }
        trace!(count = st.count, "gate_press");

        let token = CancellationToken::new();
        st.timer = Some(token.clone());
        let epoch = st.epoch;
        let window = self.window;
        let state = self.state.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = time::sleep(window) => {
                    let mut st = state.lock();
                    if st.epoch == epoch {
                        trace!(count = st.count, "gate_reset");
                        st.count = 0;
                        st.timer = None;
                    }
                }
            }
        });
        false
    }

    /// Reset the count and cancel the timer.
    pub fn reset(&self) {
        let mut st = self.state.lock();
        if let Some(t) = st.timer.take() {
            t.cancel();
        }
        st.count = 0;
        st.epoch += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> OverrideGate {
        OverrideGate::new(5, Duration::from_millis(500))
    }

    #[tokio::test(start_paused = true)]
    async fn fires_on_the_press_after_threshold() {
        let g = gate();
        for _ in 0..5 {
            assert!(!g.press());
            time::advance(Duration::from_millis(100)).await;
        }
        assert!(g.press());
        assert_eq!(g.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_resets_silently() {
        let g = gate();
        for _ in 0..5 {
            assert!(!g.press());
        }
        time::sleep(Duration::from_millis(501)).await;
        assert_eq!(g.count(), 0);
        assert!(!g.press());
        assert_eq!(g.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn each_press_restarts_the_window() {
        let g = gate();
        for _ in 0..5 {
            assert!(!g.press());
            time::sleep(Duration::from_millis(400)).await;
        }
        assert_eq!(g.count(), 5);
        assert!(g.press());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_count() {
        let g = gate();
        g.press();
        g.press();
        g.reset();
        assert_eq!(g.count(), 0);
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(g.count(), 0);
    }
}
