//! Outbound anti-flood guard.
//!
//! After the server answers `toofast`, every outbound user message is
//! suppressed until the silence window closes. Suppressed messages are
//! reported to the caller, never queued and never sent.

use std::time::Duration;

use tokio::time::Instant;

use crate::constants::FLOOD_SILENCE;

/// Silence deadline set by the server's rate-limit signal.
#[derive(Debug, Clone)]
pub struct AntiFloodGuard {
    silence: Duration,
    deadline: Option<Instant>,
}

impl AntiFloodGuard {
    /// Guard with the protocol's 12 second window.
    #[must_use]
    pub fn new() -> Self {
        Self::with_silence(FLOOD_SILENCE)
    }

    /// Guard with a custom window length.
    #[must_use]
    pub fn with_silence(silence: Duration) -> Self {
        Self {
            silence,
            deadline: None,
        }
    }

    /// Start (or extend) the silence window from `now`.
    pub fn trigger(&mut self, now: Instant) {
        self.deadline = Some(now + self.silence);
    }

    /// True if a send at `now` must be suppressed.
    #[must_use]
    pub fn is_silenced(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now < deadline)
    }

    /// Time left in the window, if any.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .filter(|deadline| now < *deadline)
            .map(|deadline| deadline - now)
    }

    /// Forget any pending window.
    pub fn reset(&mut self) {
        self.deadline = None;
    }
}

impl Default for AntiFloodGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_guard_allows_sends() {
        let guard = AntiFloodGuard::new();
        assert!(!guard.is_silenced(Instant::now()));
        assert!(guard.remaining(Instant::now()).is_none());
    }

    #[test]
    fn test_window_boundaries() {
        let mut guard = AntiFloodGuard::new();
        let t = Instant::now();
        guard.trigger(t);

        assert!(guard.is_silenced(t));
        assert!(guard.is_silenced(t + Duration::from_millis(11_999)));
        // At or after T+12 the send proceeds
        assert!(!guard.is_silenced(t + FLOOD_SILENCE));
        assert!(!guard.is_silenced(t + Duration::from_secs(20)));
    }

    #[test]
    fn test_retrigger_extends_window() {
        let mut guard = AntiFloodGuard::with_silence(Duration::from_secs(2));
        let t = Instant::now();
        guard.trigger(t);
        guard.trigger(t + Duration::from_secs(1));
        assert!(guard.is_silenced(t + Duration::from_millis(2_500)));
        assert_eq!(
            guard.remaining(t + Duration::from_secs(2)),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_reset_clears_window() {
        let mut guard = AntiFloodGuard::new();
        let t = Instant::now();
        guard.trigger(t);
        guard.reset();
        assert!(!guard.is_silenced(t));
    }
}
