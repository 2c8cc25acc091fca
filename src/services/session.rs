//! Retriggerable session timer
//!
//! Pull-based: the caller supplies the clock on every call, and must call
//! `evaluate` every tick so expiry is noticed promptly.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SessionTimer {
    duration: Duration,
    active: bool,
    expires_at: Option<Instant>,
}

impl SessionTimer {
    pub fn new(duration: Duration) -> Self {
        Self { duration, active: false, expires_at: None }
    }

    /// (Re-)arm the session: the deadline always moves to `now + duration`
    pub fn trigger(&mut self, now: Instant) {
        self.expires_at = Some(now + self.duration);
        self.active = true;
    }

    /// Expire the session if the deadline has passed and return the active flag
    pub fn evaluate(&mut self, now: Instant) -> bool {
        if let Some(deadline) = self.expires_at {
            if now > deadline {
                self.active = false;
                self.expires_at = None;
            }
        }
        self.active
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Time left before expiry, zero when inactive
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.expires_at {
            Some(deadline) if self.active => deadline.saturating_duration_since(now),
            _ => Duration::ZERO,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_inactive_until_triggered() {
        let t0 = Instant::now();
        let mut timer = SessionTimer::new(secs(20));
        assert!(!timer.evaluate(t0));
        assert_eq!(timer.remaining(t0), Duration::ZERO);
    }

    #[test]
    fn test_active_within_duration_and_expires_after() {
        let t0 = Instant::now();
        let mut timer = SessionTimer::new(secs(20));
        timer.trigger(t0);

        assert!(timer.evaluate(t0 + secs(19)));
        assert!(!timer.evaluate(t0 + secs(21)));
    }

    #[test]
    fn test_deadline_is_inclusive() {
        let t0 = Instant::now();
        let mut timer = SessionTimer::new(secs(20));
        timer.trigger(t0);
        assert!(timer.evaluate(t0 + secs(20)));
    }

    #[test]
    fn test_retrigger_extends_deadline() {
        let t0 = Instant::now();
        let mut timer = SessionTimer::new(secs(20));
        timer.trigger(t0);
        timer.trigger(t0 + secs(10));

        assert!(timer.evaluate(t0 + secs(21)));
        assert_eq!(timer.remaining(t0 + secs(21)), secs(9));
        assert!(!timer.evaluate(t0 + secs(31)));
    }

    #[test]
    fn test_trigger_after_expiry_reactivates() {
        let t0 = Instant::now();
        let mut timer = SessionTimer::new(secs(5));
        timer.trigger(t0);
        assert!(!timer.evaluate(t0 + secs(6)));

        timer.trigger(t0 + secs(7));
        assert!(timer.is_active());
        assert!(timer.evaluate(t0 + secs(8)));
    }
}
