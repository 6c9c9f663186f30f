use std::time::Duration;
use tokio::time::Instant;

/// Decides when the control connection may be re-opened.
///
/// At most one timer is pending at a time, nothing is scheduled while an
/// attempt is in flight, and once stopped it never schedules again.
#[derive(Debug)]
pub struct Reconnector {
    delay: Duration,
    deadline: Option<Instant>,
    in_flight: bool,
    stopped: bool,
}

impl Reconnector {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
            in_flight: false,
            stopped: false,
        }
    }

    /// Arm the timer. Returns `false` if it was already armed or not allowed.
    pub fn schedule(&mut self, now: Instant) -> bool {
        if self.stopped || self.in_flight || self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(now + self.delay);
        true
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Consume an expired timer and mark an attempt as in flight.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now && !self.stopped => {
                self.deadline = None;
                self.in_flight = true;
                true
            }
            _ => false,
        }
    }

    /// An attempt is starting outside the timer, e.g. the very first connect
    pub fn attempt_started(&mut self) {
        self.deadline = None;
        self.in_flight = true;
    }

    pub fn connected(&mut self) {
        self.in_flight = false;
    }

    pub fn attempt_failed(&mut self, now: Instant) -> bool {
        self.in_flight = false;
        self.schedule(now)
    }

    /// Explicit leave or a rejected join: no timer fires from here on
    pub fn stop(&mut self) {
        self.stopped = true;
        self.deadline = None;
        self.in_flight = false;
    }
}
