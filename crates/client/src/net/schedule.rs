use std::time::{Duration, Instant};

use super::config::DEFAULT_RECONNECT_DELAYS_SECS;

/// Cyclic backoff: after the last delay is used the schedule starts over at
/// the first one.
#[derive(Debug, Clone)]
pub struct ReconnectSchedule {
    delays: Vec<Duration>,
    current_index: usize,
    next_attempt_at: Option<Instant>,
}

impl ReconnectSchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        let delays = if delays.is_empty() {
            DEFAULT_RECONNECT_DELAYS_SECS
                .iter()
                .copied()
                .map(Duration::from_secs_f32)
                .collect()
        } else {
            delays
        };

        Self {
            delays,
            current_index: 0,
            next_attempt_at: None,
        }
    }

    /// Sets the next deadline from the current delay and advances the index.
    pub fn schedule_next(&mut self, now: Instant) -> Duration {
        let delay = self.delays[self.current_index];
        self.current_index = (self.current_index + 1) % self.delays.len();
        self.next_attempt_at = Some(now + delay);
        delay
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_attempt_at.is_some_and(|at| now >= at)
    }

    pub fn clear_deadline(&mut self) {
        self.next_attempt_at = None;
    }

    /// Starts a fresh cycle from the first delay.
    pub fn reset(&mut self) {
        self.current_index = 0;
        self.next_attempt_at = None;
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn next_attempt_at(&self) -> Option<Instant> {
        self.next_attempt_at
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}
