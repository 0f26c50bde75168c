//! Deterministic mock clock.
//!
//! The clock only moves when [`MockClock::advance`] is called; the scheduler
//! is its sole driver. Timed callbacks registered with
//! [`MockClock::after_fn`] fire synchronously, on the advancing thread, in
//! deadline order with registration order breaking ties.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

type TimerCallback = Box<dyn FnOnce() + Send>;

struct ClockTimerEntry {
    deadline: DateTime<Utc>,
    sequence: u64,
    callback: TimerCallback,
}

struct ClockInner {
    now: DateTime<Utc>,
    sequence: u64,
    timers: Vec<ClockTimerEntry>,
}

/// Mock time source. Starts at the Unix epoch.
#[derive(Clone)]
pub struct MockClock {
    inner: Arc<Mutex<ClockInner>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                now: DateTime::<Utc>::default(),
                sequence: 0,
                timers: Vec::new(),
            })),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.lock().unwrap().now
    }

    /// Reposition the clock. Only meaningful before timers are registered.
    pub fn set_now(&self, now: DateTime<Utc>) {
        self.inner.lock().unwrap().now = now;
    }

    /// Register a callback to fire `duration` from now on this clock.
    pub fn after_fn(&self, duration: Duration, callback: TimerCallback) -> MockTimer {
        let mut inner = self.inner.lock().unwrap();
        let sequence = inner.sequence;
        inner.sequence += 1;
        let deadline = inner.now + to_chrono(duration);
        inner.timers.push(ClockTimerEntry {
            deadline,
            sequence,
            callback,
        });
        MockTimer {
            clock: Arc::downgrade(&self.inner),
            sequence,
        }
    }

    /// Advance the clock, firing every due callback in (deadline, sequence)
    /// order. Callbacks run outside the clock lock, so they may register
    /// further timers; those also fire if they fall within the advance.
    pub fn advance(&self, duration: Duration) {
        let target = {
            let inner = self.inner.lock().unwrap();
            inner.now + to_chrono(duration)
        };

        loop {
            let next = {
                let mut inner = self.inner.lock().unwrap();
                let due = inner
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.deadline <= target)
                    .min_by_key(|(_, t)| (t.deadline, t.sequence))
                    .map(|(i, _)| i);
                match due {
                    Some(index) => {
                        let entry = inner.timers.swap_remove(index);
                        if entry.deadline > inner.now {
                            inner.now = entry.deadline;
                        }
                        Some(entry)
                    }
                    None => {
                        inner.now = target;
                        None
                    }
                }
            };
            match next {
                Some(entry) => (entry.callback)(),
                None => break,
            }
        }
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).expect("timer duration out of range")
}

/// Handle to a registered mock-clock callback.
pub struct MockTimer {
    clock: Weak<Mutex<ClockInner>>,
    sequence: u64,
}

impl MockTimer {
    /// Remove the callback if it has not fired yet. Returns whether it was
    /// still pending.
    pub fn stop(&self) -> bool {
        let Some(clock) = self.clock.upgrade() else {
            return false;
        };
        let mut inner = clock.lock().unwrap();
        match inner.timers.iter().position(|t| t.sequence == self.sequence) {
            Some(index) => {
                inner.timers.swap_remove(index);
                true
            }
            None => false,
        }
    }
}
