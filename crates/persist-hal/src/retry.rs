//! Bounded retry with a fixed inter-attempt delay.
//!
//! Shared by the mount manager (unmount escalation) and the partition-table wait.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

/// One attempt within a [`RetryPolicy`] run. `index` is zero based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub index: u32,
    pub total: u32,
}

impl Attempt {
    pub fn number(&self) -> u32 {
        self.index + 1
    }

    pub fn is_first(&self) -> bool {
        self.index == 0
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 >= self.total
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Same attempt count without any sleeping (tests).
    pub const fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    pub fn with_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..self
        }
    }

    pub fn attempts(&self) -> impl Iterator<Item = Attempt> {
        let total = self.max_attempts;
        (0..total).map(move |index| Attempt { index, total })
    }

    pub fn pause(&self) {
        pause(self.delay);
    }

    /// Call `check` once per attempt until it returns true, pausing between attempts.
    pub fn poll_until(&self, mut check: impl FnMut(Attempt) -> bool) -> bool {
        for attempt in self.attempts() {
            if check(attempt) {
                return true;
            }
            if !attempt.is_last() {
                self.pause();
            }
        }
        false
    }
}

/// Sleep for `delay`, skipping the syscall entirely for zero.
pub fn pause(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}
