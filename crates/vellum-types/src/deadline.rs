use std::time::{Duration, Instant};

/// Point in time after which an operation must give up.
///
/// Checked at phase boundaries rather than enforced preemptively: a single
/// backend call that has already started runs to completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
        }
    }

    /// A deadline at a fixed instant.
    pub fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    /// A deadline that never expires.
    pub const fn never() -> Self {
        Self { at: None }
    }

    /// Returns `true` once the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left before expiry; `None` for a deadline that never expires.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::never()
    }
}
