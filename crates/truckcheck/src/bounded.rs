//! Bounded steps.
//!
//! Every suspension point in the pipeline goes through [`run_bounded`], so no
//! step can wait forever and every overrun is logged the same way.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

/// Result of a step run under a budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bounded<T> {
    /// The step finished in time.
    Completed(T),
    /// The budget ran out first; the step was dropped.
    TimedOut,
}

impl<T> Bounded<T> {
    /// The value, if the step finished.
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(v) => Some(v),
            Self::TimedOut => None,
        }
    }

    /// Whether the budget ran out.
    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

impl<T> Bounded<Option<T>> {
    /// Collapse a timed-out or empty step into `None`.
    pub fn flatten(self) -> Option<T> {
        self.completed().flatten()
    }
}

/// Run `step` for at most `budget`.
pub async fn run_bounded<F>(name: &'static str, budget: Duration, step: F) -> Bounded<F::Output>
where
    F: Future,
{
    let started = Instant::now();
    match tokio::time::timeout(budget, step).await {
        Ok(value) => {
            debug!(
                step = name,
                elapsed_ms = elapsed_ms(started),
                "Step completed"
            );
            Bounded::Completed(value)
        }
        Err(_) => {
            warn!(
                step = name,
                budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
                "Step exceeded its budget"
            );
            Bounded::TimedOut
        }
    }
}

/// A fixed point in time that several steps share a budget against.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// A deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// Time left, zero once passed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// `budget`, cut down to whatever is left.
    #[must_use]
    pub fn clamp(&self, budget: Duration) -> Duration {
        budget.min(self.remaining())
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
