//! Injectable wall clock.
//!
//! Every age and TTL decision in the deprovisioning pipeline (expiration,
//! emptiness, validation settling, consolidation time budgets, event rate
//! limiting) reads time through [`Clock`] so tests can pin or advance it.

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
