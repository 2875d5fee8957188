//! Runtime settings for the operator.
//!
//! All knobs recognized by the deprovisioning core live here. `main.rs`
//! populates this from CLI flags; tests construct it directly with shortened
//! intervals.

use std::time::Duration;

use crate::retry::RetryConfig;

/// A per-reason event rate limit.
///
/// Reasons without a configured limit are not throttled (only deduplicated).
#[derive(Clone, Debug)]
pub struct RateLimit {
    /// Event reason the bucket applies to (e.g. "NominatePod")
    pub reason: String,
    /// Sustained refill rate
    pub tokens_per_sec: f64,
    /// Bucket capacity; events beyond this in a burst are dropped
    pub burst: f64,
}

/// Operator settings.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Idle requeue interval of the deprovisioning loop
    pub polling_period: Duration,
    /// Settling delay before a consolidation command is re-validated
    pub consolidation_ttl: Duration,
    /// Retry envelope for readiness and deletion waits
    pub wait_retry: RetryConfig,
    /// Window within which identical (reason, entity) events coalesce
    pub event_dedupe_window: Duration,
    /// Token buckets applied per event reason
    pub event_rate_limits: Vec<RateLimit>,
    /// Wall-clock budget for the multi-node consolidation search
    pub multi_node_consolidation_budget: Duration,
    /// Delete machines that have not registered a node within this TTL.
    /// `None` disables the liveness sweep.
    pub ttl_after_not_registered: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            polling_period: Duration::from_secs(10),
            consolidation_ttl: Duration::from_secs(15),
            wait_retry: RetryConfig::wait_envelope(),
            event_dedupe_window: Duration::from_secs(120),
            event_rate_limits: vec![RateLimit {
                reason: crate::events::reasons::NOMINATE_POD.to_string(),
                tokens_per_sec: 5.0,
                burst: 10.0,
            }],
            multi_node_consolidation_budget: Duration::from_secs(60),
            ttl_after_not_registered: Some(Duration::from_secs(15 * 60)),
        }
    }
}
