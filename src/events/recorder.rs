//! Event recorder with dedupe and per-reason rate limiting.
//!
//! Publishing is best-effort and never blocks the control loop: events flow
//! through an in-memory dedupe window and a token bucket per configured
//! reason before reaching the downstream sink, and the Kubernetes sink posts
//! asynchronously on its own task.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder as KubeRecorder, Reporter};
use kube::Client;
use parking_lot::Mutex;
use tracing::warn;

use super::{Event, EventKind};
use crate::clock::Clock;
use crate::config::Settings;

/// Downstream destination for events that survive dedupe and rate limiting
pub trait EventSink: Send + Sync {
    /// Deliver one event. Must not block.
    fn emit(&self, event: &Event);
}

/// Per-reason token bucket
struct TokenBucket {
    tokens_per_sec: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    refilled_at: DateTime<Utc>,
}

impl TokenBucket {
    fn new(tokens_per_sec: f64, burst: f64, now: DateTime<Utc>) -> Self {
        Self {
            tokens_per_sec,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                refilled_at: now,
            }),
        }
    }

    fn try_acquire(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        let elapsed = (now - state.refilled_at)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0;
        state.tokens = (state.tokens + elapsed * self.tokens_per_sec).min(self.burst);
        state.refilled_at = now;
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Deduplicating, rate-limiting event recorder.
///
/// Identical (reason, entity) pairs within the dedupe window coalesce to one
/// downstream emission. Reasons with a configured rate limit additionally
/// pass through a token bucket; events beyond the burst are dropped and
/// counted, never retried.
pub struct Recorder {
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    dedupe_window: Duration,
    seen: DashMap<(String, String), DateTime<Utc>>,
    buckets: HashMap<String, TokenBucket>,
    dropped: DashMap<String, u64>,
}

impl Recorder {
    /// Create a recorder with the rate limits and dedupe window from settings
    pub fn new(sink: Arc<dyn EventSink>, clock: Arc<dyn Clock>, settings: &Settings) -> Self {
        let now = clock.now();
        let buckets = settings
            .event_rate_limits
            .iter()
            .map(|limit| {
                (
                    limit.reason.clone(),
                    TokenBucket::new(limit.tokens_per_sec, limit.burst, now),
                )
            })
            .collect();
        Self {
            sink,
            clock,
            dedupe_window: Duration::from_std(settings.event_dedupe_window)
                .unwrap_or_else(|_| Duration::seconds(120)),
            seen: DashMap::new(),
            buckets,
            dropped: DashMap::new(),
        }
    }

    /// Publish an event, best-effort
    pub fn publish(&self, event: Event) {
        let now = self.clock.now();

        let identity = dedupe_identity(&event);
        let duplicate = self
            .seen
            .get(&identity)
            .is_some_and(|last| now - *last < self.dedupe_window);
        if duplicate {
            return;
        }

        if let Some(bucket) = self.buckets.get(event.reason) {
            if !bucket.try_acquire(now) {
                *self.dropped.entry(event.reason.to_string()).or_insert(0) += 1;
                return;
            }
        }

        self.seen.insert(identity, now);
        self.sink.emit(&event);
    }

    /// How many events of the given reason have been dropped by rate limiting
    pub fn dropped(&self, reason: &str) -> u64 {
        self.dropped.get(reason).map(|v| *v).unwrap_or(0)
    }
}

fn dedupe_identity(event: &Event) -> (String, String) {
    let entity = if event.entity.uid.is_empty() {
        format!(
            "{}/{}/{}",
            event.entity.kind, event.entity.namespace, event.entity.name
        )
    } else {
        event.entity.uid.clone()
    };
    (event.reason.to_string(), entity)
}

/// Sink that posts real Kubernetes Events, fire-and-forget.
pub struct KubeEventSink {
    recorder: Arc<KubeRecorder>,
}

impl KubeEventSink {
    /// Create a sink reporting as the given controller name
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Arc::new(KubeRecorder::new(client, reporter)),
        }
    }
}

impl EventSink for KubeEventSink {
    fn emit(&self, event: &Event) {
        let recorder = self.recorder.clone();
        let reference = ObjectReference {
            kind: Some(event.entity.kind.clone()),
            name: Some(event.entity.name.clone()),
            namespace: (!event.entity.namespace.is_empty())
                .then(|| event.entity.namespace.clone()),
            uid: (!event.entity.uid.is_empty()).then(|| event.entity.uid.clone()),
            ..Default::default()
        };
        let kube_event = kube::runtime::events::Event {
            type_: match event.kind {
                EventKind::Normal => EventType::Normal,
                EventKind::Warning => EventType::Warning,
            },
            reason: event.reason.to_string(),
            note: Some(event.message.clone()),
            action: "Deprovision".to_string(),
            secondary: None,
        };
        let reason = event.reason;
        tokio::spawn(async move {
            if let Err(e) = recorder.publish(&kube_event, &reference).await {
                warn!(reason, error = %e, "failed to publish kubernetes event");
            }
        });
    }
}
