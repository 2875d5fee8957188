//! Operator-facing explanations for nodes the deprovisioner leaves alone.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;

use crate::cluster::NodeExt;
use crate::events::{self, Recorder};

/// Publishes reason-coded `Unconsolidatable` events.
///
/// The recorder's dedupe window keeps a node that is re-evaluated every tick
/// from flooding the API server with identical explanations.
pub struct Reporter {
    recorder: Arc<Recorder>,
}

impl Reporter {
    /// Create a reporter publishing through the given recorder
    pub fn new(recorder: Arc<Recorder>) -> Self {
        Self { recorder }
    }

    /// Record why the node cannot be deprovisioned right now
    pub fn record_unconsolidatable(&self, node: &Node, reason: &str) {
        tracing::debug!(node = %node.node_name(), reason, "node cannot be deprovisioned");
        self.recorder.publish(events::unconsolidatable(node, reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{node, test_recorder};

    #[test]
    fn repeated_reasons_for_one_node_coalesce() {
        let (recorder, sink, _clock) = test_recorder();
        let reporter = Reporter::new(recorder);
        let n = node("node-1", "general", "m5.large");

        for _ in 0..5 {
            reporter.record_unconsolidatable(&n, "pod default/web-0 has the do-not-evict annotation");
        }
        assert_eq!(sink.count("Unconsolidatable"), 1);
    }
}
