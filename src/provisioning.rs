//! Provisioning engine abstraction.
//!
//! The deprovisioner never bin-packs pods itself. It asks the provisioning
//! engine two questions: "if these candidate nodes disappeared, where would
//! their pods go?" (simulation) and "launch these replacement machines"
//! (atomic launch). Production deployments plug a real scheduler integration
//! in here; the bundled [`ConservativeEngine`] assumes no spare capacity so
//! only the delete-only strategies act.

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::cloud::InstanceType;
use crate::deprovisioning::CandidateNode;
use crate::{Error, Result};

/// A replacement machine the simulation asks for: the pods it would host and
/// the instance types able to host them, cheapest first.
#[derive(Clone, Debug, Default)]
pub struct MachineRequest {
    /// "namespace/name" keys of the pods the machine would host
    pub pods: Vec<String>,
    /// Acceptable instance types, sorted by ascending price
    pub instance_type_options: Vec<InstanceType>,
}

impl MachineRequest {
    /// Price of the cheapest acceptable instance type
    pub fn cheapest_price(&self) -> Option<f64> {
        self.instance_type_options.first().map(|it| it.price)
    }
}

/// Outcome of simulating the cluster without a set of candidate nodes.
#[derive(Clone, Debug, Default)]
pub struct SimulationResults {
    /// Machines that would have to be launched to host displaced pods
    pub new_machines: Vec<MachineRequest>,
    /// Names of existing or in-flight nodes that absorb displaced pods
    pub inflight_nodes: Vec<String>,
    /// "namespace/name" keys of pods that could not be placed anywhere
    pub unplaced: Vec<String>,
}

impl SimulationResults {
    /// True when every displaced pod found a home
    pub fn all_pods_scheduled(&self) -> bool {
        self.unplaced.is_empty()
    }
}

/// The scheduler-side capabilities the deprovisioner consumes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProvisioningEngine: Send + Sync {
    /// Simulate scheduling the candidates' reschedulable pods onto the
    /// cluster as if the candidates did not exist
    async fn simulate_scheduling(&self, candidates: &[CandidateNode]) -> Result<SimulationResults>;

    /// Launch the requested machines. Atomic: returns exactly one name per
    /// request or an error with nothing launched.
    async fn launch_machines(&self, machines: &[MachineRequest]) -> Result<Vec<String>>;
}

/// Engine for deployments without a scheduler integration.
///
/// Reports every reschedulable pod as unplaced, which keeps the
/// consolidation strategies from ever acting; expiration, drift, and
/// emptiness still work since they never simulate.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConservativeEngine;

#[async_trait]
impl ProvisioningEngine for ConservativeEngine {
    async fn simulate_scheduling(&self, candidates: &[CandidateNode]) -> Result<SimulationResults> {
        let unplaced = candidates
            .iter()
            .flat_map(|c| c.reschedulable_pod_keys())
            .collect();
        Ok(SimulationResults {
            unplaced,
            ..Default::default()
        })
    }

    async fn launch_machines(&self, _machines: &[MachineRequest]) -> Result<Vec<String>> {
        Err(Error::launch(
            "no provisioning engine configured; cannot launch replacement machines",
        ))
    }
}
