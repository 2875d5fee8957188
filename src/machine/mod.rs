//! Machine controllers.
//!
//! Machines record launched capacity. The liveness sweep reclaims machines
//! whose instance never registered as a node so failed launches do not leak
//! spend forever.

mod liveness;

pub use liveness::{error_policy, reconcile, Context, KubeMachineClient, MachineClient};
