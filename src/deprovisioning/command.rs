//! The decision a strategy produces for one tick.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::provisioning::MachineRequest;

use super::CandidateNode;

/// What a command does
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do; consult the next strategy
    DoNothing,
    /// A transient condition was observed; requeue immediately
    Retry,
    /// Remove nodes, pods reschedule onto existing capacity
    Delete,
    /// Remove nodes and launch cheaper replacements first
    Replace,
}

/// An immutable deprovisioning decision.
///
/// Constructed inside one tick, optionally validated (which may wait out the
/// settling delay), and executed or discarded in the same tick. Never
/// persisted.
#[derive(Clone, Debug)]
pub struct Command {
    /// What to do
    pub action: Action,
    /// Nodes to remove; non-empty for Delete and Replace
    pub nodes_to_remove: Vec<CandidateNode>,
    /// Machines to launch first; non-empty iff action is Replace
    pub replacement_machines: Vec<MachineRequest>,
    /// When the decision was computed; validation measures its settling
    /// delay from here
    pub created: DateTime<Utc>,
}

impl Command {
    /// No action this tick
    pub fn do_nothing() -> Self {
        Self {
            action: Action::DoNothing,
            nodes_to_remove: Vec::new(),
            replacement_machines: Vec::new(),
            created: DateTime::<Utc>::MIN_UTC,
        }
    }

    /// Transient condition; the tick should requeue immediately
    pub fn retry() -> Self {
        Self {
            action: Action::Retry,
            ..Self::do_nothing()
        }
    }

    /// Remove the given nodes without replacement
    pub fn delete(nodes: Vec<CandidateNode>, created: DateTime<Utc>) -> Self {
        Self {
            action: Action::Delete,
            nodes_to_remove: nodes,
            replacement_machines: Vec::new(),
            created,
        }
    }

    /// Remove the given nodes after launching the given machines
    pub fn replace(
        nodes: Vec<CandidateNode>,
        machines: Vec<MachineRequest>,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            action: Action::Replace,
            nodes_to_remove: nodes,
            replacement_machines: machines,
            created,
        }
    }

    /// True for Delete and Replace
    pub fn is_actionable(&self) -> bool {
        matches!(self.action, Action::Delete | Action::Replace)
    }

    /// Total hourly price of the nodes being removed
    pub fn removed_price(&self) -> f64 {
        self.nodes_to_remove.iter().map(|n| n.price()).sum()
    }

    /// Total hourly price of the replacements at their cheapest acceptable
    /// instance types
    pub fn replacement_price(&self) -> f64 {
        self.replacement_machines
            .iter()
            .filter_map(|m| m.cheapest_price())
            .sum()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            Action::DoNothing => return write!(f, "do nothing"),
            Action::Retry => return write!(f, "retry"),
            Action::Delete => write!(f, "delete")?,
            Action::Replace => write!(f, "replace")?,
        }
        let names: Vec<&str> = self.nodes_to_remove.iter().map(|n| n.name()).collect();
        write!(
            f,
            ", removing {} node(s) {} (${:.3}/h)",
            names.len(),
            names.join(", "),
            self.removed_price()
        )?;
        if !self.replacement_machines.is_empty() {
            let types: Vec<String> = self
                .replacement_machines
                .iter()
                .flat_map(|m| m.instance_type_options.iter().take(3))
                .map(|it| format!("{} (${:.3}/h)", it.name, it.price))
                .collect();
            write!(
                f,
                ", launching {} machine(s) from types {}",
                self.replacement_machines.len(),
                types.join(", ")
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioning::MachineRequest;
    use crate::test_support::{candidate, instance_type};

    #[test]
    fn delete_command_describes_its_nodes() {
        let cmd = Command::delete(vec![candidate("node-1", 2.0, 1)], Utc::now());
        let text = cmd.to_string();
        assert!(text.starts_with("delete"));
        assert!(text.contains("node-1"));
        assert!(text.contains("$2.000/h"));
    }

    #[test]
    fn replace_command_describes_replacement_types() {
        let machines = vec![MachineRequest {
            pods: vec![],
            instance_type_options: vec![
                instance_type("t3.large", 0.083),
                instance_type("m5.large", 0.096),
            ],
        }];
        let cmd = Command::replace(vec![candidate("node-1", 0.192, 3)], machines, Utc::now());
        let text = cmd.to_string();
        assert!(text.starts_with("replace"));
        assert!(text.contains("t3.large"));
        assert!(text.contains("launching 1 machine(s)"));
    }

    #[test]
    fn prices_sum_over_nodes_and_machines() {
        let machines = vec![MachineRequest {
            pods: vec![],
            instance_type_options: vec![instance_type("t3.large", 0.083)],
        }];
        let cmd = Command::replace(
            vec![candidate("a", 0.10, 0), candidate("b", 0.20, 0)],
            machines,
            Utc::now(),
        );
        assert!((cmd.removed_price() - 0.30).abs() < f64::EPSILON);
        assert!((cmd.replacement_price() - 0.083).abs() < f64::EPSILON);
    }

    #[test]
    fn only_delete_and_replace_are_actionable() {
        assert!(!Command::do_nothing().is_actionable());
        assert!(!Command::retry().is_actionable());
        assert!(Command::delete(vec![candidate("a", 1.0, 0)], Utc::now()).is_actionable());
    }
}
