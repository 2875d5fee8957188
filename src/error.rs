//! Error types for the Scythe operator

use thiserror::Error;

/// Main error type for Scythe operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for CRD specs or commands
    #[error("validation error: {0}")]
    Validation(String),

    /// A candidate node started deleting while a decision was being computed.
    ///
    /// Transient: the strategy observing it returns a retry command and the
    /// controller requeues immediately.
    #[error("candidate node is deleting")]
    CandidateDeleting,

    /// Scheduling simulation error
    #[error("simulation error: {0}")]
    Simulation(String),

    /// Replacement machine launch error
    #[error("launch error: {0}")]
    Launch(String),

    /// A replacement node never became ready
    #[error("readiness error: {0}")]
    Readiness(String),

    /// Instance type pricing could not be resolved
    #[error("pricing error: {0}")]
    Pricing(String),

    /// Several underlying errors collapsed into one
    #[error("{0}")]
    Aggregate(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a simulation error with the given message
    pub fn simulation(msg: impl Into<String>) -> Self {
        Self::Simulation(msg.into())
    }

    /// Create a launch error with the given message
    pub fn launch(msg: impl Into<String>) -> Self {
        Self::Launch(msg.into())
    }

    /// Create a readiness error with the given message
    pub fn readiness(msg: impl Into<String>) -> Self {
        Self::Readiness(msg.into())
    }

    /// Create a pricing error with the given message
    pub fn pricing(msg: impl Into<String>) -> Self {
        Self::Pricing(msg.into())
    }

    /// Collapse a list of errors into a single aggregate error.
    ///
    /// Returns `None` when the list is empty so callers can write
    /// `Error::aggregate(errs).map_or(Ok(()), Err)`.
    pub fn aggregate(errs: Vec<Error>) -> Option<Error> {
        match errs.len() {
            0 => None,
            1 => errs.into_iter().next(),
            _ => Some(Error::Aggregate(
                errs.iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
            )),
        }
    }

    /// True when the error is the transient candidate-deleting marker
    pub fn is_candidate_deleting(&self) -> bool {
        matches!(self, Error::CandidateDeleting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_of_nothing_is_none() {
        assert!(Error::aggregate(vec![]).is_none());
    }

    #[test]
    fn aggregate_of_one_keeps_the_error() {
        let err = Error::aggregate(vec![Error::launch("instance type unavailable")]).unwrap();
        assert!(matches!(err, Error::Launch(_)));
    }

    #[test]
    fn aggregate_joins_messages() {
        let err = Error::aggregate(vec![
            Error::launch("no capacity"),
            Error::readiness("node never registered"),
        ])
        .unwrap();
        let msg = err.to_string();
        assert!(msg.contains("no capacity"));
        assert!(msg.contains("node never registered"));
    }

    #[test]
    fn candidate_deleting_is_detectable() {
        assert!(Error::CandidateDeleting.is_candidate_deleting());
        assert!(!Error::validation("x").is_candidate_deleting());
    }
}
