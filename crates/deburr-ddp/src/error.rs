//! Error types for the trajectory optimizer.

/// Errors raised before or during a solve.
///
/// Running out of iterations is not an error; see
/// [`SolveReport`](crate::SolveReport).
#[derive(Debug, thiserror::Error)]
pub enum DdpError {
    #[error("{what} has dimension {got}, expected {expected}")]
    Dimension {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("trajectory spans {got} nodes, problem horizon is {expected}")]
    Horizon { expected: usize, got: usize },

    #[error("problem horizon must have at least one running node")]
    EmptyHorizon,

    /// The warm-start rollout left the finite domain.
    #[error("non-finite state or cost at node {node} of the initial rollout")]
    NonFiniteRollout { node: usize },

    /// An action model could not be evaluated along the trajectory.
    #[error("action model failed at node {node}: {source}")]
    Model {
        node: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid value for {field}: {message}")]
    InvalidSettings {
        field: &'static str,
        message: &'static str,
    },
}
