//! Trajectory optimizer for the deburring controller.
//!
//! A finite-horizon [`ShootingProblem`] is a chain of [`ActionModel`]s, one
//! per node, anchored at an initial state. [`DdpSolver`] runs differential
//! dynamic programming over it: a Riccati backward pass with Levenberg
//! regularisation, then a backtracking forward rollout under the
//! feedback law
//!
//! ```text
//! u_i = us_i + alpha * k_i + K_i (x_i - xs_i)
//! ```
//!
//! The solution lives in a caller-owned [`Trajectory`], which also seeds the
//! next solve (warm start).

pub mod error;
pub mod problem;
pub mod solver;
pub mod trajectory;

pub use error::DdpError;
pub use problem::{ActionModel, NodeDerivatives, ShootingProblem, TerminalDerivatives};
pub use solver::{DdpSolver, SolveReport, SolverSettings, StopReason};
pub use trajectory::Trajectory;
