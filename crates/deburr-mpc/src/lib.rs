//! Receding-horizon model predictive control for manipulator point reaching.
//!
//! The pipeline per control tick:
//!
//! 1. **Control loop** reads the measured state `[q; v]` and the target
//! 2. **MPC orchestrator** ([`MpcPoint`]) updates the target, optionally
//!    raises the goal weight, shifts the previous plan by one step
//! 3. **OCP formulator** ([`OcpPoint`]) re-anchors node 0 and runs a small
//!    DDP budget from that warm start
//! 4. The first feedforward `u0` and feedback gain `K0` go back to the robot
//!    as `u = u0 + K0 (x - x_anchor)`
//!
//! # Architecture
//!
//! Every node of the horizon is an [`ArmNode`]: semi-implicit Euler over the
//! rigid-body model of `deburr-model` plus a weighted sum of named cost terms
//! (goal tracking, posture, control regularization, state and control limit
//! barriers). The robot model is built once and shared read-only behind an
//! `Arc`.
//!
//! Each controller can capture its `(state in, command out)` pairs into a
//! versioned JSON archive; [`replay`] re-runs a fresh controller over an
//! archive and reports every deviation.

pub mod control;
pub mod costs;
pub mod debug;
pub mod error;
pub mod mpc;
pub mod node;
pub mod ocp;
pub mod replay;
pub mod settings;

pub use control::{
    ControlLoop, FixedTarget, LoopStats, RobotInterface, ScriptedMocap, SimulatedRobot,
    TargetSource,
};
pub use costs::{CostEntry, CostEvaluation, CostKind, CostModelSum};
pub use debug::{
    ARCHIVE_FORMAT, ARCHIVE_VERSION, ArchiveKind, ArchiveRecord, DebugLog, DebugRecord,
    MatrixData, OcpDebugRecord, read_archive, write_archive,
};
pub use error::{ConfigError, DebugError, MpcError, OcpError};
pub use mpc::{Command, MpcPoint};
pub use node::ArmNode;
pub use ocp::OcpPoint;
pub use replay::{
    Mismatch, MismatchKind, ReplayReport, ReplayTolerances, compare_trajectory, replay_commands,
    replay_trajectories,
};
pub use settings::{ControllerSettings, MpcSettings, OcpSettings};

pub use deburr_ddp::{SolveReport, StopReason, Trajectory};
pub use deburr_model::{DesignerSettings, RobotDesigner};
