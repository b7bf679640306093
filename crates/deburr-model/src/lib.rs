//! Robot model provider for the deburring controller.
//!
//! Builds a reduced kinematic chain over the controlled joints of a URDF
//! description, attaches the tool frame, and answers the kinematic and
//! dynamic queries the optimal control problem needs.
//!
//! # Architecture
//!
//! ```text
//! RobotDescription ──► KinematicChain ──► RobotDesigner ──► (FK, Jacobian, M(q), g(q), a)
//! ```
//!
//! A [`RobotDesigner`] is built once at startup and then shared read-only
//! (`Arc<RobotDesigner>`) by the OCP, the MPC and the control loop.

pub mod chain;
pub mod designer;
pub mod dynamics;
pub mod error;
pub mod settings;

pub use chain::{BodyInertia, ChainFrames, ChainJoint, KinematicChain};
pub use designer::RobotDesigner;
pub use dynamics::DynamicsDerivatives;
pub use error::ModelError;
pub use settings::DesignerSettings;
