//! URDF parsing and robot description for the deburring controller.
//!
//! Provides an f64 in-memory representation of a robot's kinematic tree
//! (links, joints, inertials, limits) parsed from URDF XML. Geometry and
//! materials are not retained: the controller only needs kinematics and
//! mass properties.

pub mod error;
pub mod parser;
pub mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use error::UrdfError;
pub use parser::{parse_file, parse_string};
pub use types::{
    Inertial, JointData, JointDynamics, JointLimits, JointType, LinkData, Origin, RobotDescription,
};
