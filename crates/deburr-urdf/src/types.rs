//! Core data types for the in-memory robot description.
//!
//! These map closely to URDF concepts but use f64 throughout: the optimal
//! control layer compares trajectories at 1e-10, so nothing is truncated on
//! the way in.

use std::collections::HashMap;

use crate::error::UrdfError;

// ---------------------------------------------------------------------------
// JointType
// ---------------------------------------------------------------------------

/// URDF joint type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JointType {
    /// Rotation about a single axis, with position limits.
    Revolute,
    /// Unlimited rotation about a single axis.
    Continuous,
    /// Translation along an axis, with position limits.
    Prismatic,
    /// No relative motion between parent and child.
    Fixed,
    /// Unconstrained 6-DOF joint.
    Floating,
    /// Planar motion (unsupported by the controller, kept for completeness).
    Planar,
}

impl JointType {
    /// Whether this joint type has a single actuatable degree of freedom.
    pub const fn is_actuated(self) -> bool {
        matches!(self, Self::Revolute | Self::Continuous | Self::Prismatic)
    }
}

// ---------------------------------------------------------------------------
// JointLimits
// ---------------------------------------------------------------------------

/// Limits on a joint's motion, effort, and velocity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JointLimits {
    /// Lower position limit (rad or m). `None` means unbounded.
    pub lower: Option<f64>,
    /// Upper position limit (rad or m). `None` means unbounded.
    pub upper: Option<f64>,
    /// Maximum effort (Nm or N).
    pub effort: f64,
    /// Maximum velocity (rad/s or m/s).
    pub velocity: f64,
}

// ---------------------------------------------------------------------------
// JointDynamics
// ---------------------------------------------------------------------------

/// Dynamic properties of a joint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JointDynamics {
    /// Viscous damping coefficient (Nm*s/rad).
    pub damping: f64,
    /// Coulomb friction torque (Nm). Parsed but not modelled.
    pub friction: f64,
}

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

/// A 3D pose specified as position + roll-pitch-yaw.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Origin {
    /// Translation `[x, y, z]` in meters.
    pub xyz: [f64; 3],
    /// Rotation `[roll, pitch, yaw]` in radians.
    pub rpy: [f64; 3],
}

// ---------------------------------------------------------------------------
// Inertial
// ---------------------------------------------------------------------------

/// Inertial properties of a link.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inertial {
    /// Origin of the inertial frame relative to the link frame.
    pub origin: Origin,
    /// Mass in kilograms.
    pub mass: f64,
    /// Inertia tensor elements `[ixx, ixy, ixz, iyy, iyz, izz]`.
    pub inertia: [f64; 6],
}

// ---------------------------------------------------------------------------
// LinkData
// ---------------------------------------------------------------------------

/// In-memory representation of a URDF link.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkData {
    pub name: String,
    /// `None` for massless links.
    pub inertial: Option<Inertial>,
}

impl LinkData {
    /// Create a massless link.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inertial: None,
        }
    }
}

// ---------------------------------------------------------------------------
// JointData
// ---------------------------------------------------------------------------

/// In-memory representation of a URDF joint.
#[derive(Debug, Clone, PartialEq)]
pub struct JointData {
    pub name: String,
    pub joint_type: JointType,
    /// Parent link name.
    pub parent: String,
    /// Child link name.
    pub child: String,
    /// Joint origin relative to the parent link.
    pub origin: Origin,
    /// Joint axis (default `[0, 0, 1]`).
    pub axis: [f64; 3],
    pub limits: JointLimits,
    pub dynamics: JointDynamics,
}

// ---------------------------------------------------------------------------
// RobotDescription
// ---------------------------------------------------------------------------

/// Complete in-memory representation of a URDF robot.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotDescription {
    pub name: String,
    /// All links, keyed by name.
    pub links: HashMap<String, LinkData>,
    /// All joints, keyed by name.
    pub joints: HashMap<String, JointData>,
    /// Name of the root link (the one never referenced as a child).
    pub root_link: String,
}

impl RobotDescription {
    /// Get a link by name.
    pub fn link(&self, name: &str) -> Result<&LinkData, UrdfError> {
        self.links
            .get(name)
            .ok_or_else(|| UrdfError::UnknownLink(name.into()))
    }

    /// Get a joint by name.
    pub fn joint(&self, name: &str) -> Result<&JointData, UrdfError> {
        self.joints
            .get(name)
            .ok_or_else(|| UrdfError::UnknownJoint(name.into()))
    }

    /// The joint whose child is `link`, if any.
    pub fn parent_joint(&self, link: &str) -> Option<&JointData> {
        self.joints.values().find(|j| j.child == link)
    }

    /// Iterate over actuatable joints (revolute, continuous, prismatic).
    pub fn actuated_joints(&self) -> impl Iterator<Item = &JointData> {
        self.joints.values().filter(|j| j.joint_type.is_actuated())
    }

    /// Number of actuatable degrees of freedom.
    pub fn dof(&self) -> usize {
        self.actuated_joints().count()
    }

    /// Ordered joints from the root link down to `link`.
    ///
    /// Walks parent pointers upward, so the description only needs to be a
    /// tree (which URDF guarantees).
    pub fn joint_path_to(&self, link: &str) -> Result<Vec<&JointData>, UrdfError> {
        self.link(link)?;
        let mut path = Vec::new();
        let mut current = link;
        while current != self.root_link {
            let joint = self
                .parent_joint(current)
                .ok_or_else(|| UrdfError::Detached(current.into()))?;
            if path.len() > self.joints.len() {
                return Err(UrdfError::KinematicLoop(current.into()));
            }
            path.push(joint);
            current = &joint.parent;
        }
        path.reverse();
        Ok(path)
    }

    /// Names of actuated joints, sorted alphabetically.
    pub fn actuated_joint_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actuated_joints().map(|j| j.name.as_str()).collect();
        names.sort_unstable();
        names
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
