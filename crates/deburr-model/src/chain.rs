//! Reduced kinematic chain extracted from a [`RobotDescription`].
//!
//! A [`KinematicChain`] is the ordered list of controlled joints from the
//! root link to the end-effector link. Joints on that path that are not
//! controlled are locked at zero and folded, together with fixed joints,
//! into the next controlled joint's origin. Every controlled joint carries
//! the lumped inertia of the links it moves up to the next controlled
//! joint.

use nalgebra::{DMatrix, Isometry3, Matrix3, Point3, Translation3, UnitQuaternion, UnitVector3, Vector3};

use deburr_urdf::{Inertial, JointType, Origin, RobotDescription, UrdfError};

use crate::error::ModelError;

// ---------------------------------------------------------------------------
// BodyInertia
// ---------------------------------------------------------------------------

/// Mass properties of a rigid body, expressed in some reference frame.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyInertia {
    /// Mass in kilograms.
    pub mass: f64,
    /// Center of mass in the reference frame.
    pub com: Vector3<f64>,
    /// Rotational inertia about the center of mass, axes of the reference frame.
    pub inertia: Matrix3<f64>,
}

impl BodyInertia {
    /// A massless body.
    pub fn zero() -> Self {
        Self {
            mass: 0.0,
            com: Vector3::zeros(),
            inertia: Matrix3::zeros(),
        }
    }

    /// Mass properties of a URDF inertial, expressed in its link frame.
    pub fn from_inertial(inertial: &Inertial) -> Self {
        let [ixx, ixy, ixz, iyy, iyz, izz] = inertial.inertia;
        let local = Matrix3::new(ixx, ixy, ixz, ixy, iyy, iyz, ixz, iyz, izz);
        let frame = origin_to_isometry(&inertial.origin);
        let rotation = frame.rotation.to_rotation_matrix();
        Self {
            mass: inertial.mass,
            com: frame.translation.vector,
            inertia: rotation.matrix() * local * rotation.matrix().transpose(),
        }
    }

    /// The same body expressed in the parent frame of `pose`.
    pub fn transformed(&self, pose: &Isometry3<f64>) -> Self {
        let rotation = pose.rotation.to_rotation_matrix();
        Self {
            mass: self.mass,
            com: pose.transform_point(&Point3::from(self.com)).coords,
            inertia: rotation.matrix() * self.inertia * rotation.matrix().transpose(),
        }
    }

    /// Rigidly attach `other` (same reference frame) to this body.
    pub fn merge(&mut self, other: &Self) {
        let total = self.mass + other.mass;
        if total <= 0.0 {
            return;
        }
        let com = (self.com * self.mass + other.com * other.mass) / total;
        let inertia = self.inertia
            + parallel_axis(self.mass, &(self.com - com))
            + other.inertia
            + parallel_axis(other.mass, &(other.com - com));
        self.mass = total;
        self.com = com;
        self.inertia = inertia;
    }
}

/// Steiner term `m (|d|^2 I - d d^T)`.
fn parallel_axis(mass: f64, d: &Vector3<f64>) -> Matrix3<f64> {
    (Matrix3::identity() * d.norm_squared() - d * d.transpose()) * mass
}

// ---------------------------------------------------------------------------
// ChainJoint
// ---------------------------------------------------------------------------

/// A single controlled joint in the chain.
#[derive(Debug, Clone)]
pub struct ChainJoint {
    /// Name of this joint (from URDF).
    pub name: String,
    /// Static transform from the previous joint's moving frame to this joint frame.
    pub origin: Isometry3<f64>,
    /// Joint axis in the joint's local frame.
    pub axis: UnitVector3<f64>,
    /// Whether this is a prismatic joint (false = revolute).
    pub is_prismatic: bool,
    /// Lower position limit (rad or m), `-inf` when unbounded.
    pub lower_limit: f64,
    /// Upper position limit (rad or m), `+inf` when unbounded.
    pub upper_limit: f64,
    /// Velocity limit (rad/s or m/s), `+inf` when unspecified.
    pub velocity_limit: f64,
    /// Effort limit (Nm or N), `+inf` when unspecified.
    pub effort_limit: f64,
    /// Viscous damping (Nm*s/rad).
    pub damping: f64,
    /// Lumped inertia moved by this joint, in the joint's moving frame.
    pub body: BodyInertia,
}

// ---------------------------------------------------------------------------
// ChainFrames
// ---------------------------------------------------------------------------

/// World-frame quantities for one configuration, computed by [`KinematicChain::frames`].
#[derive(Debug, Clone)]
pub struct ChainFrames {
    /// Joint origins before joint motion.
    pub joint_origins: Vec<Vector3<f64>>,
    /// Joint axes in the world frame.
    pub joint_axes: Vec<Vector3<f64>>,
    /// Moving frame of each joint (after joint motion).
    pub body_poses: Vec<Isometry3<f64>>,
    /// Tool frame pose.
    pub ee_pose: Isometry3<f64>,
}

// ---------------------------------------------------------------------------
// KinematicChain
// ---------------------------------------------------------------------------

/// An ordered chain of controlled joints from the root link to the tool frame.
#[derive(Debug, Clone)]
pub struct KinematicChain {
    joints: Vec<ChainJoint>,
    /// Transform from the last joint's moving frame to the end-effector link.
    link_offset: Isometry3<f64>,
    /// Tool frame relative to the end-effector link.
    tool_offset: Isometry3<f64>,
}

impl KinematicChain {
    /// Build the chain from `description`'s root link to `ee_link`.
    ///
    /// `controlled` lists the joints kept as degrees of freedom, in
    /// root-to-tip order. Actuated joints on the path that are not listed
    /// are locked at zero.
    pub fn from_description(
        description: &RobotDescription,
        ee_link: &str,
        controlled: &[String],
    ) -> Result<Self, ModelError> {
        let path = description.joint_path_to(ee_link)?;

        let mut joints: Vec<ChainJoint> = Vec::new();
        let mut accumulated = Isometry3::identity();

        for joint in path {
            let origin = origin_to_isometry(&joint.origin);
            let is_controlled = controlled.iter().any(|name| *name == joint.name);

            match joint.joint_type {
                JointType::Floating | JointType::Planar => {
                    return Err(UrdfError::UnsupportedJoint {
                        joint: joint.name.clone(),
                        kind: format!("{:?}", joint.joint_type).to_lowercase(),
                    }
                    .into());
                }
                jt if jt.is_actuated() && is_controlled => {
                    let limits = &joint.limits;
                    let (lower, upper) = if jt == JointType::Continuous {
                        (f64::NEG_INFINITY, f64::INFINITY)
                    } else {
                        (
                            limits.lower.unwrap_or(f64::NEG_INFINITY),
                            limits.upper.unwrap_or(f64::INFINITY),
                        )
                    };
                    let axis = Vector3::new(joint.axis[0], joint.axis[1], joint.axis[2]);
                    joints.push(ChainJoint {
                        name: joint.name.clone(),
                        origin: accumulated * origin,
                        axis: UnitVector3::new_normalize(axis),
                        is_prismatic: jt == JointType::Prismatic,
                        lower_limit: lower,
                        upper_limit: upper,
                        velocity_limit: positive_or_inf(limits.velocity),
                        effort_limit: positive_or_inf(limits.effort),
                        damping: joint.dynamics.damping,
                        body: BodyInertia::zero(),
                    });
                    accumulated = Isometry3::identity();
                }
                // Fixed, or locked at zero: the joint motion is the identity.
                _ => accumulated *= origin,
            }

            if let Some(inertial) = &description.link(&joint.child)?.inertial
                && let Some(last) = joints.last_mut()
            {
                last.body
                    .merge(&BodyInertia::from_inertial(inertial).transformed(&accumulated));
            }
        }

        let names: Vec<String> = joints.iter().map(|j| j.name.clone()).collect();
        if let Some(missing) = controlled.iter().find(|c| !names.contains(c)) {
            return Err(ModelError::JointNotOnChain(missing.clone()));
        }
        if names != controlled {
            return Err(ModelError::JointOrder {
                expected: names,
                got: controlled.to_vec(),
            });
        }

        Ok(Self {
            joints,
            link_offset: accumulated,
            tool_offset: Isometry3::identity(),
        })
    }

    /// Number of controlled degrees of freedom.
    pub fn dof(&self) -> usize {
        self.joints.len()
    }

    /// Joint names in chain order.
    pub fn joint_names(&self) -> Vec<&str> {
        self.joints.iter().map(|j| j.name.as_str()).collect()
    }

    pub fn joints(&self) -> &[ChainJoint] {
        &self.joints
    }

    /// Replace position limits. Lengths and ordering are checked by the caller.
    pub(crate) fn set_position_limits(&mut self, lower: &[f64], upper: &[f64]) {
        for ((joint, &lo), &hi) in self.joints.iter_mut().zip(lower).zip(upper) {
            joint.lower_limit = lo;
            joint.upper_limit = hi;
        }
    }

    /// Tool frame relative to the end-effector link.
    pub fn tool_offset(&self) -> &Isometry3<f64> {
        &self.tool_offset
    }

    pub fn set_tool_offset(&mut self, offset: Isometry3<f64>) {
        self.tool_offset = offset;
    }

    /// Compute all world-frame joint and body frames for `q`.
    ///
    /// # Panics
    ///
    /// Panics if `q.len() != self.dof()`.
    pub fn frames(&self, q: &[f64]) -> ChainFrames {
        assert_eq!(q.len(), self.dof(), "q.len() must equal chain DOF");

        let n = self.dof();
        let mut transform = Isometry3::identity();
        let mut joint_origins = Vec::with_capacity(n);
        let mut joint_axes = Vec::with_capacity(n);
        let mut body_poses = Vec::with_capacity(n);

        for (joint, &position) in self.joints.iter().zip(q) {
            transform *= joint.origin;
            joint_origins.push(transform.translation.vector);
            joint_axes.push(transform.rotation * joint.axis.into_inner());
            transform *= joint_transform(&joint.axis, joint.is_prismatic, position);
            body_poses.push(transform);
        }

        ChainFrames {
            joint_origins,
            joint_axes,
            body_poses,
            ee_pose: transform * self.link_offset * self.tool_offset,
        }
    }

    /// Tool frame pose for `q`.
    pub fn forward_kinematics(&self, q: &[f64]) -> Isometry3<f64> {
        self.frames(q).ee_pose
    }

    /// Translational Jacobian (3 x dof) of a world point rigidly attached to
    /// the moving frame of joint `body`.
    pub fn point_jacobian(
        &self,
        frames: &ChainFrames,
        body: usize,
        point: &Vector3<f64>,
    ) -> DMatrix<f64> {
        let mut jacobian = DMatrix::zeros(3, self.dof());
        for k in 0..=body {
            let z = &frames.joint_axes[k];
            let column = if self.joints[k].is_prismatic {
                *z
            } else {
                z.cross(&(point - frames.joint_origins[k]))
            };
            jacobian.fixed_view_mut::<3, 1>(0, k).copy_from(&column);
        }
        jacobian
    }

    /// Angular velocity Jacobian (3 x dof) of the moving frame of joint `body`.
    pub fn angular_jacobian(&self, frames: &ChainFrames, body: usize) -> DMatrix<f64> {
        let mut jacobian = DMatrix::zeros(3, self.dof());
        for k in 0..=body {
            if !self.joints[k].is_prismatic {
                jacobian
                    .fixed_view_mut::<3, 1>(0, k)
                    .copy_from(&frames.joint_axes[k]);
            }
        }
        jacobian
    }

    /// Translational Jacobian (3 x dof) of the tool frame origin.
    pub fn ee_jacobian(&self, frames: &ChainFrames) -> DMatrix<f64> {
        match self.dof() {
            0 => DMatrix::zeros(3, 0),
            n => self.point_jacobian(frames, n - 1, &frames.ee_pose.translation.vector),
        }
    }

    /// Clamp joint positions to their limits.
    pub fn clamp_joints(&self, q: &mut [f64]) {
        for (value, joint) in q.iter_mut().zip(&self.joints) {
            *value = value.clamp(joint.lower_limit, joint.upper_limit);
        }
    }
}

fn positive_or_inf(value: f64) -> f64 {
    if value > 0.0 { value } else { f64::INFINITY }
}

/// Convert a URDF [`Origin`] (xyz + rpy) to an [`Isometry3`].
pub(crate) fn origin_to_isometry(origin: &Origin) -> Isometry3<f64> {
    let [x, y, z] = origin.xyz;
    let [roll, pitch, yaw] = origin.rpy;
    Isometry3::from_parts(
        Translation3::new(x, y, z),
        UnitQuaternion::from_euler_angles(roll, pitch, yaw),
    )
}

/// Compute the transform for a single joint at a given position.
fn joint_transform(axis: &UnitVector3<f64>, is_prismatic: bool, position: f64) -> Isometry3<f64> {
    if is_prismatic {
        Isometry3::from_parts(
            Translation3::from(axis.into_inner() * position),
            UnitQuaternion::identity(),
        )
    } else {
        Isometry3::from_parts(
            Translation3::identity(),
            UnitQuaternion::from_axis_angle(axis, position),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
