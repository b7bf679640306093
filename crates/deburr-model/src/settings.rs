//! Settings for building a [`RobotDesigner`](crate::RobotDesigner).
//!
//! Loaded from the `[robot]` table of the controller configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

fn default_tool_frame_name() -> String {
    "deburring_tool".into()
}
const fn default_armature() -> f64 {
    0.01
}
const fn default_gravity() -> [f64; 3] {
    [0.0, 0.0, -9.81]
}

/// How to reduce a URDF description to the controlled arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DesignerSettings {
    /// URDF file describing the robot.
    pub urdf_path: PathBuf,

    /// Controlled joints in root-to-tip order. Every other joint on the
    /// path to the end effector is locked at zero.
    pub controlled_joints: Vec<String>,

    /// Link the tool frame is attached to.
    pub end_effector_link: String,

    /// Name of the tool frame (default: `deburring_tool`).
    #[serde(default = "default_tool_frame_name")]
    pub tool_frame_name: String,

    /// Tool frame translation relative to `end_effector_link`.
    #[serde(default)]
    pub tool_offset: [f64; 3],

    /// Replace URDF position limits with the vectors below.
    #[serde(default)]
    pub custom_limits: bool,

    #[serde(default)]
    pub lower_position_limits: Option<Vec<f64>>,

    #[serde(default)]
    pub upper_position_limits: Option<Vec<f64>>,

    /// Rotor inertia added on the mass matrix diagonal. Zero is allowed, but
    /// a link without mass then makes the dynamics singular.
    #[serde(default = "default_armature")]
    pub armature: f64,

    /// Gravity vector in the world frame (m/s^2).
    #[serde(default = "default_gravity")]
    pub gravity: [f64; 3],
}

impl DesignerSettings {
    /// Settings with defaults for every optional field.
    pub fn new(
        urdf_path: impl Into<PathBuf>,
        controlled_joints: Vec<String>,
        end_effector_link: impl Into<String>,
    ) -> Self {
        Self {
            urdf_path: urdf_path.into(),
            controlled_joints,
            end_effector_link: end_effector_link.into(),
            tool_frame_name: default_tool_frame_name(),
            tool_offset: [0.0; 3],
            custom_limits: false,
            lower_position_limits: None,
            upper_position_limits: None,
            armature: default_armature(),
            gravity: default_gravity(),
        }
    }

    /// Validate settings. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.controlled_joints.is_empty() {
            return Err(invalid("controlled_joints", "must list at least one joint"));
        }
        if self.end_effector_link.is_empty() {
            return Err(invalid("end_effector_link", "must not be empty"));
        }
        if !(self.armature >= 0.0 && self.armature.is_finite()) {
            return Err(invalid("armature", "must be finite and >= 0"));
        }
        if self.tool_offset.iter().chain(&self.gravity).any(|v| !v.is_finite()) {
            return Err(invalid("tool_offset/gravity", "must be finite"));
        }
        if self.custom_limits {
            let (Some(lower), Some(upper)) =
                (&self.lower_position_limits, &self.upper_position_limits)
            else {
                return Err(invalid(
                    "custom_limits",
                    "requires lower_position_limits and upper_position_limits",
                ));
            };
            if lower.len() != upper.len() {
                return Err(ModelError::LimitDimension {
                    lower: lower.len(),
                    upper: upper.len(),
                    dof: self.controlled_joints.len(),
                });
            }
        }
        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> ModelError {
    ModelError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
}
