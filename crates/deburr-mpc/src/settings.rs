//! Controller settings: one TOML file with `[robot]`, `[ocp]` and `[mpc]`
//! tables. Loaded once at startup and read-only afterwards.

use std::path::Path;

use deburr_model::DesignerSettings;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_stop_threshold() -> f64 {
    1e-9
}
const fn default_velocity_limit_scale() -> f64 {
    1.0
}

// ---------------------------------------------------------------------------
// OcpSettings
// ---------------------------------------------------------------------------

/// Horizon, weights and iteration budgets of the optimal control problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OcpSettings {
    /// Number of running nodes `N`.
    pub horizon_length: usize,

    /// Integration step between nodes, in seconds.
    pub time_step: f64,

    pub goal_weight: f64,
    pub posture_weight: f64,
    pub control_weight: f64,
    pub state_limits_weight: f64,
    pub control_limits_weight: f64,

    /// Iteration budget of each real-time solve.
    pub solver_iterations: usize,

    /// Iteration budget of the cold-start solve after `initialize`.
    pub first_solve_iterations: usize,

    /// Per-coordinate posture weights over `[q, v]` (default: all ones).
    #[serde(default)]
    pub posture_state_weights: Option<Vec<f64>>,

    /// First node whose goal-tracking term starts active.
    #[serde(default)]
    pub goal_activation_start: usize,

    /// Convergence threshold on the squared control gradient.
    #[serde(default = "default_stop_threshold")]
    pub stop_threshold: f64,

    /// Scale applied to the URDF velocity limits in the state barrier.
    #[serde(default = "default_velocity_limit_scale")]
    pub velocity_limit_scale: f64,
}

impl OcpSettings {
    /// Validate settings. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.horizon_length == 0 {
            return Err(ConfigError::invalid("horizon_length", "must be >= 1"));
        }
        if !(self.time_step > 0.0 && self.time_step.is_finite()) {
            return Err(ConfigError::invalid("time_step", "must be finite and > 0"));
        }
        for (field, value) in [
            ("goal_weight", self.goal_weight),
            ("posture_weight", self.posture_weight),
            ("control_weight", self.control_weight),
            ("state_limits_weight", self.state_limits_weight),
            ("control_limits_weight", self.control_limits_weight),
        ] {
            check_weight(field, value)?;
        }
        if self.solver_iterations == 0 {
            return Err(ConfigError::invalid("solver_iterations", "must be >= 1"));
        }
        if self.first_solve_iterations == 0 {
            return Err(ConfigError::invalid("first_solve_iterations", "must be >= 1"));
        }
        if let Some(weights) = &self.posture_state_weights {
            for &w in weights {
                check_weight("posture_state_weights", w)?;
            }
        }
        if self.goal_activation_start > self.horizon_length {
            return Err(ConfigError::invalid(
                "goal_activation_start",
                format!("must be <= horizon_length ({})", self.horizon_length),
            ));
        }
        if !(self.stop_threshold > 0.0 && self.stop_threshold.is_finite()) {
            return Err(ConfigError::invalid("stop_threshold", "must be finite and > 0"));
        }
        if !(self.velocity_limit_scale > 0.0 && self.velocity_limit_scale.is_finite()) {
            return Err(ConfigError::invalid(
                "velocity_limit_scale",
                "must be finite and > 0",
            ));
        }
        Ok(())
    }
}

fn check_weight(field: &str, value: f64) -> Result<(), ConfigError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be finite and >= 0, got {value}")))
    }
}

// ---------------------------------------------------------------------------
// MpcSettings
// ---------------------------------------------------------------------------

/// Receding-horizon loop options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MpcSettings {
    /// Targets are tool-to-target transforms from motion capture rather than
    /// world-frame poses. Accepts a bool or an integer (non-zero is true).
    #[serde(deserialize_with = "bool_or_int")]
    pub use_mocap: bool,

    /// Raise the goal weight a little every tick.
    #[serde(default)]
    pub use_gain_scheduling: bool,

    /// Goal weight increase per second of control time.
    #[serde(default)]
    pub gain_scheduling_slope: f64,

    /// Ceiling for the scheduled goal weight (default: `[ocp].goal_weight`).
    #[serde(default)]
    pub max_goal_weight: Option<f64>,
}

impl MpcSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_weight("gain_scheduling_slope", self.gain_scheduling_slope)?;
        if let Some(max) = self.max_goal_weight {
            check_weight("max_goal_weight", max)?;
        }
        Ok(())
    }
}

impl Default for MpcSettings {
    fn default() -> Self {
        Self {
            use_mocap: false,
            use_gain_scheduling: false,
            gain_scheduling_slope: 0.0,
            max_goal_weight: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
}

fn bool_or_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Int(value) => value != 0,
    })
}

// ---------------------------------------------------------------------------
// ControllerSettings
// ---------------------------------------------------------------------------

/// Full controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerSettings {
    pub robot: DesignerSettings,
    pub ocp: OcpSettings,
    pub mpc: MpcSettings,
}

impl ControllerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.robot.validate()?;
        self.ocp.validate()?;
        self.mpc.validate()?;
        if let Some(max) = self.mpc.max_goal_weight
            && max < self.ocp.goal_weight
        {
            return Err(ConfigError::invalid(
                "max_goal_weight",
                format!("must be >= goal_weight ({})", self.ocp.goal_weight),
            ));
        }
        Ok(())
    }

    /// Parse and validate settings from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from a TOML file. A relative `urdf_path` is resolved against the
    /// directory holding the file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut settings = Self::from_toml_str(&content)?;
        if settings.robot.urdf_path.is_relative()
            && let Some(dir) = path.parent()
        {
            settings.robot.urdf_path = dir.join(&settings.robot.urdf_path);
        }
        tracing::debug!(path = %path.display(), "controller settings loaded");
        Ok(settings)
    }

    /// Goal weight ceiling used by gain scheduling.
    pub fn max_goal_weight(&self) -> f64 {
        self.mpc.max_goal_weight.unwrap_or(self.ocp.goal_weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML: &str = r#"
        [robot]
        urdf_path = "arm.urdf"
        controlled_joints = ["j1", "j2"]
        end_effector_link = "tool"

        [ocp]
        horizon_length = 20
        time_step = 0.05
        goal_weight = 100.0
        posture_weight = 0.1
        control_weight = 1e-3
        state_limits_weight = 10.0
        control_limits_weight = 1.0
        solver_iterations = 5
        first_solve_iterations = 100

        [mpc]
        use_mocap = 0
    "#;

    #[test]
    fn parses_with_defaults() {
        let s = ControllerSettings::from_toml_str(TOML).unwrap();
        assert_eq!(s.ocp.horizon_length, 20);
        assert_eq!(s.ocp.goal_activation_start, 0);
        assert!((s.ocp.stop_threshold - 1e-9).abs() < f64::EPSILON);
        assert!((s.ocp.velocity_limit_scale - 1.0).abs() < f64::EPSILON);
        assert!(s.ocp.posture_state_weights.is_none());
        assert!(!s.mpc.use_mocap);
        assert!(!s.mpc.use_gain_scheduling);
        assert!((s.max_goal_weight() - 100.0).abs() < f64::EPSILON);
        assert_eq!(s.robot.tool_frame_name, "deburring_tool");
    }

    #[test]
    fn use_mocap_accepts_bool_and_int() {
        let on = TOML.replace("use_mocap = 0", "use_mocap = 2");
        assert!(ControllerSettings::from_toml_str(&on).unwrap().mpc.use_mocap);
        let on = TOML.replace("use_mocap = 0", "use_mocap = true");
        assert!(ControllerSettings::from_toml_str(&on).unwrap().mpc.use_mocap);
        let bad = TOML.replace("use_mocap = 0", "use_mocap = \"yes\"");
        assert!(ControllerSettings::from_toml_str(&bad).is_err());
    }

    #[test]
    fn missing_required_key_fails() {
        let missing = TOML.replace("goal_weight = 100.0", "");
        let err = ControllerSettings::from_toml_str(&missing).unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
        assert!(err.to_string().contains("goal_weight"));

        let no_mocap = TOML.replace("use_mocap = 0", "");
        assert!(ControllerSettings::from_toml_str(&no_mocap).is_err());
    }

    #[test]
    fn unknown_key_fails() {
        let extra = TOML.replace("[mpc]", "[mpc]\nuse_mocapp = 1");
        assert!(matches!(
            ControllerSettings::from_toml_str(&extra),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn invalid_values_fail() {
        for (from, to, field) in [
            ("horizon_length = 20", "horizon_length = 0", "horizon_length"),
            ("time_step = 0.05", "time_step = -0.05", "time_step"),
            ("goal_weight = 100.0", "goal_weight = -1.0", "goal_weight"),
            ("solver_iterations = 5", "solver_iterations = 0", "solver_iterations"),
        ] {
            let err = ControllerSettings::from_toml_str(&TOML.replace(from, to)).unwrap_err();
            match err {
                ConfigError::InvalidValue { field: f, .. } => assert_eq!(f, field),
                other => panic!("expected InvalidValue for {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn robot_settings_are_validated() {
        let bad = TOML.replace("controlled_joints = [\"j1\", \"j2\"]", "controlled_joints = []");
        assert!(matches!(
            ControllerSettings::from_toml_str(&bad),
            Err(ConfigError::Robot(_))
        ));
    }

    #[test]
    fn max_goal_weight_below_goal_weight_fails() {
        let bad = TOML.replace("use_mocap = 0", "use_mocap = 0\nmax_goal_weight = 10.0");
        assert!(ControllerSettings::from_toml_str(&bad).is_err());
    }

    #[test]
    fn from_file_resolves_relative_urdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.toml");
        std::fs::write(&path, TOML).unwrap();
        let s = ControllerSettings::from_file(&path).unwrap();
        assert_eq!(s.robot.urdf_path, dir.path().join("arm.urdf"));

        assert!(matches!(
            ControllerSettings::from_file(dir.path().join("absent.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
