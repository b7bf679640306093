//! Controller configuration fixture for the 6-DoF arm.

use std::path::{Path, PathBuf};

use crate::robots::ARM6_URDF;

/// Controller settings for the 6-DoF arm. `urdf_path` is relative, so it
/// resolves next to wherever the file is written.
pub const CONTROLLER_TOML: &str = r#"
[robot]
urdf_path = "arm6.urdf"
controlled_joints = ["j1", "j2", "j3", "j4", "j5", "j6"]
end_effector_link = "tool"
tool_frame_name = "deburring_tool"
armature = 0.05

[ocp]
horizon_length = 20
time_step = 0.05
goal_weight = 100.0
posture_weight = 0.05
control_weight = 1e-3
state_limits_weight = 10.0
control_limits_weight = 1.0
solver_iterations = 10
first_solve_iterations = 200
stop_threshold = 1e-8

[mpc]
use_mocap = 0
use_gain_scheduling = false
"#;

/// Write `arm6.urdf` and `controller.toml` into `dir`; returns the path of
/// the settings file.
pub fn write_controller_fixture(dir: &Path) -> PathBuf {
    std::fs::write(dir.join("arm6.urdf"), ARM6_URDF).unwrap();
    let path = dir.join("controller.toml");
    std::fs::write(&path, CONTROLLER_TOML).unwrap();
    path
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_files_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_controller_fixture(dir.path());
        assert!(path.ends_with("controller.toml"));
        let urdf = std::fs::read_to_string(dir.path().join("arm6.urdf")).unwrap();
        assert!(urdf.contains(r#"<robot name="arm6">"#));
        deburr_urdf::parse_file(dir.path().join("arm6.urdf")).unwrap();
    }
}
