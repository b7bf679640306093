//! Fixture arms.
//!
//! * A 3-DoF planar arm rotating about vertical axes, mounted 1 m above the
//!   world origin. Gravity is parallel to every joint axis, so it exerts no
//!   joint torque; at `q = 0` the tool sits at `(0.65, 0, 1.0)`.
//! * A 6-DoF serial arm (yaw, shoulder, elbow, three wrist joints) with
//!   non-trivial gravity load. At `q = 0` the tool sits near
//!   `(0.82, 0, 1.06)`; [`reaching_target`] is well inside its workspace.

use std::sync::Arc;

use deburr_model::{DesignerSettings, RobotDesigner};
use deburr_urdf::parse_string;
use nalgebra::Isometry3;

pub const PLANAR_JOINTS: [&str; 3] = ["shoulder", "elbow", "wrist"];

pub const PLANAR_ARM_URDF: &str = r#"<?xml version="1.0"?>
<robot name="planar_arm">
  <link name="world"/>
  <link name="base"/>
  <link name="link1">
    <inertial>
      <origin xyz="0.15 0 0"/>
      <mass value="1.0"/>
      <inertia ixx="0.001" ixy="0" ixz="0" iyy="0.008" iyz="0" izz="0.008"/>
    </inertial>
  </link>
  <link name="link2">
    <inertial>
      <origin xyz="0.125 0 0"/>
      <mass value="0.8"/>
      <inertia ixx="0.001" ixy="0" ixz="0" iyy="0.004" iyz="0" izz="0.004"/>
    </inertial>
  </link>
  <link name="link3">
    <inertial>
      <origin xyz="0.05 0 0"/>
      <mass value="0.3"/>
      <inertia ixx="0.0002" ixy="0" ixz="0" iyy="0.0003" iyz="0" izz="0.0003"/>
    </inertial>
  </link>
  <link name="tool"/>

  <joint name="mount" type="fixed">
    <parent link="world"/><child link="base"/>
    <origin xyz="0 0 1.0"/>
  </joint>
  <joint name="shoulder" type="revolute">
    <parent link="base"/><child link="link1"/>
    <axis xyz="0 0 1"/>
    <limit lower="-2.5" upper="2.5" effort="50" velocity="3"/>
    <dynamics damping="0.2"/>
  </joint>
  <joint name="elbow" type="revolute">
    <parent link="link1"/><child link="link2"/>
    <origin xyz="0.3 0 0"/>
    <axis xyz="0 0 1"/>
    <limit lower="-2.5" upper="2.5" effort="50" velocity="3"/>
    <dynamics damping="0.2"/>
  </joint>
  <joint name="wrist" type="revolute">
    <parent link="link2"/><child link="link3"/>
    <origin xyz="0.25 0 0"/>
    <axis xyz="0 0 1"/>
    <limit lower="-2.5" upper="2.5" effort="50" velocity="3"/>
    <dynamics damping="0.1"/>
  </joint>
  <joint name="tool_mount" type="fixed">
    <parent link="link3"/><child link="tool"/>
    <origin xyz="0.1 0 0"/>
  </joint>
</robot>
"#;

pub const ARM6_JOINTS: [&str; 6] = ["j1", "j2", "j3", "j4", "j5", "j6"];

pub const ARM6_URDF: &str = r#"<?xml version="1.0"?>
<robot name="arm6">
  <link name="world"/>
  <link name="shoulder_link">
    <inertial>
      <origin xyz="0 0 0.1"/>
      <mass value="3.0"/>
      <inertia ixx="0.02" ixy="0" ixz="0" iyy="0.02" iyz="0" izz="0.01"/>
    </inertial>
  </link>
  <link name="upper_arm">
    <inertial>
      <origin xyz="0 0 0.225"/>
      <mass value="2.5"/>
      <inertia ixx="0.045" ixy="0" ixz="0" iyy="0.045" iyz="0" izz="0.005"/>
    </inertial>
  </link>
  <link name="forearm">
    <inertial>
      <origin xyz="0 0 0.2"/>
      <mass value="1.5"/>
      <inertia ixx="0.02" ixy="0" ixz="0" iyy="0.02" iyz="0" izz="0.002"/>
    </inertial>
  </link>
  <link name="wrist1">
    <inertial>
      <origin xyz="0 0 0.05"/>
      <mass value="0.5"/>
      <inertia ixx="0.0008" ixy="0" ixz="0" iyy="0.0008" iyz="0" izz="0.0005"/>
    </inertial>
  </link>
  <link name="wrist2">
    <inertial>
      <origin xyz="0 0 0.04"/>
      <mass value="0.4"/>
      <inertia ixx="0.0005" ixy="0" ixz="0" iyy="0.0005" iyz="0" izz="0.0003"/>
    </inertial>
  </link>
  <link name="flange">
    <inertial>
      <origin xyz="0 0 0.02"/>
      <mass value="0.2"/>
      <inertia ixx="0.0001" ixy="0" ixz="0" iyy="0.0001" iyz="0" izz="0.0001"/>
    </inertial>
  </link>
  <link name="tool"/>

  <joint name="j1" type="revolute">
    <parent link="world"/><child link="shoulder_link"/>
    <origin xyz="0 0 0.3"/>
    <axis xyz="0 0 1"/>
    <limit lower="-3.0" upper="3.0" effort="100" velocity="2"/>
    <dynamics damping="0.5"/>
  </joint>
  <joint name="j2" type="revolute">
    <parent link="shoulder_link"/><child link="upper_arm"/>
    <origin xyz="0 0 0.2" rpy="0 0.5 0"/>
    <axis xyz="0 1 0"/>
    <limit lower="-2.0" upper="2.0" effort="100" velocity="2"/>
    <dynamics damping="0.5"/>
  </joint>
  <joint name="j3" type="revolute">
    <parent link="upper_arm"/><child link="forearm"/>
    <origin xyz="0 0 0.45" rpy="0 0.8 0"/>
    <axis xyz="0 1 0"/>
    <limit lower="-2.5" upper="2.5" effort="60" velocity="2"/>
    <dynamics damping="0.5"/>
  </joint>
  <joint name="j4" type="revolute">
    <parent link="forearm"/><child link="wrist1"/>
    <origin xyz="0 0 0.4"/>
    <axis xyz="0 0 1"/>
    <limit lower="-3.0" upper="3.0" effort="20" velocity="2"/>
    <dynamics damping="0.5"/>
  </joint>
  <joint name="j5" type="revolute">
    <parent link="wrist1"/><child link="wrist2"/>
    <origin xyz="0 0 0.1"/>
    <axis xyz="0 1 0"/>
    <limit lower="-2.0" upper="2.0" effort="20" velocity="2"/>
    <dynamics damping="0.5"/>
  </joint>
  <joint name="j6" type="revolute">
    <parent link="wrist2"/><child link="flange"/>
    <origin xyz="0 0 0.08"/>
    <axis xyz="0 0 1"/>
    <limit lower="-3.0" upper="3.0" effort="10" velocity="2"/>
    <dynamics damping="0.5"/>
  </joint>
  <joint name="tool_mount" type="fixed">
    <parent link="flange"/><child link="tool"/>
    <origin xyz="0 0 0.05"/>
  </joint>
</robot>
"#;

fn build(urdf: &str, joints: &[&str], file_name: &str) -> Arc<RobotDesigner> {
    let settings = DesignerSettings::new(
        file_name,
        joints.iter().map(|j| (*j).to_string()).collect(),
        "tool",
    );
    build_with(urdf, settings)
}

fn build_with(urdf: &str, settings: DesignerSettings) -> Arc<RobotDesigner> {
    let description = parse_string(urdf).unwrap();
    Arc::new(RobotDesigner::from_description(description, settings).unwrap())
}

/// Designer for the 3-DoF planar arm (`nq = nv = nu = 3`).
pub fn planar_designer() -> Arc<RobotDesigner> {
    build(PLANAR_ARM_URDF, &PLANAR_JOINTS, "planar_arm.urdf")
}

/// Designer for the 6-DoF arm (`nq = nv = nu = 6`).
pub fn arm_designer() -> Arc<RobotDesigner> {
    build(ARM6_URDF, &ARM6_JOINTS, "arm6.urdf")
}

/// The planar arm with a massless wrist link and no armature. Its mass
/// matrix is singular at every configuration.
pub fn massless_wrist_designer() -> Arc<RobotDesigner> {
    let urdf = PLANAR_ARM_URDF.replace(r#"<mass value="0.3"/>"#, r#"<mass value="0.0"/>"#);
    let settings = DesignerSettings {
        armature: 0.0,
        ..DesignerSettings::new(
            "massless_wrist.urdf",
            PLANAR_JOINTS.iter().map(|j| (*j).to_string()).collect(),
            "tool",
        )
    };
    build_with(&urdf, settings)
}

/// World-frame reaching target for the 6-DoF arm.
pub fn reaching_target() -> Isometry3<f64> {
    Isometry3::translation(0.6, 0.4, 1.1)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
