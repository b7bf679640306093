//! URDF XML parsing using `urdf-rs`.
//!
//! Converts `urdf_rs` types into the crate's [`RobotDescription`].

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::UrdfError;
use crate::types::{
    Inertial, JointData, JointDynamics, JointLimits, JointType, LinkData, Origin, RobotDescription,
};

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Parse a URDF file from disk into a [`RobotDescription`].
pub fn parse_file(path: impl AsRef<Path>) -> Result<RobotDescription, UrdfError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| UrdfError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_string(&content)
}

/// Parse a URDF XML string into a [`RobotDescription`].
pub fn parse_string(xml: &str) -> Result<RobotDescription, UrdfError> {
    let robot = urdf_rs::read_from_string(xml).map_err(|e| UrdfError::Xml(e.to_string()))?;
    convert_robot(&robot)
}

// ---------------------------------------------------------------------------
// Conversion helpers
// ---------------------------------------------------------------------------

fn convert_robot(robot: &urdf_rs::Robot) -> Result<RobotDescription, UrdfError> {
    let links: HashMap<String, LinkData> = robot
        .links
        .iter()
        .map(|l| convert_link(l).map(|ld| (ld.name.clone(), ld)))
        .collect::<Result<_, _>>()?;

    let joints: HashMap<String, JointData> = robot
        .joints
        .iter()
        .map(|j| convert_joint(j).map(|jd| (jd.name.clone(), jd)))
        .collect::<Result<_, _>>()?;

    for joint in joints.values() {
        for link in [&joint.parent, &joint.child] {
            if !links.contains_key(link) {
                return Err(UrdfError::DanglingJoint {
                    joint: joint.name.clone(),
                    link: link.clone(),
                });
            }
        }
    }

    // Root link = a link that is never a child of any joint. Sorted so the
    // choice is stable when a malformed file has several candidates.
    let child_links: HashSet<&str> = joints.values().map(|j| j.child.as_str()).collect();
    let mut roots: Vec<&String> = links
        .keys()
        .filter(|name| !child_links.contains(name.as_str()))
        .collect();
    roots.sort_unstable();
    let root_link = roots.first().ok_or(UrdfError::NoRootLink)?.to_string();

    Ok(RobotDescription {
        name: robot.name.clone(),
        links,
        joints,
        root_link,
    })
}

fn convert_link(link: &urdf_rs::Link) -> Result<LinkData, UrdfError> {
    let inertial = convert_inertial(&link.inertial);
    let element = || format!("link {}", link.name);
    finite(element, "inertial mass", &[inertial.mass])?;
    finite(element, "inertia", &inertial.inertia)?;
    finite(element, "inertial origin", &inertial.origin.xyz)?;
    finite(element, "inertial rpy", &inertial.origin.rpy)?;

    let [ixx, _, _, iyy, _, izz] = inertial.inertia;
    for (field, value) in [("mass", inertial.mass), ("ixx", ixx), ("iyy", iyy), ("izz", izz)] {
        if value < 0.0 {
            return Err(UrdfError::NegativeInertial {
                link: link.name.clone(),
                field,
            });
        }
    }

    Ok(LinkData {
        name: link.name.clone(),
        // urdf-rs fills a zero inertial for links that declare none.
        inertial: (inertial.mass > 0.0).then_some(inertial),
    })
}

fn convert_joint(joint: &urdf_rs::Joint) -> Result<JointData, UrdfError> {
    let joint_type = convert_joint_type(joint)?;

    let dynamics = joint
        .dynamics
        .as_ref()
        .map(convert_dynamics)
        .unwrap_or_default();
    let limits = convert_limits(&joint.limit);
    let origin = convert_pose(&joint.origin);
    let axis = vec3(&joint.axis.xyz);

    let element = || format!("joint {}", joint.name);
    finite(element, "origin", &origin.xyz)?;
    finite(element, "rpy", &origin.rpy)?;
    finite(element, "axis", &axis)?;
    finite(element, "damping", &[dynamics.damping, dynamics.friction])?;
    // Unbounded lower/upper are legal; effort and velocity are not.
    finite(element, "limit", &[limits.effort, limits.velocity])?;
    if joint_type.is_actuated() && axis.iter().all(|a| *a == 0.0) {
        return Err(UrdfError::ZeroAxis(joint.name.clone()));
    }

    Ok(JointData {
        name: joint.name.clone(),
        joint_type,
        parent: joint.parent.link.clone(),
        child: joint.child.link.clone(),
        origin,
        axis,
        limits,
        dynamics,
    })
}

fn convert_joint_type(joint: &urdf_rs::Joint) -> Result<JointType, UrdfError> {
    match joint.joint_type {
        urdf_rs::JointType::Revolute => Ok(JointType::Revolute),
        urdf_rs::JointType::Continuous => Ok(JointType::Continuous),
        urdf_rs::JointType::Prismatic => Ok(JointType::Prismatic),
        urdf_rs::JointType::Fixed => Ok(JointType::Fixed),
        urdf_rs::JointType::Floating => Ok(JointType::Floating),
        urdf_rs::JointType::Planar => Ok(JointType::Planar),
        urdf_rs::JointType::Spherical => Err(UrdfError::UnsupportedJoint {
            joint: joint.name.clone(),
            kind: "spherical".into(),
        }),
    }
}

/// Reject NaN and infinite attribute values.
fn finite(
    element: impl FnOnce() -> String,
    field: &'static str,
    values: &[f64],
) -> Result<(), UrdfError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(UrdfError::NonFinite {
            element: element(),
            field,
        })
    }
}

fn convert_limits(limit: &urdf_rs::JointLimit) -> JointLimits {
    // urdf-rs defaults lower/upper to 0.0 for joints without limits.
    let has_limits = (limit.lower - limit.upper).abs() > f64::EPSILON;
    JointLimits {
        lower: has_limits.then_some(limit.lower),
        upper: has_limits.then_some(limit.upper),
        effort: limit.effort,
        velocity: limit.velocity,
    }
}

const fn convert_dynamics(dyn_: &urdf_rs::Dynamics) -> JointDynamics {
    JointDynamics {
        damping: dyn_.damping,
        friction: dyn_.friction,
    }
}

fn convert_pose(pose: &urdf_rs::Pose) -> Origin {
    Origin {
        xyz: vec3(&pose.xyz),
        rpy: vec3(&pose.rpy),
    }
}

fn convert_inertial(inertial: &urdf_rs::Inertial) -> Inertial {
    let i = &inertial.inertia;
    Inertial {
        origin: convert_pose(&inertial.origin),
        mass: inertial.mass.value,
        inertia: [i.ixx, i.ixy, i.ixz, i.iyy, i.iyz, i.izz],
    }
}

const fn vec3(v: &[f64; 3]) -> [f64; 3] {
    [v[0], v[1], v[2]]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_URDF: &str = r#"
        <robot name="test_robot">
            <link name="base_link"/>
        </robot>
    "#;

    const ARM_URDF: &str = r#"
        <robot name="arm">
            <link name="base">
                <inertial>
                    <mass value="4.0"/>
                    <inertia ixx="0.01" ixy="0" ixz="0" iyy="0.01" iyz="0" izz="0.02"/>
                </inertial>
            </link>
            <link name="link1">
                <inertial>
                    <origin xyz="0 0 0.15" rpy="0 0 0"/>
                    <mass value="2.0"/>
                    <inertia ixx="0.02" ixy="0" ixz="0" iyy="0.02" iyz="0" izz="0.004"/>
                </inertial>
            </link>
            <link name="link2"/>
            <link name="tool"/>
            <joint name="joint1" type="revolute">
                <parent link="base"/>
                <child link="link1"/>
                <origin xyz="0 0 0.5" rpy="0 0 0"/>
                <axis xyz="0 0 1"/>
                <limit lower="-1.57" upper="1.57" effort="100" velocity="5"/>
                <dynamics damping="0.5" friction="0.1"/>
            </joint>
            <joint name="joint2" type="continuous">
                <parent link="link1"/>
                <child link="link2"/>
                <axis xyz="0 1 0"/>
            </joint>
            <joint name="tool_fixed" type="fixed">
                <parent link="link2"/>
                <child link="tool"/>
                <origin xyz="0 -0.02 -0.0825"/>
            </joint>
        </robot>
    "#;

    #[test]
    fn parse_minimal_urdf() {
        let description = parse_string(MINIMAL_URDF).unwrap();
        assert_eq!(description.name, "test_robot");
        assert_eq!(description.links.len(), 1);
        assert!(description.joints.is_empty());
        assert_eq!(description.root_link, "base_link");
    }

    #[test]
    fn parse_arm() {
        let description = parse_string(ARM_URDF).unwrap();
        assert_eq!(description.name, "arm");
        assert_eq!(description.links.len(), 4);
        assert_eq!(description.joints.len(), 3);
        assert_eq!(description.dof(), 2);
        assert_eq!(description.root_link, "base");
    }

    #[test]
    fn joint_fields_parsed() {
        let description = parse_string(ARM_URDF).unwrap();
        let joint = description.joint("joint1").unwrap();
        assert_eq!(joint.joint_type, JointType::Revolute);
        assert_eq!(joint.parent, "base");
        assert_eq!(joint.child, "link1");
        assert_eq!(joint.origin.xyz, [0.0, 0.0, 0.5]);
        assert_eq!(joint.axis, [0.0, 0.0, 1.0]);
        assert_eq!(joint.limits.lower, Some(-1.57));
        assert_eq!(joint.limits.upper, Some(1.57));
        assert_eq!(joint.limits.effort, 100.0);
        assert_eq!(joint.limits.velocity, 5.0);
        assert_eq!(joint.dynamics.damping, 0.5);
        assert_eq!(joint.dynamics.friction, 0.1);
    }

    #[test]
    fn values_are_not_truncated() {
        let description = parse_string(ARM_URDF).unwrap();
        let tool = description.joint("tool_fixed").unwrap();
        assert_eq!(tool.origin.xyz, [0.0, -0.02, -0.0825]);
    }

    #[test]
    fn inertial_parsed_and_massless_links_are_none() {
        let description = parse_string(ARM_URDF).unwrap();
        let link1 = description.link("link1").unwrap();
        let inertial = link1.inertial.as_ref().unwrap();
        assert_eq!(inertial.mass, 2.0);
        assert_eq!(inertial.origin.xyz, [0.0, 0.0, 0.15]);
        assert_eq!(inertial.inertia[5], 0.004);
        assert!(description.link("tool").unwrap().inertial.is_none());
    }

    #[test]
    fn continuous_joint_has_no_position_limits() {
        let description = parse_string(ARM_URDF).unwrap();
        let joint = description.joint("joint2").unwrap();
        assert_eq!(joint.joint_type, JointType::Continuous);
        assert!(joint.limits.lower.is_none());
        assert!(joint.limits.upper.is_none());
    }

    #[test]
    fn dangling_joint_is_rejected() {
        let xml = r#"
            <robot name="broken">
                <link name="base"/>
                <joint name="j" type="fixed">
                    <parent link="base"/>
                    <child link="ghost"/>
                </joint>
            </robot>
        "#;
        assert!(matches!(
            parse_string(xml),
            Err(UrdfError::DanglingJoint { joint, link }) if joint == "j" && link == "ghost"
        ));
    }

    #[test]
    fn zero_axis_on_actuated_joint_is_rejected() {
        let xml = r#"
            <robot name="broken">
                <link name="base"/>
                <link name="arm"/>
                <joint name="elbow" type="revolute">
                    <parent link="base"/>
                    <child link="arm"/>
                    <axis xyz="0 0 0"/>
                    <limit lower="-1" upper="1" effort="10" velocity="1"/>
                </joint>
            </robot>
        "#;
        assert!(matches!(parse_string(xml), Err(UrdfError::ZeroAxis(j)) if j == "elbow"));
    }

    #[test]
    fn negative_mass_is_rejected() {
        let xml = r#"
            <robot name="broken">
                <link name="base">
                    <inertial>
                        <mass value="-2.0"/>
                        <inertia ixx="0.01" ixy="0" ixz="0" iyy="0.01" iyz="0" izz="0.01"/>
                    </inertial>
                </link>
            </robot>
        "#;
        assert!(matches!(
            parse_string(xml),
            Err(UrdfError::NegativeInertial { link, field: "mass" }) if link == "base"
        ));
    }

    #[test]
    fn non_finite_values_are_reported_with_their_element() {
        assert!(finite(|| unreachable!(), "axis", &[0.0, 1.0, 0.0]).is_ok());
        let err = finite(|| "joint wrist".into(), "axis", &[0.0, f64::NAN, 0.0]).unwrap_err();
        assert!(matches!(
            &err,
            UrdfError::NonFinite { element, field: "axis" } if element == "joint wrist"
        ));
        assert!(finite(|| "link l".into(), "mass", &[f64::INFINITY]).is_err());
    }

    #[test]
    fn parse_invalid_xml() {
        assert!(matches!(
            parse_string("<not valid urdf>"),
            Err(UrdfError::Xml(_))
        ));
    }

    #[test]
    fn parse_file_not_found() {
        let err = parse_file("/nonexistent/robot.urdf").unwrap_err();
        assert!(matches!(err, UrdfError::Io { .. }));
    }
}
