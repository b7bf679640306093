//! Failures while loading and checking a robot description.

use std::path::PathBuf;

/// Why a URDF could not be turned into a usable [`RobotDescription`](crate::RobotDescription).
#[derive(Debug, thiserror::Error)]
pub enum UrdfError {
    #[error("cannot read robot description {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not well-formed URDF.
    #[error("malformed URDF: {0}")]
    Xml(String),

    /// A joint names a parent or child link that is not declared.
    #[error("joint {joint} references undeclared link {link}")]
    DanglingJoint { joint: String, link: String },

    #[error("unknown link: {0}")]
    UnknownLink(String),

    #[error("unknown joint: {0}")]
    UnknownJoint(String),

    #[error("joint {joint} has unsupported type {kind}")]
    UnsupportedJoint { joint: String, kind: String },

    /// Revolute, continuous and prismatic joints need a direction.
    #[error("joint {0} has a zero-length axis")]
    ZeroAxis(String),

    /// A numeric attribute parsed to NaN or infinity.
    #[error("{element}: {field} is not finite")]
    NonFinite {
        element: String,
        field: &'static str,
    },

    #[error("link {link} has negative {field}")]
    NegativeInertial { link: String, field: &'static str },

    /// The link is neither the root nor the child of any joint.
    #[error("link {0} is not connected to the root link")]
    Detached(String),

    #[error("kinematic loop through link {0}")]
    KinematicLoop(String),

    /// Every link is the child of some joint.
    #[error("no root link found")]
    NoRootLink,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_element() {
        let e = UrdfError::DanglingJoint {
            joint: "wrist_3_joint".into(),
            link: "tool0".into(),
        };
        assert_eq!(e.to_string(), "joint wrist_3_joint references undeclared link tool0");

        let e = UrdfError::UnsupportedJoint {
            joint: "shoulder".into(),
            kind: "spherical".into(),
        };
        assert_eq!(e.to_string(), "joint shoulder has unsupported type spherical");

        let e = UrdfError::NonFinite {
            element: "link forearm".into(),
            field: "mass",
        };
        assert_eq!(e.to_string(), "link forearm: mass is not finite");

        assert_eq!(
            UrdfError::ZeroAxis("elbow".into()).to_string(),
            "joint elbow has a zero-length axis"
        );
        assert_eq!(
            UrdfError::Detached("spare".into()).to_string(),
            "link spare is not connected to the root link"
        );
    }

    #[test]
    fn io_error_keeps_path_and_source() {
        let e = UrdfError::Io {
            path: PathBuf::from("/tmp/arm6.urdf"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        let msg = e.to_string();
        assert!(msg.contains("/tmp/arm6.urdf"));
        assert!(std::error::Error::source(&e).is_some());
    }
}
