//! Error types for robot model construction.

use deburr_urdf::UrdfError;

/// Errors raised while building or reconfiguring a [`RobotDesigner`](crate::RobotDesigner).
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error(transparent)]
    Urdf(#[from] UrdfError),

    /// A controlled joint is not an actuated joint on the path to the end effector.
    #[error("controlled joint {0} is not an actuated joint on the end-effector chain")]
    JointNotOnChain(String),

    /// Controlled joints must be listed in root-to-tip order.
    #[error("controlled joints out of chain order: expected {expected:?}, got {got:?}")]
    JointOrder {
        expected: Vec<String>,
        got: Vec<String>,
    },

    #[error("limit vectors have mismatched lengths: lower={lower}, upper={upper}, dof={dof}")]
    LimitDimension {
        lower: usize,
        upper: usize,
        dof: usize,
    },

    #[error("lower limit exceeds upper limit at joint {index}: {lower} > {upper}")]
    InvertedLimits { index: usize, lower: f64, upper: f64 },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    /// `M(q)` has no inverse, so accelerations are undefined.
    #[error("mass matrix is singular at q = {configuration:?}")]
    SingularInertia { configuration: Vec<f64> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            ModelError::JointNotOnChain("torso_1_joint".into()).to_string(),
            "controlled joint torso_1_joint is not an actuated joint on the end-effector chain"
        );
        assert_eq!(
            ModelError::LimitDimension {
                lower: 3,
                upper: 4,
                dof: 4
            }
            .to_string(),
            "limit vectors have mismatched lengths: lower=3, upper=4, dof=4"
        );
        assert_eq!(
            ModelError::InvertedLimits {
                index: 2,
                lower: 1.0,
                upper: -1.0
            }
            .to_string(),
            "lower limit exceeds upper limit at joint 2: 1 > -1"
        );
    }

    #[test]
    fn singular_inertia_reports_configuration() {
        let err = ModelError::SingularInertia {
            configuration: vec![0.5, -1.0],
        };
        assert_eq!(err.to_string(), "mass matrix is singular at q = [0.5, -1.0]");
    }

    #[test]
    fn wraps_urdf_errors() {
        let err: ModelError = UrdfError::NoRootLink.into();
        assert!(matches!(err, ModelError::Urdf(_)));
        assert_eq!(err.to_string(), "no root link found");
    }
}
