//! The robot designer: a read-only robot model shared by the controller.

use nalgebra::{DMatrix, DVector, Isometry3, Vector3};

use deburr_urdf::{RobotDescription, parse_file};

use crate::chain::KinematicChain;
use crate::error::ModelError;
use crate::settings::DesignerSettings;

/// Reduced robot model over the controlled joints.
///
/// The state convention is `x = [q, v]` with `nq == nv == dof`; controls
/// are joint torques (`nu == dof`).
#[derive(Debug, Clone)]
pub struct RobotDesigner {
    description: RobotDescription,
    settings: DesignerSettings,
    chain: KinematicChain,
    tool_frame_name: String,
    gravity: Vector3<f64>,
}

impl RobotDesigner {
    /// Load the URDF named in `settings` and build the reduced model.
    pub fn new(settings: DesignerSettings) -> Result<Self, ModelError> {
        settings.validate()?;
        let description = parse_file(&settings.urdf_path)?;
        Self::from_description(description, settings)
    }

    /// Build the reduced model from an already-parsed description.
    pub fn from_description(
        description: RobotDescription,
        settings: DesignerSettings,
    ) -> Result<Self, ModelError> {
        settings.validate()?;
        let chain = KinematicChain::from_description(
            &description,
            &settings.end_effector_link,
            &settings.controlled_joints,
        )?;
        let [gx, gy, gz] = settings.gravity;

        let mut designer = Self {
            description,
            chain,
            tool_frame_name: settings.tool_frame_name.clone(),
            gravity: Vector3::new(gx, gy, gz),
            settings,
        };

        let [tx, ty, tz] = designer.settings.tool_offset;
        let tool = designer.settings.tool_frame_name.clone();
        let link = designer.settings.end_effector_link.clone();
        designer.add_end_effector_frame(&tool, &link, Isometry3::translation(tx, ty, tz))?;

        if designer.settings.custom_limits
            && let (Some(lower), Some(upper)) = (
                designer.settings.lower_position_limits.clone(),
                designer.settings.upper_position_limits.clone(),
            )
        {
            designer.update_model_limits(&lower, &upper)?;
        }

        tracing::debug!(
            robot = %designer.description.name,
            dof = designer.nv(),
            tool = %designer.tool_frame_name,
            "robot designer ready"
        );
        Ok(designer)
    }

    /// Attach the tool frame `name` to `parent_link` with `offset`.
    ///
    /// Rebuilds the chain when `parent_link` differs from the current end
    /// effector link; custom position limits are re-applied.
    pub fn add_end_effector_frame(
        &mut self,
        name: &str,
        parent_link: &str,
        offset: Isometry3<f64>,
    ) -> Result<(), ModelError> {
        if parent_link != self.settings.end_effector_link {
            let limits = self.position_limits();
            let mut chain = KinematicChain::from_description(
                &self.description,
                parent_link,
                &self.settings.controlled_joints,
            )?;
            if self.settings.custom_limits {
                chain.set_position_limits(limits.0.as_slice(), limits.1.as_slice());
            }
            self.chain = chain;
            self.settings.end_effector_link = parent_link.into();
        }
        self.chain.set_tool_offset(offset);
        self.tool_frame_name = name.into();
        self.settings.tool_frame_name = name.into();
        self.settings.tool_offset = offset.translation.vector.into();
        Ok(())
    }

    /// Replace the position limits of the controlled joints.
    pub fn update_model_limits(&mut self, lower: &[f64], upper: &[f64]) -> Result<(), ModelError> {
        let dof = self.chain.dof();
        if lower.len() != dof || upper.len() != dof {
            return Err(ModelError::LimitDimension {
                lower: lower.len(),
                upper: upper.len(),
                dof,
            });
        }
        if let Some((index, (&lo, &hi))) = lower
            .iter()
            .zip(upper)
            .enumerate()
            .find(|(_, (lo, hi))| lo > hi || lo.is_nan() || hi.is_nan())
        {
            return Err(ModelError::InvertedLimits {
                index,
                lower: lo,
                upper: hi,
            });
        }
        self.chain.set_position_limits(lower, upper);
        self.settings.custom_limits = true;
        self.settings.lower_position_limits = Some(lower.to_vec());
        self.settings.upper_position_limits = Some(upper.to_vec());
        Ok(())
    }

    pub fn description(&self) -> &RobotDescription {
        &self.description
    }

    pub fn settings(&self) -> &DesignerSettings {
        &self.settings
    }

    pub fn chain(&self) -> &KinematicChain {
        &self.chain
    }

    pub fn tool_frame_name(&self) -> &str {
        &self.tool_frame_name
    }

    pub fn gravity(&self) -> &Vector3<f64> {
        &self.gravity
    }

    /// Configuration dimension.
    pub fn nq(&self) -> usize {
        self.chain.dof()
    }

    /// Velocity dimension.
    pub fn nv(&self) -> usize {
        self.chain.dof()
    }

    /// State dimension `nq + nv`.
    pub fn nx(&self) -> usize {
        self.nq() + self.nv()
    }

    /// Control dimension.
    pub fn nu(&self) -> usize {
        self.chain.dof()
    }

    pub fn joint_names(&self) -> Vec<&str> {
        self.chain.joint_names()
    }

    /// Zero configuration clamped into the position limits.
    pub fn neutral_configuration(&self) -> DVector<f64> {
        let mut q = vec![0.0; self.nq()];
        self.chain.clamp_joints(&mut q);
        DVector::from_vec(q)
    }

    /// Neutral configuration at rest.
    pub fn neutral_state(&self) -> DVector<f64> {
        let mut x = DVector::zeros(self.nx());
        x.rows_mut(0, self.nq())
            .copy_from(&self.neutral_configuration());
        x
    }

    /// `(lower, upper)` position limits.
    pub fn position_limits(&self) -> (DVector<f64>, DVector<f64>) {
        let joints = self.chain.joints();
        (
            DVector::from_iterator(joints.len(), joints.iter().map(|j| j.lower_limit)),
            DVector::from_iterator(joints.len(), joints.iter().map(|j| j.upper_limit)),
        )
    }

    pub fn velocity_limits(&self) -> DVector<f64> {
        let joints = self.chain.joints();
        DVector::from_iterator(joints.len(), joints.iter().map(|j| j.velocity_limit))
    }

    pub fn effort_limits(&self) -> DVector<f64> {
        let joints = self.chain.joints();
        DVector::from_iterator(joints.len(), joints.iter().map(|j| j.effort_limit))
    }

    /// Viscous damping per joint.
    pub fn damping(&self) -> DVector<f64> {
        let joints = self.chain.joints();
        DVector::from_iterator(joints.len(), joints.iter().map(|j| j.damping))
    }

    pub fn armature(&self) -> f64 {
        self.settings.armature
    }

    /// Tool frame pose at configuration `q`.
    pub fn end_effector_pose(&self, q: &[f64]) -> Isometry3<f64> {
        self.chain.forward_kinematics(q)
    }

    /// Translational Jacobian (3 x nv) of the tool frame at `q`.
    pub fn end_effector_jacobian(&self, q: &[f64]) -> DMatrix<f64> {
        self.chain.ee_jacobian(&self.chain.frames(q))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use deburr_urdf::parse_string;

    const ARM: &str = r#"
        <robot name="arm">
            <link name="base"/>
            <link name="l1"><inertial><origin xyz="0 0 0.15"/><mass value="2.0"/>
                <inertia ixx="0.01" ixy="0" ixz="0" iyy="0.01" iyz="0" izz="0.002"/></inertial></link>
            <link name="l2"><inertial><origin xyz="0 0 0.1"/><mass value="1.0"/>
                <inertia ixx="0.005" ixy="0" ixz="0" iyy="0.005" iyz="0" izz="0.001"/></inertial></link>
            <link name="gripper"/>
            <joint name="j1" type="revolute">
                <parent link="base"/><child link="l1"/>
                <origin xyz="0 0 0.5"/><axis xyz="0 1 0"/>
                <limit lower="0.2" upper="2.0" effort="40" velocity="2"/>
            </joint>
            <joint name="j2" type="revolute">
                <parent link="l1"/><child link="l2"/>
                <origin xyz="0 0 0.3"/><axis xyz="0 1 0"/>
                <limit lower="-2.0" upper="2.0" effort="20" velocity="0"/>
            </joint>
            <joint name="grip" type="fixed">
                <parent link="l2"/><child link="gripper"/>
                <origin xyz="0 0 0.2"/>
            </joint>
        </robot>
    "#;

    fn settings() -> DesignerSettings {
        DesignerSettings::new("unused.urdf", vec!["j1".into(), "j2".into()], "gripper")
    }

    fn designer() -> RobotDesigner {
        RobotDesigner::from_description(parse_string(ARM).unwrap(), settings()).unwrap()
    }

    #[test]
    fn dimensions() {
        let d = designer();
        assert_eq!(d.nq(), 2);
        assert_eq!(d.nv(), 2);
        assert_eq!(d.nx(), 4);
        assert_eq!(d.nu(), 2);
        assert_eq!(d.joint_names(), vec!["j1", "j2"]);
    }

    #[test]
    fn neutral_is_clamped_zero() {
        let d = designer();
        let q = d.neutral_configuration();
        assert_relative_eq!(q[0], 0.2);
        assert_relative_eq!(q[1], 0.0);
        let x = d.neutral_state();
        assert_eq!(x.len(), 4);
        assert_relative_eq!(x[2], 0.0);
    }

    #[test]
    fn missing_velocity_limit_is_unbounded() {
        let d = designer();
        let v = d.velocity_limits();
        assert_relative_eq!(v[0], 2.0);
        assert!(v[1].is_infinite());
    }

    #[test]
    fn tool_offset_from_settings() {
        let s = DesignerSettings {
            tool_offset: [0.0, -0.02, -0.0825],
            ..settings()
        };
        let d = RobotDesigner::from_description(parse_string(ARM).unwrap(), s).unwrap();
        let pose = d.end_effector_pose(&[0.0, 0.0]);
        assert_relative_eq!(
            pose.translation.vector,
            Vector3::new(0.0, -0.02, 1.0 - 0.0825),
            epsilon = 1e-12
        );
    }

    #[test]
    fn add_end_effector_frame_on_other_link() {
        let mut d = designer();
        d.add_end_effector_frame("elbow_tool", "l2", Isometry3::translation(0.0, 0.0, 0.05))
            .unwrap();
        assert_eq!(d.tool_frame_name(), "elbow_tool");
        let pose = d.end_effector_pose(&[0.0, 0.0]);
        assert_relative_eq!(pose.translation.z, 0.85, epsilon = 1e-12);
    }

    #[test]
    fn update_model_limits_checks_dimensions_and_order() {
        let mut d = designer();
        assert!(matches!(
            d.update_model_limits(&[0.0], &[1.0, 1.0]),
            Err(ModelError::LimitDimension { .. })
        ));
        assert!(matches!(
            d.update_model_limits(&[0.0, 1.0], &[1.0, 0.5]),
            Err(ModelError::InvertedLimits { index: 1, .. })
        ));
        d.update_model_limits(&[-0.5, -0.5], &[0.5, 0.5]).unwrap();
        let (lower, upper) = d.position_limits();
        assert_relative_eq!(lower[0], -0.5);
        assert_relative_eq!(upper[1], 0.5);
    }

    #[test]
    fn custom_limits_from_settings() {
        let s = DesignerSettings {
            custom_limits: true,
            lower_position_limits: Some(vec![-1.0, -1.0]),
            upper_position_limits: Some(vec![1.0, 1.0]),
            ..settings()
        };
        let d = RobotDesigner::from_description(parse_string(ARM).unwrap(), s).unwrap();
        let (lower, _) = d.position_limits();
        assert_relative_eq!(lower[0], -1.0);
        // Neutral is no longer clamped to 0.2.
        assert_relative_eq!(d.neutral_configuration()[0], 0.0);
    }

    #[test]
    fn missing_urdf_file_is_an_error() {
        let s = DesignerSettings::new("/nonexistent/arm.urdf", vec!["j1".into()], "gripper");
        assert!(matches!(RobotDesigner::new(s), Err(ModelError::Urdf(_))));
    }
}
