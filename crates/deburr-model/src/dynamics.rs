//! Joint-space dynamics of the reduced model.
//!
//! `M(q) a = tau - b * v - g(q)`, with `M` built from the lumped body
//! inertias plus armature, `b` the URDF viscous damping and `g` the gravity
//! torques. Velocity-product terms are neglected: at deburring speeds they
//! are small compared to gravity and damping.

use nalgebra::{DMatrix, DVector, Point3};

use crate::designer::RobotDesigner;
use crate::error::ModelError;

/// Central-difference step for the configuration derivative of the acceleration.
const FD_STEP: f64 = 1e-6;

/// Forward dynamics and its partial derivatives at one `(q, v, tau)`.
#[derive(Debug, Clone)]
pub struct DynamicsDerivatives {
    pub acceleration: DVector<f64>,
    pub da_dq: DMatrix<f64>,
    pub da_dv: DMatrix<f64>,
    pub da_dtau: DMatrix<f64>,
}

impl RobotDesigner {
    /// Joint-space mass matrix (nv x nv), symmetric positive semi-definite.
    /// Positive definite whenever the armature is positive.
    pub fn mass_matrix(&self, q: &[f64]) -> DMatrix<f64> {
        let chain = self.chain();
        let frames = chain.frames(q);
        let n = chain.dof();

        let mut mass = DMatrix::identity(n, n) * self.armature();
        for (j, joint) in chain.joints().iter().enumerate() {
            let body = &joint.body;
            if body.mass <= 0.0 {
                continue;
            }
            let pose = &frames.body_poses[j];
            let com = pose.transform_point(&Point3::from(body.com)).coords;
            let linear = chain.point_jacobian(&frames, j, &com);
            let angular = chain.angular_jacobian(&frames, j);

            let rotation = pose.rotation.to_rotation_matrix();
            let inertia = rotation.matrix() * body.inertia * rotation.matrix().transpose();
            let inertia = DMatrix::from_column_slice(3, 3, inertia.as_slice());

            mass += linear.tr_mul(&linear) * body.mass + angular.tr_mul(&(inertia * &angular));
        }
        mass
    }

    /// Torques that hold configuration `q` against gravity.
    pub fn gravity_torque(&self, q: &[f64]) -> DVector<f64> {
        let chain = self.chain();
        let frames = chain.frames(q);
        let gravity = DVector::from_column_slice(self.gravity().as_slice());

        let mut tau = DVector::zeros(chain.dof());
        for (j, joint) in chain.joints().iter().enumerate() {
            let body = &joint.body;
            if body.mass <= 0.0 {
                continue;
            }
            let com = frames.body_poses[j]
                .transform_point(&Point3::from(body.com))
                .coords;
            let linear = chain.point_jacobian(&frames, j, &com);
            tau -= linear.tr_mul(&gravity) * body.mass;
        }
        tau
    }

    /// Joint accelerations produced by torques `tau` at state `(q, v)`.
    ///
    /// Fails with [`ModelError::SingularInertia`] when `M(q)` cannot be
    /// inverted, e.g. a massless link with zero armature.
    pub fn forward_dynamics(
        &self,
        q: &[f64],
        v: &[f64],
        tau: &[f64],
    ) -> Result<DVector<f64>, ModelError> {
        let rhs = self.bias_free_torque(q, v, tau);
        solve_spd(self.mass_matrix(q), &rhs).ok_or_else(|| singular(q))
    }

    /// Acceleration and its partial derivatives with respect to `q`, `v`, `tau`.
    ///
    /// The `v` and `tau` derivatives are exact; the `q` derivative uses
    /// central differences.
    pub fn dynamics_derivatives(
        &self,
        q: &[f64],
        v: &[f64],
        tau: &[f64],
    ) -> Result<DynamicsDerivatives, ModelError> {
        let n = q.len();
        let mass_inv = invert_spd(self.mass_matrix(q)).ok_or_else(|| singular(q))?;

        let acceleration = &mass_inv * self.bias_free_torque(q, v, tau);
        let da_dv = -(&mass_inv * DMatrix::from_diagonal(&self.damping()));

        let mut da_dq = DMatrix::zeros(n, n);
        let mut shifted = q.to_vec();
        for i in 0..n {
            shifted[i] = q[i] + FD_STEP;
            let plus = self.forward_dynamics(&shifted, v, tau)?;
            shifted[i] = q[i] - FD_STEP;
            let minus = self.forward_dynamics(&shifted, v, tau)?;
            shifted[i] = q[i];
            da_dq.set_column(i, &((plus - minus) / (2.0 * FD_STEP)));
        }

        Ok(DynamicsDerivatives {
            acceleration,
            da_dq,
            da_dv,
            da_dtau: mass_inv,
        })
    }

    /// `tau - b * v - g(q)`.
    fn bias_free_torque(&self, q: &[f64], v: &[f64], tau: &[f64]) -> DVector<f64> {
        let v = DVector::from_column_slice(v);
        DVector::from_column_slice(tau) - self.damping().component_mul(&v) - self.gravity_torque(q)
    }
}

fn singular(q: &[f64]) -> ModelError {
    ModelError::SingularInertia {
        configuration: q.to_vec(),
    }
}

/// Cholesky solve, LU when `M` is only semi-definite. `None` if singular.
fn solve_spd(matrix: DMatrix<f64>, rhs: &DVector<f64>) -> Option<DVector<f64>> {
    match matrix.clone().cholesky() {
        Some(cholesky) => Some(cholesky.solve(rhs)),
        None => {
            tracing::debug!("mass matrix not positive definite, falling back to LU");
            matrix.lu().solve(rhs)
        }
    }
}

fn invert_spd(matrix: DMatrix<f64>) -> Option<DMatrix<f64>> {
    match matrix.clone().cholesky() {
        Some(cholesky) => Some(cholesky.inverse()),
        None => {
            tracing::debug!("mass matrix not positive definite, falling back to LU");
            matrix.try_inverse()
        }
    }
}
