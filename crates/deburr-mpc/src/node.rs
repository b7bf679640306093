//! Integrated action model of one horizon node.
//!
//! State `x = [q, v]`, control `u = tau`. Semi-implicit Euler over the
//! joint-space dynamics:
//!
//! ```text
//! a  = M(q)^-1 (tau - b * v - g(q))
//! v' = v + dt * a
//! q' = q + dt * v'
//! ```
//!
//! Running costs are integrated (scaled by `dt`); the terminal cost is not.

use std::sync::Arc;

use deburr_ddp::{ActionModel, NodeDerivatives, TerminalDerivatives};
use deburr_model::{ModelError, RobotDesigner};
use nalgebra::{DMatrix, DVector};

use crate::costs::CostModelSum;

#[derive(Debug, Clone)]
pub struct ArmNode {
    designer: Arc<RobotDesigner>,
    dt: f64,
    costs: CostModelSum,
}

impl ArmNode {
    pub fn new(designer: Arc<RobotDesigner>, dt: f64, costs: CostModelSum) -> Self {
        Self {
            designer,
            dt,
            costs,
        }
    }

    pub fn costs(&self) -> &CostModelSum {
        &self.costs
    }

    pub fn costs_mut(&mut self) -> &mut CostModelSum {
        &mut self.costs
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Semi-implicit Euler step of the arm dynamics.
    pub fn integrate(&self, x: &DVector<f64>, u: &DVector<f64>) -> Result<DVector<f64>, ModelError> {
        step(&self.designer, self.dt, x, u)
    }
}

/// One semi-implicit Euler step of `designer`'s dynamics.
pub fn step(
    designer: &RobotDesigner,
    dt: f64,
    x: &DVector<f64>,
    u: &DVector<f64>,
) -> Result<DVector<f64>, ModelError> {
    let nq = designer.nq();
    let (q, v) = x.as_slice().split_at(nq);
    let a = designer.forward_dynamics(q, v, u.as_slice())?;

    let mut next = x.clone();
    let v_next = x.rows(nq, designer.nv()) + a * dt;
    let q_next = x.rows(0, nq) + &v_next * dt;
    next.rows_mut(0, nq).copy_from(&q_next);
    next.rows_mut(nq, designer.nv()).copy_from(&v_next);
    Ok(next)
}

impl ActionModel for ArmNode {
    type Error = ModelError;

    fn nx(&self) -> usize {
        self.designer.nx()
    }

    fn nu(&self) -> usize {
        self.designer.nu()
    }

    fn calc(&self, x: &DVector<f64>, u: &DVector<f64>) -> Result<(DVector<f64>, f64), ModelError> {
        let cost = self.costs.value(&self.designer, x, u) * self.dt;
        Ok((self.integrate(x, u)?, cost))
    }

    fn calc_diff(&self, x: &DVector<f64>, u: &DVector<f64>) -> Result<NodeDerivatives, ModelError> {
        let (nq, nv) = (self.designer.nq(), self.designer.nv());
        let dt = self.dt;
        let (q, v) = x.as_slice().split_at(nq);
        let dynamics = self.designer.dynamics_derivatives(q, v, u.as_slice())?;

        // v' = v + dt a,  q' = q + dt v'
        let dv_dq = &dynamics.da_dq * dt;
        let dv_dv = DMatrix::identity(nv, nv) + &dynamics.da_dv * dt;
        let dv_du = &dynamics.da_dtau * dt;

        let nx = nq + nv;
        let mut fx = DMatrix::zeros(nx, nx);
        fx.view_mut((0, 0), (nq, nq))
            .copy_from(&(DMatrix::identity(nq, nq) + &dv_dq * dt));
        fx.view_mut((0, nq), (nq, nv)).copy_from(&(&dv_dv * dt));
        fx.view_mut((nq, 0), (nv, nq)).copy_from(&dv_dq);
        fx.view_mut((nq, nq), (nv, nv)).copy_from(&dv_dv);

        let mut fu = DMatrix::zeros(nx, self.nu());
        fu.view_mut((0, 0), (nq, self.nu())).copy_from(&(&dv_du * dt));
        fu.view_mut((nq, 0), (nv, self.nu())).copy_from(&dv_du);

        let cost = self.costs.evaluate(&self.designer, x, u);
        Ok(NodeDerivatives {
            fx,
            fu,
            lx: cost.lx * dt,
            lu: cost.lu * dt,
            lxx: cost.lxx * dt,
            luu: cost.luu * dt,
            lux: DMatrix::zeros(self.nu(), nx),
        })
    }

    fn calc_terminal(&self, x: &DVector<f64>) -> Result<f64, ModelError> {
        Ok(self
            .costs
            .value(&self.designer, x, &DVector::zeros(self.nu())))
    }

    fn calc_diff_terminal(&self, x: &DVector<f64>) -> Result<TerminalDerivatives, ModelError> {
        let cost = self
            .costs
            .evaluate(&self.designer, x, &DVector::zeros(self.nu()));
        Ok(TerminalDerivatives {
            lx: cost.lx,
            lxx: cost.lxx,
        })
    }
}
