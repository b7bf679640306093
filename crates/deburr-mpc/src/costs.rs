//! Cost terms of one horizon node.
//!
//! Each node owns a [`CostModelSum`]: an ordered list of named entries,
//! each a [`CostKind`] with a weight and an activation flag. Inactive
//! entries are skipped entirely, so their data never reaches the solver.

use deburr_model::RobotDesigner;
use nalgebra::{DMatrix, DVector, Vector3};

pub const GOAL_TRACKING: &str = "goal_tracking";
pub const POSTURE: &str = "posture";
pub const CONTROL_REG: &str = "control_reg";
pub const STATE_LIMITS: &str = "state_limits";
pub const CONTROL_LIMITS: &str = "control_limits";

/// Value and derivatives of a cost over `x = [q, v]` and `u`.
#[derive(Debug, Clone, PartialEq)]
pub struct CostEvaluation {
    pub value: f64,
    pub lx: DVector<f64>,
    pub lu: DVector<f64>,
    pub lxx: DMatrix<f64>,
    pub luu: DMatrix<f64>,
}

impl CostEvaluation {
    pub fn zeros(nx: usize, nu: usize) -> Self {
        Self {
            value: 0.0,
            lx: DVector::zeros(nx),
            lu: DVector::zeros(nu),
            lxx: DMatrix::zeros(nx, nx),
            luu: DMatrix::zeros(nu, nu),
        }
    }

    /// `self += weight * other`.
    fn add_scaled(&mut self, other: &Self, weight: f64) {
        self.value += weight * other.value;
        self.lx.axpy(weight, &other.lx, 1.0);
        self.lu.axpy(weight, &other.lu, 1.0);
        self.lxx += &other.lxx * weight;
        self.luu += &other.luu * weight;
    }
}

/// The closed set of cost terms a node can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum CostKind {
    /// `0.5 |p_tool(q) - target|^2`, Gauss-Newton Hessian.
    GoalTracking { target: Vector3<f64> },
    /// `0.5 sum w_i (x_i - x_ref_i)^2`.
    Posture {
        reference: DVector<f64>,
        weights: DVector<f64>,
    },
    /// `0.5 |u - u_ref|^2`.
    ControlRegularization { reference: DVector<f64> },
    /// Quadratic barrier outside `[lower, upper]` on the state.
    StateLimits {
        lower: DVector<f64>,
        upper: DVector<f64>,
    },
    /// Quadratic barrier outside `[lower, upper]` on the control.
    ControlLimits {
        lower: DVector<f64>,
        upper: DVector<f64>,
    },
}

impl CostKind {
    /// Unweighted value.
    pub fn value(&self, designer: &RobotDesigner, x: &DVector<f64>, u: &DVector<f64>) -> f64 {
        match self {
            Self::GoalTracking { target } => {
                let p = designer.end_effector_pose(&x.as_slice()[..designer.nq()]);
                0.5 * (p.translation.vector - target).norm_squared()
            }
            Self::Posture { reference, weights } => {
                0.5 * weights.dot(&(x - reference).map(|e| e * e))
            }
            Self::ControlRegularization { reference } => 0.5 * (u - reference).norm_squared(),
            Self::StateLimits { lower, upper } => 0.5 * barrier(x, lower, upper).norm_squared(),
            Self::ControlLimits { lower, upper } => 0.5 * barrier(u, lower, upper).norm_squared(),
        }
    }

    /// Unweighted value, gradient and Hessian.
    pub fn evaluate(
        &self,
        designer: &RobotDesigner,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> CostEvaluation {
        let mut out = CostEvaluation::zeros(x.len(), u.len());
        match self {
            Self::GoalTracking { target } => {
                let nq = designer.nq();
                let q = &x.as_slice()[..nq];
                let residual = designer.end_effector_pose(q).translation.vector - target;
                let jacobian = designer.end_effector_jacobian(q);
                out.value = 0.5 * residual.norm_squared();
                let r = DVector::from_column_slice(residual.as_slice());
                out.lx.rows_mut(0, nq).copy_from(&jacobian.tr_mul(&r));
                out.lxx
                    .view_mut((0, 0), (nq, nq))
                    .copy_from(&jacobian.tr_mul(&jacobian));
            }
            Self::Posture { reference, weights } => {
                let e = x - reference;
                out.value = 0.5 * weights.dot(&e.map(|v| v * v));
                out.lx = weights.component_mul(&e);
                out.lxx = DMatrix::from_diagonal(weights);
            }
            Self::ControlRegularization { reference } => {
                out.lu = u - reference;
                out.value = 0.5 * out.lu.norm_squared();
                out.luu.fill_with_identity();
            }
            Self::StateLimits { lower, upper } => {
                let d = barrier(x, lower, upper);
                out.value = 0.5 * d.norm_squared();
                out.lxx = DMatrix::from_diagonal(&d.map(|v| if v == 0.0 { 0.0 } else { 1.0 }));
                out.lx = d;
            }
            Self::ControlLimits { lower, upper } => {
                let d = barrier(u, lower, upper);
                out.value = 0.5 * d.norm_squared();
                out.luu = DMatrix::from_diagonal(&d.map(|v| if v == 0.0 { 0.0 } else { 1.0 }));
                out.lu = d;
            }
        }
        out
    }
}

/// Signed distance outside `[lower, upper]`, zero inside. Infinite bounds
/// never activate.
fn barrier(value: &DVector<f64>, lower: &DVector<f64>, upper: &DVector<f64>) -> DVector<f64> {
    DVector::from_iterator(
        value.len(),
        value
            .iter()
            .zip(lower.iter().zip(upper))
            .map(|(&v, (&lo, &hi))| {
                if v < lo {
                    v - lo
                } else if v > hi {
                    v - hi
                } else {
                    0.0
                }
            }),
    )
}

/// A named, weighted, toggleable cost term.
#[derive(Debug, Clone, PartialEq)]
pub struct CostEntry {
    pub name: &'static str,
    pub kind: CostKind,
    pub weight: f64,
    pub active: bool,
}

/// Weighted sum of the active entries of one node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostModelSum {
    entries: Vec<CostEntry>,
}

impl CostModelSum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Names are expected to be unique per node.
    pub fn add(&mut self, name: &'static str, kind: CostKind, weight: f64, active: bool) {
        self.entries.push(CostEntry {
            name,
            kind,
            weight,
            active,
        });
    }

    pub fn entries(&self) -> &[CostEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&CostEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut CostEntry> {
        self.entries.iter_mut().find(|e| e.name == name)
    }

    pub fn value(&self, designer: &RobotDesigner, x: &DVector<f64>, u: &DVector<f64>) -> f64 {
        self.entries
            .iter()
            .filter(|e| e.active)
            .map(|e| e.weight * e.kind.value(designer, x, u))
            .sum()
    }

    pub fn evaluate(
        &self,
        designer: &RobotDesigner,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> CostEvaluation {
        let mut total = CostEvaluation::zeros(x.len(), u.len());
        for entry in self.entries.iter().filter(|e| e.active) {
            total.add_scaled(&entry.kind.evaluate(designer, x, u), entry.weight);
        }
        total
    }
}
