//! Shooting problem: per-node action models anchored at an initial state.

use nalgebra::{DMatrix, DVector};

use crate::error::DdpError;

/// First- and second-order expansion of one running node.
///
/// Dynamics `x' = f(x, u)` are linearised (`fx`, `fu`); the cost `l(x, u)`
/// is expanded to second order.
#[derive(Debug, Clone)]
pub struct NodeDerivatives {
    /// nx x nx
    pub fx: DMatrix<f64>,
    /// nx x nu
    pub fu: DMatrix<f64>,
    pub lx: DVector<f64>,
    pub lu: DVector<f64>,
    pub lxx: DMatrix<f64>,
    pub luu: DMatrix<f64>,
    /// nu x nx
    pub lux: DMatrix<f64>,
}

/// Second-order expansion of the terminal cost.
#[derive(Debug, Clone)]
pub struct TerminalDerivatives {
    pub lx: DVector<f64>,
    pub lxx: DMatrix<f64>,
}

/// Discrete-time dynamics plus stage cost for one horizon node.
///
/// The same model type serves running nodes (`calc`, `calc_diff`) and the
/// terminal node (`calc_terminal`, `calc_diff_terminal`). Evaluation may
/// fail where the model is undefined; the solver reports such failures as
/// [`DdpError::Model`] with the node index.
pub trait ActionModel {
    type Error: std::error::Error + Send + Sync + 'static;

    /// State dimension.
    fn nx(&self) -> usize;

    /// Control dimension.
    fn nu(&self) -> usize;

    /// Next state and stage cost.
    fn calc(&self, x: &DVector<f64>, u: &DVector<f64>)
    -> Result<(DVector<f64>, f64), Self::Error>;

    fn calc_diff(&self, x: &DVector<f64>, u: &DVector<f64>)
    -> Result<NodeDerivatives, Self::Error>;

    /// Terminal cost.
    fn calc_terminal(&self, x: &DVector<f64>) -> Result<f64, Self::Error>;

    fn calc_diff_terminal(&self, x: &DVector<f64>) -> Result<TerminalDerivatives, Self::Error>;
}

/// `N` running models and one terminal model anchored at `x0`.
#[derive(Debug, Clone)]
pub struct ShootingProblem<M> {
    x0: DVector<f64>,
    running: Vec<M>,
    terminal: M,
}

impl<M: ActionModel> ShootingProblem<M> {
    /// Build a problem, checking that every model agrees on dimensions.
    pub fn new(x0: DVector<f64>, running: Vec<M>, terminal: M) -> Result<Self, DdpError> {
        if running.is_empty() {
            return Err(DdpError::EmptyHorizon);
        }
        let nx = terminal.nx();
        let nu = running[0].nu();
        for model in &running {
            check("running model nx", nx, model.nx())?;
            check("running model nu", nu, model.nu())?;
        }
        check("x0", nx, x0.len())?;
        Ok(Self {
            x0,
            running,
            terminal,
        })
    }

    /// Number of running nodes `N`.
    pub fn horizon(&self) -> usize {
        self.running.len()
    }

    pub fn nx(&self) -> usize {
        self.terminal.nx()
    }

    pub fn nu(&self) -> usize {
        self.running[0].nu()
    }

    pub fn x0(&self) -> &DVector<f64> {
        &self.x0
    }

    /// Re-anchor node 0.
    pub fn set_x0(&mut self, x0: DVector<f64>) -> Result<(), DdpError> {
        check("x0", self.nx(), x0.len())?;
        self.x0 = x0;
        Ok(())
    }

    pub fn running(&self) -> &[M] {
        &self.running
    }

    /// Mutable access to the running models. Their dimensions must not change.
    pub fn running_mut(&mut self) -> &mut [M] {
        &mut self.running
    }

    pub fn terminal(&self) -> &M {
        &self.terminal
    }

    pub fn terminal_mut(&mut self) -> &mut M {
        &mut self.terminal
    }

    /// Total cost of `(xs, us)` without re-simulating the dynamics.
    pub fn cost(&self, xs: &[DVector<f64>], us: &[DVector<f64>]) -> Result<f64, DdpError> {
        let mut total = 0.0;
        for (i, (model, (x, u))) in self.running.iter().zip(xs.iter().zip(us)).enumerate() {
            total += model.calc(x, u).map_err(model_failure(i))?.1;
        }
        let n = self.horizon();
        let terminal = self
            .terminal
            .calc_terminal(&xs[n])
            .map_err(model_failure(n))?;
        Ok(total + terminal)
    }
}

/// Wrap a model error with the index of the node that raised it.
pub(crate) fn model_failure<E>(node: usize) -> impl FnOnce(E) -> DdpError
where
    E: std::error::Error + Send + Sync + 'static,
{
    move |source| DdpError::Model {
        node,
        source: Box::new(source),
    }
}

pub(crate) fn check(what: &'static str, expected: usize, got: usize) -> Result<(), DdpError> {
    if expected == got {
        Ok(())
    } else {
        Err(DdpError::Dimension {
            what,
            expected,
            got,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// `x' = A x + B u`, cost `0.5 (x - x*)' Q (x - x*) + 0.5 r |u|^2`.
    #[derive(Debug, Clone)]
    pub struct LinearQuadratic {
        pub a: DMatrix<f64>,
        pub b: DMatrix<f64>,
        pub q: DMatrix<f64>,
        pub r: f64,
        pub target: DVector<f64>,
    }

    impl LinearQuadratic {
        /// Double integrator driven to `target` (position, velocity).
        pub fn double_integrator(dt: f64, target: [f64; 2], weight: f64) -> Self {
            Self {
                a: DMatrix::from_row_slice(2, 2, &[1.0, dt, 0.0, 1.0]),
                b: DMatrix::from_row_slice(2, 1, &[0.5 * dt * dt, dt]),
                q: DMatrix::identity(2, 2) * weight,
                r: 1e-2,
                target: DVector::from_column_slice(&target),
            }
        }
    }

    impl ActionModel for LinearQuadratic {
        type Error = std::convert::Infallible;

        fn nx(&self) -> usize {
            self.a.nrows()
        }

        fn nu(&self) -> usize {
            self.b.ncols()
        }

        fn calc(
            &self,
            x: &DVector<f64>,
            u: &DVector<f64>,
        ) -> Result<(DVector<f64>, f64), Self::Error> {
            let e = x - &self.target;
            let cost = 0.5 * e.dot(&(&self.q * &e)) + 0.5 * self.r * u.norm_squared();
            Ok((&self.a * x + &self.b * u, cost))
        }

        fn calc_diff(
            &self,
            x: &DVector<f64>,
            u: &DVector<f64>,
        ) -> Result<NodeDerivatives, Self::Error> {
            let nu = self.nu();
            Ok(NodeDerivatives {
                fx: self.a.clone(),
                fu: self.b.clone(),
                lx: &self.q * (x - &self.target),
                lu: u * self.r,
                lxx: self.q.clone(),
                luu: DMatrix::identity(nu, nu) * self.r,
                lux: DMatrix::zeros(nu, self.nx()),
            })
        }

        fn calc_terminal(&self, x: &DVector<f64>) -> Result<f64, Self::Error> {
            let e = x - &self.target;
            Ok(0.5 * e.dot(&(&self.q * &e)))
        }

        fn calc_diff_terminal(&self, x: &DVector<f64>) -> Result<TerminalDerivatives, Self::Error> {
            Ok(TerminalDerivatives {
                lx: &self.q * (x - &self.target),
                lxx: self.q.clone(),
            })
        }
    }

    #[test]
    fn rejects_empty_horizon() {
        let m = LinearQuadratic::double_integrator(0.1, [1.0, 0.0], 1.0);
        let err = ShootingProblem::new(DVector::zeros(2), vec![], m).unwrap_err();
        assert!(matches!(err, DdpError::EmptyHorizon));
    }

    #[test]
    fn rejects_wrong_anchor_dimension() {
        let m = LinearQuadratic::double_integrator(0.1, [1.0, 0.0], 1.0);
        let err =
            ShootingProblem::new(DVector::zeros(3), vec![m.clone(); 4], m.clone()).unwrap_err();
        assert!(matches!(
            err,
            DdpError::Dimension {
                what: "x0",
                expected: 2,
                got: 3
            }
        ));

        let mut problem = ShootingProblem::new(DVector::zeros(2), vec![m.clone(); 4], m).unwrap();
        assert!(problem.set_x0(DVector::zeros(1)).is_err());
        assert!(problem.set_x0(DVector::from_column_slice(&[0.5, 0.0])).is_ok());
        assert_eq!(problem.x0()[0], 0.5);
        assert_eq!(problem.horizon(), 4);
    }

    #[test]
    fn cost_sums_running_and_terminal() {
        let m = LinearQuadratic::double_integrator(0.1, [1.0, 0.0], 2.0);
        let problem = ShootingProblem::new(DVector::zeros(2), vec![m.clone(); 2], m).unwrap();
        let xs = vec![DVector::zeros(2); 3];
        let us = vec![DVector::from_element(1, 1.0); 2];
        // Each node: 0.5 * 2 * 1 state error; running nodes add 0.5 * 0.01.
        assert!((problem.cost(&xs, &us).unwrap() - (3.0 + 2.0 * 0.005)).abs() < 1e-12);
    }
}
