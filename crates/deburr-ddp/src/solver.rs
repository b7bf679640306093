//! DDP solver: Riccati backward pass plus backtracking forward rollout.
//!
//! # Iteration
//!
//! 1. Linearise dynamics and expand costs along `(xs, us)`.
//! 2. Backward pass: build `Qx, Qu, Qxx, Quu, Qux` per node, solve the
//!    regularised `Quu + reg I` by Cholesky for the feed-forward step `k`
//!    and the gain `K`. A failed factorisation raises `reg` and retries.
//! 3. Stop if `sum ||Qu||^2 < stop_threshold`.
//! 4. Forward pass: try step lengths `1, 1/2, ..., 1/1024`; accept the first
//!    whose cost reduction reaches `armijo` times the predicted reduction.

use nalgebra::{DMatrix, DVector};

use crate::error::DdpError;
use crate::problem::{
    ActionModel, NodeDerivatives, ShootingProblem, TerminalDerivatives, check, model_failure,
};
use crate::trajectory::Trajectory;

/// Solver tuning. Defaults mirror a standard DDP setup.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverSettings {
    /// Convergence threshold on `sum ||Qu||^2`.
    pub stop_threshold: f64,
    /// Initial and minimum `Quu` regularisation.
    pub reg_min: f64,
    /// Regularisation ceiling; reaching it ends the solve.
    pub reg_max: f64,
    /// Multiplicative regularisation update.
    pub reg_factor: f64,
    /// Number of halvings tried by the line search after the full step.
    pub line_search_steps: u32,
    /// Fraction of the predicted reduction required to accept a step.
    pub armijo: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            stop_threshold: 1e-9,
            reg_min: 1e-9,
            reg_max: 1e9,
            reg_factor: 10.0,
            line_search_steps: 10,
            armijo: 0.1,
        }
    }
}

impl SolverSettings {
    pub fn validate(&self) -> Result<(), DdpError> {
        if !(self.stop_threshold > 0.0 && self.stop_threshold.is_finite()) {
            return Err(invalid("stop_threshold", "must be finite and > 0"));
        }
        if !(self.reg_min > 0.0 && self.reg_min < self.reg_max && self.reg_max.is_finite()) {
            return Err(invalid("reg_min/reg_max", "require 0 < reg_min < reg_max < inf"));
        }
        if !(self.reg_factor > 1.0 && self.reg_factor.is_finite()) {
            return Err(invalid("reg_factor", "must be finite and > 1"));
        }
        if !(self.armijo > 0.0 && self.armijo < 1.0) {
            return Err(invalid("armijo", "must lie in (0, 1)"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, message: &'static str) -> DdpError {
    DdpError::InvalidSettings { field, message }
}

/// Why a solve returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `sum ||Qu||^2` fell below the threshold.
    Converged,
    /// The iteration budget ran out.
    MaxIterations,
    /// `Quu` could not be made positive definite, or the line search kept
    /// failing until the regularisation ceiling was reached.
    RegularizationLimit,
}

/// Outcome of one solve. The trajectory buffer always holds the best iterate.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveReport {
    pub converged: bool,
    /// Accepted or attempted forward passes.
    pub iterations: usize,
    /// Total cost of the returned iterate.
    pub cost: f64,
    /// Last evaluated `sum ||Qu||^2`.
    pub stop: f64,
    /// Whether the stored gains come from a backward pass at the returned
    /// iterate. False when the solve stopped right after accepting a step:
    /// the gains then belong to the previous iterate.
    pub gains_at_solution: bool,
    pub reason: StopReason,
    /// Regularisation at exit.
    pub regularization: f64,
}

/// Output of a successful backward pass.
struct BackwardPass {
    feedforward: Vec<DVector<f64>>,
    gains: Vec<DMatrix<f64>>,
    /// `sum k' Qu` (non-positive).
    d1: f64,
    /// `sum 0.5 k' Quu k` (non-negative).
    d2: f64,
    stop: f64,
}

impl BackwardPass {
    /// Predicted cost reduction for step length `alpha`.
    fn expected_reduction(&self, alpha: f64) -> f64 {
        -(alpha * self.d1 + alpha * alpha * self.d2)
    }
}

/// Stateless DDP solver; all iterate state lives in the [`Trajectory`].
#[derive(Debug, Clone, Default)]
pub struct DdpSolver {
    settings: SolverSettings,
}

impl DdpSolver {
    pub fn new(settings: SolverSettings) -> Result<Self, DdpError> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    /// Run at most `max_iterations` DDP iterations on `problem`, starting
    /// from the controls in `trajectory`.
    ///
    /// The states are first re-simulated from `problem.x0()` under the
    /// stored controls. Shapes are checked before any model is evaluated.
    /// A model that fails to evaluate aborts the solve with
    /// [`DdpError::Model`].
    pub fn solve<M: ActionModel>(
        &self,
        problem: &ShootingProblem<M>,
        trajectory: &mut Trajectory,
        max_iterations: usize,
    ) -> Result<SolveReport, DdpError> {
        let (nx, nu, horizon) = (problem.nx(), problem.nu(), problem.horizon());
        trajectory.check_shape(nx, nu, horizon)?;

        let mut cost = rollout(problem, trajectory)?;
        let mut reg = self.settings.reg_min;
        let mut stop = f64::INFINITY;
        let mut gains_at_solution = false;
        let mut iterations = 0;
        let mut reason = StopReason::MaxIterations;

        while iterations < max_iterations {
            let derivatives = linearize(problem, trajectory)?;

            let pass = loop {
                match backward_pass(problem, &derivatives, reg) {
                    Some(pass) => break Some(pass),
                    None if reg >= self.settings.reg_max => break None,
                    None => reg = (reg * self.settings.reg_factor).min(self.settings.reg_max),
                }
            };
            let Some(pass) = pass else {
                reason = StopReason::RegularizationLimit;
                break;
            };

            trajectory.gains.clone_from(&pass.gains);
            gains_at_solution = true;
            stop = pass.stop;
            if stop < self.settings.stop_threshold {
                reason = StopReason::Converged;
                break;
            }

            iterations += 1;
            match self.line_search(problem, trajectory, &pass, cost)? {
                Some((alpha, new_cost)) => {
                    cost = new_cost;
                    gains_at_solution = false;
                    if alpha > 0.5 {
                        reg = (reg / self.settings.reg_factor).max(self.settings.reg_min);
                    } else if alpha < 0.01 {
                        reg = (reg * self.settings.reg_factor).min(self.settings.reg_max);
                    }
                    tracing::trace!(iteration = iterations, cost, stop, reg, alpha, "ddp step");
                }
                None => {
                    tracing::trace!(iteration = iterations, cost, stop, reg, "ddp step rejected");
                    if reg >= self.settings.reg_max {
                        reason = StopReason::RegularizationLimit;
                        break;
                    }
                    reg = (reg * self.settings.reg_factor).min(self.settings.reg_max);
                }
            }
        }

        let converged = reason == StopReason::Converged;
        if !converged {
            tracing::debug!(iterations, cost, stop, ?reason, "ddp stopped before convergence");
        }
        Ok(SolveReport {
            converged,
            iterations,
            cost,
            stop,
            gains_at_solution,
            reason,
            regularization: reg,
        })
    }

    /// Backtracking forward pass. On success the trajectory holds the new
    /// iterate and the accepted `(alpha, cost)` is returned.
    fn line_search<M: ActionModel>(
        &self,
        problem: &ShootingProblem<M>,
        trajectory: &mut Trajectory,
        pass: &BackwardPass,
        cost: f64,
    ) -> Result<Option<(f64, f64)>, DdpError> {
        let mut alpha = 1.0;
        for _ in 0..=self.settings.line_search_steps {
            if let Some((xs, us, new_cost)) = forward_pass(problem, trajectory, pass, alpha)? {
                let expected = pass.expected_reduction(alpha);
                let actual = cost - new_cost;
                let accept = if expected > 0.0 {
                    actual >= self.settings.armijo * expected
                } else {
                    actual >= 0.0
                };
                if accept {
                    trajectory.xs = xs;
                    trajectory.us = us;
                    return Ok(Some((alpha, new_cost)));
                }
            }
            alpha *= 0.5;
        }
        Ok(None)
    }
}

/// Re-simulate `xs` from the anchor under `us`; return the total cost.
fn rollout<M: ActionModel>(
    problem: &ShootingProblem<M>,
    trajectory: &mut Trajectory,
) -> Result<f64, DdpError> {
    trajectory.xs[0].copy_from(problem.x0());
    let mut cost = 0.0;
    for (i, model) in problem.running().iter().enumerate() {
        let (next, c) = model
            .calc(&trajectory.xs[i], &trajectory.us[i])
            .map_err(model_failure(i))?;
        check("model next state", problem.nx(), next.len())?;
        if !c.is_finite() || next.iter().any(|v| !v.is_finite()) {
            return Err(DdpError::NonFiniteRollout { node: i });
        }
        cost += c;
        trajectory.xs[i + 1] = next;
    }
    let n = problem.horizon();
    let terminal = problem
        .terminal()
        .calc_terminal(&trajectory.xs[n])
        .map_err(model_failure(n))?;
    if !terminal.is_finite() {
        return Err(DdpError::NonFiniteRollout { node: n });
    }
    Ok(cost + terminal)
}

fn linearize<M: ActionModel>(
    problem: &ShootingProblem<M>,
    trajectory: &Trajectory,
) -> Result<(Vec<NodeDerivatives>, TerminalDerivatives), DdpError> {
    let running = problem
        .running()
        .iter()
        .zip(trajectory.xs.iter().zip(&trajectory.us))
        .enumerate()
        .map(|(i, (model, (x, u)))| model.calc_diff(x, u).map_err(model_failure(i)))
        .collect::<Result<_, _>>()?;
    let n = problem.horizon();
    let terminal = problem
        .terminal()
        .calc_diff_terminal(&trajectory.xs[n])
        .map_err(model_failure(n))?;
    Ok((running, terminal))
}

/// Riccati sweep. `None` when some regularised `Quu` is not positive definite.
fn backward_pass<M: ActionModel>(
    problem: &ShootingProblem<M>,
    (derivatives, terminal): &(Vec<NodeDerivatives>, TerminalDerivatives),
    reg: f64,
) -> Option<BackwardPass> {
    let n = problem.horizon();
    let nu = problem.nu();

    let mut vx = terminal.lx.clone();
    let mut vxx = terminal.lxx.clone();
    let mut feedforward = vec![DVector::zeros(nu); n];
    let mut gains = vec![DMatrix::zeros(nu, problem.nx()); n];
    let (mut d1, mut d2, mut stop) = (0.0, 0.0, 0.0);

    for i in (0..n).rev() {
        let d = &derivatives[i];
        let vxx_fx = &vxx * &d.fx;
        let vxx_fu = &vxx * &d.fu;

        let qx = &d.lx + d.fx.tr_mul(&vx);
        let qu = &d.lu + d.fu.tr_mul(&vx);
        let qxx = &d.lxx + d.fx.tr_mul(&vxx_fx);
        let quu = &d.luu + d.fu.tr_mul(&vxx_fu);
        let qux = &d.lux + d.fu.tr_mul(&vxx_fx);

        let quu_reg = &quu + DMatrix::identity(nu, nu) * reg;
        let cholesky = quu_reg.cholesky()?;
        let k = -cholesky.solve(&qu);
        let big_k = -cholesky.solve(&qux);

        let quu_k = &quu * &k;
        vx = &qx + big_k.tr_mul(&quu_k) + big_k.tr_mul(&qu) + qux.tr_mul(&k);
        let cross = big_k.tr_mul(&qux);
        vxx = &qxx + big_k.tr_mul(&(&quu * &big_k)) + &cross + cross.transpose();
        vxx = (&vxx + vxx.transpose()) * 0.5;

        d1 += k.dot(&qu);
        d2 += 0.5 * k.dot(&quu_k);
        stop += qu.norm_squared();

        feedforward[i] = k;
        gains[i] = big_k;
    }

    Some(BackwardPass {
        feedforward,
        gains,
        d1,
        d2,
        stop,
    })
}

/// Roll out the feedback law for step length `alpha`. `None` on a
/// non-finite state or cost.
fn forward_pass<M: ActionModel>(
    problem: &ShootingProblem<M>,
    trajectory: &Trajectory,
    pass: &BackwardPass,
    alpha: f64,
) -> Result<Option<(Vec<DVector<f64>>, Vec<DVector<f64>>, f64)>, DdpError> {
    let n = problem.horizon();
    let mut xs = Vec::with_capacity(n + 1);
    let mut us = Vec::with_capacity(n);
    xs.push(problem.x0().clone());
    let mut cost = 0.0;

    for (i, model) in problem.running().iter().enumerate() {
        let dx = &xs[i] - &trajectory.xs[i];
        let u = &trajectory.us[i] + &pass.feedforward[i] * alpha + &pass.gains[i] * dx;
        let (next, c) = model.calc(&xs[i], &u).map_err(model_failure(i))?;
        if !c.is_finite() || next.iter().any(|v| !v.is_finite()) {
            return Ok(None);
        }
        cost += c;
        us.push(u);
        xs.push(next);
    }
    cost += problem
        .terminal()
        .calc_terminal(&xs[n])
        .map_err(model_failure(n))?;
    Ok(cost.is_finite().then_some((xs, us, cost)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::tests::LinearQuadratic;
    use approx::assert_relative_eq;

    const DT: f64 = 0.1;
    const N: usize = 20;

    fn lq_problem(x0: [f64; 2]) -> ShootingProblem<LinearQuadratic> {
        let model = LinearQuadratic::double_integrator(DT, [1.0, 0.0], 1.0);
        ShootingProblem::new(DVector::from_column_slice(&x0), vec![model.clone(); N], model)
            .unwrap()
    }

    fn cold(problem: &ShootingProblem<LinearQuadratic>) -> Trajectory {
        Trajectory::cold(problem.x0(), &DVector::zeros(1), problem.horizon())
    }

    /// Finite-horizon discrete Riccati recursion; returns the gain sequence.
    fn riccati_gains(model: &LinearQuadratic) -> Vec<DMatrix<f64>> {
        let (a, b) = (&model.a, &model.b);
        let r = DMatrix::identity(1, 1) * model.r;
        let mut p = model.q.clone();
        let mut gains = vec![DMatrix::zeros(1, 2); N];
        for i in (0..N).rev() {
            let s = &r + b.transpose() * &p * b;
            let k = -s.try_inverse().unwrap() * b.transpose() * &p * a;
            p = &model.q + a.transpose() * &p * a + a.transpose() * &p * b * &k;
            gains[i] = k;
        }
        gains
    }

    #[test]
    fn linear_quadratic_converges_in_one_step() {
        let problem = lq_problem([0.0, 0.0]);
        let mut traj = cold(&problem);
        let report = DdpSolver::default().solve(&problem, &mut traj, 10).unwrap();

        assert!(report.converged);
        assert_eq!(report.reason, StopReason::Converged);
        assert_eq!(report.iterations, 1);
        assert!(report.gains_at_solution);
        assert!(report.stop < 1e-9);
        assert_relative_eq!(report.cost, problem.cost(&traj.xs, &traj.us).unwrap(), epsilon = 1e-12);
    }

    #[test]
    fn gains_match_riccati_recursion() {
        let problem = lq_problem([0.0, 0.0]);
        let mut traj = cold(&problem);
        DdpSolver::default().solve(&problem, &mut traj, 10).unwrap();

        let expected = riccati_gains(&problem.running()[0]);
        for (got, want) in traj.gains.iter().zip(&expected) {
            assert_relative_eq!(*got, *want, epsilon = 1e-6);
        }
    }

    #[test]
    fn states_follow_the_dynamics() {
        let problem = lq_problem([0.2, -0.1]);
        let mut traj = cold(&problem);
        DdpSolver::default().solve(&problem, &mut traj, 10).unwrap();

        assert_eq!(traj.xs[0], *problem.x0());
        for i in 0..N {
            let (next, _) = problem.running()[i].calc(&traj.xs[i], &traj.us[i]).unwrap();
            assert_relative_eq!(traj.xs[i + 1], next, epsilon = 1e-12);
        }
        // The horizon is long enough to get close to the goal.
        assert!((traj.xs[N][0] - 1.0).abs() < 0.2);
    }

    #[test]
    fn warm_start_from_solution_needs_no_iteration() {
        let problem = lq_problem([0.0, 0.0]);
        let mut traj = cold(&problem);
        let solver = DdpSolver::default();
        solver.solve(&problem, &mut traj, 10).unwrap();
        let solved = traj.clone();

        let report = solver.solve(&problem, &mut traj, 10).unwrap();
        assert!(report.converged);
        assert_eq!(report.iterations, 0);
        assert_relative_eq!(traj.us[0], solved.us[0], epsilon = 1e-12);
    }

    #[test]
    fn zero_budget_only_rolls_out() {
        let problem = lq_problem([0.5, 0.0]);
        let mut traj = cold(&problem);
        let report = DdpSolver::default().solve(&problem, &mut traj, 0).unwrap();
        assert!(!report.converged);
        assert_eq!(report.iterations, 0);
        assert_eq!(report.reason, StopReason::MaxIterations);
        assert!(!report.gains_at_solution);
        assert_eq!(traj.xs[N], *problem.x0());
    }

    #[test]
    fn shape_is_checked_before_evaluation() {
        let problem = lq_problem([0.0, 0.0]);
        let mut short = Trajectory::cold(problem.x0(), &DVector::zeros(1), N - 1);
        assert!(matches!(
            DdpSolver::default().solve(&problem, &mut short, 5),
            Err(DdpError::Horizon { .. })
        ));
    }

    #[test]
    fn invalid_settings_rejected() {
        let bad = SolverSettings {
            armijo: 1.5,
            ..SolverSettings::default()
        };
        assert!(DdpSolver::new(bad).is_err());
        assert!(DdpSolver::new(SolverSettings::default()).is_ok());
    }

    /// Torque-driven pendulum, semi-implicit Euler.
    #[derive(Debug, Clone)]
    struct Pendulum {
        target: f64,
    }

    const G: f64 = 9.81;

    impl ActionModel for Pendulum {
        type Error = std::convert::Infallible;

        fn nx(&self) -> usize {
            2
        }

        fn nu(&self) -> usize {
            1
        }

        fn calc(
            &self,
            x: &DVector<f64>,
            u: &DVector<f64>,
        ) -> Result<(DVector<f64>, f64), Self::Error> {
            let w = x[1] + DT * (u[0] - G * x[0].sin());
            let next = DVector::from_column_slice(&[x[0] + DT * w, w]);
            let e = x[0] - self.target;
            Ok((next, 0.5 * (e * e + 0.1 * x[1] * x[1]) + 0.5e-3 * u[0] * u[0]))
        }

        fn calc_diff(
            &self,
            x: &DVector<f64>,
            u: &DVector<f64>,
        ) -> Result<NodeDerivatives, Self::Error> {
            let c = G * x[0].cos();
            Ok(NodeDerivatives {
                fx: DMatrix::from_row_slice(2, 2, &[1.0 - DT * DT * c, DT, -DT * c, 1.0]),
                fu: DMatrix::from_row_slice(2, 1, &[DT * DT, DT]),
                lx: DVector::from_column_slice(&[x[0] - self.target, 0.1 * x[1]]),
                lu: DVector::from_element(1, 1e-3 * u[0]),
                lxx: DMatrix::from_diagonal(&DVector::from_column_slice(&[1.0, 0.1])),
                luu: DMatrix::from_element(1, 1, 1e-3),
                lux: DMatrix::zeros(1, 2),
            })
        }

        fn calc_terminal(&self, x: &DVector<f64>) -> Result<f64, Self::Error> {
            let e = x[0] - self.target;
            Ok(5.0 * (e * e + x[1] * x[1]))
        }

        fn calc_diff_terminal(&self, x: &DVector<f64>) -> Result<TerminalDerivatives, Self::Error> {
            Ok(TerminalDerivatives {
                lx: DVector::from_column_slice(&[10.0 * (x[0] - self.target), 10.0 * x[1]]),
                lxx: DMatrix::identity(2, 2) * 10.0,
            })
        }
    }

    fn pendulum_problem() -> ShootingProblem<Pendulum> {
        let model = Pendulum { target: 0.2 };
        ShootingProblem::new(DVector::zeros(2), vec![model.clone(); N], model).unwrap()
    }

    #[test]
    fn early_stop_keeps_best_iterate_and_flags_gains() {
        let problem = pendulum_problem();
        let mut traj = Trajectory::cold(problem.x0(), &DVector::zeros(1), N);
        let initial = problem.cost(&traj.xs, &traj.us).unwrap();

        let report = DdpSolver::default().solve(&problem, &mut traj, 1).unwrap();
        assert!(!report.converged);
        assert_eq!(report.reason, StopReason::MaxIterations);
        assert_eq!(report.iterations, 1);
        assert!(report.cost < initial);
        assert!(!report.gains_at_solution);
        assert_relative_eq!(report.cost, problem.cost(&traj.xs, &traj.us).unwrap(), epsilon = 1e-12);
    }

    #[test]
    fn nonlinear_problem_converges_with_budget() {
        let problem = pendulum_problem();
        let mut traj = Trajectory::cold(problem.x0(), &DVector::zeros(1), N);
        let report = DdpSolver::default().solve(&problem, &mut traj, 100).unwrap();
        assert!(report.converged);
        assert!(report.gains_at_solution);
        assert!((traj.xs[N][0] - 0.2).abs() < 0.05);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("position {0} outside the model domain")]
    struct OutOfDomain(f64);

    /// Double integrator that refuses positions beyond `limit`.
    #[derive(Debug, Clone)]
    struct Bounded {
        inner: LinearQuadratic,
        limit: f64,
    }

    impl Bounded {
        fn admit(&self, x: &DVector<f64>) -> Result<(), OutOfDomain> {
            if x[0].abs() > self.limit {
                Err(OutOfDomain(x[0]))
            } else {
                Ok(())
            }
        }
    }

    impl ActionModel for Bounded {
        type Error = OutOfDomain;

        fn nx(&self) -> usize {
            2
        }

        fn nu(&self) -> usize {
            1
        }

        fn calc(
            &self,
            x: &DVector<f64>,
            u: &DVector<f64>,
        ) -> Result<(DVector<f64>, f64), Self::Error> {
            self.admit(x)?;
            Ok(self.inner.calc(x, u).unwrap_or_else(|e| match e {}))
        }

        fn calc_diff(
            &self,
            x: &DVector<f64>,
            u: &DVector<f64>,
        ) -> Result<NodeDerivatives, Self::Error> {
            self.admit(x)?;
            Ok(self.inner.calc_diff(x, u).unwrap_or_else(|e| match e {}))
        }

        fn calc_terminal(&self, x: &DVector<f64>) -> Result<f64, Self::Error> {
            self.admit(x)?;
            Ok(self.inner.calc_terminal(x).unwrap_or_else(|e| match e {}))
        }

        fn calc_diff_terminal(&self, x: &DVector<f64>) -> Result<TerminalDerivatives, Self::Error> {
            self.admit(x)?;
            Ok(self.inner.calc_diff_terminal(x).unwrap_or_else(|e| match e {}))
        }
    }

    #[test]
    fn model_failure_aborts_with_node_index() {
        let inner = LinearQuadratic::double_integrator(DT, [1.0, 0.0], 1.0);
        // Coasting at 1 m/s from 0 leaves [-0.35, 0.35] after four nodes.
        let model = Bounded { inner, limit: 0.35 };
        let problem = ShootingProblem::new(
            DVector::from_column_slice(&[0.0, 1.0]),
            vec![model.clone(); N],
            model,
        )
        .unwrap();
        let mut traj = Trajectory::cold(problem.x0(), &DVector::zeros(1), N);

        let err = DdpSolver::default().solve(&problem, &mut traj, 10).unwrap_err();
        assert!(matches!(err, DdpError::Model { node: 4, .. }));
        assert!(err.to_string().contains("outside the model domain"));
    }
}
