//! OCP formulator: one finite-horizon point-reaching problem over the arm.
//!
//! Node layout for a horizon of `N` running nodes:
//!
//! | nodes      | entries                                                        |
//! |------------|----------------------------------------------------------------|
//! | `0..N`     | goal_tracking, posture, control_reg, state_limits, control_limits |
//! | `N`        | goal_tracking, posture, state_limits                           |
//!
//! The cost structure is allocated by the first [`OcpPoint::initialize`];
//! every mutator edits it in place.

use std::path::Path;
use std::sync::Arc;

use deburr_ddp::{
    ActionModel, DdpSolver, ShootingProblem, SolveReport, SolverSettings, Trajectory,
};
use deburr_model::RobotDesigner;
use nalgebra::{DVector, Isometry3, Vector3};

use crate::costs::{
    CONTROL_LIMITS, CONTROL_REG, CostEntry, CostKind, CostModelSum, GOAL_TRACKING, POSTURE,
    STATE_LIMITS,
};
use crate::debug::{DebugLog, OcpDebugRecord};
use crate::error::{DebugError, OcpError};
use crate::node::ArmNode;
use crate::settings::OcpSettings;

/// Finite-horizon OCP anchored at a measured state and a target position.
#[derive(Debug, Clone)]
pub struct OcpPoint {
    designer: Arc<RobotDesigner>,
    settings: OcpSettings,
    solver: DdpSolver,
    posture_weights: DVector<f64>,
    goal_weight: f64,
    problem: Option<ShootingProblem<ArmNode>>,
    last_report: Option<SolveReport>,
    debug: DebugLog<OcpDebugRecord>,
}

impl OcpPoint {
    pub fn new(designer: Arc<RobotDesigner>, settings: OcpSettings) -> Result<Self, OcpError> {
        settings.validate()?;
        let nx = designer.nx();
        let posture_weights = match &settings.posture_state_weights {
            Some(weights) => {
                check_len("posture_state_weights", nx, weights.len())?;
                DVector::from_column_slice(weights)
            }
            None => DVector::from_element(nx, 1.0),
        };
        let solver = DdpSolver::new(SolverSettings {
            stop_threshold: settings.stop_threshold,
            ..SolverSettings::default()
        })?;
        Ok(Self {
            goal_weight: settings.goal_weight,
            designer,
            settings,
            solver,
            posture_weights,
            problem: None,
            last_report: None,
            debug: DebugLog::new(),
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Anchor the problem at `x0` and aim every goal term at `target`.
    ///
    /// Resets targets, posture references, activations and the goal weight
    /// to their configured values.
    pub fn initialize(&mut self, x0: &DVector<f64>, target: &Isometry3<f64>) -> Result<(), OcpError> {
        self.check_state(x0)?;
        let position = target.translation.vector;
        check_finite("target", position.iter())?;

        self.goal_weight = self.settings.goal_weight;
        let control_reference = self.designer.gravity_torque(&x0.as_slice()[..self.designer.nq()]);
        let horizon = self.settings.horizon_length;

        let problem = match self.problem.take() {
            Some(mut problem) => {
                problem.set_x0(x0.clone())?;
                problem
            }
            None => {
                let running = (0..horizon).map(|_| self.node(false)).collect();
                ShootingProblem::new(x0.clone(), running, self.node(true))?
            }
        };
        let problem = self.problem.insert(problem);

        for (index, node) in problem.running_mut().iter_mut().enumerate() {
            reset_costs(node.costs_mut(), &self.settings, index, x0, &position, &control_reference);
        }
        reset_costs(
            problem.terminal_mut().costs_mut(),
            &self.settings,
            horizon,
            x0,
            &position,
            &control_reference,
        );
        self.last_report = None;

        tracing::debug!(
            horizon,
            dt = self.settings.time_step,
            target = ?position.as_slice(),
            "ocp initialized"
        );
        Ok(())
    }

    /// Cold-start solve right after [`initialize`](Self::initialize).
    ///
    /// `trajectory` is overwritten with a quasi-static guess (every state at
    /// `x`, every control holding `x` against gravity) and then optimized
    /// with the larger first-solve budget.
    pub fn solve_first(
        &mut self,
        x: &DVector<f64>,
        trajectory: &mut Trajectory,
    ) -> Result<SolveReport, OcpError> {
        self.check_state(x)?;
        let hold = self.designer.gravity_torque(&x.as_slice()[..self.designer.nq()]);
        let problem = self.problem.as_mut().ok_or(OcpError::NotInitialized)?;
        problem.set_x0(x.clone())?;
        *trajectory = Trajectory::cold(x, &hold, problem.horizon());

        let report = self
            .solver
            .solve(problem, trajectory, self.settings.first_solve_iterations)?;
        if !report.converged {
            tracing::warn!(
                iterations = report.iterations,
                stop = report.stop,
                "first solve did not converge"
            );
        }
        self.last_report = Some(report.clone());
        Ok(report)
    }

    /// Re-anchor at `x` and re-solve from the warm start in `trajectory`.
    ///
    /// Running out of iterations is not an error: the best iterate is left
    /// in `trajectory` and the report says so.
    pub fn solve(
        &mut self,
        x: &DVector<f64>,
        trajectory: &mut Trajectory,
    ) -> Result<SolveReport, OcpError> {
        self.check_state(x)?;
        let problem = self.problem.as_mut().ok_or(OcpError::NotInitialized)?;
        trajectory.check_shape(problem.nx(), problem.nu(), problem.horizon())?;
        problem.set_x0(x.clone())?;

        let report = self
            .solver
            .solve(problem, trajectory, self.settings.solver_iterations)?;
        if report.converged {
            tracing::debug!(iterations = report.iterations, cost = report.cost, "ocp solved");
        } else {
            tracing::warn!(
                iterations = report.iterations,
                stop = report.stop,
                cost = report.cost,
                "ocp solve hit its iteration budget"
            );
        }
        self.last_report = Some(report.clone());
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Mutators
    // -----------------------------------------------------------------------

    /// Turn the goal-tracking term of node `index` on or off.
    pub fn change_goal_cost_activation(&mut self, index: usize, active: bool) -> Result<(), OcpError> {
        self.entry_mut(index, GOAL_TRACKING)?.active = active;
        Ok(())
    }

    /// Move the goal-tracking target of node `index`.
    pub fn change_target(&mut self, index: usize, position: &Vector3<f64>) -> Result<(), OcpError> {
        check_finite("target", position.iter())?;
        if let CostKind::GoalTracking { target } = &mut self.entry_mut(index, GOAL_TRACKING)?.kind {
            *target = *position;
        }
        Ok(())
    }

    /// Set the goal-tracking weight of every node.
    pub fn change_goal_tracking_weights(&mut self, weight: f64) -> Result<(), OcpError> {
        if !(weight >= 0.0 && weight.is_finite()) {
            return Err(OcpError::NonFinite("goal weight"));
        }
        for index in 0..=self.settings.horizon_length {
            self.entry_mut(index, GOAL_TRACKING)?.weight = weight;
        }
        self.goal_weight = weight;
        Ok(())
    }

    /// Replace the posture reference `[q, v]` of node `index`.
    pub fn change_posture_reference(
        &mut self,
        index: usize,
        reference: &DVector<f64>,
    ) -> Result<(), OcpError> {
        check_len("posture reference", self.designer.nx(), reference.len())?;
        check_finite("posture reference", reference.iter())?;
        if let CostKind::Posture { reference: r, .. } = &mut self.entry_mut(index, POSTURE)?.kind {
            r.copy_from(reference);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn designer(&self) -> &Arc<RobotDesigner> {
        &self.designer
    }

    pub fn settings(&self) -> &OcpSettings {
        &self.settings
    }

    pub fn horizon(&self) -> usize {
        self.settings.horizon_length
    }

    pub fn is_initialized(&self) -> bool {
        self.problem.is_some()
    }

    /// Current anchor state.
    pub fn state(&self) -> Option<&DVector<f64>> {
        self.problem.as_ref().map(ShootingProblem::x0)
    }

    pub fn goal_weight(&self) -> f64 {
        self.goal_weight
    }

    pub fn is_goal_active(&self, index: usize) -> Result<bool, OcpError> {
        Ok(self.entry(index, GOAL_TRACKING)?.active)
    }

    pub fn target(&self, index: usize) -> Result<Vector3<f64>, OcpError> {
        match &self.entry(index, GOAL_TRACKING)?.kind {
            CostKind::GoalTracking { target } => Ok(*target),
            _ => Err(OcpError::MissingCost {
                index,
                name: GOAL_TRACKING,
            }),
        }
    }

    pub fn posture_reference(&self, index: usize) -> Result<&DVector<f64>, OcpError> {
        match &self.entry(index, POSTURE)?.kind {
            CostKind::Posture { reference, .. } => Ok(reference),
            _ => Err(OcpError::MissingCost {
                index,
                name: POSTURE,
            }),
        }
    }

    /// Cost of node `index` at `(x, u)` as the solver sees it. `u` is
    /// ignored at the terminal node.
    pub fn cost_at(&self, index: usize, x: &DVector<f64>, u: &DVector<f64>) -> Result<f64, OcpError> {
        self.check_state(x)?;
        let problem = self.problem.as_ref().ok_or(OcpError::NotInitialized)?;
        if index == problem.horizon() {
            return Ok(problem.terminal().calc_terminal(x)?);
        }
        check_len("control", self.designer.nu(), u.len())?;
        let node = problem.running().get(index).ok_or(OcpError::NodeOutOfRange {
            index,
            horizon: problem.horizon(),
        })?;
        Ok(node.calc(x, u)?.1)
    }

    pub fn last_report(&self) -> Option<&SolveReport> {
        self.last_report.as_ref()
    }

    pub fn problem(&self) -> Option<&ShootingProblem<ArmNode>> {
        self.problem.as_ref()
    }

    // -----------------------------------------------------------------------
    // Debug capture
    // -----------------------------------------------------------------------

    /// Append a solved `trajectory` (anchored at `xs[0]`) to the debug log.
    pub fn log_data(&mut self, trajectory: &Trajectory) -> Result<(), DebugError> {
        let Some(anchor) = trajectory.xs.first() else {
            return Err(DebugError::Schema {
                index: self.debug.len(),
                message: "empty trajectory".into(),
            });
        };
        self.debug
            .push(OcpDebugRecord::from_trajectory(anchor, trajectory))
    }

    pub fn debug_records(&self) -> &[OcpDebugRecord] {
        self.debug.records()
    }

    pub fn dump_to_file(&self, path: impl AsRef<Path>) -> Result<(), DebugError> {
        self.debug.dump_to_file(path)
    }

    pub fn fetch_from_file(path: impl AsRef<Path>) -> Result<Vec<OcpDebugRecord>, DebugError> {
        DebugLog::fetch_from_file(path)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn check_state(&self, x: &DVector<f64>) -> Result<(), OcpError> {
        check_len("state", self.designer.nx(), x.len())?;
        check_finite("state", x.iter())
    }

    /// A node with every entry allocated; values are set by `reset_costs`.
    fn node(&self, terminal: bool) -> ArmNode {
        let d = &self.designer;
        let (nx, nu) = (d.nx(), d.nu());
        let s = &self.settings;

        let (q_lower, q_upper) = d.position_limits();
        let v_limit = d.velocity_limits() * s.velocity_limit_scale;
        let lower =
            DVector::from_iterator(nx, q_lower.iter().copied().chain(v_limit.iter().map(|v| -v)));
        let upper = DVector::from_iterator(nx, q_upper.iter().chain(v_limit.iter()).copied());

        let mut costs = CostModelSum::new();
        costs.add(
            GOAL_TRACKING,
            CostKind::GoalTracking {
                target: Vector3::zeros(),
            },
            s.goal_weight,
            true,
        );
        costs.add(
            POSTURE,
            CostKind::Posture {
                reference: DVector::zeros(nx),
                weights: self.posture_weights.clone(),
            },
            s.posture_weight,
            true,
        );
        if !terminal {
            costs.add(
                CONTROL_REG,
                CostKind::ControlRegularization {
                    reference: DVector::zeros(nu),
                },
                s.control_weight,
                true,
            );
        }
        costs.add(
            STATE_LIMITS,
            CostKind::StateLimits { lower, upper },
            s.state_limits_weight,
            true,
        );
        if !terminal {
            let effort = d.effort_limits();
            costs.add(
                CONTROL_LIMITS,
                CostKind::ControlLimits {
                    lower: -effort.clone(),
                    upper: effort,
                },
                s.control_limits_weight,
                true,
            );
        }
        ArmNode::new(Arc::clone(d), s.time_step, costs)
    }

    fn entry(&self, index: usize, name: &'static str) -> Result<&CostEntry, OcpError> {
        let problem = self.problem.as_ref().ok_or(OcpError::NotInitialized)?;
        let horizon = problem.horizon();
        let node = match index {
            i if i < horizon => &problem.running()[i],
            i if i == horizon => problem.terminal(),
            _ => return Err(OcpError::NodeOutOfRange { index, horizon }),
        };
        node.costs()
            .get(name)
            .ok_or(OcpError::MissingCost { index, name })
    }

    fn entry_mut(&mut self, index: usize, name: &'static str) -> Result<&mut CostEntry, OcpError> {
        let problem = self.problem.as_mut().ok_or(OcpError::NotInitialized)?;
        let horizon = problem.horizon();
        let node = match index {
            i if i < horizon => &mut problem.running_mut()[i],
            i if i == horizon => problem.terminal_mut(),
            _ => return Err(OcpError::NodeOutOfRange { index, horizon }),
        };
        node.costs_mut()
            .get_mut(name)
            .ok_or(OcpError::MissingCost { index, name })
    }
}

/// Reset node `index`'s entries to their configured values in place.
fn reset_costs(
    costs: &mut CostModelSum,
    settings: &OcpSettings,
    index: usize,
    x0: &DVector<f64>,
    target: &Vector3<f64>,
    control_reference: &DVector<f64>,
) {
    if let Some(entry) = costs.get_mut(GOAL_TRACKING) {
        entry.weight = settings.goal_weight;
        entry.active = index >= settings.goal_activation_start;
        if let CostKind::GoalTracking { target: t } = &mut entry.kind {
            *t = *target;
        }
    }
    if let Some(CostEntry {
        kind: CostKind::Posture { reference, .. },
        ..
    }) = costs.get_mut(POSTURE)
    {
        reference.copy_from(x0);
    }
    if let Some(CostEntry {
        kind: CostKind::ControlRegularization { reference },
        ..
    }) = costs.get_mut(CONTROL_REG)
    {
        reference.copy_from(control_reference);
    }
}

fn check_len(what: &'static str, expected: usize, got: usize) -> Result<(), OcpError> {
    if expected == got {
        Ok(())
    } else {
        Err(OcpError::Dimension {
            what,
            expected,
            got,
        })
    }
}

fn check_finite<'a>(
    what: &'static str,
    mut values: impl Iterator<Item = &'a f64>,
) -> Result<(), OcpError> {
    if values.all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(OcpError::NonFinite(what))
    }
}
