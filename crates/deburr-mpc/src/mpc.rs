//! MPC orchestrator: the receding-horizon loop around one [`OcpPoint`].
//!
//! ```text
//!            initialize(q, v, target)                iterate(x, target)
//! Uninitialized ───────────────────────► Running ◄──────────────────┐
//!                OCP initialize + solve_first     │ shift, solve, u0/K0 │
//!                                                 └─────────────────────┘
//! ```
//!
//! The warm-start trajectory is owned here and lent to the OCP for each
//! solve. It is shifted one node per tick, except when `iterate` sees the
//! previous anchor again: no time has passed then, and the plan is re-solved
//! in place. Commands follow the feedback law `u = u0 + K0 (x - x_anchor)`.

use std::path::Path;
use std::sync::Arc;

use deburr_ddp::{SolveReport, Trajectory};
use deburr_model::RobotDesigner;
use nalgebra::{DMatrix, DVector, Isometry3};

use crate::debug::{DebugLog, DebugRecord};
use crate::error::{DebugError, MpcError, OcpError};
use crate::ocp::OcpPoint;
use crate::settings::{ControllerSettings, MpcSettings, OcpSettings};

/// First step of the current plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// State the plan was anchored at.
    pub anchor_state: DVector<f64>,
    /// `u0`, joint torques.
    pub feedforward: DVector<f64>,
    /// `K0`, `nu x nx`.
    pub feedback_gain: DMatrix<f64>,
}

impl Command {
    /// Torque to apply at measured state `x`.
    pub fn torque_at(&self, x: &DVector<f64>) -> DVector<f64> {
        &self.feedforward + &self.feedback_gain * (x - &self.anchor_state)
    }
}

#[derive(Debug)]
pub struct MpcPoint {
    designer: Arc<RobotDesigner>,
    settings: MpcSettings,
    max_goal_weight: f64,
    ocp: OcpPoint,
    trajectory: Trajectory,
    running: bool,
    /// Target as handed in by the caller.
    target_frame: Isometry3<f64>,
    /// Target resolved to the world frame.
    world_target: Isometry3<f64>,
    end_effector_frame: Isometry3<f64>,
    anchor: DVector<f64>,
    tick: u64,
    last_report: Option<SolveReport>,
    debug_capture: bool,
    debug: DebugLog<DebugRecord>,
}

impl MpcPoint {
    pub fn new(
        designer: Arc<RobotDesigner>,
        ocp_settings: OcpSettings,
        settings: MpcSettings,
    ) -> Result<Self, MpcError> {
        settings.validate()?;
        let max_goal_weight = settings.max_goal_weight.unwrap_or(ocp_settings.goal_weight);
        let ocp = OcpPoint::new(Arc::clone(&designer), ocp_settings)?;
        let anchor = designer.neutral_state();
        Ok(Self {
            designer,
            settings,
            max_goal_weight,
            ocp,
            trajectory: Trajectory {
                xs: Vec::new(),
                us: Vec::new(),
                gains: Vec::new(),
            },
            running: false,
            target_frame: Isometry3::identity(),
            world_target: Isometry3::identity(),
            end_effector_frame: Isometry3::identity(),
            anchor,
            tick: 0,
            last_report: None,
            debug_capture: false,
            debug: DebugLog::new(),
        })
    }

    /// Build the robot designer and the controller from loaded settings.
    pub fn from_settings(settings: &ControllerSettings) -> Result<Self, MpcError> {
        settings.validate()?;
        let designer = Arc::new(RobotDesigner::new(settings.robot.clone())?);
        Self::new(designer, settings.ocp.clone(), settings.mpc.clone())
    }

    /// Build the OCP around `(q, v)` and `target`, then solve it cold.
    ///
    /// With debug capture on, the initial command is logged as the first
    /// record. A failure past argument validation leaves the controller
    /// uninitialized.
    pub fn initialize(
        &mut self,
        q: &DVector<f64>,
        v: &DVector<f64>,
        target: &Isometry3<f64>,
    ) -> Result<SolveReport, MpcError> {
        let (nq, nv) = (self.designer.nq(), self.designer.nv());
        if q.len() != nq {
            return Err(dimension("q", nq, q.len()));
        }
        if v.len() != nv {
            return Err(dimension("v", nv, v.len()));
        }
        let mut x = DVector::zeros(nq + nv);
        x.rows_mut(0, nq).copy_from(q);
        x.rows_mut(nq, nv).copy_from(v);

        let world_target = self.resolve_target(&x, target)?;
        self.running = false;
        self.ocp.initialize(&x, &world_target)?;
        let report = self.ocp.solve_first(&x, &mut self.trajectory)?;

        self.running = true;
        self.tick = 0;
        self.target_frame = *target;
        self.world_target = world_target;
        self.max_goal_weight = self.max_goal_weight.max(self.ocp.goal_weight());
        self.record_anchor(x)?;
        self.last_report = Some(report.clone());

        tracing::info!(
            converged = report.converged,
            iterations = report.iterations,
            cost = report.cost,
            "mpc initialized"
        );
        Ok(report)
    }

    /// One receding-horizon step at measured state `x`.
    ///
    /// The state is validated before the warm start is touched; a rejected
    /// call leaves the controller exactly as it was.
    ///
    /// The warm start is shifted one node unless `x` equals the previous
    /// anchor exactly.
    pub fn iterate(
        &mut self,
        x: &DVector<f64>,
        target: &Isometry3<f64>,
    ) -> Result<Command, MpcError> {
        if !self.running {
            return Err(MpcError::NotInitialized);
        }
        let nx = self.designer.nx();
        if x.len() != nx {
            return Err(dimension("state", nx, x.len()));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(OcpError::NonFinite("state").into());
        }

        let world_target = self.resolve_target(x, target)?;
        if world_target.translation != self.world_target.translation {
            for index in 0..=self.ocp.horizon() {
                self.ocp
                    .change_target(index, &world_target.translation.vector)?;
            }
        }
        self.target_frame = *target;
        self.world_target = world_target;

        if self.settings.use_gain_scheduling {
            let dt = self.ocp.settings().time_step;
            let weight = (self.ocp.goal_weight() + self.settings.gain_scheduling_slope * dt)
                .min(self.max_goal_weight);
            self.ocp.change_goal_tracking_weights(weight)?;
        }

        if x != &self.anchor {
            self.trajectory.shift();
        }
        let report = self.ocp.solve(x, &mut self.trajectory)?;
        self.tick += 1;
        self.last_report = Some(report);
        self.record_anchor(x.clone())?;

        tracing::debug!(
            tick = self.tick,
            iterations = self.last_report.as_ref().map_or(0, |r| r.iterations),
            "mpc iterate"
        );
        self.command()
    }

    /// Current command (`u0`, `K0` and the anchor they belong to).
    pub fn command(&self) -> Result<Command, MpcError> {
        match (self.u0(), self.k0()) {
            (Some(u0), Some(k0)) => Ok(Command {
                anchor_state: self.anchor.clone(),
                feedforward: u0.clone(),
                feedback_gain: k0.clone(),
            }),
            _ => Err(MpcError::NotInitialized),
        }
    }

    fn record_anchor(&mut self, x: DVector<f64>) -> Result<(), MpcError> {
        self.end_effector_frame = self
            .designer
            .end_effector_pose(&x.as_slice()[..self.designer.nq()]);
        self.anchor = x;
        if self.debug_capture {
            let command = self.command()?;
            let record = DebugRecord::new(
                command.anchor_state,
                command.feedforward,
                command.feedback_gain,
            )?;
            self.debug.push(record)?;
        }
        Ok(())
    }

    /// World-frame target for measured state `x`.
    fn resolve_target(
        &self,
        x: &DVector<f64>,
        target: &Isometry3<f64>,
    ) -> Result<Isometry3<f64>, MpcError> {
        let t = target.translation.vector;
        let r = target.rotation.coords;
        if t.iter().chain(r.iter()).any(|v| !v.is_finite()) {
            return Err(OcpError::NonFinite("target").into());
        }
        if self.settings.use_mocap {
            let tool = self
                .designer
                .end_effector_pose(&x.as_slice()[..self.designer.nq()]);
            Ok(tool * target)
        } else {
            Ok(*target)
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn is_initialized(&self) -> bool {
        self.running
    }

    /// Feed-forward torque of the current plan; `None` until
    /// [`initialize`](Self::initialize) has succeeded.
    pub fn u0(&self) -> Option<&DVector<f64>> {
        self.trajectory.torque().filter(|_| self.running)
    }

    /// Feedback gain of the current plan; `None` until
    /// [`initialize`](Self::initialize) has succeeded.
    pub fn k0(&self) -> Option<&DMatrix<f64>> {
        self.trajectory.gain().filter(|_| self.running)
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    /// Target as last handed in (tool frame when using motion capture).
    pub fn target_frame(&self) -> &Isometry3<f64> {
        &self.target_frame
    }

    /// Target resolved to the world frame.
    pub fn world_target(&self) -> &Isometry3<f64> {
        &self.world_target
    }

    /// Tool pose at the last anchor state.
    pub fn end_effector_frame(&self) -> &Isometry3<f64> {
        &self.end_effector_frame
    }

    pub fn anchor_state(&self) -> &DVector<f64> {
        &self.anchor
    }

    /// Number of `iterate` calls since `initialize`.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn last_report(&self) -> Option<&SolveReport> {
        self.last_report.as_ref()
    }

    pub fn ocp(&self) -> &OcpPoint {
        &self.ocp
    }

    pub fn ocp_mut(&mut self) -> &mut OcpPoint {
        &mut self.ocp
    }

    pub fn designer(&self) -> &Arc<RobotDesigner> {
        &self.designer
    }

    pub fn settings(&self) -> &MpcSettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Debug capture
    // -----------------------------------------------------------------------

    /// Log every command from now on.
    pub fn set_debug_capture(&mut self, enabled: bool) {
        self.debug_capture = enabled;
    }

    pub fn debug_capture(&self) -> bool {
        self.debug_capture
    }

    /// Append one record by hand.
    pub fn log_data(
        &mut self,
        x_input: &DVector<f64>,
        u0: &DVector<f64>,
        k0: &DMatrix<f64>,
    ) -> Result<(), DebugError> {
        self.debug
            .push(DebugRecord::new(x_input.clone(), u0.clone(), k0.clone())?)
    }

    pub fn debug_records(&self) -> &[DebugRecord] {
        self.debug.records()
    }

    pub fn clear_debug_records(&mut self) {
        self.debug.clear();
    }

    pub fn dump_to_file(&self, path: impl AsRef<Path>) -> Result<(), DebugError> {
        self.debug.dump_to_file(path)
    }

    pub fn fetch_from_file(path: impl AsRef<Path>) -> Result<Vec<DebugRecord>, DebugError> {
        DebugLog::fetch_from_file(path)
    }
}

fn dimension(what: &'static str, expected: usize, got: usize) -> MpcError {
    OcpError::Dimension {
        what,
        expected,
        got,
    }
    .into()
}
