//! Control-loop boundary: robot and target-source seams, a simulated plant,
//! and the fixed-period synchronous loop that drives [`MpcPoint`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use deburr_model::RobotDesigner;
use nalgebra::{DVector, Isometry3};

use crate::error::MpcError;
use crate::mpc::{Command, MpcPoint};
use crate::node::step;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Hardware (or simulated) side of the loop.
pub trait RobotInterface {
    /// Measured state `[q; v]`.
    fn read_state(&mut self) -> Result<DVector<f64>, MpcError>;

    /// Apply a command until the next call.
    fn send_command(&mut self, command: &Command) -> Result<(), MpcError>;
}

/// Where the reaching target comes from each tick.
pub trait TargetSource {
    fn target(&mut self) -> Isometry3<f64>;
}

// ---------------------------------------------------------------------------
// Target sources
// ---------------------------------------------------------------------------

/// A constant target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedTarget(pub Isometry3<f64>);

impl TargetSource for FixedTarget {
    fn target(&mut self) -> Isometry3<f64> {
        self.0
    }
}

/// Replays a recorded sequence of motion-capture frames, holding the last
/// frame once the script runs out. An empty script yields the identity.
#[derive(Debug, Clone, Default)]
pub struct ScriptedMocap {
    frames: Vec<Isometry3<f64>>,
    cursor: usize,
}

impl ScriptedMocap {
    pub fn new(frames: Vec<Isometry3<f64>>) -> Self {
        Self { frames, cursor: 0 }
    }

    /// Frames handed out so far.
    pub fn consumed(&self) -> usize {
        self.cursor
    }
}

impl TargetSource for ScriptedMocap {
    fn target(&mut self) -> Isometry3<f64> {
        let Some(last) = self.frames.len().checked_sub(1) else {
            return Isometry3::identity();
        };
        let frame = self.frames[self.cursor.min(last)];
        self.cursor += 1;
        frame
    }
}

// ---------------------------------------------------------------------------
// SimulatedRobot
// ---------------------------------------------------------------------------

/// Plant that integrates the designer's dynamics under the linear feedback
/// law `u = u0 + K0 (x - x_anchor)`.
///
/// Each [`send_command`](RobotInterface::send_command) advances the plant by
/// one control period split into `substeps` integrator steps; the feedback
/// law is re-evaluated at every substep.
#[derive(Debug, Clone)]
pub struct SimulatedRobot {
    designer: Arc<RobotDesigner>,
    state: DVector<f64>,
    period: f64,
    substeps: usize,
    clamp_effort: bool,
    last_command: Option<Command>,
    steps: u64,
}

impl SimulatedRobot {
    /// Plant starting at `x0`, stepped by `period` seconds per command.
    pub fn new(designer: Arc<RobotDesigner>, x0: DVector<f64>, period: f64) -> Result<Self, MpcError> {
        if x0.len() != designer.nx() {
            return Err(MpcError::Interface(format!(
                "initial state has length {}, expected {}",
                x0.len(),
                designer.nx()
            )));
        }
        if !(period.is_finite() && period > 0.0) {
            return Err(MpcError::Interface(format!(
                "simulation period must be positive, got {period}"
            )));
        }
        Ok(Self {
            designer,
            state: x0,
            period,
            substeps: 1,
            clamp_effort: true,
            last_command: None,
            steps: 0,
        })
    }

    #[must_use]
    pub fn with_substeps(mut self, substeps: usize) -> Self {
        self.substeps = substeps.max(1);
        self
    }

    /// Saturate torques at the URDF effort limits (on by default).
    #[must_use]
    pub fn with_effort_clamp(mut self, clamp: bool) -> Self {
        self.clamp_effort = clamp;
        self
    }

    pub fn state(&self) -> &DVector<f64> {
        &self.state
    }

    pub fn last_command(&self) -> Option<&Command> {
        self.last_command.as_ref()
    }

    /// Commands applied so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn torque(&self, command: &Command) -> DVector<f64> {
        let mut u = command.torque_at(&self.state);
        if self.clamp_effort {
            let limits = self.designer.effort_limits();
            for (u, limit) in u.iter_mut().zip(limits.iter()) {
                *u = u.clamp(-limit, *limit);
            }
        }
        u
    }
}

impl RobotInterface for SimulatedRobot {
    fn read_state(&mut self) -> Result<DVector<f64>, MpcError> {
        Ok(self.state.clone())
    }

    fn send_command(&mut self, command: &Command) -> Result<(), MpcError> {
        if command.feedforward.len() != self.designer.nu()
            || command.anchor_state.len() != self.state.len()
        {
            return Err(MpcError::Interface("command does not match the plant".into()));
        }
        #[allow(clippy::cast_precision_loss)]
        let dt = self.period / self.substeps as f64;
        for _ in 0..self.substeps {
            let u = self.torque(command);
            self.state = step(&self.designer, dt, &self.state, &u)?;
        }
        if self.state.iter().any(|v| !v.is_finite()) {
            return Err(MpcError::Interface("simulated state diverged".into()));
        }
        self.last_command = Some(command.clone());
        self.steps += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ControlLoop
// ---------------------------------------------------------------------------

/// Counters collected by [`ControlLoop::run`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopStats {
    pub ticks: u64,
    /// Ticks whose read-solve-send took longer than the period.
    pub overruns: u64,
    /// Ticks whose solve ran out of iterations.
    pub not_converged: u64,
    pub worst_tick: Duration,
    /// Cost of the last solve.
    pub last_cost: f64,
}

/// Fixed-period synchronous loop: read state, iterate, send command.
pub struct ControlLoop<R, T> {
    mpc: MpcPoint,
    robot: R,
    targets: T,
    period: Duration,
    realtime: bool,
}

impl<R: RobotInterface, T: TargetSource> ControlLoop<R, T> {
    /// `realtime` makes the loop sleep out the remainder of each period;
    /// otherwise ticks run back to back.
    pub fn new(mpc: MpcPoint, robot: R, targets: T, period: Duration, realtime: bool) -> Self {
        Self {
            mpc,
            robot,
            targets,
            period,
            realtime,
        }
    }

    /// Initialize the controller at the measured state and send the first
    /// command.
    pub fn initialize(&mut self) -> Result<(), MpcError> {
        let x = self.robot.read_state()?;
        let nq = self.mpc.designer().nq();
        let nx = self.mpc.designer().nx();
        if x.len() != nx {
            return Err(MpcError::Interface(format!(
                "robot reported {} state values, expected {nx}",
                x.len()
            )));
        }
        let target = self.targets.target();
        self.mpc.initialize(
            &x.rows(0, nq).clone_owned(),
            &x.rows(nq, nx - nq).clone_owned(),
            &target,
        )?;
        self.robot.send_command(&self.mpc.command()?)
    }

    /// Run `ticks` control periods, initializing first if needed.
    ///
    /// Stops at the first error; no command is sent after a failed
    /// `iterate`.
    pub fn run(&mut self, ticks: u64) -> Result<LoopStats, MpcError> {
        if !self.mpc.is_initialized() {
            self.initialize()?;
        }
        let mut stats = LoopStats::default();
        for _ in 0..ticks {
            let start = Instant::now();
            let x = self.robot.read_state()?;
            let target = self.targets.target();
            let command = self.mpc.iterate(&x, &target)?;
            self.robot.send_command(&command)?;

            let elapsed = start.elapsed();
            stats.ticks += 1;
            stats.worst_tick = stats.worst_tick.max(elapsed);
            if let Some(report) = self.mpc.last_report() {
                stats.last_cost = report.cost;
                if !report.converged {
                    stats.not_converged += 1;
                }
            }
            if elapsed > self.period {
                stats.overruns += 1;
                tracing::warn!(
                    tick = self.mpc.tick(),
                    elapsed_us = elapsed.as_micros(),
                    period_us = self.period.as_micros(),
                    "control tick overran its period"
                );
            } else if self.realtime {
                std::thread::sleep(self.period - elapsed);
            }
        }
        tracing::info!(
            ticks = stats.ticks,
            overruns = stats.overruns,
            not_converged = stats.not_converged,
            "control loop finished"
        );
        Ok(stats)
    }

    pub fn mpc(&self) -> &MpcPoint {
        &self.mpc
    }

    pub fn mpc_mut(&mut self) -> &mut MpcPoint {
        &mut self.mpc
    }

    pub fn robot(&self) -> &R {
        &self.robot
    }

    pub fn into_parts(self) -> (MpcPoint, R, T) {
        (self.mpc, self.robot, self.targets)
    }
}
