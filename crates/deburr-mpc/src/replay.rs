//! Golden-trajectory replay: re-run the solver on archived anchors and diff
//! its output against the archive.

use std::fmt;

use deburr_ddp::Trajectory;
use nalgebra::{DMatrix, DVector, Isometry3};

use crate::debug::{DebugRecord, OcpDebugRecord};
use crate::error::MpcError;
use crate::mpc::{Command, MpcPoint};
use crate::ocp::OcpPoint;

/// L2-norm tolerances of a replay comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayTolerances {
    pub state: f64,
    pub control: f64,
    pub gain: f64,
}

impl Default for ReplayTolerances {
    fn default() -> Self {
        Self {
            state: 1e-10,
            control: 1e-10,
            gain: 1e-8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchKind {
    State,
    Control,
    Gain,
    /// Horizon or vector size differs; `error` is the size difference.
    Shape,
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::State => "state",
            Self::Control => "control",
            Self::Gain => "gain",
            Self::Shape => "shape",
        })
    }
}

/// One value outside tolerance.
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub kind: MismatchKind,
    /// Record index (command replay) or node index (trajectory replay).
    pub index: usize,
    pub error: f64,
}

/// Outcome of a replay.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    /// Records or nodes compared.
    pub compared: usize,
    pub mismatches: Vec<Mismatch>,
    /// Largest error seen per kind: state, control, gain.
    pub max_errors: [f64; 3],
}

impl ReplayReport {
    pub fn is_match(&self) -> bool {
        self.mismatches.is_empty()
    }

    fn check(&mut self, kind: MismatchKind, index: usize, error: f64, tolerance: f64) {
        let slot = match kind {
            MismatchKind::State => Some(0),
            MismatchKind::Control => Some(1),
            MismatchKind::Gain => Some(2),
            MismatchKind::Shape => None,
        };
        if let Some(slot) = slot {
            self.max_errors[slot] = self.max_errors[slot].max(error);
        }
        // NaN errors must fail too.
        if !(error <= tolerance) {
            self.mismatches.push(Mismatch { kind, index, error });
        }
    }
}

fn vector_error(a: &DVector<f64>, b: &DVector<f64>) -> Option<f64> {
    (a.len() == b.len()).then(|| (a - b).norm())
}

fn matrix_error(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Option<f64> {
    (a.shape() == b.shape()).then(|| (a - b).norm())
}

#[allow(clippy::cast_precision_loss)]
fn shape(report: &mut ReplayReport, index: usize, a: usize, b: usize) {
    report.check(MismatchKind::Shape, index, a.abs_diff(b) as f64, 0.0);
}

/// Compare a solved trajectory against an archived one, node by node.
pub fn compare_trajectory(
    trajectory: &Trajectory,
    record: &OcpDebugRecord,
    tolerances: &ReplayTolerances,
) -> ReplayReport {
    let mut report = ReplayReport::default();
    if trajectory.horizon() != record.us.len() || trajectory.xs.len() != record.xs.len() {
        shape(&mut report, 0, trajectory.horizon(), record.us.len());
        return report;
    }
    for (i, (a, b)) in trajectory.xs.iter().zip(&record.xs).enumerate() {
        match vector_error(a, b) {
            Some(e) => report.check(MismatchKind::State, i, e, tolerances.state),
            None => shape(&mut report, i, a.len(), b.len()),
        }
    }
    for (i, (a, b)) in trajectory.us.iter().zip(&record.us).enumerate() {
        match vector_error(a, b) {
            Some(e) => report.check(MismatchKind::Control, i, e, tolerances.control),
            None => shape(&mut report, i, a.len(), b.len()),
        }
    }
    for (i, (a, b)) in trajectory.gains.iter().zip(&record.gains).enumerate() {
        match matrix_error(a, b) {
            Some(e) => report.check(MismatchKind::Gain, i, e, tolerances.gain),
            None => shape(&mut report, i, a.len(), b.len()),
        }
    }
    report.compared = trajectory.xs.len();
    report
}

/// Replay OCP trajectory records: a fresh `ocp` is initialized at each
/// record's anchor, solved cold, and compared.
pub fn replay_trajectories(
    ocp: &mut OcpPoint,
    records: &[OcpDebugRecord],
    target: &Isometry3<f64>,
    tolerances: &ReplayTolerances,
) -> Result<Vec<ReplayReport>, MpcError> {
    let mut reports = Vec::with_capacity(records.len());
    let mut trajectory = Trajectory {
        xs: Vec::new(),
        us: Vec::new(),
        gains: Vec::new(),
    };
    for record in records {
        ocp.initialize(&record.anchor_state, target)?;
        ocp.solve_first(&record.anchor_state, &mut trajectory)?;
        reports.push(compare_trajectory(&trajectory, record, tolerances));
    }
    Ok(reports)
}

/// Replay a captured MPC session on an uninitialized `mpc` built with the
/// same settings.
///
/// Record 0 is the `initialize` command; every later record is one
/// `iterate` at its anchor state.
pub fn replay_commands(
    mpc: &mut MpcPoint,
    records: &[DebugRecord],
    target: &Isometry3<f64>,
    tolerances: &ReplayTolerances,
) -> Result<ReplayReport, MpcError> {
    let mut report = ReplayReport::default();
    let Some((first, rest)) = records.split_first() else {
        return Ok(report);
    };

    let nq = mpc.designer().nq();
    let x0 = &first.anchor_state;
    if x0.len() != mpc.designer().nx() {
        shape(&mut report, 0, x0.len(), mpc.designer().nx());
        return Ok(report);
    }
    mpc.initialize(
        &x0.rows(0, nq).clone_owned(),
        &x0.rows(nq, x0.len() - nq).clone_owned(),
        target,
    )?;
    compare_command(&mut report, 0, &mpc.command()?, first, tolerances);

    for (offset, record) in rest.iter().enumerate() {
        let command = mpc.iterate(&record.anchor_state, target)?;
        compare_command(&mut report, offset + 1, &command, record, tolerances);
    }
    report.compared = records.len();
    if !report.is_match() {
        tracing::warn!(
            mismatches = report.mismatches.len(),
            records = records.len(),
            "replay diverged from archive"
        );
    }
    Ok(report)
}

fn compare_command(
    report: &mut ReplayReport,
    index: usize,
    command: &Command,
    record: &DebugRecord,
    tolerances: &ReplayTolerances,
) {
    let (u0, k0) = (&command.feedforward, &command.feedback_gain);
    match vector_error(u0, &record.feedforward) {
        Some(e) => report.check(MismatchKind::Control, index, e, tolerances.control),
        None => shape(report, index, u0.len(), record.feedforward.len()),
    }
    match matrix_error(k0, &record.feedback_gain) {
        Some(e) => report.check(MismatchKind::Gain, index, e, tolerances.gain),
        None => shape(report, index, k0.len(), record.feedback_gain.len()),
    }
}
