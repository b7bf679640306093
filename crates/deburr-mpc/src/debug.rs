//! Debug capture: in-memory record logs and their on-disk archives.
//!
//! An archive is one JSON document:
//!
//! ```text
//! { "format": "deburr-debug-archive", "version": 1, "kind": "mpc_commands",
//!   "records": [ { "anchor_state": [..], "feedforward": [..],
//!                  "feedback_gain": { "rows": nu, "cols": nx, "data": [..] } }, .. ] }
//! ```
//!
//! Matrices are stored column-major. Floats are written with the shortest
//! representation that parses back to the same bits.

use std::fmt;
use std::path::Path;

use deburr_ddp::Trajectory;
use nalgebra::{DMatrix, DVector};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::DebugError;

pub const ARCHIVE_FORMAT: &str = "deburr-debug-archive";
pub const ARCHIVE_VERSION: u32 = 1;

/// What an archive's records hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveKind {
    /// One [`DebugRecord`] per MPC tick.
    MpcCommands,
    /// One [`OcpDebugRecord`] per OCP solve.
    OcpTrajectories,
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MpcCommands => "mpc_commands",
            Self::OcpTrajectories => "ocp_trajectories",
        })
    }
}

/// A record type that can live in an archive.
pub trait ArchiveRecord: Clone + Serialize + DeserializeOwned {
    const KIND: ArchiveKind;

    /// Reject NaN and infinities before they are logged.
    fn check_finite(&self) -> Result<(), DebugError>;
}

// ---------------------------------------------------------------------------
// MatrixData
// ---------------------------------------------------------------------------

/// Column-major matrix as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatrixData {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl MatrixData {
    pub fn from_matrix(matrix: &DMatrix<f64>) -> Self {
        Self {
            rows: matrix.nrows(),
            cols: matrix.ncols(),
            data: matrix.as_slice().to_vec(),
        }
    }

    pub fn to_matrix(&self) -> Result<DMatrix<f64>, String> {
        if self.rows * self.cols != self.data.len() {
            return Err(format!(
                "{}x{} matrix with {} values",
                self.rows,
                self.cols,
                self.data.len()
            ));
        }
        Ok(DMatrix::from_column_slice(self.rows, self.cols, &self.data))
    }
}

fn all_finite<'a>(values: impl IntoIterator<Item = &'a f64>) -> bool {
    values.into_iter().all(|v| v.is_finite())
}

// ---------------------------------------------------------------------------
// DebugRecord
// ---------------------------------------------------------------------------

/// Anchor state and the command emitted for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DebugRecordWire", into = "DebugRecordWire")]
pub struct DebugRecord {
    pub anchor_state: DVector<f64>,
    pub feedforward: DVector<f64>,
    pub feedback_gain: DMatrix<f64>,
}

impl DebugRecord {
    pub fn new(
        anchor_state: DVector<f64>,
        feedforward: DVector<f64>,
        feedback_gain: DMatrix<f64>,
    ) -> Result<Self, DebugError> {
        let record = Self {
            anchor_state,
            feedforward,
            feedback_gain,
        };
        record.check_finite()?;
        Ok(record)
    }
}

impl ArchiveRecord for DebugRecord {
    const KIND: ArchiveKind = ArchiveKind::MpcCommands;

    fn check_finite(&self) -> Result<(), DebugError> {
        if !all_finite(self.anchor_state.iter()) {
            return Err(DebugError::NonFinite("anchor_state"));
        }
        if !all_finite(self.feedforward.iter()) {
            return Err(DebugError::NonFinite("feedforward"));
        }
        if !all_finite(self.feedback_gain.iter()) {
            return Err(DebugError::NonFinite("feedback_gain"));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct DebugRecordWire {
    anchor_state: Vec<f64>,
    feedforward: Vec<f64>,
    feedback_gain: MatrixData,
}

impl TryFrom<DebugRecordWire> for DebugRecord {
    type Error = String;

    fn try_from(wire: DebugRecordWire) -> Result<Self, Self::Error> {
        let gain = wire.feedback_gain.to_matrix()?;
        if gain.shape() != (wire.feedforward.len(), wire.anchor_state.len()) {
            return Err(format!(
                "feedback_gain is {}x{}, expected {}x{}",
                gain.nrows(),
                gain.ncols(),
                wire.feedforward.len(),
                wire.anchor_state.len()
            ));
        }
        Ok(Self {
            anchor_state: DVector::from_vec(wire.anchor_state),
            feedforward: DVector::from_vec(wire.feedforward),
            feedback_gain: gain,
        })
    }
}

impl From<DebugRecord> for DebugRecordWire {
    fn from(record: DebugRecord) -> Self {
        Self {
            anchor_state: record.anchor_state.as_slice().to_vec(),
            feedforward: record.feedforward.as_slice().to_vec(),
            feedback_gain: MatrixData::from_matrix(&record.feedback_gain),
        }
    }
}

// ---------------------------------------------------------------------------
// OcpDebugRecord
// ---------------------------------------------------------------------------

/// Anchor state and the full solution trajectory of one OCP solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "OcpDebugRecordWire", into = "OcpDebugRecordWire")]
pub struct OcpDebugRecord {
    pub anchor_state: DVector<f64>,
    pub xs: Vec<DVector<f64>>,
    pub us: Vec<DVector<f64>>,
    pub gains: Vec<DMatrix<f64>>,
}

impl OcpDebugRecord {
    pub fn from_trajectory(anchor_state: &DVector<f64>, trajectory: &Trajectory) -> Self {
        Self {
            anchor_state: anchor_state.clone(),
            xs: trajectory.xs.clone(),
            us: trajectory.us.clone(),
            gains: trajectory.gains.clone(),
        }
    }
}

impl ArchiveRecord for OcpDebugRecord {
    const KIND: ArchiveKind = ArchiveKind::OcpTrajectories;

    fn check_finite(&self) -> Result<(), DebugError> {
        if !all_finite(self.anchor_state.iter()) {
            return Err(DebugError::NonFinite("anchor_state"));
        }
        if !self.xs.iter().all(|x| all_finite(x.iter())) {
            return Err(DebugError::NonFinite("xs"));
        }
        if !self.us.iter().all(|u| all_finite(u.iter())) {
            return Err(DebugError::NonFinite("us"));
        }
        if !self.gains.iter().all(|k| all_finite(k.iter())) {
            return Err(DebugError::NonFinite("gains"));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct OcpDebugRecordWire {
    anchor_state: Vec<f64>,
    xs: Vec<Vec<f64>>,
    us: Vec<Vec<f64>>,
    gains: Vec<MatrixData>,
}

impl TryFrom<OcpDebugRecordWire> for OcpDebugRecord {
    type Error = String;

    fn try_from(wire: OcpDebugRecordWire) -> Result<Self, Self::Error> {
        let nx = wire.anchor_state.len();
        if wire.xs.len() != wire.us.len() + 1 || wire.gains.len() != wire.us.len() {
            return Err(format!(
                "inconsistent horizon: {} states, {} controls, {} gains",
                wire.xs.len(),
                wire.us.len(),
                wire.gains.len()
            ));
        }
        if let Some(x) = wire.xs.iter().find(|x| x.len() != nx) {
            return Err(format!("state of length {}, expected {nx}", x.len()));
        }
        let gains = wire
            .gains
            .iter()
            .zip(&wire.us)
            .map(|(k, u)| {
                let k = k.to_matrix()?;
                if k.shape() == (u.len(), nx) {
                    Ok(k)
                } else {
                    Err(format!(
                        "gain is {}x{}, expected {}x{nx}",
                        k.nrows(),
                        k.ncols(),
                        u.len()
                    ))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            anchor_state: DVector::from_vec(wire.anchor_state),
            xs: wire.xs.into_iter().map(DVector::from_vec).collect(),
            us: wire.us.into_iter().map(DVector::from_vec).collect(),
            gains,
        })
    }
}

impl From<OcpDebugRecord> for OcpDebugRecordWire {
    fn from(record: OcpDebugRecord) -> Self {
        Self {
            anchor_state: record.anchor_state.as_slice().to_vec(),
            xs: record.xs.iter().map(|x| x.as_slice().to_vec()).collect(),
            us: record.us.iter().map(|u| u.as_slice().to_vec()).collect(),
            gains: record.gains.iter().map(MatrixData::from_matrix).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Archive I/O
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct EnvelopeOut<'a, R> {
    format: &'a str,
    version: u32,
    kind: ArchiveKind,
    records: &'a [R],
}

#[derive(Deserialize)]
struct EnvelopeIn {
    format: String,
    version: u32,
    kind: String,
    records: Vec<serde_json::Value>,
}

/// Write `records` to `path` as one archive.
pub fn write_archive<R: ArchiveRecord>(path: &Path, records: &[R]) -> Result<(), DebugError> {
    let bytes = serde_json::to_vec_pretty(&EnvelopeOut {
        format: ARCHIVE_FORMAT,
        version: ARCHIVE_VERSION,
        kind: R::KIND,
        records,
    })?;
    std::fs::write(path, bytes).map_err(|source| DebugError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), kind = %R::KIND, records = records.len(), "archive written");
    Ok(())
}

/// Read an archive of `R` records from `path`.
pub fn read_archive<R: ArchiveRecord>(path: &Path) -> Result<Vec<R>, DebugError> {
    let bytes = std::fs::read(path).map_err(|source| DebugError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let envelope: EnvelopeIn = serde_json::from_slice(&bytes)?;
    if envelope.format != ARCHIVE_FORMAT {
        return Err(DebugError::Format(envelope.format));
    }
    if envelope.version != ARCHIVE_VERSION {
        return Err(DebugError::UnsupportedVersion {
            found: envelope.version,
            supported: ARCHIVE_VERSION,
        });
    }
    if envelope.kind != R::KIND.to_string() {
        return Err(DebugError::WrongKind {
            expected: R::KIND.to_string(),
            found: envelope.kind,
        });
    }
    envelope
        .records
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            R::deserialize(value).map_err(|e| DebugError::Schema {
                index,
                message: e.to_string(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// DebugLog
// ---------------------------------------------------------------------------

/// Append-only in-memory log of records, in call order.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugLog<R> {
    records: Vec<R>,
}

impl<R> Default for DebugLog<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<R: ArchiveRecord> DebugLog<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record; non-finite records are rejected.
    pub fn push(&mut self, record: R) -> Result<(), DebugError> {
        record.check_finite()?;
        self.records.push(record);
        Ok(())
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn dump_to_file(&self, path: impl AsRef<Path>) -> Result<(), DebugError> {
        write_archive(path.as_ref(), &self.records)
    }

    pub fn fetch_from_file(path: impl AsRef<Path>) -> Result<Vec<R>, DebugError> {
        read_archive(path.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn awkward_values() -> Vec<f64> {
        vec![
            0.1 + 0.2,
            1.0 / 3.0,
            -std::f64::consts::PI,
            f64::MIN_POSITIVE,
            5e-324,
            1.797_693_134_862_315_7e308,
            -0.0,
            123_456_789.123_456_78,
        ]
    }

    fn record(seed: f64) -> DebugRecord {
        let v = awkward_values();
        DebugRecord::new(
            DVector::from_iterator(8, v.iter().map(|x| x * seed)),
            DVector::from_column_slice(&[seed, -seed / 7.0]),
            DMatrix::from_fn(2, 8, |r, c| v[c] * seed / (r as f64 + 2.0)),
        )
        .unwrap()
    }

    #[test]
    fn command_archive_round_trip_is_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mpc.json");
        let mut log = DebugLog::new();
        for seed in [1.0, 0.5, 0.7] {
            log.push(record(seed)).unwrap();
        }
        log.dump_to_file(&path).unwrap();

        let back = DebugLog::<DebugRecord>::fetch_from_file(&path).unwrap();
        assert_eq!(back.len(), 3);
        for (a, b) in log.records().iter().zip(&back) {
            let bits = |m: &[f64]| m.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
            assert_eq!(bits(a.anchor_state.as_slice()), bits(b.anchor_state.as_slice()));
            assert_eq!(bits(a.feedforward.as_slice()), bits(b.feedforward.as_slice()));
            assert_eq!(bits(a.feedback_gain.as_slice()), bits(b.feedback_gain.as_slice()));
        }
    }

    #[test]
    fn trajectory_archive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ocp.json");
        let x0 = DVector::from_column_slice(&[0.1, 0.2]);
        let mut traj = Trajectory::cold(&x0, &DVector::from_element(1, 1.0 / 3.0), 3);
        traj.gains[1] = DMatrix::from_row_slice(1, 2, &[0.25, -1e-17]);

        let mut log = DebugLog::new();
        log.push(OcpDebugRecord::from_trajectory(&x0, &traj)).unwrap();
        log.dump_to_file(&path).unwrap();
        let back = DebugLog::<OcpDebugRecord>::fetch_from_file(&path).unwrap();
        assert_eq!(back, log.records());
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let err = DebugRecord::new(
            DVector::from_column_slice(&[f64::NAN]),
            DVector::zeros(1),
            DMatrix::zeros(1, 1),
        )
        .unwrap_err();
        assert!(matches!(err, DebugError::NonFinite("anchor_state")));

        let mut log = DebugLog::new();
        let bad = DebugRecord {
            anchor_state: DVector::zeros(1),
            feedforward: DVector::zeros(1),
            feedback_gain: DMatrix::from_element(1, 1, f64::INFINITY),
        };
        assert!(log.push(bad).is_err());
        assert!(log.is_empty());
    }

    #[test]
    fn missing_and_truncated_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        let missing = DebugLog::<DebugRecord>::fetch_from_file(dir.path().join("absent.json"));
        assert!(matches!(missing, Err(DebugError::Io { .. })));

        let path = dir.path().join("mpc.json");
        let mut log = DebugLog::new();
        log.push(record(1.0)).unwrap();
        log.dump_to_file(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert!(matches!(
            DebugLog::<DebugRecord>::fetch_from_file(&path),
            Err(DebugError::Json(_))
        ));
    }

    #[test]
    fn header_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mpc.json");
        let mut log = DebugLog::new();
        log.push(record(1.0)).unwrap();
        log.dump_to_file(&path).unwrap();

        let wrong_kind = DebugLog::<OcpDebugRecord>::fetch_from_file(&path);
        assert!(matches!(wrong_kind, Err(DebugError::WrongKind { .. })));

        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replace("\"version\": 1", "\"version\": 2")).unwrap();
        assert!(matches!(
            DebugLog::<DebugRecord>::fetch_from_file(&path),
            Err(DebugError::UnsupportedVersion { found: 2, .. })
        ));

        std::fs::write(&path, text.replace(ARCHIVE_FORMAT, "something-else")).unwrap();
        assert!(matches!(
            DebugLog::<DebugRecord>::fetch_from_file(&path),
            Err(DebugError::Format(_))
        ));
    }

    #[test]
    fn schema_mismatch_names_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mpc.json");
        let json = serde_json::json!({
            "format": ARCHIVE_FORMAT,
            "version": ARCHIVE_VERSION,
            "kind": "mpc_commands",
            "records": [
                { "anchor_state": [0.0, 1.0], "feedforward": [2.0],
                  "feedback_gain": { "rows": 1, "cols": 2, "data": [0.5, 0.5] } },
                { "anchor_state": [0.0, 1.0], "feedforward": [2.0],
                  "feedback_gain": { "rows": 1, "cols": 2, "data": [0.5] } },
            ]
        });
        std::fs::write(&path, json.to_string()).unwrap();
        match DebugLog::<DebugRecord>::fetch_from_file(&path) {
            Err(DebugError::Schema { index, .. }) => assert_eq!(index, 1),
            other => panic!("expected schema error, got {other:?}"),
        }
    }
}
