//! Solution buffer shared between consecutive solves.

use nalgebra::{DMatrix, DVector};

use crate::error::DdpError;
use crate::problem::check;

/// States `xs[0..=N]`, controls `us[0..N]` and feedback gains `gains[0..N]`.
///
/// Gains map a state deviation from `xs[i]` to a control correction
/// (`nu x nx`). The buffer is owned by the caller and overwritten in place
/// by each solve.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub xs: Vec<DVector<f64>>,
    pub us: Vec<DVector<f64>>,
    pub gains: Vec<DMatrix<f64>>,
}

impl Trajectory {
    /// Cold start: every state at `x0`, every control at `u`, zero gains.
    pub fn cold(x0: &DVector<f64>, u: &DVector<f64>, horizon: usize) -> Self {
        Self {
            xs: vec![x0.clone(); horizon + 1],
            us: vec![u.clone(); horizon],
            gains: vec![DMatrix::zeros(u.len(), x0.len()); horizon],
        }
    }

    /// Number of running nodes.
    pub fn horizon(&self) -> usize {
        self.us.len()
    }

    /// Drop the first node and duplicate the last one.
    pub fn shift(&mut self) {
        shift_vec(&mut self.xs);
        shift_vec(&mut self.us);
        shift_vec(&mut self.gains);
    }

    /// First control (feed-forward command); `None` when empty.
    pub fn torque(&self) -> Option<&DVector<f64>> {
        self.us.first()
    }

    /// First feedback gain; `None` when empty.
    pub fn gain(&self) -> Option<&DMatrix<f64>> {
        self.gains.first()
    }

    /// Check the buffer shape against a problem of size `(nx, nu, horizon)`.
    pub fn check_shape(&self, nx: usize, nu: usize, horizon: usize) -> Result<(), DdpError> {
        if self.us.len() != horizon || self.gains.len() != horizon {
            return Err(DdpError::Horizon {
                expected: horizon,
                got: self.us.len().min(self.gains.len()),
            });
        }
        check("trajectory xs length", horizon + 1, self.xs.len())?;
        for x in &self.xs {
            check("trajectory state", nx, x.len())?;
        }
        for u in &self.us {
            check("trajectory control", nu, u.len())?;
        }
        for k in &self.gains {
            check("gain rows", nu, k.nrows())?;
            check("gain cols", nx, k.ncols())?;
        }
        Ok(())
    }
}

fn shift_vec<T: Clone>(values: &mut Vec<T>) {
    if let Some(last) = values.last().cloned() {
        values.remove(0);
        values.push(last);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(horizon: usize) -> Trajectory {
        Trajectory {
            xs: (0..=horizon).map(|i| DVector::from_element(2, i as f64)).collect(),
            us: (0..horizon).map(|i| DVector::from_element(1, i as f64)).collect(),
            gains: (0..horizon).map(|i| DMatrix::from_element(1, 2, i as f64)).collect(),
        }
    }

    #[test]
    fn shift_drops_first_and_duplicates_last() {
        let mut t = numbered(3);
        t.shift();
        let xs: Vec<f64> = t.xs.iter().map(|x| x[0]).collect();
        let us: Vec<f64> = t.us.iter().map(|u| u[0]).collect();
        let ks: Vec<f64> = t.gains.iter().map(|k| k[(0, 1)]).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0, 3.0]);
        assert_eq!(us, vec![1.0, 2.0, 2.0]);
        assert_eq!(ks, vec![1.0, 2.0, 2.0]);
        assert_eq!(t.horizon(), 3);
    }

    #[test]
    fn cold_start_shape() {
        let x0 = DVector::from_column_slice(&[1.0, 2.0, 3.0, 4.0]);
        let u = DVector::from_column_slice(&[0.5, -0.5]);
        let t = Trajectory::cold(&x0, &u, 5);
        assert!(t.check_shape(4, 2, 5).is_ok());
        assert_eq!(t.xs[5], x0);
        assert_eq!(t.torque(), Some(&u));
        let gain = t.gain().unwrap();
        assert_eq!(gain.shape(), (2, 4));
        assert!(gain.iter().all(|g| *g == 0.0));
    }

    #[test]
    fn empty_trajectory_has_no_first_step() {
        let t = Trajectory {
            xs: Vec::new(),
            us: Vec::new(),
            gains: Vec::new(),
        };
        assert!(t.torque().is_none());
        assert!(t.gain().is_none());
    }

    #[test]
    fn check_shape_rejects_mismatch() {
        let t = numbered(3);
        assert!(matches!(
            t.check_shape(2, 1, 4),
            Err(DdpError::Horizon { expected: 4, got: 3 })
        ));
        assert!(matches!(
            t.check_shape(3, 1, 3),
            Err(DdpError::Dimension {
                what: "trajectory state",
                ..
            })
        ));
    }
}
