use std::sync::Arc;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Intensity array length disagrees with `isotopologues x time points`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("intensity has {actual} values, expected {n_isotopologues} isotopologues x {n_points} time points")]
pub struct ReshapeMismatch {
    pub actual: usize,
    pub n_isotopologues: usize,
    pub n_points: usize,
}

/// An extracted ion chromatogram for one (compound, sample) pair.
///
/// Intensities are stored flattened in isotopologue-major order, i.e. the trace of M+k
/// occupies `intensity[k * n_points..(k + 1) * n_points]`. An unlabelled compound has a
/// single trace.
///
/// Uses `Arc<Vec<f64>>` so that a corrected chromatogram shares its time axis with the raw
/// one it was derived from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chromatogram {
    pub time: Arc<Vec<f64>>,
    pub intensity: Arc<Vec<f64>>,
    pub n_isotopologues: usize,
}

impl Chromatogram {
    /// Constructs a new `Chromatogram`, checking that the intensity array can be reshaped
    /// to `(n_isotopologues, time.len())`.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use isocore::data::chromatogram::Chromatogram;
    /// let eic = Chromatogram::new(vec![1.0, 1.1], vec![10.0, 20.0, 1.0, 2.0], 2).unwrap();
    /// assert_eq!(eic.trace(1), &[1.0, 2.0]);
    /// assert!(Chromatogram::new(vec![1.0, 1.1], vec![10.0, 20.0, 1.0], 2).is_err());
    /// ```
    pub fn new(time: Vec<f64>, intensity: Vec<f64>, n_isotopologues: usize) -> Result<Self, ReshapeMismatch> {
        if n_isotopologues == 0 || intensity.len() != n_isotopologues * time.len() {
            return Err(ReshapeMismatch {
                actual: intensity.len(),
                n_isotopologues,
                n_points: time.len(),
            });
        }

        Ok(Chromatogram {
            time: Arc::new(time),
            intensity: Arc::new(intensity),
            n_isotopologues,
        })
    }

    pub fn num_points(&self) -> usize {
        self.time.len()
    }

    pub fn is_labelled(&self) -> bool {
        self.n_isotopologues > 1
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Intensity trace of isotopologue M+`k`.
    pub fn trace(&self, k: usize) -> &[f64] {
        let n = self.num_points();
        &self.intensity[k * n..(k + 1) * n]
    }

    pub fn traces(&self) -> impl Iterator<Item = &[f64]> {
        (0..self.n_isotopologues).map(move |k| self.trace(k))
    }

    /// Intensities as an `(isotopologues x time points)` matrix.
    pub fn to_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_row_slice(self.n_isotopologues, self.num_points(), &self.intensity)
    }

    /// A new chromatogram on the same time axis with intensities taken from `matrix`.
    ///
    /// The matrix must have the shape returned by [`Chromatogram::to_matrix`].
    pub fn with_matrix(&self, matrix: &DMatrix<f64>) -> Result<Self, ReshapeMismatch> {
        if matrix.nrows() != self.n_isotopologues || matrix.ncols() != self.num_points() {
            return Err(ReshapeMismatch {
                actual: matrix.len(),
                n_isotopologues: self.n_isotopologues,
                n_points: self.num_points(),
            });
        }

        // column-major storage of the transpose is isotopologue-major order
        let flat = matrix.transpose().as_slice().to_vec();
        Ok(Chromatogram {
            time: Arc::clone(&self.time),
            intensity: Arc::new(flat),
            n_isotopologues: self.n_isotopologues,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_layout() {
        let eic = Chromatogram::new(vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2).unwrap();
        let m = eic.to_matrix();
        assert_eq!(m.nrows(), 2);
        assert_eq!(m[(0, 2)], 3.0);
        assert_eq!(m[(1, 0)], 4.0);

        let doubled = eic.with_matrix(&(m * 2.0)).unwrap();
        assert_eq!(*doubled.intensity, vec![2.0, 4.0, 6.0, 8.0, 10.0, 12.0]);
        assert!(Arc::ptr_eq(&doubled.time, &eic.time));
    }

    #[test]
    fn test_with_matrix_shape_check() {
        let eic = Chromatogram::new(vec![0.0, 1.0], vec![1.0, 2.0], 1).unwrap();
        assert!(eic.with_matrix(&DMatrix::zeros(2, 2)).is_err());
    }

    #[test]
    fn test_traces() {
        let eic = Chromatogram::new(vec![0.0, 1.0], vec![1.0, 2.0, 10.0, 20.0], 2).unwrap();
        assert_eq!(eic.traces().collect::<Vec<_>>(), vec![&[1.0, 2.0][..], &[10.0, 20.0][..]]);
        assert!(eic.is_labelled());
    }

    #[test]
    fn test_zero_isotopologues_rejected() {
        assert!(Chromatogram::new(vec![], vec![], 0).is_err());
    }
}
