use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::algorithm::isotope::{convolve_n, unlabelled_distribution};
use crate::algorithm::optimize::{SimplexLeastSquares, DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE};
use crate::chemistry::derivatization::Derivatization;
use crate::chemistry::elements::natural_isotope_abundance;
use crate::chemistry::sum_formula::{FormulaError, SumFormula};
use crate::data::chromatogram::{Chromatogram, ReshapeMismatch};
use crate::data::compound::Compound;

/// Fraction of unlabelled and labelled tracer atoms at a labelled position.
pub const DEFAULT_LABEL_PURITY: [f64; 2] = [0.01, 0.99];
/// Matrices with a condition number above this are solved by constrained optimisation.
pub const DEFAULT_CONDITION_THRESHOLD: f64 = 1e10;
/// Series with at most this many time points are solved by constrained optimisation.
pub const DEFAULT_MIN_DIRECT_POINTS: usize = 10;
/// Total intensities at or below this are treated as zero.
const ZERO_TOTAL: f64 = 1e-10;

#[derive(Debug, thiserror::Error)]
pub enum CorrectionError {
    #[error("compound '{0}' has no formula")]
    MissingFormula(String),
    #[error("invalid formula: {0}")]
    Formula(#[from] FormulaError),
    #[error(transparent)]
    Reshape(#[from] ReshapeMismatch),
}

/// The chemical identity a correction matrix depends on.
///
/// `formula` is the derivatised formula in canonical `C#H#O#N#S#Si#` form, so two compounds
/// that only differ in name share one matrix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelSignature {
    pub formula: String,
    pub label_element: String,
    pub label_atoms: u32,
}

impl LabelSignature {
    /// # Examples
    ///
    /// ```
    /// use isocore::algorithm::correction::LabelSignature;
    /// use isocore::chemistry::derivatization::Derivatization;
    ///
    /// let signature = LabelSignature::new("C3H4O3", "C", 3, &Derivatization::new(1, 1, 0)).unwrap();
    /// assert_eq!(signature.formula, "C6H12O3N1S0Si1");
    /// ```
    pub fn new(
        base_formula: &str,
        label_element: &str,
        label_atoms: u32,
        derivatization: &Derivatization,
    ) -> Result<Self, CorrectionError> {
        let base = SumFormula::new(base_formula)?;
        Ok(LabelSignature {
            formula: derivatization.apply(&base).formula,
            label_element: label_element.to_string(),
            label_atoms,
        })
    }

    pub fn for_compound(compound: &Compound) -> Result<Self, CorrectionError> {
        let formula = compound
            .correction_formula()
            .ok_or_else(|| CorrectionError::MissingFormula(compound.name.clone()))?;
        LabelSignature::new(formula, &compound.label_element, compound.label_atoms, &compound.derivatization)
    }
}

/// How the linear system of a given matrix is solved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverStrategy {
    DirectSolve,
    ConstrainedOptimize,
}

/// A square correction matrix with its conditioning and the strategy chosen for it.
///
/// Column `n` is the expected measured distribution of a molecule carrying `n` labelled atoms.
#[derive(Debug, Clone)]
pub struct CorrectionMatrix {
    pub signature: LabelSignature,
    pub matrix: DMatrix<f64>,
    pub condition_number: f64,
    /// Largest singular value.
    pub spectral_norm: f64,
    pub strategy: SolverStrategy,
}

impl CorrectionMatrix {
    pub fn build(
        signature: &LabelSignature,
        formula: &SumFormula,
        label_purity: &[f64; 2],
        size: usize,
        condition_threshold: f64,
    ) -> Self {
        let matrix = build_correction_matrix(formula, &signature.label_element, signature.label_atoms, label_purity, size);
        let (condition_number, spectral_norm) = condition_number(&matrix);
        let strategy = if condition_number < condition_threshold {
            SolverStrategy::DirectSolve
        } else {
            SolverStrategy::ConstrainedOptimize
        };

        log::debug!(
            "correction matrix for {} ({} x {}): condition number {:.3e}, {:?}",
            signature.formula,
            size,
            size,
            condition_number,
            strategy
        );

        CorrectionMatrix {
            signature: signature.clone(),
            matrix,
            condition_number,
            spectral_norm,
            strategy,
        }
    }

    pub fn size(&self) -> usize {
        self.matrix.nrows()
    }
}

/// build the natural abundance correction matrix
///
/// Column `n` starts from the natural distribution of every unlabelled atom, is convolved
/// `label_atoms - n` times with the natural pattern of the label element and `n` times with the
/// label purity, and is truncated or zero padded to `size` rows.
///
/// Arguments:
///
/// * `formula` - derivatised sum formula
/// * `label_element` - labelled element symbol
/// * `label_atoms` - number of labelled positions
/// * `label_purity` - `[unlabelled, labelled]` fraction at a labelled position
/// * `size` - matrix dimension, usually `label_atoms + 1`
///
/// Returns:
///
/// * `DMatrix<f64>` - `size x size` matrix
pub fn build_correction_matrix(
    formula: &SumFormula,
    label_element: &str,
    label_atoms: u32,
    label_purity: &[f64; 2],
    size: usize,
) -> DMatrix<f64> {
    let abundances = natural_isotope_abundance();
    let natural = unlabelled_distribution(formula, label_element, label_atoms, &abundances);
    let label_pattern = abundances.get(label_element);
    if label_pattern.is_none() {
        log::debug!("no isotope pattern for label element {}", label_element);
    }

    let mut matrix = DMatrix::zeros(size, size);
    for n in 0..size {
        let mut column = natural.clone();
        if let Some(pattern) = label_pattern {
            column = convolve_n(&column, pattern, (label_atoms as usize).saturating_sub(n));
        }
        column = convolve_n(&column, label_purity, n);

        for (row, value) in column.iter().take(size).enumerate() {
            matrix[(row, n)] = *value;
        }
    }

    matrix
}

/// ratio of the largest to the smallest singular value, and the largest singular value
pub fn condition_number(matrix: &DMatrix<f64>) -> (f64, f64) {
    if matrix.is_empty() {
        return (f64::INFINITY, 0.0);
    }
    let singular_values = matrix.singular_values();
    let max = singular_values.max();
    let min = singular_values.min();
    let condition = if min > 0.0 { max / min } else { f64::INFINITY };
    (condition, max)
}

/// Solves `M X = B` for the normalised isotopologue fractions `X`, one column per time point.
pub trait CorrectionSolver: Send + Sync {
    fn solve(&self, matrix: &CorrectionMatrix, normalized: &DMatrix<f64>) -> DMatrix<f64>;
}

/// LU decomposition of the correction matrix, falling back to [`ConstrainedOptimize`] when
/// the matrix turns out to be singular.
#[derive(Debug, Clone, Default)]
pub struct DirectSolve {
    pub fallback: ConstrainedOptimize,
}

impl CorrectionSolver for DirectSolve {
    fn solve(&self, matrix: &CorrectionMatrix, normalized: &DMatrix<f64>) -> DMatrix<f64> {
        match matrix.matrix.clone().lu().solve(normalized) {
            Some(solution) => solution,
            None => {
                log::warn!(
                    "correction matrix for {} is singular, using constrained optimisation",
                    matrix.signature.formula
                );
                self.fallback.solve(matrix, normalized)
            }
        }
    }
}

/// Simplex-constrained least squares per time point, in parallel.
#[derive(Debug, Clone, Default)]
pub struct ConstrainedOptimize {
    pub optimizer: SimplexLeastSquares,
}

impl CorrectionSolver for ConstrainedOptimize {
    fn solve(&self, matrix: &CorrectionMatrix, normalized: &DMatrix<f64>) -> DMatrix<f64> {
        let n = normalized.nrows();
        if normalized.ncols() == 0 {
            return normalized.clone();
        }
        let lipschitz = matrix.spectral_norm * matrix.spectral_norm;

        let outcomes: Vec<(DVector<f64>, bool)> = (0..normalized.ncols())
            .into_par_iter()
            .map(|j| {
                let b = normalized.column(j).into_owned();
                if b.iter().all(|&v| v == 0.0) {
                    return (DVector::zeros(n), true);
                }
                let outcome = self.optimizer.solve(&matrix.matrix, &b, lipschitz);
                (outcome.x, outcome.converged)
            })
            .collect();

        let not_converged = outcomes.iter().filter(|(_, converged)| !converged).count();
        if not_converged > 0 {
            log::warn!(
                "{}: optimisation did not converge at {} of {} time points, kept best iterate",
                matrix.signature.formula,
                not_converged,
                outcomes.len()
            );
        }

        let columns: Vec<DVector<f64>> = outcomes.into_iter().map(|(x, _)| x).collect();
        DMatrix::from_columns(&columns)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub entries: usize,
    pub hits: usize,
    pub misses: usize,
}

impl CacheStatistics {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Correction matrices keyed by [`LabelSignature`].
///
/// A matrix is computed at most once per signature, also when several threads ask for the
/// same signature at the same time.
#[derive(Debug, Default)]
pub struct MatrixCache {
    entries: Mutex<HashMap<LabelSignature, Arc<OnceLock<Arc<CorrectionMatrix>>>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl MatrixCache {
    pub fn new() -> Self {
        MatrixCache::default()
    }

    pub fn get_or_compute<F>(&self, signature: &LabelSignature, compute: F) -> Arc<CorrectionMatrix>
    where
        F: FnOnce() -> CorrectionMatrix,
    {
        let cell = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(signature.clone()).or_default())
        };

        let mut computed = false;
        let matrix = cell.get_or_init(|| {
            computed = true;
            Arc::new(compute())
        });

        if computed {
            self.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        Arc::clone(matrix)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        log::debug!("clearing {} cached correction matrices", entries.len());
        entries.clear();
        drop(entries);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectorConfig {
    pub label_purity: [f64; 2],
    pub condition_threshold: f64,
    pub min_direct_points: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for CorrectorConfig {
    fn default() -> Self {
        CorrectorConfig {
            label_purity: DEFAULT_LABEL_PURITY,
            condition_threshold: DEFAULT_CONDITION_THRESHOLD,
            min_direct_points: DEFAULT_MIN_DIRECT_POINTS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionStatistics {
    pub cache: CacheStatistics,
    pub direct_solves: usize,
    pub optimizations: usize,
}

/// Removes the natural isotope contribution from labelled EICs.
pub struct NaturalAbundanceCorrector {
    config: CorrectorConfig,
    cache: Arc<MatrixCache>,
    direct: DirectSolve,
    optimize: ConstrainedOptimize,
    direct_solves: AtomicUsize,
    optimizations: AtomicUsize,
}

impl NaturalAbundanceCorrector {
    pub fn new(config: CorrectorConfig, cache: Arc<MatrixCache>) -> Self {
        let optimize = ConstrainedOptimize {
            optimizer: SimplexLeastSquares::new(config.max_iterations, config.tolerance),
        };
        NaturalAbundanceCorrector {
            config,
            cache,
            direct: DirectSolve {
                fallback: optimize.clone(),
            },
            optimize,
            direct_solves: AtomicUsize::new(0),
            optimizations: AtomicUsize::new(0),
        }
    }

    pub fn cache(&self) -> &Arc<MatrixCache> {
        &self.cache
    }

    pub fn config(&self) -> &CorrectorConfig {
        &self.config
    }

    /// Cached correction matrix of size `label_atoms + 1` for a signature.
    pub fn correction_matrix(&self, signature: &LabelSignature) -> Result<Arc<CorrectionMatrix>, CorrectionError> {
        let formula = SumFormula::new(&signature.formula)?;
        Ok(self.cache.get_or_compute(signature, || {
            CorrectionMatrix::build(
                signature,
                &formula,
                &self.config.label_purity,
                signature.label_atoms as usize + 1,
                self.config.condition_threshold,
            )
        }))
    }

    /// correct one EIC
    ///
    /// Arguments:
    ///
    /// * `eic` - raw chromatogram, one trace per isotopologue
    /// * `signature` - chemical identity of the compound
    ///
    /// Returns:
    ///
    /// * `Chromatogram` - corrected chromatogram on the same time axis, every value `>= 0`.
    ///   If the EIC has fewer isotopologues than the matrix it is returned unchanged.
    pub fn correct(&self, eic: &Chromatogram, signature: &LabelSignature) -> Result<Chromatogram, CorrectionError> {
        let cached = self.correction_matrix(signature)?;
        let n_isotopologues = eic.n_isotopologues;

        let matrix = if n_isotopologues > cached.size() {
            log::debug!(
                "{}: {} isotopologues measured, building a {} x {} matrix",
                signature.formula,
                n_isotopologues,
                n_isotopologues,
                n_isotopologues
            );
            let formula = SumFormula::new(&signature.formula)?;
            Arc::new(CorrectionMatrix::build(
                signature,
                &formula,
                &self.config.label_purity,
                n_isotopologues,
                self.config.condition_threshold,
            ))
        } else if n_isotopologues < cached.size() {
            log::error!(
                "{}: {} isotopologues measured but the correction matrix has {} rows, left uncorrected",
                signature.formula,
                n_isotopologues,
                cached.size()
            );
            return Ok(eic.clone());
        } else {
            cached
        };

        let corrected = self.correct_matrix(&eic.to_matrix(), &matrix);
        Ok(eic.with_matrix(&corrected)?)
    }

    /// correct an `(isotopologues x time points)` intensity matrix
    ///
    /// Each time point is normalised by its total intensity, solved for the isotopologue
    /// fractions and scaled back. Rows are then divided by the matching diagonal element of
    /// the correction matrix and negative values are clamped to zero.
    pub fn correct_matrix(&self, measured: &DMatrix<f64>, matrix: &CorrectionMatrix) -> DMatrix<f64> {
        if measured.ncols() == 0 {
            return measured.clone();
        }

        let totals: Vec<f64> = measured.column_iter().map(|column| column.sum()).collect();
        let mut normalized = measured.clone();
        for (j, mut column) in normalized.column_iter_mut().enumerate() {
            if totals[j] > ZERO_TOTAL {
                column /= totals[j];
            } else {
                column.fill(0.0);
            }
        }

        let mut corrected = if matrix.size() == 1 {
            normalized
        } else {
            let strategy = if measured.ncols() <= self.config.min_direct_points {
                SolverStrategy::ConstrainedOptimize
            } else {
                matrix.strategy
            };
            self.solver(strategy).solve(matrix, &normalized)
        };

        for (j, mut column) in corrected.column_iter_mut().enumerate() {
            column *= totals[j];
        }

        for i in 0..corrected.nrows().min(matrix.size()) {
            let diagonal = matrix.matrix[(i, i)];
            if diagonal > 0.0 {
                let mut row = corrected.row_mut(i);
                row /= diagonal;
            }
        }

        corrected.apply(|value| *value = value.max(0.0));
        corrected
    }

    fn solver(&self, strategy: SolverStrategy) -> &dyn CorrectionSolver {
        match strategy {
            SolverStrategy::DirectSolve => {
                self.direct_solves.fetch_add(1, Ordering::Relaxed);
                &self.direct
            }
            SolverStrategy::ConstrainedOptimize => {
                self.optimizations.fetch_add(1, Ordering::Relaxed);
                &self.optimize
            }
        }
    }

    pub fn statistics(&self) -> CorrectionStatistics {
        CorrectionStatistics {
            cache: self.cache.statistics(),
            direct_solves: self.direct_solves.load(Ordering::Relaxed),
            optimizations: self.optimizations.load(Ordering::Relaxed),
        }
    }
}

impl Default for NaturalAbundanceCorrector {
    fn default() -> Self {
        NaturalAbundanceCorrector::new(CorrectorConfig::default(), Arc::new(MatrixCache::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn signature(formula: &str, label_atoms: u32) -> LabelSignature {
        LabelSignature::new(formula, "C", label_atoms, &Derivatization::default()).unwrap()
    }

    fn time_axis(n: usize) -> Vec<f64> {
        (0..n).map(|i| 5.0 + 0.01 * i as f64).collect()
    }

    #[test]
    fn test_columns_sum_to_at_most_one() {
        let formula = SumFormula::new("C6H12O3N1Si1").unwrap();
        let m = build_correction_matrix(&formula, "C", 3, &[0.0, 1.0], 4);
        for column in m.column_iter() {
            assert!(column.sum() <= 1.0 + 1e-12);
        }
        let m = build_correction_matrix(&formula, "C", 3, &DEFAULT_LABEL_PURITY, 4);
        for column in m.column_iter() {
            assert!(column.sum() <= 1.0 + 1e-12);
        }
    }

    #[test]
    fn test_pure_tracer_matrix_is_lower_triangular() {
        let formula = SumFormula::new("C3H4O3").unwrap();
        let m = build_correction_matrix(&formula, "C", 3, &[0.0, 1.0], 4);
        for i in 0..4 {
            for j in (i + 1)..4 {
                assert_eq!(m[(i, j)], 0.0);
            }
        }

        let m = build_correction_matrix(&formula, "C", 3, &DEFAULT_LABEL_PURITY, 4);
        for i in 0..4 {
            assert!(m[(i, i)] > 0.9);
        }
        // impure tracer leaves some signal at lower masses
        assert!(m[(0, 1)] > 0.0);
    }

    #[test]
    fn test_larger_matrix_is_padded() {
        let formula = SumFormula::new("C2").unwrap();
        let m = build_correction_matrix(&formula, "C", 1, &DEFAULT_LABEL_PURITY, 4);
        assert_eq!(m.nrows(), 4);
        assert!(m[(3, 0)] == 0.0);
        assert!(m[(3, 3)] > 0.9);
    }

    #[test]
    fn test_identity_for_pure_label_and_no_natural_isotopes() {
        // no unlabelled atoms and a perfect tracer: the matrix is the identity
        let formula = SumFormula::new("").unwrap();
        let sig = LabelSignature {
            formula: String::new(),
            label_element: "X".to_string(),
            label_atoms: 2,
        };
        let m = CorrectionMatrix::build(&sig, &formula, &[0.0, 1.0], 3, DEFAULT_CONDITION_THRESHOLD);
        assert_eq!(m.matrix, DMatrix::identity(3, 3));
        assert_eq!(m.strategy, SolverStrategy::DirectSolve);
        assert!((m.condition_number - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_singular_matrix_uses_optimisation() {
        let (condition, _) = condition_number(&DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]));
        assert!(condition > DEFAULT_CONDITION_THRESHOLD);
    }

    #[test]
    fn test_unlabelled_compound_scales_by_m0_abundance() {
        let corrector = NaturalAbundanceCorrector::default();
        let sig = signature("C3H4O3", 0);
        let matrix = corrector.correction_matrix(&sig).unwrap();
        let m00 = matrix.matrix[(0, 0)];

        let eic = Chromatogram::new(time_axis(3), vec![100.0, 0.0, 200.0], 1).unwrap();
        let corrected = corrector.correct(&eic, &sig).unwrap();
        assert!((corrected.intensity[0] - 100.0 / m00).abs() < 1e-9);
        assert_eq!(corrected.intensity[1], 0.0);
        assert!((corrected.intensity[2] - 200.0 / m00).abs() < 1e-9);
    }

    #[test]
    fn test_recovers_true_distribution() {
        let corrector = NaturalAbundanceCorrector::default();
        let sig = signature("C6H12O3N1Si1", 3);
        let matrix = corrector.correction_matrix(&sig).unwrap();

        let truth = DVector::from_vec(vec![0.5, 0.1, 0.1, 0.3]);
        let n = 20;
        let mut intensity = Vec::new();
        let measured_columns: Vec<DVector<f64>> =
            (0..n).map(|t| &matrix.matrix * &truth * (1000.0 + t as f64)).collect();
        for k in 0..4 {
            for column in &measured_columns {
                intensity.push(column[k]);
            }
        }

        let eic = Chromatogram::new(time_axis(n), intensity, 4).unwrap();
        let corrected = corrector.correct(&eic, &sig).unwrap();
        assert!(corrected.intensity.iter().all(|&v| v >= 0.0));

        // the first time point was scaled by 1000
        for k in 0..4 {
            let expected = 1000.0 * truth[k] / matrix.matrix[(k, k)];
            assert!((corrected.trace(k)[0] - expected).abs() < 1e-6 * expected);
        }
        assert_eq!(corrector.statistics().direct_solves, 1);
    }

    #[test]
    fn test_ill_conditioned_matrix_uses_optimisation() {
        let config = CorrectorConfig {
            condition_threshold: 1.0,
            ..CorrectorConfig::default()
        };
        let corrector = NaturalAbundanceCorrector::new(config, Arc::new(MatrixCache::new()));
        let sig = signature("C6H12O3N1Si1", 3);
        let matrix = corrector.correction_matrix(&sig).unwrap();
        assert_eq!(matrix.strategy, SolverStrategy::ConstrainedOptimize);

        let truth = DVector::from_vec(vec![0.5, 0.1, 0.1, 0.3]);
        let n = 20;
        let mut intensity = Vec::new();
        let measured = &matrix.matrix * &truth * 1000.0;
        for k in 0..4 {
            intensity.extend(std::iter::repeat(measured[k]).take(n));
        }

        let eic = Chromatogram::new(time_axis(n), intensity, 4).unwrap();
        let corrected = corrector.correct(&eic, &sig).unwrap();
        assert_eq!(corrected.num_points(), n);
        assert!(corrected.intensity.iter().all(|&v| v >= 0.0));
        assert!(corrected.trace(0)[0] > 0.0);

        let stats = corrector.statistics();
        assert_eq!(stats.optimizations, 1);
        assert_eq!(stats.direct_solves, 0);
    }

    #[test]
    fn test_singular_lu_falls_back_to_optimisation() {
        let matrix = CorrectionMatrix {
            signature: signature("C2", 1),
            matrix: DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]),
            condition_number: f64::INFINITY,
            spectral_norm: 2.0,
            strategy: SolverStrategy::DirectSolve,
        };
        let normalized = DMatrix::from_row_slice(2, 2, &[0.5, 1.0, 0.5, 0.0]);

        let solution = DirectSolve::default().solve(&matrix, &normalized);
        assert_eq!(solution.shape(), (2, 2));
        for column in solution.column_iter() {
            assert!(column.iter().all(|&v| v >= 0.0));
            assert!((column.sum() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_short_series_uses_optimisation() {
        let corrector = NaturalAbundanceCorrector::default();
        let sig = signature("C3H4O3", 2);
        let eic = Chromatogram::new(time_axis(3), vec![90.0, 80.0, 0.0, 5.0, 10.0, 0.0, 1.0, 2.0, 0.0], 3).unwrap();
        let corrected = corrector.correct(&eic, &sig).unwrap();
        assert!(corrected.intensity.iter().all(|&v| v >= 0.0));
        // zero total stays zero
        assert_eq!(corrected.trace(0)[2], 0.0);
        assert_eq!(corrector.statistics().optimizations, 1);
        assert_eq!(corrector.statistics().direct_solves, 0);
    }

    #[test]
    fn test_fewer_isotopologues_than_matrix_returns_input() {
        let corrector = NaturalAbundanceCorrector::default();
        let sig = signature("C3H4O3", 3);
        let eic = Chromatogram::new(time_axis(2), vec![1.0, 2.0, 3.0, 4.0], 2).unwrap();
        let corrected = corrector.correct(&eic, &sig).unwrap();
        assert_eq!(corrected, eic);
    }

    #[test]
    fn test_more_isotopologues_than_matrix() {
        let corrector = NaturalAbundanceCorrector::default();
        let sig = signature("C3H4O3", 1);
        let eic = Chromatogram::new(time_axis(2), vec![100.0, 100.0, 10.0, 10.0, 1.0, 1.0], 3).unwrap();
        let corrected = corrector.correct(&eic, &sig).unwrap();
        assert_eq!(corrected.n_isotopologues, 3);
        // the rebuilt matrix is not cached
        assert_eq!(corrector.cache().len(), 1);
    }

    #[test]
    fn test_cache_counts_hits_and_misses() {
        let corrector = NaturalAbundanceCorrector::default();
        let sig = signature("C3H4O3", 3);
        let first = corrector.correction_matrix(&sig).unwrap();
        let second = corrector.correction_matrix(&sig).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let stats = corrector.cache().statistics();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.hit_rate(), 0.5);

        corrector.cache().clear();
        assert!(corrector.cache().is_empty());
        assert_eq!(corrector.cache().statistics(), CacheStatistics::default());
    }

    #[test]
    fn test_same_formula_different_compounds_share_matrix() {
        let cache = Arc::new(MatrixCache::new());
        let corrector = NaturalAbundanceCorrector::new(CorrectorConfig::default(), Arc::clone(&cache));
        let mut a = Compound::new("a", 100.0, 1.0, 0.1, 0.1).with_formula("C3H4O3", Derivatization::new(1, 1, 0));
        a.label_atoms = 3;
        let mut b = a.clone();
        b.name = "b".to_string();

        corrector.correction_matrix(&LabelSignature::for_compound(&a).unwrap()).unwrap();
        corrector.correction_matrix(&LabelSignature::for_compound(&b).unwrap()).unwrap();
        assert_eq!(cache.statistics().misses, 1);
        assert_eq!(cache.statistics().hits, 1);
    }

    #[test]
    fn test_concurrent_requests_compute_once() {
        let cache = Arc::new(MatrixCache::new());
        let sig = signature("C6H12O6", 6);
        let formula = SumFormula::new(&sig.formula).unwrap();
        let computations = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let sig = sig.clone();
                let formula = formula.clone();
                let computations = Arc::clone(&computations);
                thread::spawn(move || {
                    cache.get_or_compute(&sig, || {
                        computations.fetch_add(1, Ordering::SeqCst);
                        CorrectionMatrix::build(&sig, &formula, &DEFAULT_LABEL_PURITY, 7, DEFAULT_CONDITION_THRESHOLD)
                    })
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(computations.load(Ordering::SeqCst), 1);
        assert_eq!(cache.statistics().misses, 1);
        assert_eq!(cache.statistics().hits, 7);
    }

    #[test]
    fn test_missing_formula() {
        let compound = Compound::new("unknown", 100.0, 1.0, 0.1, 0.1);
        assert!(matches!(
            LabelSignature::for_compound(&compound),
            Err(CorrectionError::MissingFormula(_))
        ));
    }
}
