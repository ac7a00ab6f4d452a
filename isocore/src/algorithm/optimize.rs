use itertools::Itertools;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_ITERATIONS: usize = 500;
pub const DEFAULT_TOLERANCE: f64 = 1e-12;

/// Euclidean projection onto the probability simplex `{x : x >= 0, sum(x) = 1}`.
///
/// # Examples
///
/// ```
/// use nalgebra::DVector;
/// use isocore::algorithm::optimize::project_onto_simplex;
///
/// let x = project_onto_simplex(&DVector::from_vec(vec![0.5, 0.7, -0.2]));
/// assert!((x[0] - 0.4).abs() < 1e-12);
/// assert!((x[1] - 0.6).abs() < 1e-12);
/// assert_eq!(x[2], 0.0);
/// ```
pub fn project_onto_simplex(v: &DVector<f64>) -> DVector<f64> {
    let sorted = v.iter().copied().sorted_by(|a, b| b.total_cmp(a)).collect_vec();

    let mut cumulative = 0.0;
    let mut theta = 0.0;
    for (j, &u) in sorted.iter().enumerate() {
        cumulative += u;
        let candidate = (cumulative - 1.0) / (j as f64 + 1.0);
        if u - candidate > 0.0 {
            theta = candidate;
        }
    }

    v.map(|x| (x - theta).max(0.0))
}

#[derive(Debug, Clone)]
pub struct OptimizeOutcome {
    pub x: DVector<f64>,
    pub objective: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Least squares `min ||A x - b||^2` subject to `x >= 0, sum(x) = 1`, solved with an
/// accelerated projected gradient method and adaptive restart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimplexLeastSquares {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for SimplexLeastSquares {
    fn default() -> Self {
        SimplexLeastSquares {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl SimplexLeastSquares {
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        SimplexLeastSquares {
            max_iterations,
            tolerance,
        }
    }

    /// solve for one right hand side
    ///
    /// Arguments:
    ///
    /// * `a` - square system matrix
    /// * `b` - measured, normalised distribution
    /// * `lipschitz` - largest eigenvalue of `AᵀA`, i.e. the squared spectral norm of `a`
    ///
    /// Returns:
    ///
    /// * `OptimizeOutcome` - the best feasible iterate found; `converged` is false if the
    ///   iteration limit was hit first
    pub fn solve(&self, a: &DMatrix<f64>, b: &DVector<f64>, lipschitz: f64) -> OptimizeOutcome {
        let objective = |x: &DVector<f64>| (a * x - b).norm_squared();

        let mut x = project_onto_simplex(b);
        let mut best = x.clone();
        let mut best_objective = objective(&x);

        if !(lipschitz > 0.0 && lipschitz.is_finite()) {
            return OptimizeOutcome {
                x: best,
                objective: best_objective,
                iterations: 0,
                converged: false,
            };
        }

        let ata = a.transpose() * a;
        let atb = a.transpose() * b;
        let step = 1.0 / lipschitz;

        let mut y = x.clone();
        let mut momentum = 1.0_f64;
        let mut previous_objective = best_objective;

        for iteration in 1..=self.max_iterations {
            let gradient = &ata * &y - &atb;
            let next = project_onto_simplex(&(&y - gradient * step));
            let next_objective = objective(&next);

            if next_objective < best_objective {
                best = next.clone();
                best_objective = next_objective;
            }

            let change = (&next - &x).norm();

            if next_objective > previous_objective {
                // restart the momentum when the objective goes up
                momentum = 1.0;
                y = next.clone();
            } else {
                let next_momentum = (1.0 + (1.0 + 4.0 * momentum * momentum).sqrt()) / 2.0;
                y = &next + (&next - &x) * ((momentum - 1.0) / next_momentum);
                momentum = next_momentum;
            }

            x = next;
            previous_objective = next_objective;

            if change <= self.tolerance * (1.0 + x.norm()) {
                return OptimizeOutcome {
                    x: best,
                    objective: best_objective,
                    iterations: iteration,
                    converged: true,
                };
            }
        }

        OptimizeOutcome {
            x: best,
            objective: best_objective,
            iterations: self.max_iterations,
            converged: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_projection_of_feasible_point_is_identity() {
        let v = DVector::from_vec(vec![0.2, 0.3, 0.5]);
        let x = project_onto_simplex(&v);
        assert!((x - v).norm() < 1e-15);
    }

    #[test]
    fn test_projection_is_feasible() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let v = DVector::from_fn(6, |_, _| rng.gen_range(-2.0..2.0));
            let x = project_onto_simplex(&v);
            assert!(x.iter().all(|&xi| xi >= 0.0));
            assert!((x.sum() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_recovers_exact_solution() {
        let a = DMatrix::<f64>::from_row_slice(3, 3, &[0.95, 0.0, 0.0, 0.04, 0.95, 0.0, 0.01, 0.04, 0.95]);
        let truth = DVector::from_vec(vec![0.6, 0.3, 0.1]);
        let b = &a * &truth;
        let lipschitz = a.singular_values().max().powi(2);

        let outcome = SimplexLeastSquares::default().solve(&a, &b, lipschitz);
        assert!(outcome.converged);
        assert!((outcome.x - truth).norm() < 1e-8);
    }

    #[test]
    fn test_infeasible_target_stays_on_simplex() {
        let a = DMatrix::identity(3, 3);
        let b = DVector::from_vec(vec![0.9, -0.3, 0.1]);
        let outcome = SimplexLeastSquares::default().solve(&a, &b, 1.0);
        assert!(outcome.x.iter().all(|&xi| xi >= 0.0));
        assert!((outcome.x.sum() - 1.0).abs() < 1e-12);
        assert!(outcome.x[0] > outcome.x[2]);
    }

    #[test]
    fn test_iteration_limit_reports_not_converged() {
        let a = DMatrix::<f64>::from_row_slice(2, 2, &[1.0, 0.999, 0.999, 1.0]);
        let b = DVector::from_vec(vec![0.2, 0.9]);
        let lipschitz = a.singular_values().max().powi(2);
        let outcome = SimplexLeastSquares::new(1, 0.0).solve(&a, &b, lipschitz);
        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 1);
        assert!((outcome.x.sum() - 1.0).abs() < 1e-12);
    }
}
