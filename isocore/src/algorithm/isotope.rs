use std::collections::HashMap;

use crate::chemistry::elements::{natural_isotope_abundance, FORMULA_ELEMENTS};
use crate::chemistry::sum_formula::SumFormula;

/// convolve two nominal-mass isotope distributions
///
/// Arguments:
///
/// * `dist_a` - first distribution, index `i` is the abundance at nominal shift `i`
/// * `dist_b` - second distribution
///
/// Returns:
///
/// * `Vec<f64>` - combined distribution of length `len(a) + len(b) - 1`
///
/// # Examples
///
/// ```
/// use isocore::algorithm::isotope::convolve;
///
/// let result = convolve(&[0.5, 0.5], &[0.5, 0.5]);
/// assert_eq!(result, vec![0.25, 0.5, 0.25]);
/// ```
pub fn convolve(dist_a: &[f64], dist_b: &[f64]) -> Vec<f64> {
    if dist_a.is_empty() || dist_b.is_empty() {
        return Vec::new();
    }

    let mut result = vec![0.0; dist_a.len() + dist_b.len() - 1];

    for (i, &abundance_a) in dist_a.iter().enumerate() {
        for (j, &abundance_b) in dist_b.iter().enumerate() {
            result[i + j] += abundance_a * abundance_b;
        }
    }

    result
}

/// convolve `base` with `dist` n times
///
/// The convolutions are applied one after another rather than by repeated squaring, so that
/// the floating point result is identical to the sequential reference computation.
///
/// Arguments:
///
/// * `base` - distribution to start from
/// * `dist` - distribution to convolve with
/// * `n` - number of convolutions
///
/// Returns:
///
/// * `Vec<f64>` - resulting distribution, `base` itself for `n == 0`
///
/// # Examples
///
/// ```
/// use isocore::algorithm::isotope::convolve_n;
///
/// let result = convolve_n(&[1.0], &[0.5, 0.5], 2);
/// assert_eq!(result, vec![0.25, 0.5, 0.25]);
/// ```
pub fn convolve_n(base: &[f64], dist: &[f64], n: usize) -> Vec<f64> {
    (0..n).fold(base.to_vec(), |acc, _| convolve(&acc, dist))
}

/// natural abundance distribution of every atom in a formula except the labelled positions
///
/// Arguments:
///
/// * `formula` - derivatised sum formula
/// * `label_element` - labelled element symbol, e.g. `C`
/// * `label_atoms` - number of positions of `label_element` that can carry a label
/// * `abundances` - natural isotope abundance table
///
/// Returns:
///
/// * `Vec<f64>` - nominal-mass distribution of the unlabelled part of the molecule
pub fn unlabelled_distribution(
    formula: &SumFormula,
    label_element: &str,
    label_atoms: u32,
    abundances: &HashMap<&'static str, Vec<f64>>,
) -> Vec<f64> {
    let mut distribution = vec![1.0];

    for element in FORMULA_ELEMENTS {
        let count = formula.count(element).max(0) as u32;
        let unlabelled_count = if element == label_element {
            count.saturating_sub(label_atoms)
        } else {
            count
        };

        if unlabelled_count == 0 {
            continue;
        }

        match abundances.get(element) {
            Some(pattern) => {
                distribution = convolve_n(&distribution, pattern, unlabelled_count as usize);
            }
            None => log::debug!("no isotope pattern for {}, skipped", element),
        }
    }

    distribution
}

/// natural abundance distribution of a full formula, all atoms unlabelled
///
/// # Examples
///
/// ```
/// use isocore::algorithm::isotope::isotope_distribution;
/// use isocore::chemistry::sum_formula::SumFormula;
///
/// let formula = SumFormula::new("C1").unwrap();
/// assert_eq!(isotope_distribution(&formula), vec![0.9893, 0.0107]);
/// ```
pub fn isotope_distribution(formula: &SumFormula) -> Vec<f64> {
    unlabelled_distribution(formula, "", 0, &natural_isotope_abundance())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convolve_with_delta_is_identity() {
        let dist = vec![0.9, 0.07, 0.03];
        assert_eq!(convolve(&[1.0], &dist), dist);
        assert_eq!(convolve_n(&dist, &[0.5, 0.5], 0), dist);
    }

    #[test]
    fn test_convolve_conserves_mass() {
        let a = vec![0.99757, 0.00038, 0.00205];
        let b = vec![0.9893, 0.0107];
        let total: f64 = convolve(&a, &b).iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_convolve_empty() {
        assert!(convolve(&[], &[1.0]).is_empty());
    }

    #[test]
    fn test_labelled_positions_excluded() {
        let abundances = natural_isotope_abundance();
        let formula = SumFormula::new("C6H0O0").unwrap();
        // all six carbons are label positions, nothing is left unlabelled
        let dist = unlabelled_distribution(&formula, "C", 6, &abundances);
        assert_eq!(dist, vec![1.0]);

        let dist = unlabelled_distribution(&formula, "C", 4, &abundances);
        assert_eq!(dist.len(), 3);
        assert!((dist[0] - 0.9893 * 0.9893).abs() < 1e-15);
    }

    #[test]
    fn test_glucose_m1_abundance() {
        let formula = SumFormula::new("C6H12O6").unwrap();
        let dist = isotope_distribution(&formula);
        // M+1 of glucose is dominated by 13C: roughly 6 * 1.07%
        assert!(dist[1] > 0.06 && dist[1] < 0.07);
        let total: f64 = dist.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}
