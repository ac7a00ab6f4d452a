use std::collections::HashMap;

/// Elements the derivatised formula is expressed in, in the order the formula string is written.
pub const FORMULA_ELEMENTS: [&str; 6] = ["C", "H", "O", "N", "S", "Si"];

/// Natural isotope abundances indexed by nominal mass offset from the lightest isotope.
///
/// Gaps in the isotope series are kept as explicit zeros (e.g. sulphur has no stable
/// M+3 isotope), so that index `i` always corresponds to a shift of `i` nominal mass units.
///
/// # Examples
///
/// ```
/// use isocore::chemistry::elements::natural_isotope_abundance;
///
/// let abundance = natural_isotope_abundance();
/// assert_eq!(abundance["C"], vec![0.9893, 0.0107]);
/// assert_eq!(abundance["S"].len(), 5);
/// ```
pub fn natural_isotope_abundance() -> HashMap<&'static str, Vec<f64>> {
    let mut map = HashMap::new();

    map.insert("C", vec![0.9893, 0.0107]); // 12C, 13C
    map.insert("H", vec![0.99985, 0.00015]); // 1H, 2H
    map.insert("N", vec![0.99632, 0.00368]); // 14N, 15N
    map.insert("O", vec![0.99757, 0.00038, 0.00205]); // 16O, 17O, 18O
    map.insert("Si", vec![0.922297, 0.046832, 0.030872]); // 28Si, 29Si, 30Si
    map.insert("S", vec![0.9493, 0.0076, 0.0429, 0.0, 0.0002]); // 32S .. 36S
    map.insert("P", vec![1.0]); // 31P

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abundances_sum_to_one() {
        for (symbol, pattern) in natural_isotope_abundance() {
            let total: f64 = pattern.iter().sum();
            assert!((total - 1.0).abs() < 1e-3, "{} sums to {}", symbol, total);
        }
    }

    #[test]
    fn test_unknown_element() {
        let abundance = natural_isotope_abundance();
        assert!(!abundance.contains_key("Xx"));
        assert_eq!(abundance["P"], vec![1.0]);
    }
}
