use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::chemistry::sum_formula::SumFormula;

/// Derivatisation groups attached to a metabolite before measurement.
///
/// * `tbdms` - tert-butyldimethylsilyl groups
/// * `meox` - methoxyamine groups
/// * `me` - methylations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Derivatization {
    pub tbdms: u32,
    pub meox: u32,
    pub me: u32,
}

impl Derivatization {
    pub fn new(tbdms: u32, meox: u32, me: u32) -> Self {
        Derivatization { tbdms, meox, me }
    }

    /// Atoms added by the derivatisation, as element deltas.
    ///
    /// The TBDMS delta accounts for the hydrogen each group replaces, and MeOX adds no oxygen;
    /// both match the stoichiometry of the reference GC-MS workflow.
    ///
    /// # Examples
    ///
    /// ```
    /// use isocore::chemistry::derivatization::Derivatization;
    ///
    /// let delta = Derivatization::new(2, 1, 0).atom_delta();
    /// assert_eq!(delta["C"], 9);  // (2 - 1) * 6 + 2 + 1
    /// assert_eq!(delta["H"], 22); // (2 - 1) * 15 + 6 - 2 + 3
    /// assert_eq!(delta["Si"], 2);
    /// assert_eq!(delta["N"], 1);
    /// ```
    pub fn atom_delta(&self) -> BTreeMap<String, i32> {
        let mut delta: BTreeMap<String, i32> = BTreeMap::new();
        let mut add = |element: &str, count: i32| {
            *delta.entry(element.to_string()).or_insert(0) += count;
        };

        if self.tbdms > 0 {
            let t = self.tbdms as i32;
            add("C", (t - 1) * 6 + 2);
            add("H", (t - 1) * 15 + 6 - t);
            add("Si", t);
        }

        if self.meox > 0 {
            let m = self.meox as i32;
            add("N", m);
            add("C", m);
            add("H", 3 * m);
        }

        if self.me > 0 {
            let e = self.me as i32;
            add("C", e);
            add("H", 2 * e);
        }

        delta
    }

    /// Apply the derivatisation to a base formula.
    ///
    /// The result is rendered in canonical `C#H#O#N#S#Si#` form, which is also the
    /// chemical signature used to key correction matrices.
    pub fn apply(&self, base: &SumFormula) -> SumFormula {
        let mut counts = base.elements.clone();
        for (element, count) in self.atom_delta() {
            *counts.entry(element).or_insert(0) += count;
        }
        SumFormula::from_counts(counts)
    }

    pub fn is_none(&self) -> bool {
        self.tbdms == 0 && self.meox == 0 && self.me == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_derivatization() {
        let base = SumFormula::new("C3H4O3").unwrap();
        let derived = Derivatization::default().apply(&base);
        assert_eq!(derived.formula, "C3H4O3N0S0Si0");
        assert!(Derivatization::default().is_none());
    }

    #[test]
    fn test_single_tbdms() {
        let base = SumFormula::new("C3H6O3").unwrap();
        let derived = Derivatization::new(1, 0, 0).apply(&base);
        // one TBDMS: C + 2, H + 5, Si + 1
        assert_eq!(derived.count("C"), 5);
        assert_eq!(derived.count("H"), 11);
        assert_eq!(derived.count("Si"), 1);
        assert_eq!(derived.formula, "C5H11O3N0S0Si1");
    }

    #[test]
    fn test_pyruvate_meox_tbdms() {
        // pyruvate, 1 x MeOX + 1 x TBDMS
        let base = SumFormula::new("C3H4O3").unwrap();
        let derived = Derivatization::new(1, 1, 0).apply(&base);
        assert_eq!(derived.formula, "C6H12O3N1S0Si1");
    }

    #[test]
    fn test_methylation() {
        let base = SumFormula::new("C2H4O2").unwrap();
        let derived = Derivatization::new(0, 0, 2).apply(&base);
        assert_eq!(derived.count("C"), 4);
        assert_eq!(derived.count("H"), 8);
    }

    #[test]
    fn test_phosphorus_dropped_from_signature() {
        let base = SumFormula::new("C3H7O6P").unwrap();
        let derived = Derivatization::default().apply(&base);
        assert_eq!(derived.formula, "C3H7O6N0S0Si0");
    }
}
