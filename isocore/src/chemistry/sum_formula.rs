use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::chemistry::elements::FORMULA_ELEMENTS;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormulaError {
    #[error("unexpected character '{0}' in formula")]
    UnexpectedCharacter(char),
    #[error("invalid element symbol near '{0}'")]
    InvalidSymbol(String),
    #[error("invalid atom count '{count}' for element {element}")]
    InvalidCount { element: String, count: String },
}

/// A molecular sum formula, e.g. `C6H12O6`.
///
/// Element counts are kept in a sorted map so that iteration order, and therefore any
/// floating point accumulation over the elements, is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumFormula {
    pub formula: String,
    pub elements: BTreeMap<String, i32>,
}

impl SumFormula {
    /// Parse a formula string into a `SumFormula`.
    ///
    /// Both compact (`C6H12O6`) and space separated (`C6 O3 N1 H12 Si1 S0 P0`) notations are
    /// accepted; a missing count means one atom and repeated elements are summed.
    ///
    /// # Examples
    ///
    /// ```
    /// use isocore::chemistry::sum_formula::SumFormula;
    ///
    /// let formula = SumFormula::new("C6 H12 O6").unwrap();
    /// assert_eq!(formula.count("C"), 6);
    /// assert_eq!(formula.count("H"), 12);
    /// assert_eq!(formula.count("N"), 0);
    /// ```
    pub fn new(formula: &str) -> Result<Self, FormulaError> {
        let elements = parse_formula(formula)?;
        Ok(SumFormula {
            formula: formula.to_string(),
            elements,
        })
    }

    /// Build a formula from explicit counts, rendered in the canonical `C#H#O#N#S#Si#` form.
    pub fn from_counts(elements: BTreeMap<String, i32>) -> Self {
        let formula = canonical_formula(&elements);
        SumFormula { formula, elements }
    }

    pub fn count(&self, element: &str) -> i32 {
        self.elements.get(element).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.elements.values().all(|&count| count == 0)
    }
}

impl Display for SumFormula {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.formula)
    }
}

/// Render counts as `C#H#O#N#S#Si#`, always writing every element (zeros included).
///
/// Elements outside of [`FORMULA_ELEMENTS`] are not part of the canonical string.
pub fn canonical_formula(elements: &BTreeMap<String, i32>) -> String {
    FORMULA_ELEMENTS
        .iter()
        .map(|symbol| format!("{}{}", symbol, elements.get(*symbol).copied().unwrap_or(0)))
        .collect()
}

/// Parse a chemical formula into a map of elements and their counts.
///
/// Whitespace is ignored. An element symbol is one upper case letter optionally followed by a
/// single lower case letter.
pub fn parse_formula(formula: &str) -> Result<BTreeMap<String, i32>, FormulaError> {
    let mut element_counts = BTreeMap::new();
    let mut current_element = String::new();
    let mut current_count = String::new();

    for c in formula.chars().filter(|c| !c.is_whitespace()) {
        if c.is_ascii_uppercase() {
            push_element(&mut element_counts, &mut current_element, &mut current_count)?;
            current_element.push(c);
        } else if c.is_ascii_lowercase() {
            if current_element.len() != 1 || !current_count.is_empty() {
                current_element.push(c);
                return Err(FormulaError::InvalidSymbol(current_element));
            }
            current_element.push(c);
        } else if c.is_ascii_digit() {
            if current_element.is_empty() {
                return Err(FormulaError::UnexpectedCharacter(c));
            }
            current_count.push(c);
        } else {
            return Err(FormulaError::UnexpectedCharacter(c));
        }
    }
    push_element(&mut element_counts, &mut current_element, &mut current_count)?;

    Ok(element_counts)
}

fn push_element(
    element_counts: &mut BTreeMap<String, i32>,
    current_element: &mut String,
    current_count: &mut String,
) -> Result<(), FormulaError> {
    if current_element.is_empty() {
        return Ok(());
    }

    let count = if current_count.is_empty() {
        1
    } else {
        current_count.parse::<i32>().map_err(|_| FormulaError::InvalidCount {
            element: current_element.clone(),
            count: current_count.clone(),
        })?
    };

    *element_counts.entry(std::mem::take(current_element)).or_insert(0) += count;
    current_count.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compact() {
        let elements = parse_formula("C6H12O6").unwrap();
        assert_eq!(elements.get("C"), Some(&6));
        assert_eq!(elements.get("H"), Some(&12));
        assert_eq!(elements.get("O"), Some(&6));
    }

    #[test]
    fn test_parse_two_letter_and_zero_counts() {
        let elements = parse_formula("C6 O3 N1 H12 Si1 S0 P0").unwrap();
        assert_eq!(elements.get("Si"), Some(&1));
        assert_eq!(elements.get("S"), Some(&0));
        assert_eq!(elements.get("P"), Some(&0));
    }

    #[test]
    fn test_implicit_count_and_repeats() {
        let elements = parse_formula("CH3COOH").unwrap();
        assert_eq!(elements.get("C"), Some(&2));
        assert_eq!(elements.get("H"), Some(&4));
        assert_eq!(elements.get("O"), Some(&2));
    }

    #[test]
    fn test_empty_formula() {
        assert!(parse_formula("").unwrap().is_empty());
        assert!(SumFormula::new("  ").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_formula() {
        assert_eq!(parse_formula("C6(H2O)"), Err(FormulaError::UnexpectedCharacter('(')));
        assert_eq!(parse_formula("6C"), Err(FormulaError::UnexpectedCharacter('6')));
        assert!(matches!(parse_formula("Sia2"), Err(FormulaError::InvalidSymbol(_))));
    }

    #[test]
    fn test_canonical_formula() {
        let formula = SumFormula::new("C3H4O3P1").unwrap();
        assert_eq!(canonical_formula(&formula.elements), "C3H4O3N0S0Si0");
    }
}
