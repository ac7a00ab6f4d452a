use serde::{Deserialize, Serialize};

use crate::algorithm::integration::IntegrationWindow;
use crate::chemistry::derivatization::Derivatization;

/// A target metabolite, or the internal standard.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Compound {
    pub name: String,
    /// Nominal mass of the unlabelled isotopologue (M+0).
    pub mass0: f64,
    /// Expected retention time in minutes.
    pub retention_time: f64,
    pub loffset: f64,
    pub roffset: f64,
    pub label_atoms: u32,
    pub label_element: String,
    pub formula: Option<String>,
    pub derivatization: Derivatization,
    /// Free text pattern selecting the standard mixture samples of this compound.
    pub mm_files: Option<String>,
    pub amount_in_std_mix: Option<f64>,
    pub int_std_amount: Option<f64>,
    pub baseline_correction: bool,
}

impl Compound {
    /// Constructs a new unlabelled-defaults `Compound` with the label element set to carbon.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use isocore::data::compound::Compound;
    /// let pyruvate = Compound::new("pyruvate", 174.0, 8.2, 0.1, 0.1).with_label_atoms(3);
    /// assert_eq!(pyruvate.num_isotopologues(), 4);
    /// assert!(pyruvate.is_labelled());
    /// ```
    pub fn new(name: &str, mass0: f64, retention_time: f64, loffset: f64, roffset: f64) -> Self {
        Compound {
            name: name.to_string(),
            mass0,
            retention_time,
            loffset,
            roffset,
            label_atoms: 0,
            label_element: "C".to_string(),
            formula: None,
            derivatization: Derivatization::default(),
            mm_files: None,
            amount_in_std_mix: None,
            int_std_amount: None,
            baseline_correction: false,
        }
    }

    pub fn with_label_atoms(mut self, label_atoms: u32) -> Self {
        self.label_atoms = label_atoms;
        self
    }

    pub fn with_formula(mut self, formula: &str, derivatization: Derivatization) -> Self {
        self.formula = Some(formula.to_string());
        self.derivatization = derivatization;
        self
    }

    pub fn num_isotopologues(&self) -> usize {
        self.label_atoms as usize + 1
    }

    pub fn is_labelled(&self) -> bool {
        self.label_atoms > 0
    }

    /// Formula used for correction, `None` when absent or blank.
    pub fn correction_formula(&self) -> Option<&str> {
        self.formula.as_deref().map(str::trim).filter(|f| !f.is_empty())
    }

    /// Retention time, with a session override taking precedence.
    pub fn effective_retention_time(&self, overrides: Option<&RetentionOverride>) -> f64 {
        overrides.map_or(self.retention_time, |o| o.retention_time)
    }

    /// Integration window, with a session override taking precedence.
    pub fn integration_window(&self, overrides: Option<&RetentionOverride>) -> IntegrationWindow {
        match overrides {
            Some(o) => IntegrationWindow::around(o.retention_time, o.loffset, o.roffset),
            None => IntegrationWindow::around(self.retention_time, self.loffset, self.roffset),
        }
    }
}

/// Per-session retention time and window override of a compound.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetentionOverride {
    pub retention_time: f64,
    pub loffset: f64,
    pub roffset: f64,
}

/// An acquired sample.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub name: String,
    pub file_path: String,
}

impl Sample {
    pub fn new(name: &str, file_path: &str) -> Self {
        Sample {
            name: name.to_string(),
            file_path: file_path.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_takes_precedence() {
        let compound = Compound::new("lactate", 233.0, 9.0, 0.2, 0.3);
        let window = compound.integration_window(None);
        assert!((window.left - 8.8).abs() < 1e-12);
        assert!((window.right - 9.3).abs() < 1e-12);

        let over = RetentionOverride {
            retention_time: 10.0,
            loffset: 0.1,
            roffset: 0.1,
        };
        let window = compound.integration_window(Some(&over));
        assert!((window.left - 9.9).abs() < 1e-12);
        assert_eq!(compound.effective_retention_time(Some(&over)), 10.0);
    }

    #[test]
    fn test_blank_formula_is_absent() {
        let mut compound = Compound::new("x", 100.0, 1.0, 0.1, 0.1);
        assert!(compound.correction_formula().is_none());
        compound.formula = Some("   ".to_string());
        assert!(compound.correction_formula().is_none());
        compound.formula = Some(" C3H4O3 ".to_string());
        assert_eq!(compound.correction_formula(), Some("C3H4O3"));
    }
}
