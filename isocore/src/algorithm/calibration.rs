use std::collections::{BTreeSet, HashMap};

use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::algorithm::metrics::{carbon_enrichment, label_incorporation, labelled_signal};
use crate::data::areas::AreaTable;
use crate::data::compound::Compound;

#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("internal standard '{0}' is not in the compound list")]
    UnknownInternalStandard(String),
    #[error("internal standard '{name}' has no {field}")]
    MissingAmount { name: String, field: &'static str },
    #[error("invalid standard mixture pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Tokens of a standard mixture pattern field.
///
/// The field is split on `,`, `;`, newlines and tabs; tokens are trimmed and empty ones dropped.
///
/// # Examples
///
/// ```
/// use isocore::algorithm::calibration::pattern_tokens;
///
/// assert_eq!(pattern_tokens(" MM_01, mm*;\n\tstd "), vec!["MM_01", "mm*", "std"]);
/// ```
pub fn pattern_tokens(field: &str) -> Vec<String> {
    field
        .split(|c: char| matches!(c, ',' | ';' | '\n' | '\t'))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(String::from)
        .collect()
}

/// Compiled standard mixture pattern.
///
/// A token containing `*` must match the whole sample name with `*` as a wildcard; any other
/// token matches anywhere in the name. Matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct StandardMixPattern {
    matchers: Vec<Regex>,
}

impl StandardMixPattern {
    pub fn parse(field: &str) -> Result<Self, regex::Error> {
        let matchers = pattern_tokens(field)
            .iter()
            .map(|token| {
                let expression = if token.contains('*') {
                    format!("(?i)^{}$", token.split('*').map(regex::escape).join(".*"))
                } else {
                    format!("(?i){}", regex::escape(token))
                };
                Regex::new(&expression)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StandardMixPattern { matchers })
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    pub fn matches(&self, sample: &str) -> bool {
        self.matchers.iter().any(|m| m.is_match(sample))
    }

    /// Matching samples, deduplicated and sorted.
    pub fn resolve<'a, I>(&self, samples: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        samples
            .into_iter()
            .filter(|sample| self.matches(sample))
            .cloned()
            .collect()
    }
}

/// resolve the standard mixture samples of a pattern field
///
/// # Examples
///
/// ```
/// use isocore::algorithm::calibration::resolve_standard_samples;
///
/// let samples: Vec<String> = ["MM_01", "mm_02", "sample_mm", "blank"].iter().map(|s| s.to_string()).collect();
/// let resolved = resolve_standard_samples(Some("mm_*"), &samples);
/// assert_eq!(resolved.into_iter().collect::<Vec<_>>(), vec!["MM_01", "mm_02"]);
///
/// let resolved = resolve_standard_samples(Some("MM"), &samples);
/// assert_eq!(resolved.len(), 3);
/// ```
pub fn resolve_standard_samples(field: Option<&str>, samples: &[String]) -> BTreeSet<String> {
    let Some(field) = field else {
        return BTreeSet::new();
    };
    match StandardMixPattern::parse(field) {
        Ok(pattern) => pattern.resolve(samples),
        Err(e) => {
            log::warn!("could not compile standard mixture pattern '{}': {}", field, e);
            BTreeSet::new()
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().mean())
    }
}

/// mean over samples of `Σ_{i≥1} A_i / A_0`
///
/// Samples with a single isotopologue or without M+0 signal contribute nothing.
///
/// Returns:
///
/// * `f64` - the mean ratio, `0.0` if no sample contributed
pub fn background_ratio<'a, I>(sample_areas: I) -> f64
where
    I: IntoIterator<Item = &'a [f64]>,
{
    let ratios: Vec<f64> = sample_areas
        .into_iter()
        .filter(|areas| areas.len() > 1 && areas[0] > 0.0)
        .map(|areas| labelled_signal(areas) / areas[0])
        .collect();
    mean(&ratios).unwrap_or(0.0)
}

/// background ratio of every compound from its standard mixture samples
pub fn background_ratios(compounds: &[Compound], areas: &AreaTable, samples: &[String]) -> HashMap<String, f64> {
    compounds
        .iter()
        .map(|compound| {
            let standards = resolve_standard_samples(compound.mm_files.as_deref(), samples);
            if standards.is_empty() {
                log::warn!(
                    "no standard mixture samples for {} with pattern '{}'",
                    compound.name,
                    compound.mm_files.as_deref().unwrap_or("")
                );
                return (compound.name.clone(), 0.0);
            }
            let ratio = background_ratio(standards.iter().map(|s| areas.areas_or_zero(s, &compound.name)));
            log::debug!("background ratio of {}: {:.6}", compound.name, ratio);
            (compound.name.clone(), ratio)
        })
        .collect()
}

/// `(signal / concentration) / (is_signal / is_concentration)`, `None` when any term is not positive
///
/// # Examples
///
/// ```
/// use isocore::algorithm::calibration::response_factor;
///
/// assert_eq!(response_factor(150.0, 2.0, 30.0, 1.0), Some(2.5));
/// assert_eq!(response_factor(150.0, 2.0, 0.0, 1.0), None);
/// ```
pub fn response_factor(
    mean_signal: f64,
    concentration: f64,
    mean_standard_signal: f64,
    standard_concentration: f64,
) -> Option<f64> {
    if mean_signal > 0.0 && concentration > 0.0 && mean_standard_signal > 0.0 && standard_concentration > 0.0 {
        Some((mean_signal / concentration) / (mean_standard_signal / standard_concentration))
    } else {
        None
    }
}

/// The reference compound all abundances are expressed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalStandard {
    pub name: String,
    /// Isotopologue whose area is the reference signal.
    pub isotope_index: usize,
}

impl InternalStandard {
    pub fn new(name: &str, isotope_index: usize) -> Self {
        InternalStandard {
            name: name.to_string(),
            isotope_index,
        }
    }

    /// Area of the reference isotopologue in a sample, `0.0` when missing.
    pub fn reference_signal(&self, areas: &AreaTable, sample: &str) -> f64 {
        areas
            .get(sample, &self.name)
            .and_then(|a| a.get(self.isotope_index))
            .copied()
            .unwrap_or(0.0)
    }
}

/// response factor of every compound relative to the internal standard
///
/// Compounds without a pattern, without resolved samples, without a standard mixture
/// concentration, or with any non-positive term get `1.0`, as does the internal standard
/// itself. An internal standard without a concentration leaves every factor at `1.0`.
pub fn response_factors(
    compounds: &[Compound],
    areas: &AreaTable,
    samples: &[String],
    internal_standard: &InternalStandard,
) -> HashMap<String, f64> {
    let standard = compounds.iter().find(|c| c.name == internal_standard.name);
    let Some(standard_concentration) = standard.and_then(|c| c.amount_in_std_mix) else {
        log::warn!(
            "no standard mixture concentration for internal standard {}, response factors 1.0",
            internal_standard.name
        );
        return compounds.iter().map(|c| (c.name.clone(), 1.0)).collect();
    };
    let standard_samples = resolve_standard_samples(standard.and_then(|c| c.mm_files.as_deref()), samples);
    let standard_signals: Vec<f64> = standard_samples
        .iter()
        .map(|s| internal_standard.reference_signal(areas, s))
        .collect();
    let mean_standard_signal = mean(&standard_signals).unwrap_or(0.0);

    compounds
        .iter()
        .map(|compound| {
            if compound.name == internal_standard.name {
                return (compound.name.clone(), 1.0);
            }

            let pattern = compound.mm_files.as_deref().unwrap_or("");
            let own_samples = resolve_standard_samples(Some(pattern), samples);
            if own_samples.is_empty() {
                log::warn!("no standard mixture samples for {}, response factor 1.0", compound.name);
                return (compound.name.clone(), 1.0);
            }

            let Some(concentration) = compound.amount_in_std_mix else {
                log::warn!("no standard mixture concentration for {}, response factor 1.0", compound.name);
                return (compound.name.clone(), 1.0);
            };
            let signals: Vec<f64> = own_samples.iter().map(|s| areas.total(s, &compound.name)).collect();
            let mean_signal = mean(&signals).unwrap_or(0.0);

            match response_factor(mean_signal, concentration, mean_standard_signal, standard_concentration) {
                Some(factor) => {
                    log::debug!("response factor of {}: {:.6}", compound.name, factor);
                    (compound.name.clone(), factor)
                }
                None => {
                    log::warn!(
                        "could not calculate response factor for {} (signal {:.3}, concentration {}, standard signal {:.3}, standard concentration {}), using 1.0",
                        compound.name,
                        mean_signal,
                        concentration,
                        mean_standard_signal,
                        standard_concentration
                    );
                    (compound.name.clone(), 1.0)
                }
            }
        })
        .collect()
}

/// Internal standard amounts resolved for one analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardAmounts {
    pub standard: InternalStandard,
    /// Amount spiked into regular samples.
    pub int_std_amount: f64,
    /// Amount present in the internal standard's own standard mixture samples.
    pub amount_in_std_mix: f64,
    pub standard_samples: BTreeSet<String>,
}

impl StandardAmounts {
    pub fn amount_for(&self, sample: &str) -> f64 {
        if self.standard_samples.contains(sample) {
            self.amount_in_std_mix
        } else {
            self.int_std_amount
        }
    }
}

/// Background ratios, response factors and background enrichments of one analysis pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMaps {
    pub background_ratios: HashMap<String, f64>,
    pub response_factors: HashMap<String, f64>,
    /// Mean label enrichment (%) of each compound over its standard mixture samples.
    pub background_enrichment: HashMap<String, f64>,
    pub standard: Option<StandardAmounts>,
}

impl CalibrationMaps {
    /// build every map from the corrected areas
    ///
    /// Arguments:
    ///
    /// * `compounds` - all compounds of the analysis
    /// * `areas` - corrected (or raw fallback) areas
    /// * `samples` - every non-deleted sample name
    /// * `internal_standard` - reference compound, if any
    ///
    /// Returns:
    ///
    /// * `CalibrationMaps` - or an error if the internal standard is unknown or lacks an amount
    pub fn build(
        compounds: &[Compound],
        areas: &AreaTable,
        samples: &[String],
        internal_standard: Option<&InternalStandard>,
    ) -> Result<Self, CalibrationError> {
        let background_ratios = background_ratios(compounds, areas, samples);
        let background_enrichment = compounds
            .iter()
            .map(|compound| (compound.name.clone(), background_enrichment(compound, areas, samples)))
            .collect();

        let (response_factors, standard) = match internal_standard {
            Some(standard) => {
                let compound = compounds
                    .iter()
                    .find(|c| c.name == standard.name)
                    .ok_or_else(|| CalibrationError::UnknownInternalStandard(standard.name.clone()))?;
                let int_std_amount = compound.int_std_amount.ok_or_else(|| CalibrationError::MissingAmount {
                    name: standard.name.clone(),
                    field: "int_std_amount",
                })?;
                let amount_in_std_mix = compound.amount_in_std_mix.ok_or_else(|| CalibrationError::MissingAmount {
                    name: standard.name.clone(),
                    field: "amount_in_std_mix",
                })?;
                if let Some(field) = compound.mm_files.as_deref() {
                    StandardMixPattern::parse(field)?;
                }

                let amounts = StandardAmounts {
                    standard: standard.clone(),
                    int_std_amount,
                    amount_in_std_mix,
                    standard_samples: resolve_standard_samples(compound.mm_files.as_deref(), samples),
                };
                (response_factors(compounds, areas, samples, standard), Some(amounts))
            }
            None => (HashMap::new(), None),
        };

        Ok(CalibrationMaps {
            background_ratios,
            response_factors,
            background_enrichment,
            standard,
        })
    }

    pub fn background_ratio(&self, compound: &str) -> f64 {
        self.background_ratios.get(compound).copied().unwrap_or(0.0)
    }

    pub fn response_factor(&self, compound: &str) -> f64 {
        self.response_factors.get(compound).copied().unwrap_or(1.0)
    }

    /// calibrated abundance of a compound in a sample
    ///
    /// `total × (is_amount / is_signal) / response_factor`; `0.0` without an internal standard
    /// or when the reference signal or the factor is not positive. The internal standard's
    /// own abundance is its known amount.
    pub fn abundance(&self, sample: &str, compound: &str, areas: &AreaTable) -> f64 {
        let Some(amounts) = &self.standard else {
            return 0.0;
        };

        let amount = amounts.amount_for(sample);
        if compound == amounts.standard.name {
            return amount.max(0.0);
        }

        let standard_signal = amounts.standard.reference_signal(areas, sample);
        let factor = self.response_factor(compound);
        if standard_signal > 0.0 && factor > 0.0 {
            areas.total(sample, compound) * (amount / standard_signal) / factor
        } else {
            0.0
        }
    }

    pub fn label_incorporation(&self, sample: &str, compound: &str, areas: &AreaTable) -> f64 {
        label_incorporation(areas.areas_or_zero(sample, compound), self.background_ratio(compound))
    }

    /// enrichment of a sample above the compound's standard mixture enrichment, clamped at 0
    pub fn background_corrected_enrichment(&self, sample: &str, compound: &Compound, areas: &AreaTable) -> f64 {
        let enrichment = carbon_enrichment(areas.areas_or_zero(sample, &compound.name), compound.label_atoms);
        let background = self.background_enrichment.get(&compound.name).copied().unwrap_or(0.0);
        (enrichment - background).max(0.0)
    }
}

/// mean enrichment over the compound's standard mixture samples that have signal
pub fn background_enrichment(compound: &Compound, areas: &AreaTable, samples: &[String]) -> f64 {
    if compound.label_atoms == 0 {
        return 0.0;
    }
    let enrichments: Vec<f64> = resolve_standard_samples(compound.mm_files.as_deref(), samples)
        .iter()
        .map(|s| areas.areas_or_zero(s, &compound.name))
        .filter(|a| a.iter().sum::<f64>() > 0.0)
        .map(|a| carbon_enrichment(a, compound.label_atoms))
        .collect();
    mean(&enrichments).unwrap_or(0.0)
}
