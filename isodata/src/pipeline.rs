use std::collections::HashMap;

use isocore::algorithm::correction::{CorrectionError, LabelSignature, NaturalAbundanceCorrector};
use isocore::algorithm::extraction::{extract_eic, Extraction, ExtractionParams, ExtractionTarget};
use isocore::algorithm::integration::{peak_areas, BoundaryPolicy, IntegrationMethod, IntegrationOptions};
use isocore::data::areas::AreaTable;
use isocore::data::chromatogram::Chromatogram;
use isocore::data::compound::{Compound, RetentionOverride};
use isocore::data::scan::ScanData;
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::store::{ChromatogramStore, OverrideMap, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no compounds defined")]
    NoCompounds,
    #[error("no samples loaded")]
    NoSamples,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub stored: usize,
    pub empty: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionSummary {
    pub corrected: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Raw and corrected areas of one analysis pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AreaSet {
    pub raw: AreaTable,
    /// Corrected areas, with raw areas standing in for compounds without correction.
    pub corrected: AreaTable,
}

fn override_for<'a>(overrides: &'a OverrideMap, compound: &str, sample: &str) -> Option<&'a RetentionOverride> {
    overrides.get(&(compound.to_string(), sample.to_string()))
}

/// Extract and store the raw EIC of every compound in every sample.
///
/// Samples are processed in parallel; the EICs are written afterwards on the calling thread.
/// Pairs without any scan in the retention time window are counted and skipped.
pub fn extract_all(
    store: &ChromatogramStore,
    scans: &[ScanData],
    params: &ExtractionParams,
) -> Result<ExtractionSummary, PipelineError> {
    let compounds = store.read_compounds()?;
    if compounds.is_empty() {
        return Err(PipelineError::NoCompounds);
    }
    if scans.is_empty() {
        return Err(PipelineError::NoSamples);
    }
    let overrides = store.read_overrides()?;

    let extracted: Vec<(String, String, Extraction)> = scans
        .par_iter()
        .flat_map_iter(|sample| {
            let overrides = &overrides;
            compounds.iter().map(move |compound| {
                let target = ExtractionTarget::for_compound(
                    compound,
                    override_for(overrides, &compound.name, &sample.sample_name),
                );
                (
                    sample.sample_name.clone(),
                    compound.name.clone(),
                    extract_eic(&target, sample, params),
                )
            })
        })
        .collect();

    let mut summary = ExtractionSummary::default();
    for (sample, compound, extraction) in extracted {
        match extraction {
            Extraction::Found(eic) => {
                store.write_eic(&sample, &compound, &eic)?;
                summary.stored += 1;
            }
            Extraction::Empty => summary.empty += 1,
        }
    }

    info!("extracted {} EICs, {} without scans in window", summary.stored, summary.empty);
    Ok(summary)
}

/// Correct every labelled compound that has a formula.
///
/// Per compound, all samples without a stored correction (or all samples when `force` is set)
/// are corrected in parallel and written in one transaction. Failures of single pairs are
/// logged and counted, they never abort the batch.
pub fn process_all_corrections(
    store: &mut ChromatogramStore,
    corrector: &NaturalAbundanceCorrector,
    force: bool,
) -> Result<CorrectionSummary, PipelineError> {
    let compounds = store.read_compounds()?;
    if compounds.is_empty() {
        return Err(PipelineError::NoCompounds);
    }

    let mut summary = CorrectionSummary::default();

    for compound in compounds.iter().filter(|c| c.is_labelled()) {
        let signature = match LabelSignature::for_compound(compound) {
            Ok(signature) => signature,
            Err(CorrectionError::MissingFormula(name)) => {
                warn!("{} has no formula, correction skipped", name);
                continue;
            }
            Err(e) => {
                warn!("{}: {}, correction skipped", compound.name, e);
                summary.failed += 1;
                continue;
            }
        };

        let mut pending = Vec::new();
        for (sample, trace) in store.eics_for_compound(&compound.name)? {
            if !force && store.has_correction(&sample, &compound.name)? {
                summary.skipped += 1;
                continue;
            }
            pending.push((sample, trace));
        }
        if pending.is_empty() {
            continue;
        }

        let n_isotopologues = compound.num_isotopologues();
        let results: Vec<Result<(String, Chromatogram), (String, CorrectionError)>> = pending
            .into_par_iter()
            .map(|(sample, trace)| {
                let eic = match trace.into_chromatogram(n_isotopologues) {
                    Ok(eic) => eic,
                    Err(e) => return Err((sample, CorrectionError::from(e))),
                };
                match corrector.correct(&eic, &signature) {
                    Ok(corrected) => Ok((sample, corrected)),
                    Err(e) => Err((sample, e)),
                }
            })
            .collect();

        let mut corrected = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(pair) => corrected.push(pair),
                Err((sample, e)) => {
                    warn!("failed to correct {} in {}: {}", compound.name, sample, e);
                    summary.failed += 1;
                }
            }
        }

        summary.corrected += store.write_corrected_batch(&compound.name, &corrected)?;
    }

    let stats = corrector.statistics();
    info!(
        "natural abundance correction: {} corrected, {} already done, {} failed ({} matrices, {} cache hits)",
        summary.corrected, summary.skipped, summary.failed, stats.cache.entries, stats.cache.hits
    );
    Ok(summary)
}

fn integration_options(compound: &Compound, policy: BoundaryPolicy, method: IntegrationMethod) -> IntegrationOptions {
    IntegrationOptions::new(policy, method, compound.baseline_correction)
}

/// Integrate every stored raw and corrected EIC.
///
/// Integration bounds honour the session overrides. Compounds without a corrected EIC in a
/// sample use their raw areas in the corrected table.
pub fn load_areas(
    store: &ChromatogramStore,
    policy: BoundaryPolicy,
    method: IntegrationMethod,
) -> Result<AreaSet, PipelineError> {
    let compounds = store.read_compounds()?;
    if compounds.is_empty() {
        return Err(PipelineError::NoCompounds);
    }
    let samples = store.read_samples()?;
    if samples.is_empty() {
        return Err(PipelineError::NoSamples);
    }
    let overrides = store.read_overrides()?;

    let mut areas = AreaSet::default();
    let mut fallbacks: HashMap<&str, usize> = HashMap::new();

    for compound in &compounds {
        let options = integration_options(compound, policy, method);
        for sample in &samples {
            let window = compound.integration_window(override_for(&overrides, &compound.name, sample));

            let raw = match store.read_eic(sample, &compound.name)? {
                Some(trace) => peak_areas(&trace.time, &trace.intensity, compound.label_atoms, &window, &options),
                None => continue,
            };

            let corrected = match store.read_corrected_eic(sample, &compound.name)? {
                Some(trace) => peak_areas(&trace.time, &trace.intensity, compound.label_atoms, &window, &options),
                None => {
                    if compound.is_labelled() {
                        *fallbacks.entry(compound.name.as_str()).or_insert(0) += 1;
                    }
                    raw.clone()
                }
            };

            areas.raw.insert(sample, &compound.name, raw);
            areas.corrected.insert(sample, &compound.name, corrected);
        }
    }

    for (compound, count) in fallbacks {
        warn!("{}: no corrected EIC in {} samples, raw areas used", compound, count);
    }
    Ok(areas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use isocore::chemistry::derivatization::Derivatization;
    use isocore::data::compound::Sample;

    fn store_with(compounds: &[Compound], samples: &[&str]) -> ChromatogramStore {
        let store = ChromatogramStore::open_in_memory().unwrap();
        for compound in compounds {
            store.upsert_compound(compound).unwrap();
        }
        for sample in samples {
            store.insert_sample(&Sample::new(sample, "")).unwrap();
        }
        store
    }

    fn scans(name: &str, scale: f64) -> ScanData {
        let scans = (0..21)
            .map(|i| {
                let t = 588.0 + i as f64 * 1.2;
                (t, vec![174.1, 175.1], vec![100.0 * scale, 20.0 * scale])
            })
            .collect();
        ScanData::from_scans(name, scans)
    }

    #[test]
    fn test_empty_store_is_an_error() {
        let store = ChromatogramStore::open_in_memory().unwrap();
        let result = extract_all(&store, &[scans("s1", 1.0)], &ExtractionParams::default());
        assert!(matches!(result, Err(PipelineError::NoCompounds)));
    }

    #[test]
    fn test_extract_correct_integrate() {
        let pyruvate = Compound::new("pyruvate", 174.0, 10.0, 0.1, 0.1)
            .with_label_atoms(1)
            .with_formula("C3H4O3", Derivatization::new(1, 1, 0));
        let missing = Compound::new("elsewhere", 300.0, 25.0, 0.1, 0.1);
        let no_formula = Compound::new("no_formula", 174.0, 10.0, 0.1, 0.1).with_label_atoms(1);
        let mut store = store_with(&[pyruvate, missing, no_formula], &["s1"]);

        let summary = extract_all(&store, &[scans("s1", 1.0)], &ExtractionParams::default()).unwrap();
        assert_eq!(summary, ExtractionSummary { stored: 2, empty: 1 });

        let corrector = NaturalAbundanceCorrector::default();
        let summary = process_all_corrections(&mut store, &corrector, false).unwrap();
        assert_eq!(summary.corrected, 1);
        assert_eq!(summary.failed, 0);
        // labelled but without a formula: skipped, not a failure
        assert!(!store.has_correction("s1", "no_formula").unwrap());

        // a second pass finds nothing to do
        let summary = process_all_corrections(&mut store, &corrector, false).unwrap();
        assert_eq!(summary, CorrectionSummary { corrected: 0, skipped: 1, failed: 0 });

        let areas = load_areas(&store, BoundaryPolicy::Strict, IntegrationMethod::TimeBased).unwrap();
        let raw = areas.raw.get("s1", "pyruvate").unwrap();
        let corrected = areas.corrected.get("s1", "pyruvate").unwrap();
        assert!(raw[0] > 0.0 && raw[1] > 0.0);
        assert!(corrected.iter().all(|&a| a >= 0.0));
        // natural 13C is moved out of M+1
        assert!(corrected[1] / corrected[0] < raw[1] / raw[0]);
        // uncorrected compounds report their raw areas
        assert_eq!(areas.corrected.get("s1", "no_formula"), areas.raw.get("s1", "no_formula"));
    }

    #[test]
    fn test_overrides_move_the_window() {
        let lactate = Compound::new("lactate", 174.0, 30.0, 0.1, 0.1);
        let store = store_with(&[lactate], &["s1", "s2"]);
        let over = RetentionOverride {
            retention_time: 10.0,
            loffset: 0.1,
            roffset: 0.1,
        };
        store.set_override("lactate", "s1", &over).unwrap();

        let summary = extract_all(&store, &[scans("s1", 1.0), scans("s2", 1.0)], &ExtractionParams::default()).unwrap();
        assert_eq!(summary, ExtractionSummary { stored: 1, empty: 1 });

        let areas = load_areas(&store, BoundaryPolicy::Strict, IntegrationMethod::TimeBased).unwrap();
        assert!(areas.raw.get("s1", "lactate").unwrap()[0] > 0.0);
        assert!(areas.raw.get("s2", "lactate").is_none());
    }
}
