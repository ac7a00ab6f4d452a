/// normalised isotopologue distribution, `area_i / Σ area`
///
/// # Examples
///
/// ```
/// use isocore::algorithm::metrics::isotope_ratios;
///
/// assert_eq!(isotope_ratios(&[30.0, 10.0]), vec![0.75, 0.25]);
/// assert_eq!(isotope_ratios(&[0.0, 0.0]), vec![0.0, 0.0]);
/// ```
pub fn isotope_ratios(areas: &[f64]) -> Vec<f64> {
    let total: f64 = areas.iter().sum();
    if total > 0.0 {
        areas.iter().map(|a| a / total).collect()
    } else {
        vec![0.0; areas.len()]
    }
}

/// labelled signal over all isotopologues above M+0
pub fn labelled_signal(areas: &[f64]) -> f64 {
    areas.iter().skip(1).sum()
}

/// percentage of experimental label incorporation
///
/// The natural background expected from the standard mixture, `background_ratio × M+0`, is
/// removed from the labelled signal before it is related to the uncorrected total.
///
/// Arguments:
///
/// * `areas` - corrected areas `[M+0, M+1, ...]`
/// * `background_ratio` - background ratio of the compound
///
/// Returns:
///
/// * `f64` - percentage in `[0, 100]`, `0.0` when there is no signal
///
/// # Examples
///
/// ```
/// use isocore::algorithm::metrics::label_incorporation;
///
/// // 40 labelled, 0.1 x 60 background
/// assert!((label_incorporation(&[60.0, 40.0], 0.1) - 34.0).abs() < 1e-12);
/// ```
pub fn label_incorporation(areas: &[f64], background_ratio: f64) -> f64 {
    let total: f64 = areas.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let m0 = areas.first().copied().unwrap_or(0.0);
    let corrected = (labelled_signal(areas) - background_ratio * m0).max(0.0);
    corrected / total * 100.0
}

/// average enrichment of the label element, `Σ min(i, N)·A_i / (N·Σ A) × 100`
///
/// Returns `0.0` for unlabelled compounds and for compounds without signal.
///
/// # Examples
///
/// ```
/// use isocore::algorithm::metrics::carbon_enrichment;
///
/// assert_eq!(carbon_enrichment(&[50.0, 0.0, 0.0, 0.0, 0.0, 0.0, 50.0], 6), 50.0);
/// assert_eq!(carbon_enrichment(&[10.0], 0), 0.0);
/// ```
pub fn carbon_enrichment(areas: &[f64], label_atoms: u32) -> f64 {
    let total: f64 = areas.iter().sum();
    if label_atoms == 0 || total <= 0.0 {
        return 0.0;
    }

    let weighted: f64 = areas
        .iter()
        .enumerate()
        .map(|(i, area)| i.min(label_atoms as usize) as f64 * area)
        .sum();
    weighted / (label_atoms as f64 * total) * 100.0
}

/// whether a compound peak is large enough relative to the internal standard
///
/// `compound_total >= reference × min_ratio`; always true when the reference or the ratio
/// is not positive.
pub fn is_valid_peak(compound_total: f64, reference: f64, min_ratio: f64) -> bool {
    if reference <= 0.0 || min_ratio <= 0.0 {
        return true;
    }
    compound_total >= reference * min_ratio
}
