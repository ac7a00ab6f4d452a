use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::chromatogram::Chromatogram;
use crate::data::compound::{Compound, RetentionOverride};
use crate::data::scan::ScanData;

pub const DEFAULT_MASS_TOLERANCE: f64 = 0.2;
pub const DEFAULT_RT_WINDOW: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtractionParams {
    /// Shift subtracted from each measured m/z before rounding it to a nominal bin.
    pub mass_tolerance: f64,
    /// Half width of the retention time window, in minutes.
    pub rt_window: f64,
}

impl Default for ExtractionParams {
    fn default() -> Self {
        ExtractionParams {
            mass_tolerance: DEFAULT_MASS_TOLERANCE,
            rt_window: DEFAULT_RT_WINDOW,
        }
    }
}

/// What to extract: a nominal mass ladder `mass0 .. mass0 + label_atoms` around a retention time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionTarget {
    pub mass0: f64,
    pub retention_time: f64,
    pub label_atoms: u32,
}

impl ExtractionTarget {
    pub fn for_compound(compound: &Compound, overrides: Option<&RetentionOverride>) -> Self {
        ExtractionTarget {
            mass0: compound.mass0,
            retention_time: compound.effective_retention_time(overrides),
            label_atoms: compound.label_atoms,
        }
    }
}

/// Result of an extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Found(Chromatogram),
    /// No scan fell inside the retention time window. Nothing is stored for such a pair.
    Empty,
}

impl Extraction {
    pub fn found(self) -> Option<Chromatogram> {
        match self {
            Extraction::Found(eic) => Some(eic),
            Extraction::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Extraction::Empty)
    }
}

/// round half up, `floor(x + 0.5)`
///
/// # Examples
///
/// ```
/// use isocore::algorithm::extraction::round_half_up;
///
/// assert_eq!(round_half_up(100.5), 101);
/// assert_eq!(round_half_up(100.49), 100);
/// assert_eq!(round_half_up(-0.5), 0);
/// ```
pub fn round_half_up(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

/// extract the isotopologue EICs of a target from the scans of one sample
///
/// Scans with `rt - rt_window <= t <= rt + rt_window` (in minutes) are selected. Within each
/// selected scan every point is assigned to the nominal bin `round_half_up(mass - mass_tolerance)`
/// and summed into isotopologue `k` when that bin equals `round_half_up(mass0 + k)`.
///
/// Arguments:
///
/// * `target` - mass ladder and retention time
/// * `scans` - raw scan data, scan times in seconds
/// * `params` - mass tolerance and retention time window
///
/// Returns:
///
/// * `Extraction` - `Found` with one trace per isotopologue, or `Empty` if no scan was selected
///
/// # Examples
///
/// ```
/// use isocore::algorithm::extraction::{extract_eic, ExtractionParams, ExtractionTarget};
/// use isocore::data::scan::ScanData;
///
/// let scans = ScanData::from_scans("s1", vec![
///     (600.0, vec![100.1, 101.2, 150.0], vec![10.0, 2.0, 99.0]),
///     (606.0, vec![100.0, 101.1], vec![12.0, 3.0]),
/// ]);
/// let target = ExtractionTarget { mass0: 100.0, retention_time: 10.0, label_atoms: 1 };
/// let eic = extract_eic(&target, &scans, &ExtractionParams::default()).found().unwrap();
/// assert_eq!(eic.trace(0), &[10.0, 12.0]);
/// assert_eq!(eic.trace(1), &[2.0, 3.0]);
/// ```
pub fn extract_eic(target: &ExtractionTarget, scans: &ScanData, params: &ExtractionParams) -> Extraction {
    let times = scans.times_minutes();
    let lower = target.retention_time - params.rt_window;
    let upper = target.retention_time + params.rt_window;

    let selected: Vec<usize> = (0..scans.num_scans())
        .filter(|&i| times[i] >= lower && times[i] <= upper)
        .collect();

    if selected.is_empty() {
        log::debug!(
            "{}: no scans between {:.3} and {:.3} min for mass {}",
            scans.sample_name,
            lower,
            upper,
            target.mass0
        );
        return Extraction::Empty;
    }

    let n_isotopologues = target.label_atoms as usize + 1;
    let bins: Vec<i64> = (0..n_isotopologues)
        .map(|k| round_half_up(target.mass0 + k as f64))
        .collect();

    let per_scan: Vec<Vec<f64>> = selected
        .par_iter()
        .map(|&scan| {
            let mut sums = vec![0.0; n_isotopologues];
            for point in scans.scan_range(scan) {
                let bin = round_half_up(scans.mass[point] - params.mass_tolerance);
                for (k, &target_bin) in bins.iter().enumerate() {
                    if bin == target_bin {
                        sums[k] += scans.intensity[point];
                    }
                }
            }
            sums
        })
        .collect();

    let n_points = selected.len();
    let mut intensity = vec![0.0; n_isotopologues * n_points];
    for (t, sums) in per_scan.iter().enumerate() {
        for (k, value) in sums.iter().enumerate() {
            intensity[k * n_points + t] = *value;
        }
    }
    let time: Vec<f64> = selected.iter().map(|&i| times[i]).collect();

    match Chromatogram::new(time, intensity, n_isotopologues) {
        Ok(eic) => Extraction::Found(eic),
        Err(e) => {
            log::error!("{}: {}", scans.sample_name, e);
            Extraction::Empty
        }
    }
}
