use std::ops::Range;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScanDataError {
    #[error("array length mismatch: {0}")]
    LengthMismatch(String),
    #[error("scan {scan} spans points {start}..{end} but only {available} points exist")]
    ScanOutOfBounds {
        scan: usize,
        start: usize,
        end: usize,
        available: usize,
    },
}

/// Raw centroided scan data of one sample, as supplied by a raw file reader.
///
/// Masses and intensities of all scans are concatenated; scan `i` owns the points
/// `scan_index[i]..scan_index[i] + point_count[i]`. Scan times are in seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanData {
    pub sample_name: String,
    pub scan_time: Vec<f64>,
    pub mass: Vec<f64>,
    pub intensity: Vec<f64>,
    pub scan_index: Vec<usize>,
    pub point_count: Vec<usize>,
}

impl ScanData {
    pub fn new(
        sample_name: &str,
        scan_time: Vec<f64>,
        mass: Vec<f64>,
        intensity: Vec<f64>,
        scan_index: Vec<usize>,
        point_count: Vec<usize>,
    ) -> Result<Self, ScanDataError> {
        if mass.len() != intensity.len() {
            return Err(ScanDataError::LengthMismatch(format!(
                "{} masses vs {} intensities",
                mass.len(),
                intensity.len()
            )));
        }
        if scan_time.len() != scan_index.len() || scan_time.len() != point_count.len() {
            return Err(ScanDataError::LengthMismatch(format!(
                "{} scan times, {} scan indices, {} point counts",
                scan_time.len(),
                scan_index.len(),
                point_count.len()
            )));
        }
        for (scan, (&start, &count)) in scan_index.iter().zip(point_count.iter()).enumerate() {
            if start + count > mass.len() {
                return Err(ScanDataError::ScanOutOfBounds {
                    scan,
                    start,
                    end: start + count,
                    available: mass.len(),
                });
            }
        }

        Ok(ScanData {
            sample_name: sample_name.to_string(),
            scan_time,
            mass,
            intensity,
            scan_index,
            point_count,
        })
    }

    /// Build scan data from per-scan `(time, masses, intensities)` triples.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use isocore::data::scan::ScanData;
    /// let scans = ScanData::from_scans("s1", vec![
    ///     (60.0, vec![100.0, 101.0], vec![5.0, 1.0]),
    ///     (61.0, vec![100.0], vec![7.0]),
    /// ]);
    /// assert_eq!(scans.num_scans(), 2);
    /// assert_eq!(scans.scan_index, vec![0, 2]);
    /// assert_eq!(scans.scan_range(1), 2..3);
    /// ```
    pub fn from_scans(sample_name: &str, scans: Vec<(f64, Vec<f64>, Vec<f64>)>) -> Self {
        let mut data = ScanData {
            sample_name: sample_name.to_string(),
            scan_time: Vec::with_capacity(scans.len()),
            mass: Vec::new(),
            intensity: Vec::new(),
            scan_index: Vec::with_capacity(scans.len()),
            point_count: Vec::with_capacity(scans.len()),
        };

        for (time, mass, intensity) in scans {
            let count = mass.len().min(intensity.len());
            data.scan_time.push(time);
            data.scan_index.push(data.mass.len());
            data.point_count.push(count);
            data.mass.extend_from_slice(&mass[..count]);
            data.intensity.extend_from_slice(&intensity[..count]);
        }

        data
    }

    pub fn num_scans(&self) -> usize {
        self.scan_time.len()
    }

    /// Point range of scan `scan`, clamped to the available points.
    pub fn scan_range(&self, scan: usize) -> Range<usize> {
        let start = self.scan_index[scan].min(self.mass.len());
        let end = (start + self.point_count[scan]).min(self.mass.len());
        start..end
    }

    /// Scan acquisition times converted to minutes.
    pub fn times_minutes(&self) -> Vec<f64> {
        self.scan_time.iter().map(|t| t / 60.0).collect()
    }
}
