//! TOML configuration file support.
//!
//! Every setting is optional; anything left out falls back to the defaults of the numeric core.
//! The `[extraction]` section is read by library callers of `pipeline::extract_all`; the
//! `isoquant` binary works on databases that already hold extracted EICs and ignores it.
//!
//! ```toml
//! # isoquant.toml
//! [extraction]
//! mass_tolerance = 0.2
//! rt_window = 0.2
//!
//! [correction]
//! label_purity = [0.01, 0.99]
//! condition_threshold = 1e10
//! min_direct_points = 10
//!
//! [integration]
//! boundary = "strict"
//! method = "time"
//!
//! [calibration]
//! internal_standard = "scyllo-inositol"
//! internal_standard_isotope = 0
//! min_peak_ratio = 0.05
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use isocore::algorithm::calibration::InternalStandard;
use isocore::algorithm::correction::CorrectorConfig;
use isocore::algorithm::extraction::ExtractionParams;
use isocore::algorithm::integration::{BoundaryPolicy, IntegrationMethod};
use serde::Deserialize;

/// Default minimum compound area relative to the internal standard reference peak.
pub const DEFAULT_MIN_PEAK_RATIO: f64 = 0.05;

/// Root configuration structure for isoquant.toml files.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub correction: CorrectionConfig,
    #[serde(default)]
    pub integration: IntegrationConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExtractionConfig {
    pub mass_tolerance: Option<f64>,
    /// Half width of the retention time window in minutes.
    pub rt_window: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CorrectionConfig {
    /// Unlabelled and labelled fraction at a labelled position.
    pub label_purity: Option<[f64; 2]>,
    pub condition_threshold: Option<f64>,
    pub min_direct_points: Option<usize>,
    pub max_iterations: Option<usize>,
    pub tolerance: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IntegrationConfig {
    pub boundary: Option<BoundaryPolicy>,
    pub method: Option<IntegrationMethod>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CalibrationConfig {
    pub internal_standard: Option<String>,
    pub internal_standard_isotope: Option<usize>,
    pub min_peak_ratio: Option<f64>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }

    /// Parameters for [`crate::pipeline::extract_all`].
    pub fn extraction_params(&self) -> ExtractionParams {
        let defaults = ExtractionParams::default();
        ExtractionParams {
            mass_tolerance: self.extraction.mass_tolerance.unwrap_or(defaults.mass_tolerance),
            rt_window: self.extraction.rt_window.unwrap_or(defaults.rt_window),
        }
    }

    pub fn corrector_config(&self) -> CorrectorConfig {
        let defaults = CorrectorConfig::default();
        let c = &self.correction;
        CorrectorConfig {
            label_purity: c.label_purity.unwrap_or(defaults.label_purity),
            condition_threshold: c.condition_threshold.unwrap_or(defaults.condition_threshold),
            min_direct_points: c.min_direct_points.unwrap_or(defaults.min_direct_points),
            max_iterations: c.max_iterations.unwrap_or(defaults.max_iterations),
            tolerance: c.tolerance.unwrap_or(defaults.tolerance),
        }
    }

    pub fn boundary_policy(&self) -> BoundaryPolicy {
        self.integration.boundary.unwrap_or_default()
    }

    pub fn integration_method(&self) -> IntegrationMethod {
        self.integration.method.unwrap_or_default()
    }

    pub fn internal_standard(&self) -> Option<InternalStandard> {
        self.calibration
            .internal_standard
            .as_deref()
            .map(|name| InternalStandard::new(name, self.calibration.internal_standard_isotope.unwrap_or(0)))
    }

    pub fn min_peak_ratio(&self) -> f64 {
        self.calibration.min_peak_ratio.unwrap_or(DEFAULT_MIN_PEAK_RATIO)
    }
}
