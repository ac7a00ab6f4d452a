//! # isoquant
//!
//! Batch natural abundance correction and quantification of isotope labelled metabolites
//! stored in an isoquant SQLite database.
//!
//! ## Usage
//!
//! ```bash
//! # Correct every labelled compound that has a formula
//! isoquant correct --db experiment.db
//!
//! # Integrate, calibrate against an internal standard and write all result sheets
//! isoquant report --db experiment.db --internal-standard scyllo-inositol --out results.json
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use isocore::algorithm::calibration::{CalibrationMaps, InternalStandard};
use isocore::algorithm::correction::{MatrixCache, NaturalAbundanceCorrector};
use isocore::algorithm::integration::{BoundaryPolicy, IntegrationMethod};
use isodata::config::Config;
use isodata::data::store::ChromatogramStore;
use isodata::pipeline::{load_areas, process_all_corrections};
use isodata::report::{build_report, JsonReportSink, ReportSink};

/// isoquant - natural abundance correction and quantification of labelled metabolites
#[derive(Parser)]
#[command(name = "isoquant")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Correct all stored EICs for natural isotope abundance
    Correct {
        /// Database file
        #[arg(long, value_name = "DB")]
        db: PathBuf,

        /// Recompute corrections that already exist
        #[arg(long)]
        force: bool,
    },

    /// Integrate peaks, calibrate and write the result sheets
    Report {
        /// Database file
        #[arg(long, value_name = "DB")]
        db: PathBuf,

        /// Internal standard compound, overrides the config file
        #[arg(long, value_name = "NAME")]
        internal_standard: Option<String>,

        /// Output JSON file (defaults to stdout)
        #[arg(short, long, value_name = "OUTPUT")]
        out: Option<PathBuf>,

        /// Integrate over unit spacing instead of the time axis
        #[arg(long)]
        legacy_integration: bool,

        /// Include points on the integration window bounds
        #[arg(long)]
        inclusive: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Correct { db, force } => run_correct(&config, &db, force),
        Commands::Report {
            db,
            internal_standard,
            out,
            legacy_integration,
            inclusive,
        } => run_report(&config, &db, internal_standard, out, legacy_integration, inclusive),
    }
}

fn open_store(db: &Path) -> Result<ChromatogramStore> {
    if !db.exists() {
        bail!("Database file not found: {}", db.display());
    }
    ChromatogramStore::open(db).with_context(|| format!("Failed to open database: {}", db.display()))
}

/// Correct every labelled compound
fn run_correct(config: &Config, db: &Path, force: bool) -> Result<()> {
    let mut store = open_store(db)?;
    let corrector = NaturalAbundanceCorrector::new(config.corrector_config(), Arc::new(MatrixCache::new()));

    let summary = process_all_corrections(&mut store, &corrector, force).context("Correction failed")?;

    let stats = corrector.statistics();
    info!(
        "Matrix cache: {} entries, {} hits, {} misses ({:.1}% hit rate)",
        stats.cache.entries,
        stats.cache.hits,
        stats.cache.misses,
        stats.cache.hit_rate() * 100.0
    );
    info!(
        "Solvers: {} direct solves, {} constrained optimizations",
        stats.direct_solves, stats.optimizations
    );

    println!(
        "Corrected {} EICs ({} already corrected, {} failed)",
        summary.corrected, summary.skipped, summary.failed
    );
    Ok(())
}

/// Integrate, calibrate and write every result sheet
fn run_report(
    config: &Config,
    db: &Path,
    internal_standard: Option<String>,
    out: Option<PathBuf>,
    legacy_integration: bool,
    inclusive: bool,
) -> Result<()> {
    let store = open_store(db)?;

    let policy = if inclusive {
        BoundaryPolicy::Inclusive
    } else {
        config.boundary_policy()
    };
    let method = if legacy_integration {
        IntegrationMethod::UnitSpacing
    } else {
        config.integration_method()
    };
    let standard = match internal_standard {
        Some(name) => Some(InternalStandard::new(
            &name,
            config.calibration.internal_standard_isotope.unwrap_or(0),
        )),
        None => config.internal_standard(),
    };

    let areas = load_areas(&store, policy, method).context("Peak integration failed")?;
    let compounds = store.read_compounds()?;
    let samples = store.read_samples()?;

    let maps = CalibrationMaps::build(&compounds, &areas.corrected, &samples, standard.as_ref())
        .context("Calibration failed")?;
    if maps.standard.is_none() {
        info!("No internal standard configured, abundances are skipped");
    }

    let report = build_report(&compounds, &samples, &areas, &maps, config.min_peak_ratio());
    for peak in &report.invalid_peaks {
        log::warn!(
            "{} in {}: area {:.3} below {:.1}% of the internal standard ({:.3})",
            peak.compound,
            peak.sample,
            peak.total,
            config.min_peak_ratio() * 100.0,
            peak.reference
        );
    }

    match out {
        Some(path) => {
            let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
            JsonReportSink::new(BufWriter::new(file)).write_report(&report)?;
            info!("Report written to {}", path.display());
        }
        None => JsonReportSink::new(io::stdout().lock()).write_report(&report)?,
    }
    Ok(())
}
