use std::io::Write;

use isocore::algorithm::calibration::CalibrationMaps;
use isocore::algorithm::metrics::{carbon_enrichment, is_valid_peak, isotope_ratios};
use isocore::data::areas::AreaTable;
use isocore::data::compound::Compound;
use serde::{Deserialize, Serialize};

use crate::pipeline::AreaSet;

pub const RAW_VALUES: &str = "Raw Values";
pub const CORRECTED_VALUES: &str = "Corrected Values";
pub const ISOTOPE_RATIOS: &str = "Isotope Ratios";
pub const LABEL_INCORPORATION: &str = "% Label Incorporation";
pub const CARBONS_LABELLED: &str = "% Carbons Labelled";
pub const BACKGROUND_CORRECTED_ENRICHMENT: &str = "Background-Corrected Enrichment";
pub const ABUNDANCES: &str = "Abundances";

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),
}

/// A sheet column, either a whole compound or one of its isotopologues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub compound: String,
    pub isotopologue: Option<usize>,
}

impl Column {
    fn compound(name: &str) -> Self {
        Column {
            compound: name.to_string(),
            isotopologue: None,
        }
    }

    fn isotopologue(name: &str, k: usize) -> Self {
        Column {
            compound: name.to_string(),
            isotopologue: Some(k),
        }
    }

    /// Header text, e.g. `lactate` or `lactate M+2`.
    pub fn header(&self) -> String {
        match self.isotopologue {
            Some(k) => format!("{} M+{}", self.compound, k),
            None => self.compound.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetRow {
    pub sample: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    pub columns: Vec<Column>,
    pub rows: Vec<SheetRow>,
}

impl Sheet {
    /// Value of a cell, `None` for an unknown sample or column.
    pub fn value(&self, sample: &str, column: &str) -> Option<f64> {
        let index = self.columns.iter().position(|c| c.header() == column)?;
        self.rows
            .iter()
            .find(|row| row.sample == sample)
            .and_then(|row| row.values.get(index).copied())
    }
}

/// A compound peak below the configured fraction of the internal standard reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidPeak {
    pub sample: String,
    pub compound: String,
    pub total: f64,
    pub reference: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub sheets: Vec<Sheet>,
    pub invalid_peaks: Vec<InvalidPeak>,
}

impl Report {
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }
}

fn isotopologue_sheet<F>(name: &str, compounds: &[Compound], samples: &[String], cells: F) -> Sheet
where
    F: Fn(&str, &Compound) -> Vec<f64>,
{
    let columns = compounds
        .iter()
        .flat_map(|c| (0..c.num_isotopologues()).map(move |k| Column::isotopologue(&c.name, k)))
        .collect();

    let rows = samples
        .iter()
        .map(|sample| {
            let mut values = Vec::new();
            for compound in compounds {
                let n = compound.num_isotopologues();
                let mut cells = cells(sample, compound);
                cells.resize(n, 0.0);
                values.extend(cells);
            }
            SheetRow {
                sample: sample.clone(),
                values,
            }
        })
        .collect();

    Sheet {
        name: name.to_string(),
        columns,
        rows,
    }
}

fn compound_sheet<'a, I, F>(name: &str, compounds: I, samples: &[String], cell: F) -> Sheet
where
    I: IntoIterator<Item = &'a Compound>,
    F: Fn(&str, &Compound) -> f64,
{
    let compounds: Vec<&Compound> = compounds.into_iter().collect();
    let columns = compounds.iter().map(|c| Column::compound(&c.name)).collect();
    let rows = samples
        .iter()
        .map(|sample| SheetRow {
            sample: sample.clone(),
            values: compounds.iter().map(|c| cell(sample, c)).collect(),
        })
        .collect();

    Sheet {
        name: name.to_string(),
        columns,
        rows,
    }
}

fn area_cells(table: &AreaTable) -> impl Fn(&str, &Compound) -> Vec<f64> + '_ {
    move |sample, compound| table.areas_or_zero(sample, &compound.name).to_vec()
}

/// Compounds whose corrected peak is smaller than `min_peak_ratio` of the internal standard.
pub fn invalid_peaks(
    compounds: &[Compound],
    samples: &[String],
    corrected: &AreaTable,
    maps: &CalibrationMaps,
    min_peak_ratio: f64,
) -> Vec<InvalidPeak> {
    let Some(amounts) = &maps.standard else {
        return Vec::new();
    };

    let mut invalid = Vec::new();
    for sample in samples {
        let reference = amounts.standard.reference_signal(corrected, sample);
        for compound in compounds.iter().filter(|c| c.name != amounts.standard.name) {
            let total = corrected.total(sample, &compound.name);
            if !is_valid_peak(total, reference, min_peak_ratio) {
                invalid.push(InvalidPeak {
                    sample: sample.clone(),
                    compound: compound.name.clone(),
                    total,
                    reference,
                });
            }
        }
    }
    invalid
}

/// Assemble every result sheet of an analysis.
///
/// Label sheets only carry labelled compounds. The abundance sheet and the peak validation
/// need an internal standard and are skipped without one.
pub fn build_report(
    compounds: &[Compound],
    samples: &[String],
    areas: &AreaSet,
    maps: &CalibrationMaps,
    min_peak_ratio: f64,
) -> Report {
    let corrected = &areas.corrected;
    let labelled = || compounds.iter().filter(|c| c.is_labelled());

    let mut sheets = vec![
        isotopologue_sheet(RAW_VALUES, compounds, samples, area_cells(&areas.raw)),
        isotopologue_sheet(CORRECTED_VALUES, compounds, samples, area_cells(corrected)),
        isotopologue_sheet(ISOTOPE_RATIOS, compounds, samples, |sample, compound| {
            isotope_ratios(corrected.areas_or_zero(sample, &compound.name))
        }),
        compound_sheet(LABEL_INCORPORATION, labelled(), samples, |sample, compound| {
            maps.label_incorporation(sample, &compound.name, corrected)
        }),
        compound_sheet(CARBONS_LABELLED, labelled(), samples, |sample, compound| {
            carbon_enrichment(corrected.areas_or_zero(sample, &compound.name), compound.label_atoms)
        }),
        compound_sheet(BACKGROUND_CORRECTED_ENRICHMENT, labelled(), samples, |sample, compound| {
            maps.background_corrected_enrichment(sample, compound, corrected)
        }),
    ];

    if maps.standard.is_some() {
        sheets.push(compound_sheet(ABUNDANCES, compounds, samples, |sample, compound| {
            maps.abundance(sample, &compound.name, corrected)
        }));
    }

    Report {
        sheets,
        invalid_peaks: invalid_peaks(compounds, samples, corrected, maps, min_peak_ratio),
    }
}

/// Destination of a finished report.
pub trait ReportSink {
    fn write_report(&mut self, report: &Report) -> Result<(), ReportError>;
}

/// Writes the report as pretty printed JSON.
pub struct JsonReportSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonReportSink<W> {
    pub fn new(writer: W) -> Self {
        JsonReportSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ReportSink for JsonReportSink<W> {
    fn write_report(&mut self, report: &Report) -> Result<(), ReportError> {
        serde_json::to_writer_pretty(&mut self.writer, report)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isocore::algorithm::calibration::InternalStandard;

    fn fixture() -> (Vec<Compound>, Vec<String>, AreaSet) {
        let mut lactate = Compound::new("lactate", 219.0, 9.0, 0.1, 0.1).with_label_atoms(1);
        lactate.mm_files = Some("mix".to_string());
        lactate.amount_in_std_mix = Some(2.0);
        let mut standard = Compound::new("scyllo", 318.0, 20.0, 0.1, 0.1);
        standard.mm_files = Some("mix".to_string());
        standard.amount_in_std_mix = Some(1.0);
        standard.int_std_amount = Some(4.0);

        let samples = vec!["mix".to_string(), "s1".to_string()];
        let mut areas = AreaSet::default();
        for table in [&mut areas.raw, &mut areas.corrected] {
            table.insert("mix", "lactate", vec![90.0, 10.0]);
            table.insert("mix", "scyllo", vec![50.0]);
            table.insert("s1", "lactate", vec![1.0, 1.0]);
            table.insert("s1", "scyllo", vec![100.0]);
        }
        (vec![lactate, standard], samples, areas)
    }

    #[test]
    fn test_sheets_without_standard() {
        let (compounds, samples, areas) = fixture();
        let maps = CalibrationMaps::build(&compounds, &areas.corrected, &samples, None).unwrap();
        let report = build_report(&compounds, &samples, &areas, &maps, 0.05);

        assert!(report.sheet(ABUNDANCES).is_none());
        assert!(report.invalid_peaks.is_empty());

        let raw = report.sheet(RAW_VALUES).unwrap();
        assert_eq!(raw.columns.len(), 3);
        assert_eq!(raw.value("mix", "lactate M+1"), Some(10.0));
        assert_eq!(raw.value("s1", "scyllo M+0"), Some(100.0));

        let ratios = report.sheet(ISOTOPE_RATIOS).unwrap();
        assert_eq!(ratios.value("s1", "lactate M+0"), Some(0.5));

        let labelled = report.sheet(CARBONS_LABELLED).unwrap();
        assert_eq!(labelled.columns, vec![Column::compound("lactate")]);
        assert_eq!(labelled.value("s1", "lactate"), Some(50.0));

        let enrichment = report.sheet(BACKGROUND_CORRECTED_ENRICHMENT).unwrap();
        assert!((enrichment.value("s1", "lactate").unwrap() - 40.0).abs() < 1e-9);
        assert_eq!(enrichment.value("mix", "lactate"), Some(0.0));
    }

    #[test]
    fn test_abundances_and_validation() {
        let (compounds, samples, areas) = fixture();
        let standard = InternalStandard::new("scyllo", 0);
        let maps = CalibrationMaps::build(&compounds, &areas.corrected, &samples, Some(&standard)).unwrap();
        let report = build_report(&compounds, &samples, &areas, &maps, 0.05);

        let abundances = report.sheet(ABUNDANCES).unwrap();
        assert_eq!(abundances.value("s1", "scyllo"), Some(4.0));
        // response factor (100 / 2) / (50 / 1) = 1
        assert!((abundances.value("s1", "lactate").unwrap() - 0.08).abs() < 1e-12);

        assert_eq!(report.invalid_peaks.len(), 1);
        assert_eq!(report.invalid_peaks[0].sample, "s1");
        assert_eq!(report.invalid_peaks[0].compound, "lactate");
    }

    #[test]
    fn test_json_sink() {
        let (compounds, samples, areas) = fixture();
        let maps = CalibrationMaps::build(&compounds, &areas.corrected, &samples, None).unwrap();
        let report = build_report(&compounds, &samples, &areas, &maps, 0.05);

        let mut sink = JsonReportSink::new(Vec::new());
        sink.write_report(&report).unwrap();
        let parsed: Report = serde_json::from_slice(&sink.into_inner()).unwrap();
        assert_eq!(parsed.sheets.len(), report.sheets.len());
        assert_eq!(parsed.sheet(RAW_VALUES), report.sheet(RAW_VALUES));
    }
}
