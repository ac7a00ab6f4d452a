use std::collections::HashMap;
use std::path::Path;

use isocore::chemistry::derivatization::Derivatization;
use isocore::data::chromatogram::{Chromatogram, ReshapeMismatch};
use isocore::data::compound::{Compound, RetentionOverride, Sample};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::data::utility::{decode_f64_blob, encode_f64_blob, DEFAULT_COMPRESSION_LEVEL};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("blob codec error: {0}")]
    Codec(#[from] std::io::Error),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS compounds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    compound_name TEXT NOT NULL UNIQUE,
    mass0 REAL NOT NULL,
    retention_time REAL NOT NULL,
    loffset REAL NOT NULL,
    roffset REAL NOT NULL,
    label_atoms INTEGER NOT NULL DEFAULT 0,
    label_type TEXT NOT NULL DEFAULT 'C',
    formula TEXT,
    tbdms INTEGER NOT NULL DEFAULT 0,
    meox INTEGER NOT NULL DEFAULT 0,
    me INTEGER NOT NULL DEFAULT 0,
    mm_files TEXT,
    amount_in_std_mix REAL,
    int_std_amount REAL,
    baseline_correction INTEGER NOT NULL DEFAULT 0,
    deleted INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS samples (
    sample_name TEXT PRIMARY KEY,
    file_path TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS eic (
    sample_name TEXT NOT NULL,
    compound_name TEXT NOT NULL,
    x_axis BLOB NOT NULL,
    y_axis BLOB NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (sample_name, compound_name)
);
CREATE TABLE IF NOT EXISTS eic_corrected (
    sample_name TEXT NOT NULL,
    compound_name TEXT NOT NULL,
    x_axis BLOB NOT NULL,
    y_axis_corrected BLOB NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (sample_name, compound_name)
);
CREATE TABLE IF NOT EXISTS session_activity (
    compound_name TEXT NOT NULL,
    sample_name TEXT NOT NULL,
    retention_time REAL NOT NULL,
    loffset REAL NOT NULL,
    roffset REAL NOT NULL,
    PRIMARY KEY (compound_name, sample_name)
);
";

const COMPOUND_COLUMNS: &str = "compound_name, mass0, retention_time, loffset, roffset, label_atoms, label_type, \
     formula, tbdms, meox, me, mm_files, amount_in_std_mix, int_std_amount, baseline_correction";

/// A stored time/intensity pair as it sits in the database.
///
/// The intensity array is not checked against the time axis here; consumers decide how to
/// treat arrays that cannot be reshaped.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTrace {
    pub time: Vec<f64>,
    pub intensity: Vec<f64>,
}

impl StoredTrace {
    pub fn into_chromatogram(self, n_isotopologues: usize) -> Result<Chromatogram, ReshapeMismatch> {
        Chromatogram::new(self.time, self.intensity, n_isotopologues)
    }
}

/// Session overrides keyed by `(compound, sample)`.
pub type OverrideMap = HashMap<(String, String), RetentionOverride>;

/// SQLite store for compounds, samples, raw and corrected EICs and session overrides.
#[derive(Debug)]
pub struct ChromatogramStore {
    pub connection: Connection,
    compression_level: i32,
}

impl ChromatogramStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let connection = Connection::open(path)?;
        Self::with_connection(connection)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let connection = Connection::open_in_memory()?;
        Self::with_connection(connection)
    }

    fn with_connection(connection: Connection) -> Result<Self, StoreError> {
        let store = ChromatogramStore {
            connection,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn initialize_schema(&self) -> Result<(), StoreError> {
        self.connection.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn upsert_compound(&self, compound: &Compound) -> Result<(), StoreError> {
        self.connection.execute(
            "INSERT INTO compounds (compound_name, mass0, retention_time, loffset, roffset, label_atoms, label_type, \
                 formula, tbdms, meox, me, mm_files, amount_in_std_mix, int_std_amount, baseline_correction, deleted) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 0) \
             ON CONFLICT(compound_name) DO UPDATE SET \
                 mass0 = excluded.mass0, retention_time = excluded.retention_time, \
                 loffset = excluded.loffset, roffset = excluded.roffset, \
                 label_atoms = excluded.label_atoms, label_type = excluded.label_type, \
                 formula = excluded.formula, tbdms = excluded.tbdms, meox = excluded.meox, me = excluded.me, \
                 mm_files = excluded.mm_files, amount_in_std_mix = excluded.amount_in_std_mix, \
                 int_std_amount = excluded.int_std_amount, baseline_correction = excluded.baseline_correction, \
                 deleted = 0",
            params![
                compound.name,
                compound.mass0,
                compound.retention_time,
                compound.loffset,
                compound.roffset,
                compound.label_atoms,
                compound.label_element,
                compound.formula,
                compound.derivatization.tbdms,
                compound.derivatization.meox,
                compound.derivatization.me,
                compound.mm_files,
                compound.amount_in_std_mix,
                compound.int_std_amount,
                compound.baseline_correction,
            ],
        )?;
        Ok(())
    }

    fn compound_from_row(row: &Row) -> rusqlite::Result<Compound> {
        Ok(Compound {
            name: row.get(0)?,
            mass0: row.get(1)?,
            retention_time: row.get(2)?,
            loffset: row.get(3)?,
            roffset: row.get(4)?,
            label_atoms: row.get(5)?,
            label_element: row.get(6)?,
            formula: row.get(7)?,
            derivatization: Derivatization::new(row.get(8)?, row.get(9)?, row.get(10)?),
            mm_files: row.get(11)?,
            amount_in_std_mix: row.get(12)?,
            int_std_amount: row.get(13)?,
            baseline_correction: row.get(14)?,
        })
    }

    /// Non-deleted compounds in insertion order.
    pub fn read_compounds(&self) -> Result<Vec<Compound>, StoreError> {
        let mut stmt = self.connection.prepare(&format!(
            "SELECT {} FROM compounds WHERE deleted = 0 ORDER BY id",
            COMPOUND_COLUMNS
        ))?;
        let compounds_iter = stmt.query_map([], Self::compound_from_row)?;
        let mut compounds = Vec::new();
        for compound in compounds_iter {
            compounds.push(compound?);
        }
        Ok(compounds)
    }

    pub fn read_compound(&self, name: &str) -> Result<Option<Compound>, StoreError> {
        let compound = self
            .connection
            .query_row(
                &format!("SELECT {} FROM compounds WHERE compound_name = ?1 AND deleted = 0", COMPOUND_COLUMNS),
                params![name],
                Self::compound_from_row,
            )
            .optional()?;
        Ok(compound)
    }

    pub fn insert_sample(&self, sample: &Sample) -> Result<(), StoreError> {
        self.connection.execute(
            "INSERT INTO samples (sample_name, file_path, deleted) VALUES (?1, ?2, 0) \
             ON CONFLICT(sample_name) DO UPDATE SET file_path = excluded.file_path, deleted = 0",
            params![sample.name, sample.file_path],
        )?;
        Ok(())
    }

    /// Soft-delete a sample; its EICs stay in the database but are no longer read.
    pub fn delete_sample(&self, name: &str) -> Result<(), StoreError> {
        self.connection
            .execute("UPDATE samples SET deleted = 1 WHERE sample_name = ?1", params![name])?;
        Ok(())
    }

    /// Names of all non-deleted samples, sorted.
    pub fn read_samples(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .connection
            .prepare("SELECT sample_name FROM samples WHERE deleted = 0 ORDER BY sample_name")?;
        let names_iter = stmt.query_map([], |row| row.get(0))?;
        let mut names = Vec::new();
        for name in names_iter {
            names.push(name?);
        }
        Ok(names)
    }

    pub fn write_eic(&self, sample: &str, compound: &str, eic: &Chromatogram) -> Result<(), StoreError> {
        let x_axis = encode_f64_blob(&eic.time, self.compression_level)?;
        let y_axis = encode_f64_blob(&eic.intensity, self.compression_level)?;
        self.connection.execute(
            "INSERT OR REPLACE INTO eic (sample_name, compound_name, x_axis, y_axis, deleted) VALUES (?1, ?2, ?3, ?4, 0)",
            params![sample, compound, x_axis, y_axis],
        )?;
        Ok(())
    }

    pub fn read_eic(&self, sample: &str, compound: &str) -> Result<Option<StoredTrace>, StoreError> {
        self.read_trace(
            "SELECT x_axis, y_axis FROM eic WHERE sample_name = ?1 AND compound_name = ?2 AND deleted = 0",
            sample,
            compound,
        )
    }

    pub fn read_corrected_eic(&self, sample: &str, compound: &str) -> Result<Option<StoredTrace>, StoreError> {
        self.read_trace(
            "SELECT x_axis, y_axis_corrected FROM eic_corrected \
             WHERE sample_name = ?1 AND compound_name = ?2 AND deleted = 0",
            sample,
            compound,
        )
    }

    fn read_trace(&self, sql: &str, sample: &str, compound: &str) -> Result<Option<StoredTrace>, StoreError> {
        let blobs: Option<(Vec<u8>, Vec<u8>)> = self
            .connection
            .query_row(sql, params![sample, compound], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;

        match blobs {
            Some((x_axis, y_axis)) => Ok(Some(StoredTrace {
                time: decode_f64_blob(&x_axis)?,
                intensity: decode_f64_blob(&y_axis)?,
            })),
            None => Ok(None),
        }
    }

    pub fn has_correction(&self, sample: &str, compound: &str) -> Result<bool, StoreError> {
        let exists: bool = self.connection.query_row(
            "SELECT EXISTS(SELECT 1 FROM eic_corrected WHERE sample_name = ?1 AND compound_name = ?2 AND deleted = 0)",
            params![sample, compound],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Store the corrected EICs of one compound in a single transaction.
    pub fn write_corrected_batch(&mut self, compound: &str, eics: &[(String, Chromatogram)]) -> Result<usize, StoreError> {
        let level = self.compression_level;
        let tx = self.connection.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO eic_corrected (sample_name, compound_name, x_axis, y_axis_corrected, deleted) \
                 VALUES (?1, ?2, ?3, ?4, 0)",
            )?;
            for (sample, eic) in eics {
                let x_axis = encode_f64_blob(&eic.time, level)?;
                let y_axis = encode_f64_blob(&eic.intensity, level)?;
                stmt.execute(params![sample, compound, x_axis, y_axis])?;
            }
        }
        tx.commit()?;
        Ok(eics.len())
    }

    /// Drop all corrected EICs of a compound, e.g. after its formula changed.
    pub fn clear_corrections(&self, compound: &str) -> Result<usize, StoreError> {
        let removed = self
            .connection
            .execute("DELETE FROM eic_corrected WHERE compound_name = ?1", params![compound])?;
        Ok(removed)
    }

    pub fn set_override(&self, compound: &str, sample: &str, retention: &RetentionOverride) -> Result<(), StoreError> {
        self.connection.execute(
            "INSERT OR REPLACE INTO session_activity (compound_name, sample_name, retention_time, loffset, roffset) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![compound, sample, retention.retention_time, retention.loffset, retention.roffset],
        )?;
        Ok(())
    }

    pub fn read_overrides(&self) -> Result<OverrideMap, StoreError> {
        let mut stmt = self
            .connection
            .prepare("SELECT compound_name, sample_name, retention_time, loffset, roffset FROM session_activity")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                (row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                RetentionOverride {
                    retention_time: row.get(2)?,
                    loffset: row.get(3)?,
                    roffset: row.get(4)?,
                },
            ))
        })?;
        let mut overrides = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            overrides.insert(key, value);
        }
        Ok(overrides)
    }

    /// Raw EICs of a compound over all non-deleted samples, sorted by sample name.
    pub fn eics_for_compound(&self, compound: &str) -> Result<Vec<(String, StoredTrace)>, StoreError> {
        let mut stmt = self.connection.prepare(
            "SELECT e.sample_name, e.x_axis, e.y_axis FROM eic e \
             JOIN samples s ON s.sample_name = e.sample_name \
             WHERE e.compound_name = ?1 AND e.deleted = 0 AND s.deleted = 0 \
             ORDER BY e.sample_name",
        )?;
        let rows = stmt.query_map(params![compound], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?, row.get::<_, Vec<u8>>(2)?))
        })?;

        let mut eics = Vec::new();
        for row in rows {
            let (sample, x_axis, y_axis) = row?;
            eics.push((
                sample,
                StoredTrace {
                    time: decode_f64_blob(&x_axis)?,
                    intensity: decode_f64_blob(&y_axis)?,
                },
            ));
        }
        Ok(eics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lactate() -> Compound {
        let mut c = Compound::new("lactate", 233.0, 9.1, 0.2, 0.2)
            .with_label_atoms(3)
            .with_formula("C3H6O3", Derivatization::new(2, 0, 0));
        c.mm_files = Some("mm_*".to_string());
        c.amount_in_std_mix = Some(2.5);
        c
    }

    #[test]
    fn test_compound_round_trip() {
        let store = ChromatogramStore::open_in_memory().unwrap();
        store.upsert_compound(&lactate()).unwrap();
        let compounds = store.read_compounds().unwrap();
        assert_eq!(compounds, vec![lactate()]);

        let mut changed = lactate();
        changed.retention_time = 9.4;
        store.upsert_compound(&changed).unwrap();
        assert_eq!(store.read_compounds().unwrap().len(), 1);
        assert_eq!(store.read_compound("lactate").unwrap().unwrap().retention_time, 9.4);
        assert!(store.read_compound("pyruvate").unwrap().is_none());
    }

    #[test]
    fn test_samples_sorted_and_filtered() {
        let store = ChromatogramStore::open_in_memory().unwrap();
        for name in ["s2", "mm_1", "s1"] {
            store.insert_sample(&Sample::new(name, &format!("{}.cdf", name))).unwrap();
        }
        store.delete_sample("s2").unwrap();
        assert_eq!(store.read_samples().unwrap(), vec!["mm_1", "s1"]);
    }

    #[test]
    fn test_eic_storage() {
        let mut store = ChromatogramStore::open_in_memory().unwrap();
        store.insert_sample(&Sample::new("s1", "s1.cdf")).unwrap();
        let eic = Chromatogram::new(vec![9.0, 9.1], vec![1.0, 2.0, 0.5, 0.25], 2).unwrap();
        store.write_eic("s1", "lactate", &eic).unwrap();

        let stored = store.read_eic("s1", "lactate").unwrap().unwrap();
        assert_eq!(stored.clone().into_chromatogram(2).unwrap(), eic);
        assert!(stored.into_chromatogram(3).is_err());
        assert!(store.read_eic("s1", "other").unwrap().is_none());

        assert!(!store.has_correction("s1", "lactate").unwrap());
        store
            .write_corrected_batch("lactate", &[("s1".to_string(), eic.clone())])
            .unwrap();
        assert!(store.has_correction("s1", "lactate").unwrap());
        assert_eq!(store.read_corrected_eic("s1", "lactate").unwrap().unwrap().intensity, *eic.intensity);

        assert_eq!(store.eics_for_compound("lactate").unwrap().len(), 1);
        assert_eq!(store.clear_corrections("lactate").unwrap(), 1);
        assert!(!store.has_correction("s1", "lactate").unwrap());
    }

    #[test]
    fn test_overrides() {
        let store = ChromatogramStore::open_in_memory().unwrap();
        let over = RetentionOverride {
            retention_time: 9.3,
            loffset: 0.1,
            roffset: 0.15,
        };
        store.set_override("lactate", "s1", &over).unwrap();
        let overrides = store.read_overrides().unwrap();
        assert_eq!(overrides[&("lactate".to_string(), "s1".to_string())], over);
    }
}
