use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

static NO_SIGNAL: [f64; 1] = [0.0];

/// Integrated peak areas, one vector per (sample, compound) with one entry per isotopologue.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AreaTable {
    areas: BTreeMap<String, HashMap<String, Vec<f64>>>,
}

impl AreaTable {
    pub fn new() -> Self {
        AreaTable::default()
    }

    pub fn insert(&mut self, sample: &str, compound: &str, areas: Vec<f64>) {
        self.areas
            .entry(sample.to_string())
            .or_default()
            .insert(compound.to_string(), areas);
    }

    pub fn get(&self, sample: &str, compound: &str) -> Option<&[f64]> {
        self.areas
            .get(sample)
            .and_then(|compounds| compounds.get(compound))
            .map(Vec::as_slice)
    }

    /// Areas of a pair, `[0.0]` when the pair has no data.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use isocore::data::areas::AreaTable;
    /// let mut table = AreaTable::new();
    /// table.insert("s1", "lactate", vec![10.0, 2.0]);
    /// assert_eq!(table.areas_or_zero("s1", "lactate"), &[10.0, 2.0]);
    /// assert_eq!(table.areas_or_zero("s2", "lactate"), &[0.0]);
    /// assert_eq!(table.total("s1", "lactate"), 12.0);
    /// ```
    pub fn areas_or_zero(&self, sample: &str, compound: &str) -> &[f64] {
        self.get(sample, compound).unwrap_or(&NO_SIGNAL)
    }

    pub fn total(&self, sample: &str, compound: &str) -> f64 {
        self.areas_or_zero(sample, compound).iter().sum()
    }

    pub fn samples(&self) -> impl Iterator<Item = &str> {
        self.areas.keys().map(String::as_str)
    }

    pub fn contains_sample(&self, sample: &str) -> bool {
        self.areas.contains_key(sample)
    }

    pub fn len(&self) -> usize {
        self.areas.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
