use anyhow::{Context, Result};
use log::info;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::rc::Rc;

use crate::config::{AllocationConfig, PayloadMode};
use crate::error::AllocatorError;
use crate::models::{HouseholdCategory, SlotProfiles};

/// Numeric rows of one profile sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileTable {
    rows: Vec<Rc<[f64]>>,
    first_column: Rc<[f64]>,
}

impl ProfileTable {
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        let first_column: Vec<f64> = rows.iter().filter_map(|row| row.first().copied()).collect();
        Self {
            rows: rows.into_iter().map(Rc::from).collect(),
            first_column: Rc::from(first_column),
        }
    }

    /// Read a headed CSV sheet; every cell must be numeric. Blank rows are skipped.
    pub fn from_reader<R: Read>(reader: R, name: &str) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut rows = Vec::new();
        for (line, record) in csv_reader.records().enumerate() {
            let record = record.with_context(|| format!("Failed to read row {} of {}", line + 1, name))?;
            // Trailing blanks are padding; a blank before the last value is an error.
            let width = record
                .iter()
                .enumerate()
                .filter(|(_, cell)| !cell.is_empty())
                .last()
                .map_or(0, |(col, _)| col + 1);
            let row = record
                .iter()
                .take(width)
                .enumerate()
                .map(|(col, cell)| {
                    cell.parse::<f64>().map_err(|_| AllocatorError::InvalidField {
                        record: format!("{} row {}", name, line + 1),
                        field: format!("column {}", col + 1),
                        value: cell.to_string(),
                    })
                })
                .collect::<std::result::Result<Vec<f64>, _>>()?;
            if !row.is_empty() {
                rows.push(row);
            }
        }
        Ok(Self::from_rows(rows))
    }

    pub fn rows(&self) -> &[Rc<[f64]>] {
        &self.rows
    }

    pub fn first_column(&self) -> Rc<[f64]> {
        Rc::clone(&self.first_column)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Behaviour profiles per (profile kind, household category).
#[derive(Debug, Clone, Default)]
pub struct ProfileLibrary {
    kinds: Vec<String>,
    tables: BTreeMap<(String, HouseholdCategory), ProfileTable>,
}

impl ProfileLibrary {
    pub fn new(kinds: Vec<String>) -> Self {
        Self {
            kinds,
            tables: BTreeMap::new(),
        }
    }

    /// Load `<dir>/<kind>/<sheet>.csv` for every configured kind and sheet.
    pub fn load(dir: &Path, config: &AllocationConfig) -> Result<Self> {
        let mut library = Self::new(config.profile_kinds.clone());
        for kind in &config.profile_kinds {
            for (sheet, category) in &config.profile_sheets {
                let path = dir.join(kind).join(format!("{}.csv", sheet));
                let file = std::fs::File::open(&path)
                    .with_context(|| format!("Profile sheet not found: {}", path.display()))?;
                let table = ProfileTable::from_reader(file, &path.display().to_string())?;
                library.insert(kind, *category, table);
            }
        }
        info!(
            "Loaded {} profile tables ({} kinds) from {}",
            library.tables.len(),
            library.kinds.len(),
            dir.display()
        );
        Ok(library)
    }

    pub fn insert(&mut self, kind: &str, category: HouseholdCategory, table: ProfileTable) {
        if !self.kinds.iter().any(|k| k == kind) {
            self.kinds.push(kind.to_string());
        }
        self.tables.insert((kind.to_string(), category), table);
    }

    pub fn kinds(&self) -> &[String] {
        &self.kinds
    }

    pub fn table(&self, kind: &str, category: HouseholdCategory) -> Option<&ProfileTable> {
        self.tables.get(&(kind.to_string(), category))
    }

    /// Profile vectors for one new household of `category`.
    pub fn payload_for<R: Rng + ?Sized>(
        &self,
        category: HouseholdCategory,
        mode: PayloadMode,
        rng: &mut R,
    ) -> Result<SlotProfiles, AllocatorError> {
        let mut payload = SlotProfiles::new();
        if mode == PayloadMode::None {
            return Ok(payload);
        }
        for kind in &self.kinds {
            let missing = || AllocatorError::MissingProfile {
                kind: kind.clone(),
                category,
            };
            let table = self.table(kind, category).ok_or_else(missing)?;
            let values = match mode {
                PayloadMode::TableColumn => table.first_column(),
                PayloadMode::RandomRow => Rc::clone(table.rows().choose(rng).ok_or_else(missing)?),
                PayloadMode::None => continue,
            };
            payload.insert(kind.clone(), values);
        }
        Ok(payload)
    }
}
