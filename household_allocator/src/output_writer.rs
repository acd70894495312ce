use anyhow::{Context, Result};
use log::{debug, info};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{AllocationConfig, SummarySchema};
use crate::models::{
    BuildingAllocation, BuildingSummary, EducationLevel, HouseholdCategory, SectionAllocation,
    SummaryGroup,
};

pub const SUMMARY_JSON: &str = "building_household_summary.json";
pub const RESIDENTS_JSON: &str = "building_estimated_residents.json";
pub const ASSIGNMENT_CSV: &str = "household_assignment_summary.csv";
pub const BUILDINGS_DIR: &str = "buildings";

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum SummaryEntry<'a> {
    Tiered(&'a BuildingSummary),
    Flat(BTreeMap<SummaryGroup, u32>),
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ResidentsEntry<'a> {
    Count(u32),
    Detailed {
        estimated_residents: u32,
        occupied: u32,
        education: &'a BTreeMap<EducationLevel, u32>,
        household_types: &'a BTreeMap<SummaryGroup, BTreeMap<EducationLevel, u32>>,
    },
}

/// Paths of the files one run produced.
#[derive(Debug, Clone, Default)]
pub struct WrittenOutputs {
    pub summary_json: PathBuf,
    pub residents_json: PathBuf,
    pub assignment_csv: PathBuf,
    pub building_files: Vec<PathBuf>,
}

pub struct OutputWriter {
    output_dir: PathBuf,
    schema: SummarySchema,
}

impl OutputWriter {
    pub fn new(output_dir: impl Into<PathBuf>, config: &AllocationConfig) -> Result<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(output_dir.join(BUILDINGS_DIR))
            .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;
        Ok(Self {
            output_dir,
            schema: config.summary_schema,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn write_all(&self, sections: &[SectionAllocation]) -> Result<WrittenOutputs> {
        let outputs = WrittenOutputs {
            summary_json: self.write_summary_json(sections)?,
            residents_json: self.write_residents_json(sections)?,
            assignment_csv: self.write_assignment_pivot(sections)?,
            building_files: self.write_building_files(sections)?,
        };
        info!(
            "Wrote {} per-building files to {}",
            outputs.building_files.len(),
            self.output_dir.join(BUILDINGS_DIR).display()
        );
        Ok(outputs)
    }

    /// Pretty-printed JSON file under the output directory.
    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let path = self.output_dir.join(name);
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Saved {}", path.display());
        Ok(path)
    }

    pub fn write_summary_json(&self, sections: &[SectionAllocation]) -> Result<PathBuf> {
        let entries: BTreeMap<&str, SummaryEntry> = buildings(sections)
            .map(|building| {
                let entry = match self.schema {
                    SummarySchema::Tiered => SummaryEntry::Tiered(&building.summary),
                    SummarySchema::Flat => SummaryEntry::Flat(building.summary.flat()),
                };
                (building.building_id.as_str(), entry)
            })
            .collect();
        self.write_json(SUMMARY_JSON, &entries)
    }

    /// Plain resident counts, or the education breakdown when it was computed.
    pub fn write_residents_json(&self, sections: &[SectionAllocation]) -> Result<PathBuf> {
        let entries: BTreeMap<&str, ResidentsEntry> = buildings(sections)
            .map(|building| {
                let entry = match &building.education {
                    Some(education) => ResidentsEntry::Detailed {
                        estimated_residents: building.estimated_residents,
                        occupied: building.occupied,
                        education: &education.education,
                        household_types: &education.household_types,
                    },
                    None => ResidentsEntry::Count(building.estimated_residents),
                };
                (building.building_id.as_str(), entry)
            })
            .collect();
        self.write_json(RESIDENTS_JSON, &entries)
    }

    /// One row per building, one column per household category.
    pub fn write_assignment_pivot(&self, sections: &[SectionAllocation]) -> Result<PathBuf> {
        let mut rows: Vec<(&str, &str, BTreeMap<HouseholdCategory, u32>)> = buildings(sections)
            .map(|b| (b.section_id.as_str(), b.building_id.as_str(), b.category_counts()))
            .collect();
        rows.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let path = self.output_dir.join(ASSIGNMENT_CSV);
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut header = vec!["Census_Section", "Building_ID"];
        header.extend(HouseholdCategory::ALL.iter().map(|c| c.code()));
        writer.write_record(&header)?;

        for (section_id, building_id, counts) in rows {
            let mut record = vec![section_id.to_string(), building_id.to_string()];
            record.extend(
                HouseholdCategory::ALL
                    .iter()
                    .map(|c| counts.get(c).copied().unwrap_or(0).to_string()),
            );
            writer.write_record(&record)?;
        }
        writer.flush()?;
        info!("Saved {}", path.display());
        Ok(path)
    }

    pub fn write_building_files(&self, sections: &[SectionAllocation]) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for building in buildings(sections) {
            written.extend(self.write_building(building)?);
        }
        Ok(written)
    }

    /// `<id>.csv` with household types only, or one `<id>_<kind>.csv` per
    /// profile kind with hourly values and a closing `Average` row.
    pub fn write_building(&self, building: &BuildingAllocation) -> Result<Vec<PathBuf>> {
        if building.households.is_empty() {
            return Ok(Vec::new());
        }
        let dir = self.output_dir.join(BUILDINGS_DIR);
        let kinds: BTreeSet<&str> = building
            .households
            .iter()
            .flat_map(|slot| slot.profiles.keys().map(|k| k.as_str()))
            .collect();

        if kinds.is_empty() {
            let path = dir.join(format!("{}.csv", building.building_id));
            let mut writer = csv::Writer::from_path(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            writer.write_record(["Household Type"])?;
            for slot in &building.households {
                writer.write_record([slot.category.code()])?;
            }
            writer.flush()?;
            debug!("Saved {}", path.display());
            return Ok(vec![path]);
        }

        let mut written = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let rows: Vec<(&str, &[f64])> = building
                .households
                .iter()
                .filter_map(|slot| slot.profiles.get(kind).map(|v| (slot.category.code(), &v[..])))
                .collect();
            let width = rows.iter().map(|(_, values)| values.len()).max().unwrap_or(0);

            let path = dir.join(format!("{}_{}.csv", building.building_id, kind));
            let mut writer = csv::Writer::from_path(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut header = vec!["Household Type".to_string()];
            header.extend((1..=width).map(|hour| format!("Hour_{}", hour)));
            writer.write_record(&header)?;

            for (code, values) in &rows {
                let mut record = vec![code.to_string()];
                record.extend((0..width).map(|i| values.get(i).map(|v| v.to_string()).unwrap_or_default()));
                writer.write_record(&record)?;
            }
            let mut average = vec!["Average".to_string()];
            average.extend(column_means(&rows, width).iter().map(|v| v.to_string()));
            writer.write_record(&average)?;
            writer.flush()?;
            debug!("Saved {}", path.display());
            written.push(path);
        }
        Ok(written)
    }
}

fn buildings(sections: &[SectionAllocation]) -> impl Iterator<Item = &BuildingAllocation> {
    sections.iter().flat_map(|section| section.buildings.iter())
}

/// Mean of every column over the rows long enough to have it.
fn column_means(rows: &[(&str, &[f64])], width: usize) -> Vec<f64> {
    (0..width)
        .map(|col| {
            let values: Vec<f64> = rows.iter().filter_map(|(_, v)| v.get(col).copied()).collect();
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        })
        .collect()
}
