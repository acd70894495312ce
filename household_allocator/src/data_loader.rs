use anyhow::{Context, Result};
use geojson::{Feature, FeatureCollection};
use log::{debug, info};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::config::AllocationConfig;
use crate::error::AllocatorError;
use crate::models::{Building, CensusSection, EducationLevel};

/// Census feature properties as they appear in the source layer.
#[derive(Debug, Deserialize)]
struct CensusProperties {
    #[serde(rename = "SEZ21", default, deserialize_with = "optional_id")]
    id: Option<String>,
    #[serde(rename = "total resident population")]
    population: f64,
    #[serde(rename = "total households")]
    total_households: f64,
    #[serde(rename = "HH_1 comp")]
    hh_1: f64,
    #[serde(rename = "HH_2 comp")]
    hh_2: f64,
    #[serde(rename = "HH_3 comp")]
    hh_3: f64,
    #[serde(rename = "HH_4 comp")]
    hh_4: f64,
    #[serde(rename = "HH_5 comp")]
    hh_5: f64,
    #[serde(rename = "HH_6 comp or more")]
    hh_6_or_more: f64,
    #[serde(rename = "Italian occupied_IT10")]
    occupied_italian: f64,
    #[serde(rename = "Foreign occupied_ST31")]
    occupied_foreign: f64,
    // Education counts are only read by the extended run; absent means zero.
    #[serde(rename = "P86", default)]
    no_study: f64,
    #[serde(rename = "P87", default)]
    elementary: f64,
    #[serde(rename = "P88", default)]
    middle_school: f64,
    #[serde(rename = "P89", default)]
    secondary_school: f64,
    #[serde(rename = "P90", default)]
    university: f64,
    #[serde(rename = "unknown_education", default)]
    unknown: f64,
}

#[derive(Debug, Deserialize)]
struct BuildingProperties {
    #[serde(rename = "ID", default, deserialize_with = "optional_id")]
    id: Option<String>,
    #[serde(rename = "SEZ21", default, deserialize_with = "optional_id")]
    section_id: Option<String>,
    #[serde(default)]
    function: Option<f64>,
    #[serde(rename = "Area", default)]
    area: Option<f64>,
    #[serde(rename = "Shape_Area", default)]
    shape_area: Option<f64>,
    #[serde(default)]
    nfloors: Option<f64>,
}

/// Identifiers come as strings or numbers; numbers are kept in integer form.
fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.trim().to_string())),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Some(i.to_string()))
            } else if let Some(u) = n.as_u64() {
                Ok(Some(u.to_string()))
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => Ok(Some(format!("{}", f as i64))),
                    _ => Ok(Some(n.to_string())),
                }
            }
        }
        other => Err(de::Error::custom(format!("unsupported identifier {}", other))),
    }
}

/// Residential buildings grouped by census section, each group in file order.
/// Building ids are unique across the whole catalog.
#[derive(Debug, Clone, Default)]
pub struct BuildingCatalog {
    by_section: HashMap<String, Vec<Building>>,
    ids: HashSet<String>,
    len: usize,
}

impl BuildingCatalog {
    pub fn from_buildings(buildings: Vec<Building>) -> Result<Self, AllocatorError> {
        let mut catalog = Self::default();
        for building in buildings {
            catalog.push(building)?;
        }
        Ok(catalog)
    }

    /// Add a building; a second building with an id already present is rejected.
    pub fn push(&mut self, building: Building) -> Result<(), AllocatorError> {
        if !self.ids.insert(building.id.clone()) {
            return Err(AllocatorError::InvalidField {
                record: format!("building {} in section {}", building.id, building.section_id),
                field: "ID".to_string(),
                value: format!("{} (duplicate)", building.id),
            });
        }
        self.len += 1;
        self.by_section
            .entry(building.section_id.clone())
            .or_default()
            .push(building);
        Ok(())
    }

    /// Buildings of a section; empty when the section has none.
    pub fn buildings_in(&self, section_id: &str) -> &[Building] {
        self.by_section
            .get(section_id)
            .map(|buildings| buildings.as_slice())
            .unwrap_or(&[])
    }

    pub fn section_count(&self) -> usize {
        self.by_section.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

pub struct DataLoader {
    residential_codes: Vec<i64>,
}

impl DataLoader {
    pub fn new(config: &AllocationConfig) -> Self {
        Self {
            residential_codes: config.residential_function_codes.clone(),
        }
    }

    /// Load census sections from a GeoJSON file
    pub fn load_census_sections(&self, path: &Path) -> Result<Vec<CensusSection>> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read census file {}", path.display()))?;
        let sections = self
            .parse_census_sections(&text)
            .with_context(|| format!("Invalid census file {}", path.display()))?;
        info!("Loaded {} census sections from {}", sections.len(), path.display());
        Ok(sections)
    }

    pub fn parse_census_sections(&self, text: &str) -> Result<Vec<CensusSection>> {
        let collection: FeatureCollection = text.parse().context("Not a GeoJSON FeatureCollection")?;
        collection
            .features
            .iter()
            .enumerate()
            .map(|(idx, feature)| {
                let properties: CensusProperties = feature_properties(feature, idx)?;
                census_section(properties, idx).map_err(anyhow::Error::from)
            })
            .collect()
    }

    /// Load residential buildings from a GeoJSON file
    pub fn load_buildings(&self, path: &Path) -> Result<BuildingCatalog> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read buildings file {}", path.display()))?;
        let catalog = self
            .parse_buildings(&text)
            .with_context(|| format!("Invalid buildings file {}", path.display()))?;
        info!(
            "Loaded {} residential buildings in {} sections from {}",
            catalog.len(),
            catalog.section_count(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn parse_buildings(&self, text: &str) -> Result<BuildingCatalog> {
        let collection: FeatureCollection = text.parse().context("Not a GeoJSON FeatureCollection")?;
        let mut catalog = BuildingCatalog::default();
        let mut skipped = 0usize;
        for (idx, feature) in collection.features.iter().enumerate() {
            let properties: BuildingProperties = feature_properties(feature, idx)?;
            match self.residential_building(properties, idx)? {
                Some(building) => catalog.push(building)?,
                None => skipped += 1,
            }
        }
        debug!("Skipped {} non-residential buildings", skipped);
        Ok(catalog)
    }

    fn residential_building(
        &self,
        properties: BuildingProperties,
        idx: usize,
    ) -> Result<Option<Building>, AllocatorError> {
        let function = match properties.function {
            Some(code) if code.fract() == 0.0 && self.residential_codes.contains(&(code as i64)) => {
                code as i64
            }
            _ => return Ok(None),
        };

        let record = match &properties.id {
            Some(id) => format!("building {}", id),
            None => format!("building feature {}", idx),
        };
        let id = properties
            .id
            .clone()
            .ok_or_else(|| invalid(&record, "ID", "missing"))?;
        let section_id = properties
            .section_id
            .ok_or_else(|| invalid(&record, "SEZ21", "missing"))?;
        let area = non_negative(&record, "Area", properties.area.or(properties.shape_area))?;
        let floors = non_negative(&record, "nfloors", properties.nfloors)?;

        Ok(Some(Building::new(id, section_id, function, area, floors)))
    }
}

fn feature_properties<T: DeserializeOwned>(feature: &Feature, idx: usize) -> Result<T> {
    let properties = feature
        .properties
        .clone()
        .with_context(|| format!("Feature {} has no properties", idx))?;
    serde_json::from_value(Value::Object(properties))
        .with_context(|| format!("Feature {} has malformed properties", idx))
}

fn census_section(properties: CensusProperties, idx: usize) -> Result<CensusSection, AllocatorError> {
    let record = match &properties.id {
        Some(id) => format!("census section {}", id),
        None => format!("census feature {}", idx),
    };
    let id = properties
        .id
        .clone()
        .ok_or_else(|| invalid(&record, "SEZ21", "missing"))?;

    let mut section = CensusSection::new(
        id,
        whole(&record, "total resident population", properties.population)?,
        whole(&record, "total households", properties.total_households)?,
    );
    section.hh_1 = count(&record, "HH_1 comp", properties.hh_1)?;
    section.hh_2 = count(&record, "HH_2 comp", properties.hh_2)?;
    section.hh_3 = count(&record, "HH_3 comp", properties.hh_3)?;
    section.hh_4 = count(&record, "HH_4 comp", properties.hh_4)?;
    section.hh_5 = count(&record, "HH_5 comp", properties.hh_5)?;
    section.hh_6_or_more = count(&record, "HH_6 comp or more", properties.hh_6_or_more)?;
    section.occupied_italian =
        non_negative(&record, "Italian occupied_IT10", Some(properties.occupied_italian))?;
    section.occupied_foreign =
        non_negative(&record, "Foreign occupied_ST31", Some(properties.occupied_foreign))?;

    let education = [
        (EducationLevel::NoStudy, "P86", properties.no_study),
        (EducationLevel::Elementary, "P87", properties.elementary),
        (EducationLevel::MiddleSchool, "P88", properties.middle_school),
        (EducationLevel::SecondarySchool, "P89", properties.secondary_school),
        (EducationLevel::University, "P90", properties.university),
        (EducationLevel::Unknown, "unknown_education", properties.unknown),
    ];
    for (level, field, value) in education {
        section.education.insert(level, count(&record, field, value)?);
    }
    Ok(section)
}

fn invalid(record: &str, field: &str, value: impl ToString) -> AllocatorError {
    AllocatorError::InvalidField {
        record: record.to_string(),
        field: field.to_string(),
        value: value.to_string(),
    }
}

/// Signed whole number, truncated. Sign is checked later by the allocator.
fn whole(record: &str, field: &str, value: f64) -> Result<i64, AllocatorError> {
    if !value.is_finite() {
        return Err(invalid(record, field, value));
    }
    Ok(value.trunc() as i64)
}

/// Non-negative count, truncated.
fn count(record: &str, field: &str, value: f64) -> Result<u32, AllocatorError> {
    if !value.is_finite() || value < 0.0 || value > u32::MAX as f64 {
        return Err(invalid(record, field, value));
    }
    Ok(value.trunc() as u32)
}

fn non_negative(record: &str, field: &str, value: Option<f64>) -> Result<f64, AllocatorError> {
    match value {
        Some(v) if v.is_finite() && v >= 0.0 => Ok(v),
        Some(v) => Err(invalid(record, field, v)),
        None => Err(invalid(record, field, "missing")),
    }
}
