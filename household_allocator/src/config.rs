use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::models::{HouseholdCategory, SummaryGroup};

/// What each synthesized household carries besides its category.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PayloadMode {
    /// Category tag only.
    #[default]
    None,
    /// First column of the category's table, one vector per profile kind.
    TableColumn,
    /// One random row of the category's table per profile kind.
    RandomRow,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SummarySchema {
    /// `{group: {Wasteful, Average, Saver}}`
    #[default]
    Tiered,
    /// `{group: count}`
    Flat,
}

/// Order in which buildings draw households from the section pool.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceOrder {
    /// Building list order; later buildings absorb any pool shortfall.
    #[default]
    List,
    /// Descending fractional part of each building's exact household quota.
    LargestRemainder,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AllocationConfig {
    pub residential_function_codes: Vec<i64>,
    pub heated_area_efficiency: f64, // 1.0 or 0.82
    /// Profile sheet name -> household category.
    pub profile_sheets: BTreeMap<String, HouseholdCategory>,
    pub profile_kinds: Vec<String>,
    /// Residents per household, used to split education levels across groups.
    pub resident_multipliers: BTreeMap<SummaryGroup, u32>,
    /// Working residents per household; groups left out count zero.
    pub occupied_multipliers: BTreeMap<SummaryGroup, u32>,
    pub emit_education: bool,
    pub profile_payload: PayloadMode,
    pub summary_schema: SummarySchema,
    pub rebalance_household_targets: bool,
    pub service_order: ServiceOrder,
    pub floor_residents_on_decrement: bool,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self::new_base()
    }
}

impl AllocationConfig {
    /// Category tags only, full heated area, no education overlay.
    pub fn new_base() -> Self {
        Self {
            residential_function_codes: vec![11, 12],
            heated_area_efficiency: 1.0,
            profile_sheets: component_sheets(),
            profile_kinds: vec!["profiles".to_string()],
            resident_multipliers: default_resident_multipliers(),
            occupied_multipliers: default_occupied_multipliers(),
            emit_education: false,
            profile_payload: PayloadMode::None,
            summary_schema: SummarySchema::Tiered,
            rebalance_household_targets: false,
            service_order: ServiceOrder::List,
            floor_residents_on_decrement: true,
        }
    }

    /// Four profile kinds, 0.82 net-to-gross area and the education overlay.
    pub fn new_extended() -> Self {
        Self {
            heated_area_efficiency: 0.82,
            profile_sheets: ncomp_sheets(),
            profile_kinds: ["occupancy", "appliances", "lighting", "DHW"]
                .iter()
                .map(|kind| kind.to_string())
                .collect(),
            emit_education: true,
            profile_payload: PayloadMode::TableColumn,
            ..Self::new_base()
        }
    }

    /// Household targets rebalanced to the census total, one random profile row per household.
    pub fn new_balanced() -> Self {
        Self {
            profile_payload: PayloadMode::RandomRow,
            rebalance_household_targets: true,
            ..Self::new_base()
        }
    }

    pub fn is_residential(&self, function: i64) -> bool {
        self.residential_function_codes.contains(&function)
    }

    pub fn resident_multiplier(&self, group: SummaryGroup) -> u32 {
        self.resident_multipliers.get(&group).copied().unwrap_or(0)
    }

    pub fn occupied_multiplier(&self, group: SummaryGroup) -> u32 {
        self.occupied_multipliers.get(&group).copied().unwrap_or(0)
    }

    /// Sheet name holding the profiles of `category`.
    pub fn sheet_for(&self, category: HouseholdCategory) -> Option<&str> {
        self.profile_sheets
            .iter()
            .find(|(_, c)| **c == category)
            .map(|(sheet, _)| sheet.as_str())
    }

    pub fn validate(&self) -> Result<()> {
        if self.residential_function_codes.is_empty() {
            bail!("At least one residential function code is required");
        }
        if !(self.heated_area_efficiency.is_finite() && self.heated_area_efficiency > 0.0) {
            bail!(
                "Heated area efficiency must be a positive number, got {}",
                self.heated_area_efficiency
            );
        }
        if self.emit_education {
            for group in SummaryGroup::ALL {
                if !self.resident_multipliers.contains_key(&group) {
                    bail!("Missing resident multiplier for {:?}", group);
                }
            }
        }
        if self.profile_payload != PayloadMode::None {
            if self.profile_kinds.is_empty() {
                bail!("Profile payload {:?} needs at least one profile kind", self.profile_payload);
            }
            for category in HouseholdCategory::ALL {
                if self.sheet_for(category).is_none() {
                    bail!("No profile sheet mapped to category {}", category.code());
                }
            }
        }
        Ok(())
    }
}

fn component_sheets() -> BTreeMap<String, HouseholdCategory> {
    [
        ("1component_worker", HouseholdCategory::SingleWorker),
        ("1component_retired", HouseholdCategory::SingleRetired),
        ("2components_working", HouseholdCategory::CoupleWorkers),
        ("2components_retired", HouseholdCategory::CoupleRetired),
        ("3components", HouseholdCategory::Family3),
        ("4components_more", HouseholdCategory::Family4Plus),
    ]
    .into_iter()
    .map(|(sheet, category)| (sheet.to_string(), category))
    .collect()
}

fn ncomp_sheets() -> BTreeMap<String, HouseholdCategory> {
    [
        ("1 ncomp, occupied", HouseholdCategory::SingleWorker),
        ("1 ncomp, retired", HouseholdCategory::SingleRetired),
        ("2 ncomp, occupied", HouseholdCategory::CoupleWorkers),
        ("2 ncomp, retired", HouseholdCategory::CoupleRetired),
        ("3 members", HouseholdCategory::Family3),
        ("More", HouseholdCategory::Family4Plus),
    ]
    .into_iter()
    .map(|(sheet, category)| (sheet.to_string(), category))
    .collect()
}

fn default_resident_multipliers() -> BTreeMap<SummaryGroup, u32> {
    BTreeMap::from([
        (SummaryGroup::SingleWorker, 1),
        (SummaryGroup::SingleRetired, 1),
        (SummaryGroup::CoupleWorkers, 2),
        (SummaryGroup::CoupleRetired, 2),
        (SummaryGroup::Families, 3),
    ])
}

fn default_occupied_multipliers() -> BTreeMap<SummaryGroup, u32> {
    BTreeMap::from([
        (SummaryGroup::SingleWorker, 1),
        (SummaryGroup::CoupleWorkers, 2),
        (SummaryGroup::Families, 2),
    ])
}

/// Inputs, outputs and seed of one batch run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    pub census_path: PathBuf,
    pub buildings_path: PathBuf,
    #[serde(default)]
    pub profiles_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub allocation: AllocationConfig,
}

fn default_seed() -> u64 {
    42
}

impl RunConfig {
    pub fn new(
        census_path: impl Into<PathBuf>,
        buildings_path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        allocation: AllocationConfig,
    ) -> Self {
        Self {
            census_path: census_path.into(),
            buildings_path: buildings_path.into(),
            profiles_dir: None,
            output_dir: output_dir.into(),
            seed: default_seed(),
            allocation,
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read run configuration {}", path.display()))?;
        let config: RunConfig = serde_json::from_str(&text)
            .with_context(|| format!("Invalid run configuration {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.allocation.validate()?;
        if self.allocation.profile_payload != PayloadMode::None && self.profiles_dir.is_none() {
            bail!(
                "Profile payload {:?} requires a profiles directory",
                self.allocation.profile_payload
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        assert!(AllocationConfig::new_base().validate().is_ok());
        assert!(AllocationConfig::new_extended().validate().is_ok());
        assert!(AllocationConfig::new_balanced().validate().is_ok());
    }

    #[test]
    fn test_extended_preset() {
        let config = AllocationConfig::new_extended();
        assert_eq!(config.heated_area_efficiency, 0.82);
        assert!(config.emit_education);
        assert_eq!(config.profile_kinds.len(), 4);
        assert_eq!(config.sheet_for(HouseholdCategory::Family4Plus), Some("More"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "census_path": "census.json",
            "buildings_path": "buildings.json",
            "output_dir": "out",
            "allocation": { "heated_area_efficiency": 0.82, "service_order": "largest_remainder" }
        }"#;
        let config: RunConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.seed, 42);
        assert_eq!(config.allocation.heated_area_efficiency, 0.82);
        assert_eq!(config.allocation.service_order, ServiceOrder::LargestRemainder);
        assert_eq!(config.allocation.residential_function_codes, vec![11, 12]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_payload_requires_profiles_dir() {
        let config = RunConfig::new("c.json", "b.json", "out", AllocationConfig::new_extended());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_efficiency() {
        let config = AllocationConfig {
            heated_area_efficiency: 0.0,
            ..AllocationConfig::new_base()
        };
        assert!(config.validate().is_err());
    }
}
