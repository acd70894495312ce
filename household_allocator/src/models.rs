use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::rc::Rc;

/// Household size/occupation class used to pick a behaviour profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HouseholdCategory {
    #[serde(rename = "1_comp_work")]
    SingleWorker,
    #[serde(rename = "1_comp_ret")]
    SingleRetired,
    #[serde(rename = "2_comp_work")]
    CoupleWorkers,
    #[serde(rename = "2_comp_ret")]
    CoupleRetired,
    #[serde(rename = "3_comp")]
    Family3,
    #[serde(rename = "4_comp_more")]
    Family4Plus,
}

impl HouseholdCategory {
    /// Pool synthesis order.
    pub const ALL: [HouseholdCategory; 6] = [
        HouseholdCategory::SingleWorker,
        HouseholdCategory::SingleRetired,
        HouseholdCategory::CoupleWorkers,
        HouseholdCategory::CoupleRetired,
        HouseholdCategory::Family3,
        HouseholdCategory::Family4Plus,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            HouseholdCategory::SingleWorker => "1_comp_work",
            HouseholdCategory::SingleRetired => "1_comp_ret",
            HouseholdCategory::CoupleWorkers => "2_comp_work",
            HouseholdCategory::CoupleRetired => "2_comp_ret",
            HouseholdCategory::Family3 => "3_comp",
            HouseholdCategory::Family4Plus => "4_comp_more",
        }
    }

    pub fn group(&self) -> SummaryGroup {
        match self {
            HouseholdCategory::SingleWorker => SummaryGroup::SingleWorker,
            HouseholdCategory::SingleRetired => SummaryGroup::SingleRetired,
            HouseholdCategory::CoupleWorkers => SummaryGroup::CoupleWorkers,
            HouseholdCategory::CoupleRetired => SummaryGroup::CoupleRetired,
            HouseholdCategory::Family3 | HouseholdCategory::Family4Plus => SummaryGroup::Families,
        }
    }
}

/// Buckets reported in building summaries; both family sizes share one bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SummaryGroup {
    SingleWorker,
    SingleRetired,
    CoupleWorkers,
    CoupleRetired,
    Families,
}

impl SummaryGroup {
    pub const ALL: [SummaryGroup; 5] = [
        SummaryGroup::SingleWorker,
        SummaryGroup::SingleRetired,
        SummaryGroup::CoupleWorkers,
        SummaryGroup::CoupleRetired,
        SummaryGroup::Families,
    ];
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EducationLevel {
    NoStudy,
    Elementary,
    MiddleSchool,
    SecondarySchool,
    University,
    Unknown,
}

impl EducationLevel {
    pub const ALL: [EducationLevel; 6] = [
        EducationLevel::NoStudy,
        EducationLevel::Elementary,
        EducationLevel::MiddleSchool,
        EducationLevel::SecondarySchool,
        EducationLevel::University,
        EducationLevel::Unknown,
    ];

    /// Map with every level present at zero.
    pub fn zeroed() -> BTreeMap<EducationLevel, u32> {
        Self::ALL.iter().map(|level| (*level, 0)).collect()
    }
}

/// Census statistics for one administrative section.
#[derive(Debug, Clone, PartialEq)]
pub struct CensusSection {
    pub id: String,
    pub population: i64,
    pub total_households: i64,
    pub hh_1: u32,
    pub hh_2: u32,
    pub hh_3: u32,
    pub hh_4: u32,
    pub hh_5: u32,
    pub hh_6_or_more: u32,
    pub occupied_italian: f64,
    pub occupied_foreign: f64,
    pub education: BTreeMap<EducationLevel, u32>,
}

impl CensusSection {
    pub fn new(id: impl Into<String>, population: i64, total_households: i64) -> Self {
        Self {
            id: id.into(),
            population,
            total_households,
            hh_1: 0,
            hh_2: 0,
            hh_3: 0,
            hh_4: 0,
            hh_5: 0,
            hh_6_or_more: 0,
            occupied_italian: 0.0,
            occupied_foreign: 0.0,
            education: EducationLevel::zeroed(),
        }
    }

    /// Share of residents in work, clamped to [0, 1]. Zero for empty sections.
    pub fn occupied_ratio(&self) -> f64 {
        if self.population <= 0 {
            return 0.0;
        }
        let ratio = (self.occupied_italian + self.occupied_foreign) / self.population as f64;
        if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn education_total(&self) -> u64 {
        self.education.values().map(|&n| n as u64).sum()
    }
}

/// A residential building and the quantities derived for it during allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Building {
    pub id: String,
    pub section_id: String,
    pub function: i64,
    pub area: f64,
    pub floors: f64,
    pub heated_area: f64,
    pub estimated_residents: u32,
    pub target_households: u32,
}

impl Building {
    pub fn new(
        id: impl Into<String>,
        section_id: impl Into<String>,
        function: i64,
        area: f64,
        floors: f64,
    ) -> Self {
        Self {
            id: id.into(),
            section_id: section_id.into(),
            function,
            area,
            floors,
            heated_area: 0.0,
            estimated_residents: 0,
            target_households: 0,
        }
    }
}

/// Profile vectors carried by a slot, keyed by profile kind.
pub type SlotProfiles = BTreeMap<String, Rc<[f64]>>;

#[derive(Debug, Clone)]
pub struct HouseholdSlot {
    /// Position in the pool before shuffling; unique within a section.
    pub id: usize,
    pub category: HouseholdCategory,
    pub profiles: SlotProfiles,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierCounts {
    #[serde(rename = "Wasteful")]
    pub wasteful: u32,
    #[serde(rename = "Average")]
    pub average: u32,
    #[serde(rename = "Saver")]
    pub saver: u32,
}

/// Household counts of one building. Only the `Average` tier is ever filled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildingSummary {
    pub groups: BTreeMap<SummaryGroup, TierCounts>,
}

impl Default for BuildingSummary {
    fn default() -> Self {
        Self {
            groups: SummaryGroup::ALL
                .iter()
                .map(|group| (*group, TierCounts::default()))
                .collect(),
        }
    }
}

impl BuildingSummary {
    pub fn from_households(households: &[HouseholdSlot]) -> Self {
        let mut summary = Self::default();
        for slot in households {
            summary.record(slot.category);
        }
        summary
    }

    pub fn record(&mut self, category: HouseholdCategory) {
        self.groups.entry(category.group()).or_default().average += 1;
    }

    pub fn count(&self, group: SummaryGroup) -> u32 {
        self.groups.get(&group).map(|t| t.average).unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.groups.values().map(|t| t.average).sum()
    }

    pub fn flat(&self) -> BTreeMap<SummaryGroup, u32> {
        self.groups.iter().map(|(g, t)| (*g, t.average)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EducationAllocation {
    pub education: BTreeMap<EducationLevel, u32>,
    pub household_types: BTreeMap<SummaryGroup, BTreeMap<EducationLevel, u32>>,
}

impl EducationAllocation {
    pub fn education_total(&self) -> u32 {
        self.education.values().sum()
    }

    pub fn household_total(&self) -> u32 {
        self.household_types
            .values()
            .flat_map(|levels| levels.values())
            .sum()
    }
}

/// Everything the allocation produced for one building.
#[derive(Debug, Clone)]
pub struct BuildingAllocation {
    pub building_id: String,
    pub section_id: String,
    pub heated_area: f64,
    pub estimated_residents: u32,
    pub target_households: u32,
    pub households: Vec<HouseholdSlot>,
    pub summary: BuildingSummary,
    pub occupied: u32,
    pub education: Option<EducationAllocation>,
}

impl BuildingAllocation {
    pub fn delivered(&self) -> u32 {
        self.households.len() as u32
    }

    pub fn shortfall(&self) -> u32 {
        self.target_households.saturating_sub(self.delivered())
    }

    pub fn category_counts(&self) -> BTreeMap<HouseholdCategory, u32> {
        let mut counts = BTreeMap::new();
        for slot in &self.households {
            *counts.entry(slot.category).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Debug, Clone)]
pub struct SectionAllocation {
    pub section_id: String,
    pub population: u32,
    pub total_households: u32,
    pub avg_area_per_person: f64,
    pub pool_size: usize,
    pub unused_slots: usize,
    pub buildings: Vec<BuildingAllocation>,
}

impl SectionAllocation {
    pub fn assigned_residents(&self) -> u64 {
        self.buildings
            .iter()
            .map(|b| b.estimated_residents as u64)
            .sum()
    }

    pub fn assigned_households(&self) -> u64 {
        self.buildings.iter().map(|b| b.delivered() as u64).sum()
    }

    pub fn household_shortfall(&self) -> u64 {
        self.buildings.iter().map(|b| b.shortfall() as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_collapses_families() {
        let mut summary = BuildingSummary::default();
        summary.record(HouseholdCategory::Family3);
        summary.record(HouseholdCategory::Family4Plus);
        summary.record(HouseholdCategory::SingleWorker);

        assert_eq!(summary.count(SummaryGroup::Families), 2);
        assert_eq!(summary.count(SummaryGroup::SingleWorker), 1);
        assert_eq!(summary.total(), 3);
        assert!(summary.groups.values().all(|t| t.wasteful == 0 && t.saver == 0));
    }

    #[test]
    fn test_summary_serializes_tiers() {
        let mut summary = BuildingSummary::default();
        summary.record(HouseholdCategory::CoupleRetired);
        let json = serde_json::to_value(&summary).unwrap();

        assert_eq!(json["couple_retired"]["Average"], 1);
        assert_eq!(json["couple_retired"]["Wasteful"], 0);
        assert_eq!(json["families"]["Saver"], 0);
    }

    #[test]
    fn test_occupied_ratio_is_clamped() {
        let mut section = CensusSection::new("1", 10, 4);
        section.occupied_italian = 9.0;
        section.occupied_foreign = 4.0;
        assert_eq!(section.occupied_ratio(), 1.0);

        let empty = CensusSection::new("2", 0, 0);
        assert_eq!(empty.occupied_ratio(), 0.0);
    }
}
