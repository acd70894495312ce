use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::models::SectionAllocation;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NonPositivePopulation { population: i64 },
    NonPositiveHouseholds { total_households: i64 },
    NoResidentialBuildings,
}

/// Non-fatal problems met while processing a section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SectionWarning {
    /// The section was skipped entirely.
    DataIntegrity { section_id: String, reason: SkipReason },
    PoolUnderflow {
        section_id: String,
        building_id: String,
        target: u32,
        delivered: u32,
    },
    /// The one-resident floor kept the building sum away from the census population.
    ResidentsUnreachable { section_id: String, residual: i64 },
    HouseholdTargetsUnreachable { section_id: String, residual: i64 },
    /// No education counts; residents were tagged unknown.
    DegenerateEducation { section_id: String },
    /// Allocation raised an error; the section was skipped and the run went on.
    AllocationFailed { section_id: String, message: String },
}

impl SectionWarning {
    pub fn section_id(&self) -> &str {
        match self {
            SectionWarning::DataIntegrity { section_id, .. }
            | SectionWarning::PoolUnderflow { section_id, .. }
            | SectionWarning::ResidentsUnreachable { section_id, .. }
            | SectionWarning::HouseholdTargetsUnreachable { section_id, .. }
            | SectionWarning::DegenerateEducation { section_id }
            | SectionWarning::AllocationFailed { section_id, .. } => section_id,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            SectionWarning::DataIntegrity { .. } | SectionWarning::AllocationFailed { .. }
        )
    }

    pub fn log(&self) {
        match self {
            SectionWarning::DataIntegrity { section_id, reason } => match reason {
                SkipReason::NonPositivePopulation { population } => {
                    warn!("Section {} skipped: population {}", section_id, population)
                }
                SkipReason::NonPositiveHouseholds { total_households } => {
                    warn!("Section {} skipped: {} households", section_id, total_households)
                }
                SkipReason::NoResidentialBuildings => {
                    warn!("Section {} skipped: no residential buildings", section_id)
                }
            },
            SectionWarning::PoolUnderflow {
                section_id,
                building_id,
                target,
                delivered,
            } => warn!(
                "Section {}: household pool exhausted at building {} ({} of {}, short {})",
                section_id,
                building_id,
                delivered,
                target,
                target - delivered
            ),
            SectionWarning::ResidentsUnreachable { section_id, residual } => warn!(
                "Section {}: residents differ from census population by {}",
                section_id, residual
            ),
            SectionWarning::HouseholdTargetsUnreachable { section_id, residual } => warn!(
                "Section {}: household targets differ from census total by {}",
                section_id, residual
            ),
            SectionWarning::DegenerateEducation { section_id } => warn!(
                "Section {}: no education counts, residents tagged unknown",
                section_id
            ),
            SectionWarning::AllocationFailed { section_id, message } => {
                warn!("Section {} skipped: {}", section_id, message)
            }
        }
    }
}

/// Totals of one batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub seed: u64,
    pub sections_total: usize,
    pub sections_processed: usize,
    pub sections_skipped: usize,
    pub buildings_processed: usize,
    pub residents_assigned: u64,
    pub households_synthesized: u64,
    pub households_assigned: u64,
    pub unused_slots: u64,
    pub pool_underflows: usize,
    pub cumulative_household_shortfall: u64,
    pub warnings: Vec<SectionWarning>,
}

impl RunReport {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Default::default()
        }
    }

    pub fn record_skip(&mut self, warning: SectionWarning) {
        self.sections_total += 1;
        self.sections_skipped += 1;
        warning.log();
        self.warnings.push(warning);
    }

    pub fn record_section(&mut self, section: &SectionAllocation, warnings: Vec<SectionWarning>) {
        self.sections_total += 1;
        self.sections_processed += 1;
        self.buildings_processed += section.buildings.len();
        self.residents_assigned += section.assigned_residents();
        self.households_synthesized += section.pool_size as u64;
        self.households_assigned += section.assigned_households();
        self.unused_slots += section.unused_slots as u64;
        self.cumulative_household_shortfall += section.household_shortfall();
        for warning in warnings {
            if matches!(warning, SectionWarning::PoolUnderflow { .. }) {
                self.pool_underflows += 1;
            }
            warning.log();
            self.warnings.push(warning);
        }
    }

    pub fn underflows_in(&self, section_id: &str) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, SectionWarning::PoolUnderflow { .. }) && w.section_id() == section_id)
            .count()
    }

    pub fn log_summary(&self) {
        info!(
            "Sections: {} processed, {} skipped of {}",
            self.sections_processed, self.sections_skipped, self.sections_total
        );
        info!(
            "Buildings: {}, residents: {}, households assigned: {} of {} synthesized",
            self.buildings_processed,
            self.residents_assigned,
            self.households_assigned,
            self.households_synthesized
        );
        if self.pool_underflows > 0 {
            warn!(
                "{} pool underflows, cumulative household shortfall {}",
                self.pool_underflows, self.cumulative_household_shortfall
            );
        }
    }
}
