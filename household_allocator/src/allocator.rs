use anyhow::{bail, Context, Result};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{AllocationConfig, PayloadMode};
use crate::data_loader::BuildingCatalog;
use crate::distributor::HouseholdDistributor;
use crate::education::{EducationAllocator, SectionEducation};
use crate::models::{
    Building, BuildingAllocation, BuildingSummary, CensusSection, SectionAllocation,
};
use crate::pool::HouseholdPool;
use crate::profile_library::ProfileLibrary;
use crate::report::{RunReport, SectionWarning, SkipReason};
use crate::residents::ResidentsEstimator;

#[derive(Debug, Clone)]
pub enum SectionOutcome {
    Skipped(SectionWarning),
    Allocated {
        allocation: SectionAllocation,
        warnings: Vec<SectionWarning>,
    },
}

#[derive(Debug, Clone)]
pub struct AllocationRun {
    pub sections: Vec<SectionAllocation>,
    pub report: RunReport,
}

/// Runs residents estimation, pool synthesis, distribution and the education
/// overlay for census sections, one at a time.
pub struct SectionAllocator {
    config: AllocationConfig,
    profiles: Option<ProfileLibrary>,
}

impl SectionAllocator {
    pub fn new(config: AllocationConfig, profiles: Option<ProfileLibrary>) -> Result<Self> {
        config.validate()?;
        if config.profile_payload != PayloadMode::None && profiles.is_none() {
            bail!(
                "Profile payload {:?} needs a loaded profile library",
                config.profile_payload
            );
        }
        Ok(Self { config, profiles })
    }

    pub fn config(&self) -> &AllocationConfig {
        &self.config
    }

    /// Allocate one section. `buildings` are its residential buildings in source order.
    pub fn allocate_section<R: Rng + ?Sized>(
        &self,
        section: &CensusSection,
        buildings: &[Building],
        rng: &mut R,
    ) -> Result<SectionOutcome> {
        let skip = |reason: SkipReason| {
            Ok(SectionOutcome::Skipped(SectionWarning::DataIntegrity {
                section_id: section.id.clone(),
                reason,
            }))
        };
        if section.population <= 0 {
            return skip(SkipReason::NonPositivePopulation {
                population: section.population,
            });
        }
        if section.total_households <= 0 {
            return skip(SkipReason::NonPositiveHouseholds {
                total_households: section.total_households,
            });
        }
        if buildings.is_empty() {
            return skip(SkipReason::NoResidentialBuildings);
        }

        let population = u32::try_from(section.population)
            .with_context(|| format!("Section {}: population out of range", section.id))?;
        let total_households = u32::try_from(section.total_households)
            .with_context(|| format!("Section {}: household total out of range", section.id))?;

        let mut buildings = buildings.to_vec();
        let mut warnings = Vec::new();

        let estimate = ResidentsEstimator::new(&self.config).estimate(&mut buildings, population, rng);
        if estimate.residual != 0 {
            warnings.push(SectionWarning::ResidentsUnreachable {
                section_id: section.id.clone(),
                residual: estimate.residual,
            });
        }

        let mut pool = HouseholdPool::synthesize(
            section,
            self.profiles.as_ref(),
            self.config.profile_payload,
            rng,
        )
        .with_context(|| format!("Section {}: household pool synthesis failed", section.id))?;
        let pool_size = pool.synthesized();
        info!(
            "Census section {}: {:.2} m2/person, {} buildings, {} households in pool",
            section.id,
            estimate.avg_area_per_person,
            buildings.len(),
            pool_size
        );

        let distribution = HouseholdDistributor::new(&self.config).distribute(
            &mut buildings,
            &mut pool,
            population,
            total_households,
            rng,
        );
        if distribution.target_residual != 0 {
            warnings.push(SectionWarning::HouseholdTargetsUnreachable {
                section_id: section.id.clone(),
                residual: distribution.target_residual,
            });
        }
        for underflow in &distribution.underflows {
            warnings.push(SectionWarning::PoolUnderflow {
                section_id: section.id.clone(),
                building_id: buildings[underflow.building].id.clone(),
                target: underflow.target,
                delivered: underflow.delivered,
            });
        }

        let section_education = if self.config.emit_education {
            let education = SectionEducation::from_section(section);
            if education.is_degenerate() {
                warnings.push(SectionWarning::DegenerateEducation {
                    section_id: section.id.clone(),
                });
            }
            Some(education)
        } else {
            None
        };
        let educator = EducationAllocator::new(&self.config);

        let mut allocations = Vec::with_capacity(buildings.len());
        for (building, households) in buildings.into_iter().zip(distribution.assignments) {
            let summary = BuildingSummary::from_households(&households);
            let occupied = EducationAllocator::occupied_residents(&self.config, &summary);
            let education = match &section_education {
                Some(distribution) => Some(educator.allocate(
                    distribution,
                    building.estimated_residents,
                    &summary,
                    rng,
                )),
                None => None,
            };
            allocations.push(BuildingAllocation {
                building_id: building.id,
                section_id: section.id.clone(),
                heated_area: building.heated_area,
                estimated_residents: building.estimated_residents,
                target_households: building.target_households,
                households,
                summary,
                occupied,
                education,
            });
        }

        Ok(SectionOutcome::Allocated {
            allocation: SectionAllocation {
                section_id: section.id.clone(),
                population,
                total_households,
                avg_area_per_person: estimate.avg_area_per_person,
                pool_size,
                unused_slots: pool.len(),
                buildings: allocations,
            },
            warnings,
        })
    }

    pub fn allocate_all(
        &self,
        sections: &[CensusSection],
        catalog: &BuildingCatalog,
        seed: u64,
    ) -> Result<AllocationRun> {
        self.allocate_all_with_progress(sections, catalog, seed, |_| {})
    }

    /// Allocate every section in input order from one seeded random source.
    pub fn allocate_all_with_progress<F: FnMut(&CensusSection)>(
        &self,
        sections: &[CensusSection],
        catalog: &BuildingCatalog,
        seed: u64,
        mut progress: F,
    ) -> Result<AllocationRun> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut report = RunReport::new(seed);
        let mut allocated = Vec::new();

        for section in sections {
            match self.allocate_section(section, catalog.buildings_in(&section.id), &mut rng) {
                Ok(SectionOutcome::Skipped(warning)) => report.record_skip(warning),
                Ok(SectionOutcome::Allocated {
                    allocation,
                    warnings,
                }) => {
                    report.record_section(&allocation, warnings);
                    allocated.push(allocation);
                }
                Err(err) => report.record_skip(SectionWarning::AllocationFailed {
                    section_id: section.id.clone(),
                    message: format!("{:#}", err),
                }),
            }
            progress(section);
        }

        report.log_summary();
        Ok(AllocationRun {
            sections: allocated,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EducationLevel;
    use std::collections::HashSet;

    fn section_1001() -> CensusSection {
        let mut section = CensusSection::new("1001", 100, 40);
        section.hh_1 = 10;
        section.hh_2 = 15;
        section.hh_3 = 10;
        section.hh_4 = 3;
        section.hh_5 = 1;
        section.hh_6_or_more = 1;
        section.occupied_italian = 50.0;
        section.occupied_foreign = 10.0;
        section.education = EducationLevel::ALL
            .iter()
            .copied()
            .zip([4, 12, 25, 35, 20, 4])
            .collect();
        section
    }

    fn buildings_1001() -> Vec<Building> {
        vec![
            Building::new("A", "1001", 11, 3000.0, 2.0),
            Building::new("B", "1001", 12, 2000.0, 2.0),
        ]
    }

    fn allocate(config: AllocationConfig, section: &CensusSection, buildings: &[Building], seed: u64) -> SectionOutcome {
        let allocator = SectionAllocator::new(config, None).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        allocator.allocate_section(section, buildings, &mut rng).unwrap()
    }

    fn allocated(outcome: SectionOutcome) -> (SectionAllocation, Vec<SectionWarning>) {
        match outcome {
            SectionOutcome::Allocated {
                allocation,
                warnings,
            } => (allocation, warnings),
            SectionOutcome::Skipped(warning) => panic!("section skipped: {:?}", warning),
        }
    }

    fn education_config() -> AllocationConfig {
        AllocationConfig {
            emit_education: true,
            ..AllocationConfig::new_base()
        }
    }

    #[test]
    fn test_worked_example() {
        let (allocation, warnings) = allocated(allocate(
            AllocationConfig::new_base(),
            &section_1001(),
            &buildings_1001(),
            42,
        ));

        assert!(warnings.is_empty());
        assert_eq!(allocation.pool_size, 40);
        assert_eq!(allocation.buildings[0].estimated_residents, 60);
        assert_eq!(allocation.buildings[1].estimated_residents, 40);
        assert_eq!(allocation.buildings[0].delivered(), 24);
        assert_eq!(allocation.buildings[1].delivered(), 16);
        assert_eq!(allocation.assigned_households(), 40);
        assert_eq!(allocation.unused_slots, 0);
        assert_eq!(allocation.avg_area_per_person, 100.0);
    }

    #[test]
    fn test_skips_empty_population() {
        let section = CensusSection::new("9", 0, 4);
        let outcome = allocate(AllocationConfig::new_base(), &section, &buildings_1001(), 1);
        match outcome {
            SectionOutcome::Skipped(warning) => {
                assert!(warning.is_skip());
                assert_eq!(warning.section_id(), "9");
            }
            _ => panic!("expected skip"),
        }
    }

    #[test]
    fn test_skips_without_households_or_buildings() {
        let no_households = CensusSection::new("9", 10, 0);
        assert!(matches!(
            allocate(AllocationConfig::new_base(), &no_households, &buildings_1001(), 1),
            SectionOutcome::Skipped(SectionWarning::DataIntegrity {
                reason: SkipReason::NonPositiveHouseholds { total_households: 0 },
                ..
            })
        ));
        assert!(matches!(
            allocate(AllocationConfig::new_base(), &section_1001(), &[], 1),
            SectionOutcome::Skipped(SectionWarning::DataIntegrity {
                reason: SkipReason::NoResidentialBuildings,
                ..
            })
        ));
    }

    #[test]
    fn test_education_reconciled_per_building() {
        let (allocation, _) = allocated(allocate(education_config(), &section_1001(), &buildings_1001(), 8));
        for building in &allocation.buildings {
            let education = building.education.as_ref().unwrap();
            assert_eq!(education.education_total(), building.estimated_residents);
            assert_eq!(education.household_total(), building.estimated_residents);
        }
    }

    #[test]
    fn test_same_seed_same_allocation() {
        let run = |seed| {
            let (allocation, _) = allocated(allocate(education_config(), &section_1001(), &buildings_1001(), seed));
            allocation
                .buildings
                .iter()
                .map(|b| {
                    (
                        b.households.iter().map(|s| s.id).collect::<Vec<_>>(),
                        b.education.clone(),
                    )
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(5), run(5));
    }

    #[test]
    fn test_underflow_reported() {
        let mut section = section_1001();
        section.hh_3 = 2;
        let (allocation, warnings) = allocated(allocate(
            AllocationConfig::new_base(),
            &section,
            &buildings_1001(),
            3,
        ));

        assert_eq!(allocation.pool_size, 32);
        assert_eq!(allocation.household_shortfall(), 8);
        assert!(warnings
            .iter()
            .any(|w| matches!(w, SectionWarning::PoolUnderflow { building_id, .. } if building_id == "B")));
    }

    #[test]
    fn test_allocate_all_counts_sections() {
        let catalog = BuildingCatalog::from_buildings(buildings_1001()).unwrap();
        let sections = vec![section_1001(), CensusSection::new("2", 0, 0)];
        let allocator = SectionAllocator::new(AllocationConfig::new_base(), None).unwrap();
        let run = allocator.allocate_all(&sections, &catalog, 42).unwrap();

        assert_eq!(run.sections.len(), 1);
        assert_eq!(run.report.sections_processed, 1);
        assert_eq!(run.report.sections_skipped, 1);
        assert_eq!(run.report.households_assigned, 40);
        assert_eq!(run.report.residents_assigned, 100);

        let ids: HashSet<usize> = run.sections[0]
            .buildings
            .iter()
            .flat_map(|b| b.households.iter().map(|s| s.id))
            .collect();
        assert_eq!(ids.len(), 40);
    }

    #[test]
    fn test_failing_section_is_skipped_and_run_continues() {
        let mut buildings = vec![Building::new("X", "big", 11, 1000.0, 2.0)];
        buildings.extend(buildings_1001());
        let catalog = BuildingCatalog::from_buildings(buildings).unwrap();
        let sections = vec![
            CensusSection::new("big", i64::from(u32::MAX) + 1, 4),
            section_1001(),
        ];
        let allocator = SectionAllocator::new(AllocationConfig::new_base(), None).unwrap();
        let run = allocator.allocate_all(&sections, &catalog, 42).unwrap();

        assert_eq!(run.sections.len(), 1);
        assert_eq!(run.sections[0].section_id, "1001");
        assert_eq!(run.report.sections_total, 2);
        assert_eq!(run.report.sections_skipped, 1);
        match &run.report.warnings[0] {
            SectionWarning::AllocationFailed { section_id, message } => {
                assert_eq!(section_id, "big");
                assert!(message.contains("population out of range"));
            }
            other => panic!("unexpected warning: {:?}", other),
        }
    }

    #[test]
    fn test_payload_requires_library() {
        assert!(SectionAllocator::new(AllocationConfig::new_extended(), None).is_err());
    }
}
