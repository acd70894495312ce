//! Education-level overlay on top of the household assignment.
//!
//! Each estimated resident draws a level from the section-wide education
//! distribution. The draw is then split across household groups and patched
//! with [`rebalance`] until every per-building total equals the building's
//! estimated residents. The patching biases the result towards an even
//! spread; exact headcounts take precedence over distributional fidelity.

use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

use crate::config::AllocationConfig;
use crate::models::{BuildingSummary, CensusSection, EducationAllocation, EducationLevel, SummaryGroup};
use crate::rebalance::rebalance;

/// Section-wide education probabilities.
#[derive(Debug, Clone)]
pub struct SectionEducation {
    probabilities: Vec<(EducationLevel, f64)>,
    index: Option<WeightedIndex<f64>>,
}

impl SectionEducation {
    pub fn from_section(section: &CensusSection) -> Self {
        let total = section.education_total();
        let denominator = if total == 0 { 1.0 } else { total as f64 };
        let probabilities: Vec<(EducationLevel, f64)> = EducationLevel::ALL
            .iter()
            .map(|level| {
                let count = section.education.get(level).copied().unwrap_or(0);
                (*level, count as f64 / denominator)
            })
            .collect();
        let index = WeightedIndex::new(probabilities.iter().map(|(_, p)| *p)).ok();
        Self {
            probabilities,
            index,
        }
    }

    /// True when the section reports no education counts at all.
    pub fn is_degenerate(&self) -> bool {
        self.index.is_none()
    }

    pub fn probability(&self, level: EducationLevel) -> f64 {
        self.probabilities
            .iter()
            .find(|(l, _)| *l == level)
            .map(|(_, p)| *p)
            .unwrap_or(0.0)
    }

    /// Per-level counts of `residents` independent draws. A degenerate
    /// distribution tags everybody as unknown.
    pub fn draw<R: Rng + ?Sized>(&self, residents: u32, rng: &mut R) -> Vec<u32> {
        let mut counts = vec![0u32; EducationLevel::ALL.len()];
        match &self.index {
            Some(index) => {
                for _ in 0..residents {
                    counts[index.sample(rng)] += 1;
                }
            }
            None => {
                counts[level_index(EducationLevel::Unknown)] = residents;
            }
        }
        counts
    }
}

fn level_index(level: EducationLevel) -> usize {
    EducationLevel::ALL
        .iter()
        .position(|l| *l == level)
        .unwrap_or(EducationLevel::ALL.len() - 1)
}

pub struct EducationAllocator {
    resident_multipliers: BTreeMap<SummaryGroup, u32>,
}

impl EducationAllocator {
    pub fn new(config: &AllocationConfig) -> Self {
        Self {
            resident_multipliers: SummaryGroup::ALL
                .iter()
                .map(|group| (*group, config.resident_multiplier(*group)))
                .collect(),
        }
    }

    /// Residents each household group accounts for in `summary`.
    pub fn group_residents(&self, summary: &BuildingSummary) -> Vec<(SummaryGroup, u32)> {
        SummaryGroup::ALL
            .iter()
            .map(|group| {
                let multiplier = self.resident_multipliers.get(group).copied().unwrap_or(0);
                (*group, summary.count(*group) * multiplier)
            })
            .collect()
    }

    pub fn allocate<R: Rng + ?Sized>(
        &self,
        distribution: &SectionEducation,
        residents: u32,
        summary: &BuildingSummary,
        rng: &mut R,
    ) -> EducationAllocation {
        let drawn = distribution.draw(residents, rng);
        let levels = rebalance(&drawn, residents, 0, rng).counts;

        let mut tags: Vec<EducationLevel> = EducationLevel::ALL
            .iter()
            .zip(&levels)
            .flat_map(|(level, &count)| std::iter::repeat(*level).take(count as usize))
            .collect();
        tags.shuffle(rng);

        // Consecutive segments of the shuffled residents, one per household group.
        let group_residents = self.group_residents(summary);
        let mut cells: Vec<Vec<u32>> = Vec::with_capacity(group_residents.len());
        let mut start = 0;
        for (_, wanted) in &group_residents {
            let end = (start + *wanted as usize).min(tags.len());
            let mut row = vec![0u32; EducationLevel::ALL.len()];
            for level in &tags[start..end] {
                row[level_index(*level)] += 1;
            }
            cells.push(row);
            start = end;
        }

        Self::reconcile(&mut cells, &group_residents, residents, rng);

        let household_types: BTreeMap<SummaryGroup, BTreeMap<EducationLevel, u32>> = group_residents
            .iter()
            .zip(&cells)
            .map(|((group, _), row)| (*group, level_map(row)))
            .collect();
        let mut education = EducationLevel::zeroed();
        for row in &cells {
            for (level, count) in EducationLevel::ALL.iter().zip(row) {
                *education.entry(*level).or_insert(0) += count;
            }
        }

        EducationAllocation {
            education,
            household_types,
        }
    }

    /// Force the group x level table to sum to `residents`. Missing residents
    /// go to random cells of groups that hold households (any group if none
    /// does); surplus ones leave random non-empty cells.
    fn reconcile<R: Rng + ?Sized>(
        cells: &mut [Vec<u32>],
        group_residents: &[(SummaryGroup, u32)],
        residents: u32,
        rng: &mut R,
    ) {
        let width = EducationLevel::ALL.len();
        let total: u32 = cells.iter().flatten().sum();
        if total == residents {
            return;
        }

        let mut rows: Vec<usize> = if total < residents {
            (0..cells.len()).filter(|&g| group_residents[g].1 > 0).collect()
        } else {
            Vec::new()
        };
        if rows.is_empty() {
            rows = (0..cells.len()).collect();
        }

        let flat: Vec<u32> = rows.iter().flat_map(|&g| cells[g].iter().copied()).collect();
        let subset_total: u32 = flat.iter().sum();
        let target = residents - (total - subset_total);
        let balanced = rebalance(&flat, target, 0, rng);
        for (pos, count) in balanced.counts.into_iter().enumerate() {
            cells[rows[pos / width]][pos % width] = count;
        }
    }

    /// Working residents of a building according to its household summary.
    pub fn occupied_residents(config: &AllocationConfig, summary: &BuildingSummary) -> u32 {
        SummaryGroup::ALL
            .iter()
            .map(|group| summary.count(*group) * config.occupied_multiplier(*group))
            .sum()
    }
}

fn level_map(row: &[u32]) -> BTreeMap<EducationLevel, u32> {
    EducationLevel::ALL.iter().copied().zip(row.iter().copied()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HouseholdCategory;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn section(counts: [u32; 6]) -> CensusSection {
        let mut section = CensusSection::new("S", 100, 40);
        section.education = EducationLevel::ALL.iter().copied().zip(counts).collect();
        section
    }

    fn summary(categories: &[(HouseholdCategory, u32)]) -> BuildingSummary {
        let mut summary = BuildingSummary::default();
        for (category, n) in categories {
            for _ in 0..*n {
                summary.record(*category);
            }
        }
        summary
    }

    fn allocator() -> EducationAllocator {
        EducationAllocator::new(&AllocationConfig::new_extended())
    }

    #[test]
    fn test_probabilities() {
        let distribution = SectionEducation::from_section(&section([10, 20, 30, 25, 10, 5]));
        assert!((distribution.probability(EducationLevel::MiddleSchool) - 0.3).abs() < 1e-12);
        assert!(!distribution.is_degenerate());
    }

    #[test]
    fn test_degenerate_section_tags_unknown() {
        let distribution = SectionEducation::from_section(&section([0; 6]));
        assert!(distribution.is_degenerate());

        let mut rng = StdRng::seed_from_u64(1);
        let allocation = allocator().allocate(
            &distribution,
            4,
            &summary(&[(HouseholdCategory::CoupleWorkers, 2)]),
            &mut rng,
        );
        assert_eq!(allocation.education[&EducationLevel::Unknown], 4);
        assert_eq!(allocation.education_total(), 4);
        assert_eq!(allocation.household_total(), 4);
    }

    #[test]
    fn test_totals_match_when_households_undercount_residents() {
        let distribution = SectionEducation::from_section(&section([5, 10, 20, 30, 15, 2]));
        let mut rng = StdRng::seed_from_u64(3);
        let allocation = allocator().allocate(
            &distribution,
            25,
            &summary(&[(HouseholdCategory::SingleWorker, 2), (HouseholdCategory::Family3, 3)]),
            &mut rng,
        );

        assert_eq!(allocation.education_total(), 25);
        assert_eq!(allocation.household_total(), 25);
        // Shortfall is only patched into groups that have households.
        let couples: u32 = allocation.household_types[&SummaryGroup::CoupleWorkers].values().sum();
        assert_eq!(couples, 0);
    }

    #[test]
    fn test_totals_match_when_households_overcount_residents() {
        let distribution = SectionEducation::from_section(&section([5, 10, 20, 30, 15, 2]));
        let mut rng = StdRng::seed_from_u64(5);
        let allocation = allocator().allocate(
            &distribution,
            6,
            &summary(&[(HouseholdCategory::Family4Plus, 4), (HouseholdCategory::SingleRetired, 2)]),
            &mut rng,
        );

        assert_eq!(allocation.education_total(), 6);
        assert_eq!(allocation.household_total(), 6);
    }

    #[test]
    fn test_reconciles_on_random_buildings() {
        let distribution = SectionEducation::from_section(&section([3, 14, 22, 31, 12, 4]));
        let mut rng = StdRng::seed_from_u64(77);
        for _ in 0..200 {
            let residents = rng.gen_range(1..60);
            let categories: Vec<(HouseholdCategory, u32)> = HouseholdCategory::ALL
                .iter()
                .map(|c| (*c, rng.gen_range(0..6)))
                .collect();
            let allocation = allocator().allocate(&distribution, residents, &summary(&categories), &mut rng);

            assert_eq!(allocation.education_total(), residents);
            assert_eq!(allocation.household_total(), residents);
            for (level, count) in &allocation.education {
                let by_group: u32 = allocation
                    .household_types
                    .values()
                    .map(|levels| levels[level])
                    .sum();
                assert_eq!(*count, by_group);
            }
        }
    }

    #[test]
    fn test_occupied_residents() {
        let config = AllocationConfig::new_extended();
        let summary = summary(&[
            (HouseholdCategory::SingleWorker, 2),
            (HouseholdCategory::SingleRetired, 1),
            (HouseholdCategory::CoupleWorkers, 1),
            (HouseholdCategory::Family3, 1),
        ]);
        assert_eq!(EducationAllocator::occupied_residents(&config, &summary), 6);
    }
}
