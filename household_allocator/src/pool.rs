use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::VecDeque;

use crate::config::PayloadMode;
use crate::error::AllocatorError;
use crate::models::{CensusSection, HouseholdCategory, HouseholdSlot, SlotProfiles};
use crate::profile_library::ProfileLibrary;

/// Shuffled queue of synthesized households for one census section.
///
/// Buildings consume it from the front, so after shuffling the queue acts as
/// a fair lottery over household categories.
#[derive(Debug, Clone, Default)]
pub struct HouseholdPool {
    slots: VecDeque<HouseholdSlot>,
    synthesized: usize,
}

impl HouseholdPool {
    /// Households per category implied by the census fields. Fractional
    /// households are truncated, so the sum may fall short of the census total.
    pub fn category_counts(section: &CensusSection) -> [(HouseholdCategory, u32); 6] {
        let occupied = section.occupied_ratio();
        let retired = 1.0 - occupied;
        let split = |households: u32, share: f64| (households as f64 * share).floor() as u32;

        [
            (HouseholdCategory::SingleWorker, split(section.hh_1, occupied)),
            (HouseholdCategory::SingleRetired, split(section.hh_1, retired)),
            (HouseholdCategory::CoupleWorkers, split(section.hh_2, occupied)),
            (HouseholdCategory::CoupleRetired, split(section.hh_2, retired)),
            (HouseholdCategory::Family3, section.hh_3),
            (
                HouseholdCategory::Family4Plus,
                section.hh_4 + section.hh_5 + section.hh_6_or_more,
            ),
        ]
    }

    /// Pool in category order, before shuffling.
    pub fn unshuffled<R: Rng + ?Sized>(
        section: &CensusSection,
        profiles: Option<&ProfileLibrary>,
        mode: PayloadMode,
        rng: &mut R,
    ) -> Result<Self, AllocatorError> {
        let mut slots = VecDeque::new();
        for (category, count) in Self::category_counts(section) {
            for _ in 0..count {
                let payload = match profiles {
                    Some(library) => library.payload_for(category, mode, rng)?,
                    None => SlotProfiles::new(),
                };
                slots.push_back(HouseholdSlot {
                    id: slots.len(),
                    category,
                    profiles: payload,
                });
            }
        }
        let synthesized = slots.len();
        Ok(Self { slots, synthesized })
    }

    /// Uniform random permutation of the remaining slots.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.slots.make_contiguous().shuffle(rng);
    }

    pub fn synthesize<R: Rng + ?Sized>(
        section: &CensusSection,
        profiles: Option<&ProfileLibrary>,
        mode: PayloadMode,
        rng: &mut R,
    ) -> Result<Self, AllocatorError> {
        let mut pool = Self::unshuffled(section, profiles, mode, rng)?;
        pool.shuffle(rng);
        Ok(pool)
    }

    pub fn pop_front(&mut self) -> Option<HouseholdSlot> {
        self.slots.pop_front()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots created before any were consumed.
    pub fn synthesized(&self) -> usize {
        self.synthesized
    }

    pub fn iter(&self) -> impl Iterator<Item = &HouseholdSlot> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn section_1001() -> CensusSection {
        let mut section = CensusSection::new("1001", 100, 40);
        section.hh_1 = 10;
        section.hh_2 = 15;
        section.hh_3 = 10;
        section.hh_4 = 3;
        section.hh_5 = 1;
        section.hh_6_or_more = 1;
        section.occupied_italian = 55.0;
        section.occupied_foreign = 5.0;
        section
    }

    fn categories(pool: &HouseholdPool) -> Vec<HouseholdCategory> {
        pool.iter().map(|slot| slot.category).collect()
    }

    #[test]
    fn test_counts_truncate_census_split() {
        let counts = HouseholdPool::category_counts(&section_1001());
        let values: Vec<u32> = counts.iter().map(|(_, n)| *n).collect();

        assert_eq!(values, vec![6, 4, 9, 6, 10, 5]);
        assert_eq!(values.iter().sum::<u32>(), 40);
    }

    #[test]
    fn test_truncation_can_lose_households() {
        let mut section = CensusSection::new("2", 7, 5);
        section.hh_1 = 3;
        section.hh_2 = 2;
        section.occupied_italian = 3.5;
        let total: u32 = HouseholdPool::category_counts(&section)
            .iter()
            .map(|(_, n)| *n)
            .sum();
        assert!(total < 5);
    }

    #[test]
    fn test_pool_is_deterministic_for_a_seed() {
        let section = section_1001();
        let a = HouseholdPool::unshuffled(&section, None, PayloadMode::None, &mut StdRng::seed_from_u64(4))
            .unwrap();
        let b = HouseholdPool::unshuffled(&section, None, PayloadMode::None, &mut StdRng::seed_from_u64(4))
            .unwrap();
        assert_eq!(categories(&a), categories(&b));

        let a = HouseholdPool::synthesize(&section, None, PayloadMode::None, &mut StdRng::seed_from_u64(4))
            .unwrap();
        let b = HouseholdPool::synthesize(&section, None, PayloadMode::None, &mut StdRng::seed_from_u64(4))
            .unwrap();
        assert_eq!(categories(&a), categories(&b));
        let ids_a: Vec<usize> = a.iter().map(|slot| slot.id).collect();
        let ids_b: Vec<usize> = b.iter().map(|slot| slot.id).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_shuffle_keeps_every_slot_once() {
        let section = section_1001();
        let mut pool =
            HouseholdPool::synthesize(&section, None, PayloadMode::None, &mut StdRng::seed_from_u64(8))
                .unwrap();
        assert_eq!(pool.synthesized(), 40);

        let mut ids: Vec<usize> = pool.iter().map(|slot| slot.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..40).collect::<Vec<_>>());

        pool.pop_front();
        assert_eq!(pool.len(), 39);
        assert_eq!(pool.synthesized(), 40);
    }
}
