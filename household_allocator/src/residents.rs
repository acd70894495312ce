use log::debug;
use rand::Rng;

use crate::config::AllocationConfig;
use crate::models::Building;
use crate::rebalance::rebalance;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidentsEstimate {
    /// Heated m2 per census resident; zero when no building has any heated area.
    pub avg_area_per_person: f64,
    /// Population that could not be placed or removed; nonzero only when the floor blocks it.
    pub residual: i64,
}

/// Splits a section's census population over its buildings by heated floor area.
pub struct ResidentsEstimator {
    efficiency: f64,
    floor_on_decrement: bool,
}

impl ResidentsEstimator {
    pub fn new(config: &AllocationConfig) -> Self {
        Self {
            efficiency: config.heated_area_efficiency,
            floor_on_decrement: config.floor_residents_on_decrement,
        }
    }

    pub fn heated_area(&self, building: &Building) -> f64 {
        building.area * self.efficiency * building.floors
    }

    /// Fill `heated_area` and `estimated_residents` of every building so that
    /// the residents sum to `population`.
    pub fn estimate<R: Rng + ?Sized>(
        &self,
        buildings: &mut [Building],
        population: u32,
        rng: &mut R,
    ) -> ResidentsEstimate {
        if buildings.is_empty() {
            return ResidentsEstimate {
                avg_area_per_person: 0.0,
                residual: population as i64,
            };
        }

        for building in buildings.iter_mut() {
            building.heated_area = self.heated_area(building);
        }
        let total_heated_area: f64 = buildings.iter().map(|b| b.heated_area).sum();

        // Without any floor area every building gets an equal share.
        let equal_share = if total_heated_area > 0.0 {
            None
        } else {
            Some(population as f64 / buildings.len() as f64)
        };
        let avg_area_per_person = if population > 0 {
            total_heated_area / population as f64
        } else {
            1.0
        };

        for building in buildings.iter_mut() {
            let share = match equal_share {
                Some(share) => share,
                None => building.heated_area / avg_area_per_person,
            };
            building.estimated_residents = share.round_ties_even().max(1.0) as u32;
        }

        let initial: Vec<u32> = buildings.iter().map(|b| b.estimated_residents).collect();
        let floor = if self.floor_on_decrement { 1 } else { 0 };
        let balanced = rebalance(&initial, population, floor, rng);
        for (building, residents) in buildings.iter_mut().zip(&balanced.counts) {
            debug!(
                "Building {}: {:.1} m2 heated, {} residents",
                building.id, building.heated_area, residents
            );
            building.estimated_residents = *residents;
        }

        ResidentsEstimate {
            avg_area_per_person: if equal_share.is_some() {
                0.0
            } else {
                avg_area_per_person
            },
            residual: balanced.residual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn building(id: &str, area: f64, floors: f64) -> Building {
        Building::new(id, "S1", 11, area, floors)
    }

    fn estimator() -> ResidentsEstimator {
        ResidentsEstimator::new(&AllocationConfig::new_base())
    }

    #[test]
    fn test_proportional_to_heated_area() {
        let mut buildings = vec![building("A", 3000.0, 2.0), building("B", 2000.0, 2.0)];
        let mut rng = StdRng::seed_from_u64(1);
        let estimate = estimator().estimate(&mut buildings, 100, &mut rng);

        assert_eq!(buildings[0].estimated_residents, 60);
        assert_eq!(buildings[1].estimated_residents, 40);
        assert_eq!(buildings[0].heated_area, 6000.0);
        assert_eq!(estimate.avg_area_per_person, 100.0);
        assert_eq!(estimate.residual, 0);
    }

    #[test]
    fn test_efficiency_scales_heated_area() {
        let config = AllocationConfig::new_extended();
        let estimator = ResidentsEstimator::new(&config);
        let b = building("A", 100.0, 3.0);
        assert!((estimator.heated_area(&b) - 246.0).abs() < 1e-9);
    }

    #[test]
    fn test_small_buildings_keep_one_resident() {
        let mut buildings = vec![
            building("A", 10000.0, 1.0),
            building("B", 1.0, 1.0),
            building("C", 1.0, 1.0),
        ];
        let mut rng = StdRng::seed_from_u64(5);
        estimator().estimate(&mut buildings, 10, &mut rng);

        assert!(buildings.iter().all(|b| b.estimated_residents >= 1));
        assert_eq!(buildings.iter().map(|b| b.estimated_residents).sum::<u32>(), 10);
    }

    #[test]
    fn test_population_conserved_on_random_sections() {
        let mut rng = StdRng::seed_from_u64(2024);
        for _ in 0..200 {
            let n = rng.gen_range(1..30);
            let mut buildings: Vec<Building> = (0..n)
                .map(|i| {
                    building(
                        &format!("B{i}"),
                        rng.gen_range(0.0..800.0),
                        rng.gen_range(1..8) as f64,
                    )
                })
                .collect();
            let population = rng.gen_range(n as u32..2000);
            let estimate = estimator().estimate(&mut buildings, population, &mut rng);

            assert_eq!(estimate.residual, 0);
            assert_eq!(
                buildings.iter().map(|b| b.estimated_residents).sum::<u32>(),
                population
            );
            assert!(buildings.iter().all(|b| b.estimated_residents >= 1));
        }
    }

    #[test]
    fn test_zero_area_falls_back_to_equal_shares() {
        let mut buildings = vec![building("A", 0.0, 2.0), building("B", 0.0, 3.0)];
        let mut rng = StdRng::seed_from_u64(9);
        let estimate = estimator().estimate(&mut buildings, 10, &mut rng);

        assert_eq!(buildings[0].estimated_residents, 5);
        assert_eq!(buildings[1].estimated_residents, 5);
        assert_eq!(estimate.avg_area_per_person, 0.0);
    }

    #[test]
    fn test_floor_leaves_residual_when_population_too_small() {
        let mut buildings = vec![
            building("A", 100.0, 1.0),
            building("B", 100.0, 1.0),
            building("C", 100.0, 1.0),
        ];
        let mut rng = StdRng::seed_from_u64(3);
        let estimate = estimator().estimate(&mut buildings, 2, &mut rng);

        assert!(buildings.iter().all(|b| b.estimated_residents == 1));
        assert_eq!(estimate.residual, -1);
    }

    #[test]
    fn test_unguarded_decrement_reaches_population() {
        let config = AllocationConfig {
            floor_residents_on_decrement: false,
            ..AllocationConfig::new_base()
        };
        let mut buildings = vec![
            building("A", 100.0, 1.0),
            building("B", 100.0, 1.0),
            building("C", 100.0, 1.0),
        ];
        let mut rng = StdRng::seed_from_u64(3);
        let estimate = ResidentsEstimator::new(&config).estimate(&mut buildings, 2, &mut rng);

        assert_eq!(estimate.residual, 0);
        assert_eq!(buildings.iter().map(|b| b.estimated_residents).sum::<u32>(), 2);
    }
}
