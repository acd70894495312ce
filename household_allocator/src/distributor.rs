use log::debug;
use rand::Rng;
use std::cmp::Ordering;

use crate::config::{AllocationConfig, ServiceOrder};
use crate::models::{Building, HouseholdSlot};
use crate::pool::HouseholdPool;
use crate::rebalance::rebalance;

/// A building that received fewer households than its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Underflow {
    pub building: usize,
    pub target: u32,
    pub delivered: u32,
}

#[derive(Debug, Clone)]
pub struct Distribution {
    /// Households per building, indexed like the building slice.
    pub assignments: Vec<Vec<HouseholdSlot>>,
    pub underflows: Vec<Underflow>,
    /// Households the target rebalancing could not place or remove.
    pub target_residual: i64,
}

pub struct HouseholdDistributor {
    rebalance_targets: bool,
    order: ServiceOrder,
}

impl HouseholdDistributor {
    pub fn new(config: &AllocationConfig) -> Self {
        Self {
            rebalance_targets: config.rebalance_household_targets,
            order: config.service_order,
        }
    }

    /// Exact, unrounded household share of a building.
    pub fn quota(residents: u32, population: u32, total_households: u32) -> f64 {
        if population == 0 {
            return 0.0;
        }
        residents as f64 / population as f64 * total_households as f64
    }

    /// Set `target_households` of every building; returns the rebalancing residual.
    pub fn assign_targets<R: Rng + ?Sized>(
        &self,
        buildings: &mut [Building],
        population: u32,
        total_households: u32,
        rng: &mut R,
    ) -> i64 {
        for building in buildings.iter_mut() {
            let quota = Self::quota(building.estimated_residents, population, total_households);
            building.target_households = quota.round_ties_even().max(1.0) as u32;
        }
        if !self.rebalance_targets {
            return 0;
        }

        let targets: Vec<u32> = buildings.iter().map(|b| b.target_households).collect();
        let balanced = rebalance(&targets, total_households, 1, rng);
        for (building, target) in buildings.iter_mut().zip(&balanced.counts) {
            building.target_households = *target;
        }
        balanced.residual
    }

    /// Indices of `buildings` in the order they draw from the pool.
    pub fn service_order(&self, buildings: &[Building], population: u32, total_households: u32) -> Vec<usize> {
        let mut order: Vec<usize> = (0..buildings.len()).collect();
        if self.order == ServiceOrder::LargestRemainder {
            let remainder = |idx: usize| {
                let quota = Self::quota(buildings[idx].estimated_residents, population, total_households);
                quota - quota.floor()
            };
            // Stable sort keeps list order among equal remainders.
            order.sort_by(|&a, &b| {
                remainder(b)
                    .partial_cmp(&remainder(a))
                    .unwrap_or(Ordering::Equal)
            });
        }
        order
    }

    /// Give every building its target number of households from the front of `pool`.
    ///
    /// Running out of households is not an error: the buildings served last
    /// receive fewer and are listed in `underflows`.
    pub fn distribute<R: Rng + ?Sized>(
        &self,
        buildings: &mut [Building],
        pool: &mut HouseholdPool,
        population: u32,
        total_households: u32,
        rng: &mut R,
    ) -> Distribution {
        let target_residual = self.assign_targets(buildings, population, total_households, rng);

        let mut assignments: Vec<Vec<HouseholdSlot>> = vec![Vec::new(); buildings.len()];
        let mut underflows = Vec::new();
        for idx in self.service_order(buildings, population, total_households) {
            let target = buildings[idx].target_households;
            let assigned = &mut assignments[idx];
            while (assigned.len() as u32) < target {
                match pool.pop_front() {
                    Some(slot) => assigned.push(slot),
                    None => break,
                }
            }
            let delivered = assigned.len() as u32;
            debug!(
                "Building {}: {} of {} households",
                buildings[idx].id, delivered, target
            );
            if delivered < target {
                underflows.push(Underflow {
                    building: idx,
                    target,
                    delivered,
                });
            }
        }

        Distribution {
            assignments,
            underflows,
            target_residual,
        }
    }
}
