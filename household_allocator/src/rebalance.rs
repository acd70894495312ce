//! Random patching of integer counts towards a known total.
//!
//! Every step picks one bucket uniformly at random, so a bucket's chance of
//! being adjusted does not depend on its size. Repeated patching therefore
//! pulls counts towards an even spread and away from the proportions of the
//! draw that produced them. Callers rely on exact totals, not on
//! distributional fidelity.

use rand::seq::SliceRandom;
use rand::Rng;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rebalanced {
    pub counts: Vec<u32>,
    /// `target - sum(counts)` left over when the floor blocked further decrements.
    pub residual: i64,
}

impl Rebalanced {
    pub fn is_exact(&self) -> bool {
        self.residual == 0
    }
}

/// Adjust `counts` one unit at a time until they sum to `target`.
///
/// A shortfall increments buckets chosen uniformly with replacement. An
/// excess decrements buckets chosen uniformly among those above `floor`;
/// when none is left the remaining excess is returned as a negative residual.
pub fn rebalance<R: Rng + ?Sized>(counts: &[u32], target: u32, floor: u32, rng: &mut R) -> Rebalanced {
    let mut counts = counts.to_vec();
    let total: i64 = counts.iter().map(|&n| n as i64).sum();
    let mut diff = target as i64 - total;

    if counts.is_empty() {
        return Rebalanced {
            counts,
            residual: diff,
        };
    }

    while diff > 0 {
        let idx = rng.gen_range(0..counts.len());
        counts[idx] += 1;
        diff -= 1;
    }

    while diff < 0 {
        let candidates: Vec<usize> = counts
            .iter()
            .enumerate()
            .filter(|(_, &n)| n > floor)
            .map(|(idx, _)| idx)
            .collect();
        match candidates.choose(rng) {
            Some(&idx) => {
                counts[idx] -= 1;
                diff += 1;
            }
            None => break,
        }
    }

    Rebalanced {
        counts,
        residual: diff,
    }
}
