//! Health-weighted random selection.

use std::{collections::HashSet, sync::Arc};

use rand::Rng;
use tokio::time::Instant;

use super::{candidate_indices, SelectionPolicy};
use crate::core::{health, upstream::TrackedUpstream};

/// Minimum selection weight for any candidate. Guarantees that even an
/// unattractive upstream is eventually tried; essential because unmeasured
/// upstreams score only 0.5 until they accumulate attempts.
pub const WEIGHT_FLOOR: f64 = 0.1;

/// Weighted random selection over health scores.
#[derive(Debug, Default)]
pub struct SmartPolicy;

impl SmartPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionPolicy for SmartPolicy {
    fn select(
        &self,
        upstreams: &[Arc<TrackedUpstream>],
        excluded: &HashSet<usize>,
    ) -> Option<usize> {
        let candidates = candidate_indices(upstreams, excluded);
        match candidates.len() {
            0 => return None,
            1 => return Some(candidates[0]),
            _ => {}
        }

        let now = Instant::now();
        let weights: Vec<f64> = candidates
            .iter()
            .map(|&idx| health::score_upstream(&upstreams[idx], now).max(WEIGHT_FLOOR))
            .collect();
        let total: f64 = weights.iter().sum();

        let mut pick = rand::rng().random_range(0.0..total);
        for (candidate, weight) in candidates.iter().zip(&weights) {
            if pick < *weight {
                return Some(*candidate);
            }
            pick -= weight;
        }
        candidates.last().copied()
    }

    fn name(&self) -> &'static str {
        "smart"
    }
}
