//! Highest-health-score selection.

use std::{collections::HashSet, sync::Arc};

use tokio::time::Instant;

use super::{candidate_indices, SelectionPolicy};
use crate::core::{health, upstream::TrackedUpstream};

/// Picks the candidate with the strictly highest health score; ties break to
/// the lowest original index.
#[derive(Debug, Default)]
pub struct FastestPolicy;

impl FastestPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionPolicy for FastestPolicy {
    fn select(
        &self,
        upstreams: &[Arc<TrackedUpstream>],
        excluded: &HashSet<usize>,
    ) -> Option<usize> {
        let candidates = candidate_indices(upstreams, excluded);
        let now = Instant::now();

        let mut best: Option<(usize, f64)> = None;
        for idx in candidates {
            let score = health::score_upstream(&upstreams[idx], now);
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((idx, score)),
            }
        }
        best.map(|(idx, _)| idx)
    }

    fn name(&self) -> &'static str {
        "fastest"
    }
}
