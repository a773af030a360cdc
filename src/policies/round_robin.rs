//! Round-robin selection.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use super::{candidate_indices, SelectionPolicy};
use crate::core::upstream::TrackedUpstream;

/// Cycles through the pool in its startup order.
///
/// The cursor rotates over the full sequence, not the candidate subset, and
/// advances past the chosen index. Over an unchanging candidate set this
/// visits every candidate before repeating any, even when the candidates are
/// a sparse subset of the pool.
#[derive(Debug, Default)]
pub struct RoundRobinPolicy {
    cursor: AtomicUsize,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }
}

impl SelectionPolicy for RoundRobinPolicy {
    fn select(
        &self,
        upstreams: &[Arc<TrackedUpstream>],
        excluded: &HashSet<usize>,
    ) -> Option<usize> {
        let total = upstreams.len();
        if total == 0 {
            return None;
        }
        let candidates = candidate_indices(upstreams, excluded);
        if candidates.is_empty() {
            return None;
        }
        let candidate_set: HashSet<usize> = candidates.into_iter().collect();

        let mut cursor = self.cursor.load(Ordering::Acquire);
        loop {
            let chosen = (0..total)
                .map(|offset| (cursor + offset) % total)
                .find(|idx| candidate_set.contains(idx))?;

            match self.cursor.compare_exchange_weak(
                cursor,
                (chosen + 1) % total,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(chosen),
                Err(actual) => cursor = actual,
            }
        }
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
