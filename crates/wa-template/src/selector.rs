//! RandomSelector (component B, `spec.md` §4.B).
//!
//! Chooses one option per block through the injected [`RandomSource`] seam
//! rather than sampling directly, so selection can be replayed
//! deterministically (P5) and audited for uniformity (P6).

use std::collections::HashMap;
use wa_core::template::{Block, Selection};
use wa_core::random::{RandomSource, SeededRandomSource};

/// Stateless selection algorithm over a slice of [`Block`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl RandomSelector {
    /// Select one option per block using `source`.
    ///
    /// Blocks with zero options (should not occur on a valid [`Template`])
    /// are skipped rather than panicking.
    #[must_use]
    pub fn select_one(&self, blocks: &[Block], source: &dyn RandomSource) -> Vec<Selection> {
        blocks
            .iter()
            .filter(|b| !b.options.is_empty())
            .map(|b| Selection {
                block_index: b.index,
                option_index: source.uint64n(b.options.len() as u64) as usize,
            })
            .collect()
    }

    /// Select one option per block deterministically from `seed`.
    ///
    /// Pure function of `(blocks, seed)` (P5): the same template and seed
    /// always produce the same selections.
    #[must_use]
    pub fn select_with_seed(&self, blocks: &[Block], seed: u64) -> Vec<Selection> {
        let source = SeededRandomSource::new(seed);
        self.select_one(blocks, &source)
    }

    /// Produce up to `count` selection sets, attempting to keep them
    /// pairwise distinct on a best-effort basis (used for message
    /// previews). Falls back to repeats once the combination space is
    /// exhausted or smaller than `count`.
    #[must_use]
    pub fn select_many(&self, blocks: &[Block], source: &dyn RandomSource, count: usize) -> Vec<Vec<Selection>> {
        let max_distinct = total_combinations(blocks);
        let target = count.min(max_distinct.max(1));
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::with_capacity(count);
        let mut attempts = 0usize;
        // Bound attempts so a pathological combination space can't spin forever.
        let max_attempts = count.saturating_mul(20).max(50);
        while out.len() < count && attempts < max_attempts {
            attempts += 1;
            let selections = self.select_one(blocks, source);
            let key: Vec<(usize, usize)> = selections.iter().map(|s| (s.block_index, s.option_index)).collect();
            if out.len() < target && !seen.insert(key) {
                continue;
            }
            out.push(selections);
        }
        out
    }

    /// Run `iterations` independent selections and report, per block, how
    /// often each option index was chosen. Used to validate uniformity
    /// (P6) against a chi-square threshold by the caller.
    #[must_use]
    pub fn test_distribution(&self, blocks: &[Block], source: &dyn RandomSource, iterations: u32) -> DistributionReport {
        let mut counts: HashMap<usize, Vec<u64>> = blocks
            .iter()
            .map(|b| (b.index, vec![0u64; b.options.len()]))
            .collect();
        for _ in 0..iterations {
            for selection in self.select_one(blocks, source) {
                if let Some(bucket) = counts.get_mut(&selection.block_index) {
                    if let Some(slot) = bucket.get_mut(selection.option_index) {
                        *slot += 1;
                    }
                }
            }
        }
        DistributionReport { iterations, counts }
    }
}

fn total_combinations(blocks: &[Block]) -> usize {
    blocks
        .iter()
        .map(|b| b.options.len().max(1))
        .try_fold(1usize, |acc, n| acc.checked_mul(n))
        .unwrap_or(usize::MAX)
}

/// Per-block, per-option selection counts gathered by
/// [`RandomSelector::test_distribution`].
#[derive(Debug, Clone)]
pub struct DistributionReport {
    /// Total number of selection rounds run.
    pub iterations: u32,
    /// `block_index -> option_index -> count`.
    pub counts: HashMap<usize, Vec<u64>>,
}

impl DistributionReport {
    /// Pearson's chi-square statistic for `block_index` against the
    /// uniform-distribution null hypothesis. Returns `None` if the block
    /// has fewer than 2 options or was never observed.
    #[must_use]
    pub fn chi_square(&self, block_index: usize) -> Option<f64> {
        let observed = self.counts.get(&block_index)?;
        if observed.len() < 2 || self.iterations == 0 {
            return None;
        }
        let expected = f64::from(self.iterations) / observed.len() as f64;
        let stat = observed
            .iter()
            .map(|&o| {
                let diff = o as f64 - expected;
                diff * diff / expected
            })
            .sum();
        Some(stat)
    }
}
