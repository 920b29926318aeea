//! Batch ranking and multi-dataset aggregation.

use crate::schema::Candidate;

/// Costs closer than this tie.
pub const RANK_TOLERANCE: f64 = 1e-9;

/// Rank every member of an evaluated batch in place.
///
/// Failed or dud members take the worst rank, the batch size. Others rank
/// one more than the number of members with a strictly lower cost, so tied
/// members share a rank.
pub fn rank_batch(batch: &mut [Candidate]) {
    let size = batch.len() as u32;
    let costs: Vec<Option<f64>> = batch
        .iter()
        .map(|c| (!c.is_unusable()).then_some(c.cost))
        .collect();

    for (i, candidate) in batch.iter_mut().enumerate() {
        candidate.rank = match costs[i] {
            None => size,
            Some(cost) => {
                let better = costs
                    .iter()
                    .enumerate()
                    .filter(|(j, other)| {
                        *j != i && other.is_some_and(|o| o < cost - RANK_TOLERANCE)
                    })
                    .count();
                1 + better as u32
            }
        };
    }
}

/// Per-member totals across datasets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchTotals {
    pub summed_costs: Vec<f64>,
    pub summed_ranks: Vec<u32>,
    /// Member failed in at least one dataset.
    pub failed: Vec<bool>,
}

impl BatchTotals {
    /// Sum costs and ranks over per-dataset batches of equal length.
    pub fn from_datasets(batches: &[Vec<Candidate>]) -> Self {
        let size = batches.first().map_or(0, Vec::len);
        let mut totals = Self {
            summed_costs: vec![0.0; size],
            summed_ranks: vec![0; size],
            failed: vec![false; size],
        };
        for batch in batches {
            for (i, c) in batch.iter().enumerate().take(size) {
                totals.summed_costs[i] += c.cost;
                totals.summed_ranks[i] += c.rank;
                totals.failed[i] |= c.is_unusable();
            }
        }
        totals
    }

    /// Member with the lowest summed cost. Exact ties go to the lower rank
    /// sum, then to the earlier member.
    pub fn best_index(&self) -> Option<usize> {
        (0..self.summed_costs.len()).min_by(|&a, &b| {
            self.summed_costs[a]
                .total_cmp(&self.summed_costs[b])
                .then(self.summed_ranks[a].cmp(&self.summed_ranks[b]))
                .then(a.cmp(&b))
        })
    }

    /// The batch as seen by a strategy: dataset 0 components carrying the
    /// summed cost and rank.
    pub fn combine(&self, batches: &[Vec<Candidate>]) -> Vec<Candidate> {
        let Some(first) = batches.first() else {
            return Vec::new();
        };
        first
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let mut combined = c.clone();
                combined.cost = self.summed_costs[i];
                combined.rank = self.summed_ranks[i];
                combined.failed = self.failed[i];
                combined
            })
            .collect()
    }
}
