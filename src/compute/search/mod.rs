//! Search strategies proposing candidate batches.
//!
//! Every strategy follows the same cycle: seed it with a starting template,
//! take the proposed batch, evaluate it, hand the ranked results back, and
//! repeat until it reports convergence.
//!
//! ```text
//! Idle -> Proposing -> AwaitingResults -> Proposing -> ... -> Converged
//! ```
//!
//! # Strategies
//!
//! - `Analysis`: score the template once
//! - `LinearScan`: full-factorial sweep between the class bounds
//! - `Powell`: direction-set descent with shrinking steps
//! - `Genetic`: roulette selection, uniform crossover and mutation
//! - `NewtonRaphson`: central-difference Newton steps, optionally driven by
//!   an L-BFGS minimizer

mod analysis;
mod genetic;
mod lbfgs;
mod linear;
mod newton;
mod powell;
mod rng;

pub use analysis::Analysis;
pub use genetic::Genetic;
pub use lbfgs::LbfgsMinimizer;
pub use linear::LinearScan;
pub use newton::NewtonRaphson;
pub use powell::Powell;
pub use rng::SearchRng;

use crate::schema::{Candidate, SearchAlgorithm, SearchBounds, TemplateError};

/// Attempts made to refill a batch thinned by filtering.
pub const RETRY_BUDGET: usize = 10;

/// Lifecycle of a search strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchPhase {
    /// No starting point yet.
    #[default]
    Idle,
    /// A batch is ready to be taken.
    Proposing,
    /// The batch was handed out and results are pending.
    AwaitingResults,
    Converged,
}

/// Capability shared by every strategy.
pub trait SearchStrategy: Send {
    fn name(&self) -> &'static str;

    /// Seed the search and prepare the first batch.
    fn set_starting_point(
        &mut self,
        template: &Candidate,
        rng: &mut SearchRng,
    ) -> Result<(), TemplateError>;

    /// Take the pending batch. Empty once converged.
    fn propose_batch(&mut self) -> Vec<Candidate>;

    /// Absorb the evaluated batch and the index of its best member.
    ///
    /// With several datasets each member of `tested` carries the cost and
    /// rank summed across datasets, and is marked failed if it failed in any
    /// of them. Components are those of the proposed batch.
    fn absorb_results(&mut self, tested: &[Candidate], best: usize, rng: &mut SearchRng);

    fn is_converged(&self) -> bool {
        self.phase() == SearchPhase::Converged
    }

    fn phase(&self) -> SearchPhase;
}

/// Pending batch plus lifecycle phase, shared by the strategy implementations.
#[derive(Debug, Clone, Default)]
pub(crate) struct Pending {
    batch: Vec<Candidate>,
    phase: SearchPhase,
}

impl Pending {
    pub(crate) fn ready(&mut self, batch: Vec<Candidate>) {
        self.batch = batch;
        self.phase = SearchPhase::Proposing;
    }

    pub(crate) fn take(&mut self) -> Vec<Candidate> {
        match self.phase {
            SearchPhase::Proposing | SearchPhase::AwaitingResults => {
                self.phase = SearchPhase::AwaitingResults;
                self.batch.clone()
            }
            SearchPhase::Idle | SearchPhase::Converged => Vec::new(),
        }
    }

    pub(crate) fn converge(&mut self) {
        self.batch.clear();
        self.phase = SearchPhase::Converged;
    }

    pub(crate) fn phase(&self) -> SearchPhase {
        self.phase
    }
}

/// Drop later duplicates and out-of-bounds members, keeping order.
pub fn filter_batch(batch: Vec<Candidate>, bounds: &SearchBounds) -> Vec<Candidate> {
    let mut kept: Vec<Candidate> = Vec::with_capacity(batch.len());
    for candidate in batch {
        if !bounds.contains(&candidate) {
            log::debug!("Dropping out-of-bounds proposal {:?}", candidate.values());
            continue;
        }
        if kept.iter().any(|k| k.matches(&candidate)) {
            continue;
        }
        kept.push(candidate);
    }
    kept
}

/// Fill `batch` up to `target` from `generate`, filtering after every pass.
///
/// Gives up after [`RETRY_BUDGET`] passes and keeps what survived.
pub(crate) fn fill_batch<F>(
    mut batch: Vec<Candidate>,
    target: usize,
    bounds: &SearchBounds,
    mut generate: F,
) -> Vec<Candidate>
where
    F: FnMut() -> Candidate,
{
    for _ in 0..RETRY_BUDGET {
        if batch.len() >= target {
            break;
        }
        while batch.len() < target {
            batch.push(generate());
        }
        batch = filter_batch(batch, bounds);
    }
    if batch.len() < target {
        log::warn!(
            "Batch filled to {} of {} after {} attempts",
            batch.len(),
            target,
            RETRY_BUDGET
        );
    }
    batch
}

/// Create the strategy selected by configuration.
pub fn build_strategy(algorithm: &SearchAlgorithm, bounds: &SearchBounds) -> Box<dyn SearchStrategy> {
    match algorithm {
        SearchAlgorithm::Analysis => Box::new(Analysis::new()),
        SearchAlgorithm::Linear(config) => Box::new(LinearScan::new(config.clone(), *bounds)),
        SearchAlgorithm::Powell(config) => Box::new(Powell::new(config.clone(), *bounds)),
        SearchAlgorithm::Genetic(config) => Box::new(Genetic::new(config.clone(), *bounds)),
        SearchAlgorithm::NewtonRaphson(config) => {
            Box::new(NewtonRaphson::new(config.clone(), *bounds, false))
        }
        SearchAlgorithm::Lbfgs(config) => Box::new(NewtonRaphson::new(config.clone(), *bounds, true)),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::candidate;
    use super::*;
    use crate::schema::{Bounds, GeneticConfig, LinearConfig, NewtonConfig, PowellConfig};
    use proptest::prelude::*;

    #[test]
    fn test_filter_batch_dedups_and_bounds() {
        let bounds = SearchBounds::splat(Bounds::new(0.0, 10.0));
        let batch = vec![
            candidate(&[1.0, 2.0]),
            candidate(&[1.0 + 1e-8, 2.0]),
            candidate(&[11.0, 2.0]),
            candidate(&[3.0, 4.0]),
        ];
        let kept = filter_batch(batch, &bounds);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].values(), vec![3.0, 4.0]);
    }

    #[test]
    fn test_fill_batch_gives_up() {
        let bounds = SearchBounds::default();
        let mut calls = 0;
        let batch = fill_batch(Vec::new(), 3, &bounds, || {
            calls += 1;
            candidate(&[1.0])
        });
        assert_eq!(batch.len(), 1);
        assert!(calls <= 3 + 2 * (RETRY_BUDGET - 1));
    }

    #[test]
    fn test_pending_lifecycle() {
        let mut pending = Pending::default();
        assert!(pending.take().is_empty());
        pending.ready(vec![candidate(&[1.0])]);
        assert_eq!(pending.phase(), SearchPhase::Proposing);
        assert_eq!(pending.take().len(), 1);
        assert_eq!(pending.phase(), SearchPhase::AwaitingResults);
        pending.converge();
        assert!(pending.take().is_empty());
    }

    fn all_algorithms() -> Vec<SearchAlgorithm> {
        vec![
            SearchAlgorithm::Analysis,
            SearchAlgorithm::Linear(LinearConfig {
                steps: crate::schema::StepSchedule::uniform(2.5, 2.5),
            }),
            SearchAlgorithm::Powell(PowellConfig::default()),
            SearchAlgorithm::Genetic(GeneticConfig::default()),
            SearchAlgorithm::NewtonRaphson(NewtonConfig::default()),
            SearchAlgorithm::Lbfgs(NewtonConfig::default()),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_proposals_respect_bounds(
            start in prop::collection::vec(1.0..9.0f64, 2),
            seed in any::<u64>(),
        ) {
            let bounds = SearchBounds::splat(Bounds::new(0.5, 9.5));
            let template = candidate(&start);
            for algorithm in all_algorithms() {
                let mut rng = SearchRng::new(seed);
                let mut strategy = build_strategy(&algorithm, &bounds);
                strategy.set_starting_point(&template, &mut rng).unwrap();

                for _ in 0..6 {
                    if strategy.is_converged() {
                        break;
                    }
                    let batch = strategy.propose_batch();
                    for (i, c) in batch.iter().enumerate() {
                        prop_assert!(bounds.contains(c), "{} proposed {:?}", strategy.name(), c.values());
                        for other in &batch[i + 1..] {
                            prop_assert!(!c.matches(other));
                        }
                    }
                    let (tested, best) = test_support::score(&batch, |v| {
                        v.iter().map(|x| (x - 4.0) * (x - 4.0)).sum()
                    });
                    if tested.is_empty() {
                        break;
                    }
                    strategy.absorb_results(&tested, best, &mut rng);
                }
            }
        }
    }
}
