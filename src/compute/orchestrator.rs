//! Round orchestration.
//!
//! One round takes the strategy's batch and applies it to every dataset. For
//! each dataset a member is served from that dataset's history if seen
//! before, and evaluated otherwise. Each dataset's batch is ranked on its own.
//! Costs and ranks are then summed across datasets, and the combined batch
//! goes back to the strategy.
//!
//! # Example
//!
//! ```rust,no_run
//! use ecp_fit::compute::{Evaluation, RoundOrchestrator};
//! use ecp_fit::schema::{Candidate, Diagnostics, FitConfig};
//!
//! let config = FitConfig::default();
//! let evaluator = |candidate: &Candidate, _dataset: usize| {
//!     let _ = candidate;
//!     Evaluation::Completed(Diagnostics::default())
//! };
//!
//! let mut orchestrator = RoundOrchestrator::new(config, evaluator).unwrap();
//! orchestrator.restore();
//! let result = orchestrator
//!     .run_with_callback(|report| {
//!         println!("Round {}: best cost {:.6}", report.round, report.best.cost);
//!     })
//!     .unwrap();
//! println!("Stopped: {:?}", result.stop_reason);
//! ```

use std::time::Instant;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::schema::{Candidate, ConfigError, Diagnostics, FitConfig, TemplateError};

use super::cost::{CostFunction, CostModel};
use super::history::{History, RestoreSource, legacy};
use super::rank::{BatchTotals, rank_batch};
use super::search::{SearchRng, SearchStrategy, build_strategy};

/// Outcome of one external evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Completed(Diagnostics),
    /// The evaluator could not produce results, including on timeout.
    Failed,
}

/// External fitness evaluator.
pub trait Evaluator: Sync {
    fn evaluate(&self, candidate: &Candidate, dataset: usize) -> Evaluation;
}

impl<F> Evaluator for F
where
    F: Fn(&Candidate, usize) -> Evaluation + Sync,
{
    fn evaluate(&self, candidate: &Candidate, dataset: usize) -> Evaluation {
        self(candidate, dataset)
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Converged,
    EvaluationBudget,
    RoundLimit,
}

/// Fatal run errors.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Every evaluation of round {round} failed for dataset {dataset} ({batch_size} candidates)")]
    AllEvaluationsFailed {
        round: usize,
        dataset: usize,
        batch_size: usize,
    },
    #[error("Invalid template: {0}")]
    Template(#[from] TemplateError),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Summary of one completed round.
#[derive(Debug, Clone)]
pub struct RoundReport {
    /// Round number, starting at 1.
    pub round: usize,
    pub batch_size: usize,
    /// Evaluations counted against the budget this round.
    pub evaluations: usize,
    /// Failed members per dataset.
    pub failures: Vec<usize>,
    pub summed_costs: Vec<f64>,
    pub summed_ranks: Vec<u32>,
    pub best_index: usize,
    /// Best member with summed cost and rank.
    pub best: Candidate,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Lowest summed-cost candidate seen across all rounds.
    pub best: Option<Candidate>,
    pub rounds: usize,
    pub evaluations: usize,
    pub stop_reason: StopReason,
    pub elapsed_seconds: f64,
}

/// One dataset's view of a round before ranking.
#[derive(Debug, Default)]
struct DatasetRound {
    tested: Vec<Candidate>,
    from_history: Vec<bool>,
    fresh: usize,
}

/// Drives a search strategy against an evaluator across datasets.
pub struct RoundOrchestrator<E: Evaluator> {
    config: FitConfig,
    evaluator: E,
    cost: CostFunction,
    histories: Vec<History>,
    strategy: Box<dyn SearchStrategy>,
    rng: SearchRng,
    next_index: u64,
    evaluations: usize,
    round: usize,
    best: Option<Candidate>,
}

impl<E: Evaluator> RoundOrchestrator<E> {
    /// Validate the configuration and seed the strategy with the template.
    pub fn new(config: FitConfig, evaluator: E) -> Result<Self, RunError> {
        config.validate()?;

        let cost = CostFunction::new(&config.cost);
        let histories = (0..config.dataset_count()).map(History::new).collect();
        let mut rng = SearchRng::new(config.run.random_seed);
        let mut strategy = build_strategy(&config.search, &config.bounds);
        strategy.set_starting_point(&config.starting_candidate(), &mut rng)?;
        info!(
            "Starting {} search over {} dataset(s)",
            strategy.name(),
            config.dataset_count()
        );

        Ok(Self {
            config,
            evaluator,
            cost,
            histories,
            strategy,
            rng,
            next_index: 0,
            evaluations: 0,
            round: 0,
            best: None,
        })
    }

    pub fn histories(&self) -> &[History] {
        &self.histories
    }

    pub fn cost_function(&self) -> &CostFunction {
        &self.cost
    }

    pub fn strategy(&self) -> &dyn SearchStrategy {
        self.strategy.as_ref()
    }

    /// Evaluations counted against the budget so far.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Load each dataset's history from disk and refresh its checkpoint.
    ///
    /// Without persistence every history stays empty.
    pub fn restore(&mut self) -> Vec<RestoreSource> {
        let Some(persistence) = self.config.persistence.clone() else {
            return vec![RestoreSource::Empty; self.histories.len()];
        };

        let mut sources = Vec::with_capacity(self.histories.len());
        for dataset in 0..self.histories.len() {
            let (history, source) = History::restore(
                dataset,
                &persistence.checkpoint_path(dataset),
                &persistence.log_path(dataset),
                &persistence.regions_path(),
                &self.cost,
            );

            if !self.config.run.dry_run
                && !history.is_empty()
                && let Err(e) = history.save_checkpoint(&persistence.checkpoint_path(dataset))
            {
                warn!("Failed to rewrite checkpoint for dataset {}: {}", dataset, e);
            }

            self.histories[dataset] = history;
            sources.push(source);
        }

        self.next_index = self
            .histories
            .iter()
            .filter_map(History::max_sequence_index)
            .max()
            .map_or(0, |index| index + 1);
        sources
    }

    fn should_stop(&self) -> Option<StopReason> {
        if self.strategy.is_converged() {
            return Some(StopReason::Converged);
        }

        if self.evaluations >= self.config.run.max_evaluations {
            return Some(StopReason::EvaluationBudget);
        }

        if let Some(limit) = self.config.run.max_rounds
            && self.round >= limit
        {
            return Some(StopReason::RoundLimit);
        }

        None
    }

    /// Run one round. `None` when the strategy has nothing left to propose.
    pub fn step(&mut self) -> Result<Option<RoundReport>, RunError> {
        let proposed = self.strategy.propose_batch();
        let batch: Vec<Candidate> = proposed
            .into_iter()
            .filter(|c| {
                let inside = self.config.bounds.contains(c);
                if !inside {
                    warn!("Skipping out-of-bounds proposal {:?}", c.values());
                }
                inside
            })
            .collect();
        if batch.is_empty() {
            warn!("{} proposed an empty batch", self.strategy.name());
            return Ok(None);
        }

        self.round += 1;
        let dry_run = self.config.run.dry_run;
        info!("Round {}: {} candidates", self.round, batch.len());

        let evaluator = &self.evaluator;
        let cost = &self.cost;
        let mut rounds: Vec<DatasetRound> = if self.config.run.parallel_datasets {
            self.histories
                .par_iter()
                .map(|history| evaluate_dataset(evaluator, cost, history, &batch, dry_run))
                .collect()
        } else {
            self.histories
                .iter()
                .map(|history| evaluate_dataset(evaluator, cost, history, &batch, dry_run))
                .collect()
        };

        let mut counted = 0;
        for dataset_round in &mut rounds {
            for (candidate, cached) in dataset_round
                .tested
                .iter_mut()
                .zip(&dataset_round.from_history)
            {
                if !cached {
                    candidate.sequence_index = Some(self.next_index);
                    self.next_index += 1;
                }
            }
            rank_batch(&mut dataset_round.tested);
            counted += if dry_run {
                dataset_round.tested.len()
            } else {
                dataset_round.fresh
            };
        }
        self.evaluations += counted;

        for (dataset, dataset_round) in rounds.iter().enumerate() {
            let added = self.histories[dataset]
                .append_batch(&dataset_round.tested, &dataset_round.from_history);
            debug!("Dataset {}: {} new history entries", dataset, added);
            if !dry_run {
                self.persist_round(dataset, dataset_round, added);
            }
        }

        let failures: Vec<usize> = rounds
            .iter()
            .map(|r| r.tested.iter().filter(|c| c.is_unusable()).count())
            .collect();
        if !dry_run
            && let Some(dataset) = failures.iter().position(|&f| f == batch.len())
        {
            return Err(RunError::AllEvaluationsFailed {
                round: self.round,
                dataset,
                batch_size: batch.len(),
            });
        }

        let tested: Vec<Vec<Candidate>> = rounds.into_iter().map(|r| r.tested).collect();
        let totals = BatchTotals::from_datasets(&tested);
        let best_index = totals.best_index().unwrap_or(0);
        let combined = totals.combine(&tested);
        let best = combined[best_index].clone();

        info!(
            "Round {}: best summed cost {:.6} (rank sum {}) at {:?}",
            self.round,
            best.cost,
            best.rank,
            best.values()
        );

        if !best.failed
            && self
                .best
                .as_ref()
                .is_none_or(|overall| best.cost < overall.cost)
        {
            self.best = Some(best.clone());
        }

        self.strategy
            .absorb_results(&combined, best_index, &mut self.rng);

        Ok(Some(RoundReport {
            round: self.round,
            batch_size: batch.len(),
            evaluations: counted,
            failures,
            summed_costs: totals.summed_costs,
            summed_ranks: totals.summed_ranks,
            best_index,
            best,
        }))
    }

    fn persist_round(&self, dataset: usize, dataset_round: &DatasetRound, added: usize) {
        let Some(persistence) = &self.config.persistence else {
            return;
        };

        if let Err(e) = legacy::append_log_round(
            &persistence.log_path(dataset),
            &self.cost,
            dataset,
            &dataset_round.tested,
        ) {
            warn!("Failed to append log for dataset {}: {}", dataset, e);
        }
        if let Err(e) = legacy::append_regions(
            &persistence.regions_path(),
            &dataset_round.tested,
            &dataset_round.from_history,
        ) {
            warn!("Failed to append regions index: {}", e);
        }
        if added > 0
            && let Err(e) =
                self.histories[dataset].save_checkpoint(&persistence.checkpoint_path(dataset))
        {
            warn!("Failed to write checkpoint for dataset {}: {}", dataset, e);
        }
    }

    /// Run until convergence, budget or round limit.
    pub fn run_with_callback<F>(&mut self, mut callback: F) -> Result<RunResult, RunError>
    where
        F: FnMut(&RoundReport),
    {
        let start_time = Instant::now();

        let stop_reason = loop {
            if let Some(reason) = self.should_stop() {
                break reason;
            }

            match self.step()? {
                Some(report) => callback(&report),
                None => break StopReason::Converged,
            }
        };

        info!(
            "Search stopped after {} rounds and {} evaluations: {:?}",
            self.round, self.evaluations, stop_reason
        );

        Ok(RunResult {
            best: self.best.clone(),
            rounds: self.round,
            evaluations: self.evaluations,
            stop_reason,
            elapsed_seconds: start_time.elapsed().as_secs_f64(),
        })
    }

    /// Run to completion.
    pub fn run(&mut self) -> Result<RunResult, RunError> {
        self.run_with_callback(|_| {})
    }
}

/// Serve a batch from one dataset's history, evaluating the misses.
fn evaluate_dataset<E: Evaluator>(
    evaluator: &E,
    cost: &CostFunction,
    history: &History,
    batch: &[Candidate],
    dry_run: bool,
) -> DatasetRound {
    let dataset = history.dataset();
    let mut round = DatasetRound::default();

    for proposal in batch {
        if let Some(entry) = history.lookup(proposal).and_then(|i| history.get(i)) {
            debug!(
                "Dataset {}: history hit for {:?} (cost {})",
                dataset,
                proposal.values(),
                entry.cost
            );
            round.tested.push(entry.clone());
            round.from_history.push(true);
            continue;
        }

        let mut candidate = proposal.as_proposal();
        if dry_run {
            candidate.mark_failed();
        } else {
            round.fresh += 1;
            match evaluator.evaluate(&candidate, dataset) {
                Evaluation::Completed(diagnostics) => {
                    candidate.diagnostics = diagnostics;
                    candidate.cost = cost.cost(&candidate, dataset);
                }
                Evaluation::Failed => {
                    warn!(
                        "Dataset {}: evaluation failed for {:?}",
                        dataset,
                        candidate.values()
                    );
                    candidate.mark_failed();
                }
            }
        }
        debug!(
            "Dataset {}: {:?} -> {}",
            dataset,
            candidate.values(),
            candidate.cost
        );
        round.tested.push(candidate);
        round.from_history.push(false);
    }

    round
}
