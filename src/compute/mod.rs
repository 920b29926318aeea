//! Compute module - Cost scoring, history, search strategies and the round loop.

pub mod cost;
pub mod history;
pub mod orchestrator;
pub mod rank;
pub mod search;

pub use cost::{CostFunction, CostModel};
pub use history::{History, RestoreSource};
pub use orchestrator::{
    Evaluation, Evaluator, RoundOrchestrator, RoundReport, RunError, RunResult, StopReason,
};
pub use rank::{BatchTotals, rank_batch};
pub use search::{SearchPhase, SearchRng, SearchStrategy, build_strategy};
