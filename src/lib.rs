//! ECP fit - Parameter search for effective core potentials.
//!
//! This crate tunes the coefficients and exponents of an effective core
//! potential against one or more reference datasets. An external evaluator
//! runs the electronic structure calculation for each candidate. The crate
//! decides which candidates to try, scores them, and remembers every result.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Candidate data model and configuration types
//! - `compute`: Cost model, evaluation history, search strategies and the
//!   round orchestrator
//!
//! # Example
//!
//! ```rust,no_run
//! use ecp_fit::{
//!     compute::{Evaluation, RoundOrchestrator},
//!     schema::{Candidate, Diagnostics, FitConfig},
//! };
//!
//! let config = FitConfig::default();
//!
//! // Stand-in evaluator; real runs call out to the quantum chemistry code.
//! let evaluator = |_: &Candidate, _: usize| Evaluation::Completed(Diagnostics::default());
//!
//! let mut orchestrator = RoundOrchestrator::new(config, evaluator).unwrap();
//! orchestrator.restore();
//! let result = orchestrator.run().unwrap();
//!
//! println!("Best after {} rounds: {:?}", result.rounds, result.best);
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::{Evaluation, Evaluator, RoundOrchestrator, RunResult};
pub use schema::{Candidate, FitConfig};
