//! Schema module - Candidate data model and configuration types for ECP fitting.

mod candidate;
mod config;
mod cost;
mod search;

pub use candidate::*;
pub use config::*;
pub use cost::*;
pub use search::*;
