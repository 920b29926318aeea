//! Single-shot scoring of the starting template.

use crate::schema::{Candidate, TemplateError};

use super::{Pending, SearchPhase, SearchRng, SearchStrategy};

/// Evaluates the starting template once and stops.
///
/// An empty template is allowed and yields a single component-less
/// candidate, which lets an evaluator score its unmodified input.
#[derive(Debug, Default)]
pub struct Analysis {
    pending: Pending,
}

impl Analysis {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SearchStrategy for Analysis {
    fn name(&self) -> &'static str {
        "analysis"
    }

    fn set_starting_point(
        &mut self,
        template: &Candidate,
        _rng: &mut SearchRng,
    ) -> Result<(), TemplateError> {
        self.pending.ready(vec![template.as_proposal()]);
        Ok(())
    }

    fn propose_batch(&mut self) -> Vec<Candidate> {
        self.pending.take()
    }

    fn absorb_results(&mut self, _tested: &[Candidate], _best: usize, _rng: &mut SearchRng) {
        self.pending.converge();
    }

    fn phase(&self) -> SearchPhase {
        self.pending.phase()
    }
}
