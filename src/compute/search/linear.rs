//! Full-factorial sweep over every component.

use log::info;

use crate::schema::{Candidate, LinearConfig, SearchBounds, TemplateError};

use super::{Pending, SearchPhase, SearchRng, SearchStrategy, filter_batch};

/// Deterministic grid between the class bounds. Converges after one batch.
#[derive(Debug)]
pub struct LinearScan {
    config: LinearConfig,
    bounds: SearchBounds,
    pending: Pending,
}

impl LinearScan {
    pub fn new(config: LinearConfig, bounds: SearchBounds) -> Self {
        Self {
            config,
            bounds,
            pending: Pending::default(),
        }
    }

    /// Grid values for one component: from the class minimum (nudged off
    /// zero) up to, but excluding, the class maximum.
    fn axis(&self, template: &Candidate, position: usize, step: f64) -> Vec<f64> {
        if !(step > 0.0) {
            return Vec::new();
        }
        let bounds = self.bounds.get(template.components[position].class);
        let mut value = bounds.min;
        if value == 0.0 {
            value += step;
        }

        let mut axis = Vec::new();
        while value < bounds.max {
            if value != 0.0 {
                axis.push(value);
            }
            value += step;
        }
        axis
    }

    fn grid(&self, template: &Candidate) -> Vec<Candidate> {
        let steps = self.config.steps.resolve(template);

        let mut grid = vec![template.as_proposal()];
        for (position, &step) in steps.iter().enumerate() {
            let axis = self.axis(template, position, step);
            grid = grid
                .iter()
                .flat_map(|partial| {
                    axis.iter().map(move |&value| {
                        let mut c = partial.clone();
                        c.components[position].value = value;
                        c
                    })
                })
                .collect();
        }

        let mut batch = Vec::with_capacity(grid.len() + 1);
        batch.push(template.as_proposal());
        batch.extend(grid);
        filter_batch(batch, &self.bounds)
    }
}

impl SearchStrategy for LinearScan {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn set_starting_point(
        &mut self,
        template: &Candidate,
        _rng: &mut SearchRng,
    ) -> Result<(), TemplateError> {
        if template.is_empty() {
            return Err(TemplateError::Empty);
        }
        let batch = self.grid(template);
        info!("Linear scan over {} candidates", batch.len());
        self.pending.ready(batch);
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

#[cfg(test)]
mod tests {
    use super::super::test_support::candidate;
    use super::*;
    use crate::schema::{Bounds, StepSchedule};

    fn scan(bounds: Bounds, step: f64, start: &[f64]) -> Vec<Candidate> {
        let mut rng = SearchRng::new(1);
        let mut linear = LinearScan::new(
            LinearConfig {
                steps: StepSchedule::uniform(step, step),
            },
            SearchBounds::splat(bounds),
        );
        linear.set_starting_point(&candidate(start), &mut rng).unwrap();
        linear.propose_batch()
    }

    #[test]
    fn test_cartesian_grid() {
        let batch = scan(Bounds::new(0.0, 3.0), 1.0, &[2.5, 0.5]);

        // Template first, then {1, 2} x {1, 2}.
        assert_eq!(batch.len(), 5);
        assert_eq!(batch[0].values(), vec![2.5, 0.5]);
        let grid: Vec<Vec<f64>> = batch[1..].iter().map(|c| c.values()).collect();
        assert_eq!(
            grid,
            vec![
                vec![1.0, 1.0],
                vec![1.0, 2.0],
                vec![2.0, 1.0],
                vec![2.0, 2.0]
            ]
        );
    }

    #[test]
    fn test_template_on_grid_not_duplicated() {
        let batch = scan(Bounds::new(1.0, 3.0), 1.0, &[1.0]);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_zero_never_proposed() {
        let batch = scan(Bounds::new(0.0, 2.0), 0.5, &[1.0]);
        assert!(batch.iter().all(|c| !c.has_zero_component()));
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_converges_after_one_round() {
        let mut rng = SearchRng::new(1);
        let mut linear = LinearScan::new(
            LinearConfig::default(),
            SearchBounds::splat(Bounds::new(0.0, 3.0)),
        );
        linear.set_starting_point(&candidate(&[1.0]), &mut rng).unwrap();
        let batch = linear.propose_batch();
        linear.absorb_results(&batch, 0, &mut rng);
        assert!(linear.is_converged());
    }

    #[test]
    fn test_empty_template_rejected() {
        let mut rng = SearchRng::new(1);
        let mut linear = LinearScan::new(LinearConfig::default(), SearchBounds::default());
        assert!(matches!(
            linear.set_starting_point(&Candidate::default(), &mut rng),
            Err(TemplateError::Empty)
        ));
    }
}
