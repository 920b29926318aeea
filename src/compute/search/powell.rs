//! Powell direction-set descent.
//!
//! Holds `k` unit directions plus one accumulating direction. Each round tries
//! the current best one step either way along the active direction. Moves
//! that improve the best are summed into the accumulating direction, which is
//! folded back into the most used unit direction once every direction has
//! been exhausted. After `k + 1` rounds without improvement every step shrinks.

use log::{debug, info};

use crate::schema::{Candidate, PowellConfig, SearchBounds, TemplateError, VALUE_TOLERANCE};

use super::{Pending, RETRY_BUDGET, SearchPhase, SearchRng, SearchStrategy, filter_batch};

/// Powell direction-set strategy.
#[derive(Debug)]
pub struct Powell {
    config: PowellConfig,
    bounds: SearchBounds,
    /// `k` unit directions followed by the accumulating direction.
    directions: Vec<Vec<f64>>,
    /// Improving moves made along each direction since the last fold.
    direction_uses: Vec<usize>,
    active: usize,
    steps: Vec<f64>,
    reductions: Vec<f64>,
    min_steps: Vec<f64>,
    /// Rounds since the best last changed.
    stagnant: usize,
    previous_best: Candidate,
    pending: Pending,
}

impl Powell {
    pub fn new(config: PowellConfig, bounds: SearchBounds) -> Self {
        Self {
            config,
            bounds,
            directions: Vec::new(),
            direction_uses: Vec::new(),
            active: 0,
            steps: Vec::new(),
            reductions: Vec::new(),
            min_steps: Vec::new(),
            stagnant: 0,
            previous_best: Candidate::default(),
            pending: Pending::default(),
        }
    }

    /// Current per-component step sizes.
    pub fn steps(&self) -> &[f64] {
        &self.steps
    }

    fn dimensions(&self) -> usize {
        self.steps.len()
    }

    fn powell_index(&self) -> usize {
        self.directions.len() - 1
    }

    /// Step from `origin` along the active direction, repeating the step while
    /// any component lands exactly on zero.
    fn step_from(&self, origin: &Candidate, sense: f64) -> Candidate {
        let direction = &self.directions[self.active];
        let mut candidate = origin.as_proposal();
        for _ in 0..RETRY_BUDGET {
            for (i, component) in candidate.components.iter_mut().enumerate() {
                component.value += sense * direction[i] * self.steps[i];
            }
            if !candidate.has_zero_component() {
                break;
            }
            debug!("Powell step landed on zero, stepping again");
        }
        candidate
    }

    fn prepare_batch(&mut self, best: &Candidate) {
        let batch = vec![
            best.as_proposal(),
            self.step_from(best, 1.0),
            self.step_from(best, -1.0),
        ];
        self.pending.ready(filter_batch(batch, &self.bounds));
    }

    /// Whether `best` sits one positive step from the previous best.
    fn moved_positive(&self, best: &Candidate) -> bool {
        let direction = &self.directions[self.active];
        best.components
            .iter()
            .zip(&self.previous_best.components)
            .enumerate()
            .all(|(i, (now, before))| {
                let expected = before.value + direction[i] * self.steps[i];
                (now.value - expected).abs() <= VALUE_TOLERANCE
            })
    }

    /// Replace the most used unit direction with the accumulated one, if it
    /// is non-zero, then clear the accumulator and usage counts.
    fn fold_powell_direction(&mut self) {
        let powell = self.powell_index();
        let magnitude: f64 = self.directions[powell].iter().map(|d| d * d).sum();

        if magnitude > 0.0 {
            let mut most_used = 0;
            for j in 1..powell {
                if self.direction_uses[j] > self.direction_uses[most_used] {
                    most_used = j;
                }
            }
            debug!("Folding accumulated direction into direction {}", most_used);
            self.directions[most_used] = self.directions[powell].clone();
        }

        self.directions[powell].iter_mut().for_each(|d| *d = 0.0);
        self.direction_uses.iter_mut().for_each(|u| *u = 0);
    }

    fn shrink_steps(&mut self) {
        for i in 0..self.steps.len() {
            if self.steps[i] > self.min_steps[i] {
                self.steps[i] *= self.reductions[i];
            }
        }
        info!("Reducing Powell step sizes to {:?}", self.steps);
    }

    fn steps_exhausted(&self) -> bool {
        self.steps
            .iter()
            .zip(&self.min_steps)
            .all(|(step, min)| step <= min)
    }
}

impl SearchStrategy for Powell {
    fn name(&self) -> &'static str {
        "powell"
    }

    fn set_starting_point(
        &mut self,
        template: &Candidate,
        _rng: &mut SearchRng,
    ) -> Result<(), TemplateError> {
        template.validate_template(&self.bounds)?;

        let k = template.len();
        self.directions = (0..=k)
            .map(|d| (0..k).map(|i| if i == d { 1.0 } else { 0.0 }).collect())
            .collect();
        self.direction_uses = vec![0; k + 1];
        self.active = 0;
        self.stagnant = 0;
        self.steps = self.config.steps.resolve(template);
        self.reductions = self.config.reduction.resolve(template);
        self.min_steps = self.config.min_steps.resolve(template);
        self.previous_best = template.as_proposal();

        self.prepare_batch(template);
        Ok(())
    }

    fn propose_batch(&mut self) -> Vec<Candidate> {
        self.pending.take()
    }

    fn absorb_results(&mut self, tested: &[Candidate], best: usize, _rng: &mut SearchRng) {
        let Some(best) = tested.get(best).cloned() else {
            self.pending.converge();
            return;
        };
        let powell = self.powell_index();

        if best.matches(&self.previous_best) {
            self.active += 1;
            self.stagnant += 1;

            if self.active > powell {
                self.active = 0;
                self.fold_powell_direction();
            }
        } else {
            if self.active < powell {
                let sense = if self.moved_positive(&best) { 1.0 } else { -1.0 };
                let (head, tail) = self.directions.split_at_mut(powell);
                for (acc, d) in tail[0].iter_mut().zip(&head[self.active]) {
                    *acc += sense * d;
                }

                if self.config.max_steps_in_one_direction > 0
                    && self.direction_uses[self.active] == self.config.max_steps_in_one_direction
                {
                    self.active += 1;
                }
            }

            self.direction_uses[self.active] += 1;
            self.stagnant = 0;
            self.previous_best = best.clone();
        }

        if self.stagnant > self.dimensions() {
            self.shrink_steps();
            self.stagnant = 0;
        }

        if self.steps_exhausted() {
            info!("Powell converged with steps {:?}", self.steps);
            self.pending.converge();
        } else {
            self.prepare_batch(&best);
        }
    }

    fn phase(&self) -> SearchPhase {
        self.pending.phase()
    }
}
