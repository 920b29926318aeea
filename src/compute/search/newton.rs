//! Newton-Raphson search on central-difference derivatives.
//!
//! Each round evaluates the center and one step either side of it along every
//! component. First and second derivatives per component come from those
//! three costs. The center then moves either by a plain Newton step or by
//! an L-BFGS update.

use log::{info, warn};

use crate::schema::{Candidate, NewtonConfig, SearchBounds, TemplateError};

use super::{LbfgsMinimizer, Pending, SearchPhase, SearchRng, SearchStrategy, filter_batch};

/// Second derivatives below this magnitude count as flat.
const CURVATURE_EPSILON: f64 = 1e-2;

/// Corrections kept by the L-BFGS minimizer.
const LBFGS_MEMORY: usize = 5;

/// Line-search trials per L-BFGS call.
const LBFGS_LINE_SEARCH: usize = 20;

/// L-BFGS function-value budget before the search gives up.
const MAX_FUNCTION_EVALUATIONS: usize = 2000;

/// Derivative estimates at the current center.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Derivatives {
    pub first: Vec<f64>,
    pub second: Vec<f64>,
}

/// Newton-Raphson strategy, optionally L-BFGS driven.
#[derive(Debug)]
pub struct NewtonRaphson {
    config: NewtonConfig,
    bounds: SearchBounds,
    use_lbfgs: bool,
    minimizer: Option<LbfgsMinimizer>,
    steps: Vec<f64>,
    /// Centers closer than this are considered equal.
    delta: f64,
    center: Candidate,
    pending: Pending,
}

impl NewtonRaphson {
    pub fn new(config: NewtonConfig, bounds: SearchBounds, use_lbfgs: bool) -> Self {
        Self {
            config,
            bounds,
            use_lbfgs,
            minimizer: None,
            steps: Vec::new(),
            delta: 0.0,
            center: Candidate::default(),
            pending: Pending::default(),
        }
    }

    /// Point the stencil is currently built around.
    pub fn center(&self) -> &Candidate {
        &self.center
    }

    fn displaced(&self, origin: &Candidate, position: usize, sense: f64) -> Candidate {
        let mut candidate = origin.as_proposal();
        candidate.components[position].value += sense * self.steps[position];
        candidate
    }

    fn prepare_batch(&mut self) {
        let mut batch = vec![self.center.as_proposal()];
        for position in 0..self.center.len() {
            batch.push(self.displaced(&self.center, position, 1.0));
            batch.push(self.displaced(&self.center, position, -1.0));
        }
        self.pending.ready(filter_batch(batch, &self.bounds));
    }

    /// Central-difference derivatives around a center of cost `f0`.
    ///
    /// Stencil points missing from `tested` or whose evaluation failed take
    /// the center cost.
    pub fn derivatives(&self, tested: &[Candidate], f0: f64) -> Derivatives {
        let cost_of = |probe: &Candidate| {
            tested
                .iter()
                .find(|c| c.matches(probe))
                .filter(|c| !c.is_unusable())
                .map_or(f0, |c| c.cost)
        };

        let mut derivatives = Derivatives::default();
        for position in 0..self.center.len() {
            let plus = self.displaced(&self.center, position, 1.0);
            let minus = self.displaced(&self.center, position, -1.0);
            let (f_plus, f_minus) = (cost_of(&plus), cost_of(&minus));

            let x0 = self.center.components[position].value;
            let x_plus = plus.components[position].value;
            let x_minus = minus.components[position].value;

            derivatives.first.push((f_plus - f_minus) / (x_plus - x_minus));
            let distance = x0 - x_minus;
            derivatives
                .second
                .push((f_plus + f_minus - 2.0 * f0) / (distance * distance));
        }
        derivatives
    }
}

impl SearchStrategy for NewtonRaphson {
    fn name(&self) -> &'static str {
        if self.use_lbfgs { "lbfgs" } else { "newton" }
    }

    fn set_starting_point(
        &mut self,
        template: &Candidate,
        _rng: &mut SearchRng,
    ) -> Result<(), TemplateError> {
        template.validate_template(&self.bounds)?;

        self.steps = self.config.steps.resolve(template);
        self.delta = self
            .config
            .min_steps
            .values()
            .fold(f64::INFINITY, f64::min);
        self.minimizer = self
            .use_lbfgs
            .then(|| LbfgsMinimizer::new(template.len(), LBFGS_MEMORY, LBFGS_LINE_SEARCH));
        self.center = template.as_proposal();

        self.prepare_batch();
        Ok(())
    }

    fn propose_batch(&mut self) -> Vec<Candidate> {
        self.pending.take()
    }

    fn absorb_results(&mut self, tested: &[Candidate], _best: usize, _rng: &mut SearchRng) {
        let Some(center) = tested
            .iter()
            .find(|c| c.matches(&self.center))
            .filter(|c| !c.is_unusable())
        else {
            warn!("Newton center was not evaluated, stopping search");
            self.pending.converge();
            return;
        };
        let f0 = center.cost;

        let derivatives = self.derivatives(tested, f0);
        let mut x = self.center.values();

        let mut solver_done = false;
        if let Some(minimizer) = self.minimizer.as_mut() {
            if !minimizer.run(&mut x, f0, &derivatives.second)
                && !minimizer.converged()
                && minimizer.nfun() < MAX_FUNCTION_EVALUATIONS
            {
                minimizer.run(&mut x, f0, &derivatives.second);
            }
            solver_done = minimizer.converged() || minimizer.nfun() > MAX_FUNCTION_EVALUATIONS;
            if minimizer.nfun() > MAX_FUNCTION_EVALUATIONS {
                warn!(
                    "L-BFGS exceeded {} function values, stopping",
                    MAX_FUNCTION_EVALUATIONS
                );
            }
        } else {
            for (xi, (g, g2)) in x
                .iter_mut()
                .zip(derivatives.first.iter().zip(&derivatives.second))
            {
                if *g != 0.0 && *g2 != 0.0 {
                    *xi -= g / g2;
                }
            }
        }

        let mut next = self.center.as_proposal();
        for (component, value) in next.components.iter_mut().zip(&x) {
            component.value = self.bounds.get(component.class).clamp(*value);
        }

        let flat = derivatives.second.iter().all(|g2| g2.abs() < CURVATURE_EPSILON);
        let settled = next.matches_within(&self.center, self.delta);
        self.center = next;

        if flat || solver_done || settled {
            info!("{} converged at {:?}", self.name(), self.center.values());
            self.pending.converge();
        } else {
            self.prepare_batch();
        }
    }

    fn phase(&self) -> SearchPhase {
        self.pending.phase()
    }
}
