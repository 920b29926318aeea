//! Genetic algorithm with roulette selection.
//!
//! Rounds alternate between two kinds of batch:
//!
//! - **Population rounds** evaluate the population: a random one first, then
//!   the survivors of the previous population merged with its offspring.
//! - **Offspring rounds** evaluate children bred from the population by
//!   uniform crossover, followed by single-component mutants.
//!
//! Convergence is judged on population rounds only.

use log::{debug, info};

use crate::schema::{Candidate, GeneticConfig, MutationMode, SearchBounds, TemplateError};

use super::{
    Pending, RETRY_BUDGET, SearchPhase, SearchRng, SearchStrategy, fill_batch, filter_batch,
};

/// Selection pressure of the fitness function.
const FITNESS_ALPHA: f64 = 3.0;

/// Spins of the roulette before falling back to the fittest member.
const MAX_ROULETTE_SPINS: usize = 1000;

/// Genetic search strategy.
#[derive(Debug)]
pub struct Genetic {
    config: GeneticConfig,
    bounds: SearchBounds,
    /// Evaluated members of the latest population round.
    population: Vec<Candidate>,
    /// Batches generated so far.
    round: usize,
    /// Population rounds since the best last changed.
    stagnant: usize,
    previous_best: Candidate,
    pending: Pending,
}

impl Genetic {
    pub fn new(config: GeneticConfig, bounds: SearchBounds) -> Self {
        Self {
            config,
            bounds,
            population: Vec::new(),
            round: 0,
            stagnant: 0,
            previous_best: Candidate::default(),
            pending: Pending::default(),
        }
    }

    /// Candidate with the template layout and uniformly random values.
    fn random_member(&self, rng: &mut SearchRng) -> Candidate {
        let mut candidate = self.previous_best.as_proposal();
        for component in &mut candidate.components {
            component.value = rng.uniform(*self.bounds.get(component.class));
        }
        candidate
    }

    /// `exp(-alpha * p)` with `p` the cost normalized over the population.
    fn fitness(&self, position: usize) -> f64 {
        let (best, worst) = self
            .population
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), c| {
                (lo.min(c.cost), hi.max(c.cost))
            });
        let p = if worst > best {
            (self.population[position].cost - best) / (worst - best)
        } else {
            0.0
        };
        (-FITNESS_ALPHA * p).exp()
    }

    fn fittest(&self) -> usize {
        self.population
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.cost.total_cmp(&b.1.cost))
            .map_or(0, |(i, _)| i)
    }

    /// Fitness-proportionate pick: keep drawing members until one survives
    /// a draw against its fitness.
    fn roulette(&self, rng: &mut SearchRng) -> usize {
        for _ in 0..MAX_ROULETTE_SPINS {
            let position = rng.index(self.population.len());
            if rng.unit() <= self.fitness(position) {
                return position;
            }
        }
        self.fittest()
    }

    fn offspring(&self, rng: &mut SearchRng) -> Candidate {
        let first = self.roulette(rng);
        let mut second = self.roulette(rng);
        for _ in 0..RETRY_BUDGET {
            if second != first || self.population.len() < 2 {
                break;
            }
            second = self.roulette(rng);
        }

        let mut child = self.population[first].as_proposal();
        let donor = &self.population[second];

        if child.len() < 3 {
            let i = rng.index(child.len());
            child.components[i] = donor.components[i];
            return child;
        }

        let mut swapped = 0;
        for (gene, donated) in child.components.iter_mut().zip(&donor.components) {
            if rng.unit() > 0.5 {
                *gene = *donated;
                swapped += 1;
            }
        }
        if swapped == child.len() {
            donor.as_proposal()
        } else {
            child
        }
    }

    fn mutant(&self, rng: &mut SearchRng) -> Candidate {
        let parent = self.roulette(rng);
        let mut mutant = self.population[parent].as_proposal();
        let random = self.random_member(rng);
        let i = rng.index(mutant.len());

        let value = match self.config.mutation {
            MutationMode::Static => random.components[i].value,
            MutationMode::Dynamic => {
                let weight = self.stagnant as f64;
                (mutant.components[i].value * weight + random.components[i].value) / (weight + 1.0)
            }
        };
        mutant.components[i].value = value;
        mutant
    }

    fn random_population(&self, rng: &mut SearchRng) -> Vec<Candidate> {
        info!(
            "Creating a random population of size {}",
            self.config.population_size
        );
        fill_batch(Vec::new(), self.config.population_size, &self.bounds, || {
            self.random_member(rng)
        })
    }

    fn breed(&self, rng: &mut SearchRng) -> Vec<Candidate> {
        info!(
            "Breeding {} offspring and {} mutants",
            self.config.offspring_size, self.config.mutations_size
        );
        if self.population.is_empty() {
            return Vec::new();
        }

        let children = fill_batch(Vec::new(), self.config.offspring_size, &self.bounds, || {
            self.offspring(rng)
        });
        let target = self.config.offspring_size + self.config.mutations_size;
        fill_batch(children, target, &self.bounds, || self.mutant(rng))
    }

    /// Merge the population with the evaluated offspring and cull the worst.
    fn select_survivors(&self, offspring: &[Candidate]) -> Vec<Candidate> {
        let merged: Vec<Candidate> = self
            .population
            .iter()
            .chain(offspring)
            .cloned()
            .collect();
        let mut survivors = filter_batch(merged, &self.bounds);

        while survivors.len() > self.config.population_size {
            let mut worst = 0;
            for i in 1..survivors.len() {
                if survivors[i].cost > survivors[worst].cost {
                    worst = i;
                }
            }
            survivors.remove(worst);
        }
        info!("Selected a population of {}", survivors.len());
        survivors.iter().map(Candidate::as_proposal).collect()
    }

    /// Track the best across population rounds. Returns true once converged.
    fn check_converged(&mut self, best: &Candidate) -> bool {
        if best.matches(&self.previous_best) {
            self.stagnant += 1;
            debug!(
                "Best unchanged for {} of {} population rounds",
                self.stagnant, self.config.convergence_rounds
            );
            self.stagnant >= self.config.convergence_rounds
        } else {
            self.previous_best = best.clone();
            self.stagnant = 0;
            false
        }
    }
}

impl SearchStrategy for Genetic {
    fn name(&self) -> &'static str {
        "genetic"
    }

    fn set_starting_point(
        &mut self,
        template: &Candidate,
        rng: &mut SearchRng,
    ) -> Result<(), TemplateError> {
        if template.is_empty() {
            return Err(TemplateError::Empty);
        }
        self.previous_best = template.as_proposal();
        self.population.clear();
        self.stagnant = 0;
        self.round = 1;

        let batch = self.random_population(rng);
        self.pending.ready(batch);
        Ok(())
    }

    fn propose_batch(&mut self) -> Vec<Candidate> {
        self.pending.take()
    }

    fn absorb_results(&mut self, tested: &[Candidate], best: usize, rng: &mut SearchRng) {
        if self.round % 2 == 1 {
            let Some(best) = tested.get(best) else {
                self.pending.converge();
                return;
            };
            if self.check_converged(best) {
                info!("Genetic search converged");
                self.pending.converge();
                return;
            }
            self.population = tested.to_vec();
            let batch = self.breed(rng);
            self.pending.ready(batch);
        } else {
            let batch = self.select_survivors(tested);
            self.pending.ready(batch);
        }
        self.round += 1;
    }

    fn phase(&self) -> SearchPhase {
        self.pending.phase()
    }
}
