//! Search strategy configuration types.
//!
//! Each variant of [`SearchAlgorithm`] selects one optimization strategy and
//! carries its tuning parameters. Step sizes are given per component class
//! and resolved against the starting template when the search begins.

use serde::{Deserialize, Serialize};

use super::{Candidate, ComponentClass, PerClass};

/// Per-class step settings, resolved to one value per component.
pub type StepSchedule = PerClass<Vec<f64>>;

impl PerClass<Vec<f64>> {
    /// One shared value for every component of each class.
    pub fn uniform(coefficient: f64, exponent: f64) -> Self {
        Self::new(vec![coefficient], vec![exponent])
    }

    /// Resolve to one value per template component.
    ///
    /// A class list as long as the template is indexed by component position.
    /// A list with one entry per component of that class is applied in class
    /// order. Any other length broadcasts its first entry.
    pub fn resolve(&self, template: &Candidate) -> Vec<f64> {
        let total = template.len();
        let mut seen = [0usize; 2];
        template
            .components
            .iter()
            .enumerate()
            .map(|(position, component)| {
                let list = self.get(component.class);
                let class_count = template
                    .components
                    .iter()
                    .filter(|c| c.class == component.class)
                    .count();
                let ordinal = seen[component.class.code() as usize];
                seen[component.class.code() as usize] += 1;

                if list.len() == total {
                    list[position]
                } else if list.len() == class_count {
                    list[ordinal]
                } else {
                    list.first().copied().unwrap_or(0.0)
                }
            })
            .collect()
    }

    /// All entries across both classes.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        ComponentClass::ALL
            .into_iter()
            .flat_map(move |class| self.get(class).iter().copied())
    }
}

/// Search algorithm selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SearchAlgorithm {
    /// Score the starting template once.
    Analysis,
    /// Full-factorial sweep between the class bounds.
    Linear(LinearConfig),
    /// Powell direction-set descent.
    Powell(PowellConfig),
    /// Genetic algorithm with roulette selection.
    Genetic(GeneticConfig),
    /// Newton-Raphson on central-difference derivatives.
    NewtonRaphson(NewtonConfig),
    /// Limited-memory quasi-Newton on the same stencil.
    Lbfgs(NewtonConfig),
}

impl Default for SearchAlgorithm {
    fn default() -> Self {
        Self::Powell(PowellConfig::default())
    }
}

impl SearchAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            SearchAlgorithm::Analysis => "analysis",
            SearchAlgorithm::Linear(_) => "linear",
            SearchAlgorithm::Powell(_) => "powell",
            SearchAlgorithm::Genetic(_) => "genetic",
            SearchAlgorithm::NewtonRaphson(_) => "newton",
            SearchAlgorithm::Lbfgs(_) => "lbfgs",
        }
    }
}

/// Linear scan configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearConfig {
    /// Increment between successive values of each component.
    #[serde(default = "default_unit_steps")]
    pub steps: StepSchedule,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            steps: default_unit_steps(),
        }
    }
}

/// Powell direction-set configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowellConfig {
    /// Initial step along a direction.
    #[serde(default = "default_unit_steps")]
    pub steps: StepSchedule,
    /// Factor applied to every step when the search stagnates.
    #[serde(default = "default_reduction")]
    pub reduction: StepSchedule,
    /// Converged once every step is at or below this value.
    #[serde(default = "default_powell_min_steps")]
    pub min_steps: StepSchedule,
    /// Consecutive improving moves allowed along one direction (0 = unlimited).
    #[serde(default)]
    pub max_steps_in_one_direction: usize,
}

impl Default for PowellConfig {
    fn default() -> Self {
        Self {
            steps: default_unit_steps(),
            reduction: default_reduction(),
            min_steps: default_powell_min_steps(),
            max_steps_in_one_direction: 0,
        }
    }
}

fn default_unit_steps() -> StepSchedule {
    StepSchedule::uniform(1.0, 1.0)
}
fn default_reduction() -> StepSchedule {
    StepSchedule::uniform(0.1, 0.1)
}
fn default_powell_min_steps() -> StepSchedule {
    StepSchedule::uniform(0.01, 0.01)
}

/// How a mutant's component is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MutationMode {
    /// Replace with a fresh random value.
    #[default]
    Static,
    /// Blend toward a fresh random value, weighted by stagnant rounds.
    Dynamic,
}

/// Genetic algorithm configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneticConfig {
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    #[serde(default = "default_offspring_size")]
    pub offspring_size: usize,
    #[serde(default = "default_mutations_size")]
    pub mutations_size: usize,
    /// Unchanged-best population rounds before convergence.
    #[serde(default = "default_convergence_rounds")]
    pub convergence_rounds: usize,
    #[serde(default)]
    pub mutation: MutationMode,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            population_size: default_population_size(),
            offspring_size: default_offspring_size(),
            mutations_size: default_mutations_size(),
            convergence_rounds: default_convergence_rounds(),
            mutation: MutationMode::default(),
        }
    }
}

fn default_population_size() -> usize {
    4
}
fn default_offspring_size() -> usize {
    2
}
fn default_mutations_size() -> usize {
    2
}
fn default_convergence_rounds() -> usize {
    3
}

/// Newton-Raphson and L-BFGS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewtonConfig {
    /// Finite-difference step for each component.
    #[serde(default = "default_newton_steps")]
    pub steps: StepSchedule,
    /// The smallest entry is the convergence distance between centers.
    #[serde(default = "default_newton_min_steps")]
    pub min_steps: StepSchedule,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            steps: default_newton_steps(),
            min_steps: default_newton_min_steps(),
        }
    }
}

fn default_newton_steps() -> StepSchedule {
    StepSchedule::uniform(0.001, 0.001)
}
fn default_newton_min_steps() -> StepSchedule {
    StepSchedule::uniform(1.0, 0.001)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Component;

    fn template() -> Candidate {
        Candidate::from_components(vec![
            Component::new(10, ComponentClass::Coefficient, 1.0),
            Component::new(10, ComponentClass::Exponent, 2.0),
            Component::new(11, ComponentClass::Coefficient, 3.0),
        ])
    }

    #[test]
    fn test_resolve_broadcasts_single_value() {
        let steps = StepSchedule::uniform(0.5, 2.0);
        assert_eq!(steps.resolve(&template()), vec![0.5, 2.0, 0.5]);
    }

    #[test]
    fn test_resolve_per_class_order() {
        let steps = StepSchedule::new(vec![0.1, 0.3], vec![7.0]);
        assert_eq!(steps.resolve(&template()), vec![0.1, 7.0, 0.3]);
    }

    #[test]
    fn test_resolve_by_position() {
        let steps = StepSchedule::new(vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]);
        assert_eq!(steps.resolve(&template()), vec![1.0, 5.0, 3.0]);
    }

    #[test]
    fn test_algorithm_tagged_json() {
        let json = r#"{"type": "Genetic", "population_size": 6}"#;
        let algorithm: SearchAlgorithm = serde_json::from_str(json).unwrap();
        match algorithm {
            SearchAlgorithm::Genetic(config) => {
                assert_eq!(config.population_size, 6);
                assert_eq!(config.offspring_size, 2);
                assert_eq!(config.mutation, MutationMode::Static);
            }
            other => panic!("unexpected algorithm {:?}", other),
        }

        let analysis: SearchAlgorithm = serde_json::from_str(r#"{"type": "Analysis"}"#).unwrap();
        assert_eq!(analysis.name(), "analysis");
    }
}
