//! Top-level configuration for a fitting run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{
    Candidate, Component, ComponentClass, CostConfig, SearchAlgorithm, SearchBounds, StepSchedule,
};

/// Top-level fitting configuration, loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    /// Tunable components of the starting candidate.
    pub template: Vec<Component>,
    /// Per-class value ranges.
    #[serde(default)]
    pub bounds: SearchBounds,
    /// Search strategy and its parameters.
    #[serde(default)]
    pub search: SearchAlgorithm,
    /// Cost weights and per-dataset targets.
    #[serde(default)]
    pub cost: CostConfig,
    /// Loop control.
    #[serde(default)]
    pub run: RunConfig,
    /// On-disk history. Absent means the run keeps everything in memory.
    #[serde(default)]
    pub persistence: Option<PersistenceConfig>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            template: vec![
                Component::new(34, ComponentClass::Coefficient, 298.227_33),
                Component::new(34, ComponentClass::Exponent, 715.119_2),
            ],
            bounds: SearchBounds::default(),
            search: SearchAlgorithm::default(),
            cost: CostConfig::default(),
            run: RunConfig::default(),
            persistence: None,
        }
    }
}

impl FitConfig {
    /// Starting candidate built from the template components.
    pub fn starting_candidate(&self) -> Candidate {
        Candidate::from_components(self.template.clone())
    }

    /// Number of independently scored datasets.
    pub fn dataset_count(&self) -> usize {
        self.cost.targets.len()
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cost.targets.is_empty() {
            return Err(ConfigError::NoDatasets);
        }

        for class in ComponentClass::ALL {
            let bounds = self.bounds.get(class);
            if !(bounds.min <= bounds.max) {
                return Err(ConfigError::InvalidBounds {
                    class,
                    min: bounds.min,
                    max: bounds.max,
                });
            }
        }

        let weights = &self.cost.weights;
        for (name, weight) in [
            ("gnorm_region1", weights.gnorm_region1),
            ("gnorm_region2", weights.gnorm_region2),
            ("gnorm_region3", weights.gnorm_region3),
            ("anion_spread", weights.anion_spread),
            ("eigenvalues", weights.eigenvalues),
            ("dma_spread", weights.dma_spread),
        ] {
            if weight < 0.0 {
                return Err(ConfigError::InvalidWeight(format!(
                    "{} weight {} must be non-negative",
                    name, weight
                )));
            }
        }

        let check_steps = |steps: &StepSchedule, name: &str| {
            if steps.coefficient.is_empty() || steps.exponent.is_empty() {
                return Err(ConfigError::InvalidSteps(format!(
                    "{} needs at least one value per class",
                    name
                )));
            }
            match steps.values().find(|s| !(*s > 0.0)) {
                Some(bad) => Err(ConfigError::InvalidSteps(format!(
                    "{} value {} must be positive",
                    name, bad
                ))),
                None => Ok(()),
            }
        };

        match &self.search {
            SearchAlgorithm::Analysis => {}
            SearchAlgorithm::Linear(linear) => check_steps(&linear.steps, "steps")?,
            SearchAlgorithm::Powell(powell) => {
                check_steps(&powell.steps, "steps")?;
                check_steps(&powell.min_steps, "min_steps")?;
                check_steps(&powell.reduction, "reduction")?;
                if let Some(bad) = powell.reduction.values().find(|r| *r >= 1.0) {
                    return Err(ConfigError::InvalidSteps(format!(
                        "reduction {} must be below 1",
                        bad
                    )));
                }
            }
            SearchAlgorithm::Genetic(genetic) => {
                if genetic.population_size < 2 {
                    return Err(ConfigError::PopulationTooSmall);
                }
                if genetic.offspring_size + genetic.mutations_size == 0 {
                    return Err(ConfigError::NoOffspring);
                }
            }
            SearchAlgorithm::NewtonRaphson(newton) | SearchAlgorithm::Lbfgs(newton) => {
                check_steps(&newton.steps, "steps")?;
                check_steps(&newton.min_steps, "min_steps")?;
            }
        }

        if self.run.max_evaluations == 0 {
            return Err(ConfigError::NoEvaluationBudget);
        }

        Ok(())
    }
}

/// Loop control for the round orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Evaluation budget. A round in progress always completes.
    #[serde(default = "default_max_evaluations")]
    pub max_evaluations: usize,
    /// Optional cap on the number of rounds.
    #[serde(default)]
    pub max_rounds: Option<usize>,
    /// Exercise the loop without calling the evaluator or writing files.
    #[serde(default)]
    pub dry_run: bool,
    /// Evaluate datasets concurrently.
    #[serde(default)]
    pub parallel_datasets: bool,
    /// Seed for stochastic strategies.
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_evaluations: default_max_evaluations(),
            max_rounds: None,
            dry_run: false,
            parallel_datasets: false,
            random_seed: default_random_seed(),
        }
    }
}

fn default_max_evaluations() -> usize {
    5
}
fn default_random_seed() -> u64 {
    1
}

/// Location of the checkpoint, legacy log and regions index files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    /// Per-dataset text log prefix. Dataset `n` logs to `<prefix>.<n>`.
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    /// Shared component index for the text logs.
    #[serde(default = "default_regions_file")]
    pub regions_file: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            log_prefix: default_log_prefix(),
            regions_file: default_regions_file(),
        }
    }
}

impl PersistenceConfig {
    /// Persistence rooted at `directory` with default file names.
    pub fn in_directory<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn log_path(&self, dataset: usize) -> PathBuf {
        self.directory
            .join(format!("{}.{}", self.log_prefix, dataset))
    }

    pub fn checkpoint_path(&self, dataset: usize) -> PathBuf {
        self.directory
            .join(format!("{}.{}.restart", self.log_prefix, dataset))
    }

    pub fn regions_path(&self) -> PathBuf {
        self.directory.join(&self.regions_file)
    }
}

fn default_directory() -> PathBuf {
    PathBuf::from(".")
}
fn default_log_prefix() -> String {
    "output.log".to_string()
}
fn default_regions_file() -> String {
    "regions.log".to_string()
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("At least one dataset target entry is required")]
    NoDatasets,
    #[error("Invalid {class:?} bounds: min ({min}) > max ({max})")]
    InvalidBounds {
        class: ComponentClass,
        min: f64,
        max: f64,
    },
    #[error("Invalid cost weight: {0}")]
    InvalidWeight(String),
    #[error("Invalid step schedule: {0}")]
    InvalidSteps(String),
    #[error("Population size must be at least 2")]
    PopulationTooSmall,
    #[error("Genetic search must generate at least one offspring or mutant")]
    NoOffspring,
    #[error("Evaluation budget must be positive")]
    NoEvaluationBudget,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Bounds, GeneticConfig, PowellConfig};

    #[test]
    fn test_default_config_valid() {
        let config = FitConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dataset_count(), 1);
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let json = r#"{
            "template": [
                {"origin": 12, "class": "Coefficient", "value": 3.5},
                {"origin": 12, "class": "Exponent", "value": 1.25}
            ]
        }"#;
        let config: FitConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.template.len(), 2);
        assert_eq!(config.run.max_evaluations, 5);
        assert_eq!(config.run.random_seed, 1);
        assert_eq!(config.bounds.coefficient, Bounds::new(0.0, 1000.0));
        assert_eq!(config.search.name(), "powell");
        assert!(config.persistence.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let mut config = FitConfig::default();
        config.bounds.exponent = Bounds::new(10.0, 1.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBounds {
                class: ComponentClass::Exponent,
                ..
            })
        ));
    }

    #[test]
    fn test_bad_reduction_rejected() {
        let mut config = FitConfig::default();
        config.search = SearchAlgorithm::Powell(PowellConfig {
            reduction: StepSchedule::uniform(0.5, 1.5),
            ..Default::default()
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSteps(_))
        ));
    }

    #[test]
    fn test_small_population_rejected() {
        let mut config = FitConfig::default();
        config.search = SearchAlgorithm::Genetic(GeneticConfig {
            population_size: 1,
            ..Default::default()
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PopulationTooSmall)
        ));
    }

    #[test]
    fn test_no_datasets_rejected() {
        let mut config = FitConfig::default();
        config.cost.targets.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoDatasets)));
    }

    #[test]
    fn test_persistence_paths() {
        let persistence = PersistenceConfig::in_directory("/tmp/fit");
        assert_eq!(
            persistence.checkpoint_path(1),
            PathBuf::from("/tmp/fit/output.log.1.restart")
        );
        assert_eq!(persistence.log_path(0), PathBuf::from("/tmp/fit/output.log.0"));
        assert_eq!(persistence.regions_path(), PathBuf::from("/tmp/fit/regions.log"));
    }
}
