//! Cost-function weights and per-dataset targets.

use serde::{Deserialize, Serialize};

/// Weights of the weighted sum-of-squares cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostWeights {
    #[serde(default = "default_gnorm_region1")]
    pub gnorm_region1: f64,
    #[serde(default = "default_gnorm_region2")]
    pub gnorm_region2: f64,
    #[serde(default = "default_gnorm_region3")]
    pub gnorm_region3: f64,
    #[serde(default = "default_anion_spread")]
    pub anion_spread: f64,
    /// Shared by the HOMO and LUMO terms.
    #[serde(default = "default_eigenvalues")]
    pub eigenvalues: f64,
    #[serde(default = "default_dma_spread")]
    pub dma_spread: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            gnorm_region1: default_gnorm_region1(),
            gnorm_region2: default_gnorm_region2(),
            gnorm_region3: default_gnorm_region3(),
            anion_spread: default_anion_spread(),
            eigenvalues: default_eigenvalues(),
            dma_spread: default_dma_spread(),
        }
    }
}

impl CostWeights {
    /// Weights in legacy log header order: three gradients, anion spread,
    /// HOMO, LUMO, DMA spread.
    pub fn header_values(&self) -> [f64; 7] {
        [
            self.gnorm_region1,
            self.gnorm_region2,
            self.gnorm_region3,
            self.anion_spread,
            self.eigenvalues,
            self.eigenvalues,
            self.dma_spread,
        ]
    }
}

fn default_gnorm_region1() -> f64 {
    70.0
}
fn default_gnorm_region2() -> f64 {
    20.0
}
fn default_gnorm_region3() -> f64 {
    0.1
}
fn default_anion_spread() -> f64 {
    1.0
}
fn default_eigenvalues() -> f64 {
    0.05
}
fn default_dma_spread() -> f64 {
    0.2
}

/// Target values for one dataset. Eigenvalue targets of zero disable the term.
///
/// Spreads and eigenvalues are in eV.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetTargets {
    pub gnorm_region1: f64,
    pub gnorm_region2: f64,
    pub gnorm_region3: f64,
    pub anion_spread: f64,
    pub homo: f64,
    pub lumo: f64,
    pub dma_spread: f64,
}

impl DatasetTargets {
    /// Targets in legacy log order.
    pub fn header_values(&self) -> [f64; 7] {
        [
            self.gnorm_region1,
            self.gnorm_region2,
            self.gnorm_region3,
            self.anion_spread,
            self.homo,
            self.lumo,
            self.dma_spread,
        ]
    }
}

/// Full cost-function configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostConfig {
    #[serde(default)]
    pub weights: CostWeights,
    /// One entry per dataset.
    #[serde(default = "default_targets")]
    pub targets: Vec<DatasetTargets>,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            weights: CostWeights::default(),
            targets: default_targets(),
        }
    }
}

fn default_targets() -> Vec<DatasetTargets> {
    vec![DatasetTargets::default()]
}
