//! Cost models turning evaluation diagnostics into a scalar cost.

use crate::schema::{Candidate, CostConfig, CostWeights, DatasetTargets, HARTREE_TO_EV};

/// Scores an evaluated candidate for one dataset. Lower is better.
pub trait CostModel: Sync {
    fn cost(&self, candidate: &Candidate, dataset: usize) -> f64;
}

/// Weighted sum of squared deviations from per-dataset targets.
#[derive(Debug, Clone)]
pub struct CostFunction {
    weights: CostWeights,
    targets: Vec<DatasetTargets>,
}

impl CostFunction {
    /// Create from configuration.
    pub fn new(config: &CostConfig) -> Self {
        Self {
            weights: config.weights.clone(),
            targets: config.targets.clone(),
        }
    }

    pub fn weights(&self) -> &CostWeights {
        &self.weights
    }

    /// Targets for a dataset. Unknown datasets score against all-zero targets.
    pub fn targets(&self, dataset: usize) -> DatasetTargets {
        self.targets.get(dataset).cloned().unwrap_or_default()
    }

    /// Compare weights recorded in a legacy log header with the current ones.
    pub fn check_weights(&self, recorded: &[f64]) -> bool {
        recorded == self.weights.header_values().as_slice()
    }

    /// Compare targets recorded in a legacy log with the current ones.
    pub fn check_targets(&self, recorded: &[f64], dataset: usize) -> bool {
        recorded == self.targets(dataset).header_values().as_slice()
    }

    /// Legacy log header line, weights in parentheses.
    pub fn header_line(&self) -> String {
        let [g1, g2, g3, spread, homo, lumo, dma] = self.weights.header_values();
        format!(
            "Entry       | Gnorm.1 ({}) Gnorm.2 ({}) Gnorm.3 ({}) Anion.Spread ({}) HOMO ({}) LUMO ({})   |      Function (Rank)     | DMA.Spread ({})",
            g1, g2, g3, spread, homo, lumo, dma
        )
    }

    /// Legacy log targets line for a dataset.
    pub fn targets_line(&self, dataset: usize) -> String {
        let [g1, g2, g3, spread, homo, lumo, dma] = self.targets(dataset).header_values();
        format!(
            "Targets     |     {} {} {} {} {} {}    |      **************      |       {}",
            g1, g2, g3, spread, homo, lumo, dma
        )
    }
}

impl CostModel for CostFunction {
    fn cost(&self, candidate: &Candidate, dataset: usize) -> f64 {
        let w = &self.weights;
        let t = self.targets(dataset);
        let d = &candidate.diagnostics;

        // A difference of exactly -1 marks an unreadable gradient.
        let gradient_term = |weight: f64, value: f64, target: f64| {
            let diff = value - target;
            if diff == -1.0 { 0.0 } else { weight * diff * diff }
        };

        let eigen_term = |value: f64, target: f64| {
            if target == 0.0 {
                0.0
            } else {
                let diff = value * HARTREE_TO_EV - target;
                w.eigenvalues * diff * diff
            }
        };

        let spread = d.anion_spread() * HARTREE_TO_EV - t.anion_spread;

        let dma: f64 = d
            .dma_spread
            .iter()
            .map(|s| {
                let diff = s.spread - t.dma_spread;
                w.dma_spread * diff * diff
            })
            .sum();

        gradient_term(w.gnorm_region1, d.gnorm(0), t.gnorm_region1)
            + gradient_term(w.gnorm_region2, d.gnorm(1), t.gnorm_region2)
            + gradient_term(w.gnorm_region3, d.gnorm(2), t.gnorm_region3)
            + w.anion_spread * spread * spread
            + eigen_term(d.homo, t.homo)
            + eigen_term(d.lumo, t.lumo)
            + dma
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Diagnostics, RegionStats, SpreadStats};

    fn evaluated(gnorms: [f64; 3], spread: f64, homo: f64, dma: &[f64]) -> Candidate {
        Candidate {
            diagnostics: Diagnostics {
                regions: gnorms
                    .iter()
                    .map(|&g| RegionStats {
                        gnorm: g,
                        ..Default::default()
                    })
                    .collect(),
                orbital_spread: vec![SpreadStats {
                    spread,
                    label: "O".to_string(),
                    ..Default::default()
                }],
                dma_spread: dma
                    .iter()
                    .map(|&s| SpreadStats {
                        spread: s,
                        ..Default::default()
                    })
                    .collect(),
                homo,
                lumo: 0.0,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_gradient_terms_weighted() {
        let cost = CostFunction::new(&CostConfig::default());
        let c = evaluated([0.1, 0.2, 1.0], 0.0, 0.0, &[]);
        let expected = 70.0 * 0.01 + 20.0 * 0.04 + 0.1 * 1.0;
        assert!((cost.cost(&c, 0) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_minus_one_gradient_skipped() {
        let cost = CostFunction::new(&CostConfig::default());
        let c = evaluated([-1.0, 0.0, 0.0], 0.0, 0.0, &[]);
        assert_eq!(cost.cost(&c, 0), 0.0);
    }

    #[test]
    fn test_eigenvalue_term_needs_target() {
        let mut config = CostConfig::default();
        let c = evaluated([0.0; 3], 0.0, -0.3, &[]);
        assert_eq!(CostFunction::new(&config).cost(&c, 0), 0.0);

        config.targets[0].homo = -8.0;
        let diff = -0.3 * HARTREE_TO_EV + 8.0;
        let expected = 0.05 * diff * diff;
        assert!((CostFunction::new(&config).cost(&c, 0) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_spread_and_dma_terms() {
        let mut config = CostConfig::default();
        config.targets[0].anion_spread = 1.0;
        config.targets[0].dma_spread = 0.5;
        let c = evaluated([0.0; 3], 1.0 / HARTREE_TO_EV, 0.0, &[1.0, 0.0]);

        // Spread converts back to 1 eV and DMA contributes 0.2 * (0.25 + 0.25).
        assert!((CostFunction::new(&config).cost(&c, 0) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_check_weights_and_targets() {
        let mut config = CostConfig::default();
        config.targets[0].homo = -7.5;
        let cost = CostFunction::new(&config);

        assert!(cost.check_weights(&[70.0, 20.0, 0.1, 1.0, 0.05, 0.05, 0.2]));
        assert!(!cost.check_weights(&[70.0, 20.0, 0.1, 1.0, 0.05, 0.05, 0.3]));
        assert!(!cost.check_weights(&[70.0, 20.0]));
        assert!(cost.check_targets(&[0.0, 0.0, 0.0, 0.0, -7.5, 0.0, 0.0], 0));
        assert!(!cost.check_targets(&[0.0; 7], 0));
    }
}
