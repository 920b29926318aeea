//! Candidate parameter vectors and the evaluation data attached to them.

use serde::{Deserialize, Serialize};

/// Tolerance used when comparing component values for equality.
pub const VALUE_TOLERANCE: f64 = 1e-6;

/// Cost carried by a candidate that has not been evaluated yet.
pub const UNEVALUATED_COST: f64 = 999_999.0;

/// Cost of a failed or otherwise unusable evaluation. Never re-scored.
pub const DUD_COST: f64 = 888_888.0;

/// Conversion from atomic units (Hartree) to electron volts.
pub const HARTREE_TO_EV: f64 = 27.211_383_86;

/// Fixed width of spread labels in the binary checkpoint.
pub const LABEL_WIDTH: usize = 10;

/// Exclusivity class of a tunable component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentClass {
    /// Gaussian contraction coefficient (A).
    Coefficient,
    /// Gaussian exponent (zeta).
    Exponent,
}

impl ComponentClass {
    pub const ALL: [ComponentClass; 2] = [ComponentClass::Coefficient, ComponentClass::Exponent];

    /// Stable integer code used by on-disk formats.
    pub fn code(self) -> u8 {
        match self {
            ComponentClass::Coefficient => 0,
            ComponentClass::Exponent => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ComponentClass::Coefficient),
            1 => Some(ComponentClass::Exponent),
            _ => None,
        }
    }
}

/// One tunable scalar of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Locator back into the template (a line number for ECP input files).
    pub origin: u32,
    /// Exclusivity class.
    pub class: ComponentClass,
    /// Current value.
    pub value: f64,
}

impl Component {
    pub fn new(origin: u32, class: ComponentClass, value: f64) -> Self {
        Self {
            origin,
            class,
            value,
        }
    }
}

/// Gradient statistics for one region of the evaluated structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionStats {
    pub gnorm: f64,
    pub gnorm_max: f64,
    /// Largest gradient component along x, y and z.
    pub grad_max: [f64; 3],
}

/// Spread statistics for one species (orbital spread or DMA spread).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpreadStats {
    pub max: f64,
    pub min: f64,
    pub average: f64,
    pub spread: f64,
    pub quantity: i32,
    /// Species label, at most [`LABEL_WIDTH`] bytes when persisted.
    pub label: String,
}

/// Raw outputs of one external evaluation.
///
/// The engine treats these as opaque apart from feeding them to the cost
/// model and the persistence layer. Energies and spreads are atomic units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub regions: Vec<RegionStats>,
    pub orbital_spread: Vec<SpreadStats>,
    pub dma_spread: Vec<SpreadStats>,
    pub homo: f64,
    pub lumo: f64,
}

impl Diagnostics {
    /// Gradient norm of a region, zero if the region was not reported.
    pub fn gnorm(&self, region: usize) -> f64 {
        self.regions.get(region).map_or(0.0, |r| r.gnorm)
    }

    /// Orbital spread of the first (anionic) species.
    pub fn anion_spread(&self) -> f64 {
        self.orbital_spread.first().map_or(0.0, |s| s.spread)
    }

    pub fn dma_total(&self) -> f64 {
        self.dma_spread.iter().map(|s| s.spread).sum()
    }
}

/// A full parameter vector plus its evaluation outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Candidate {
    /// Ordered components. Origins and classes are fixed for a run.
    pub components: Vec<Component>,
    /// Scalar cost, lower is better.
    pub cost: f64,
    /// Rank within its batch (1 = best, 0 = unranked).
    pub rank: u32,
    /// Globally unique index assigned when first evaluated.
    pub sequence_index: Option<u64>,
    /// Whether the evaluation failed.
    pub failed: bool,
    pub diagnostics: Diagnostics,
}

impl Default for Candidate {
    fn default() -> Self {
        Self {
            components: Vec::new(),
            cost: UNEVALUATED_COST,
            rank: 0,
            sequence_index: None,
            failed: false,
            diagnostics: Diagnostics::default(),
        }
    }
}

impl Candidate {
    /// Create an unevaluated candidate from components.
    pub fn from_components(components: Vec<Component>) -> Self {
        Self {
            components,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Component values in order.
    pub fn values(&self) -> Vec<f64> {
        self.components.iter().map(|c| c.value).collect()
    }

    /// Value equality within [`VALUE_TOLERANCE`].
    pub fn matches(&self, other: &Candidate) -> bool {
        self.matches_within(other, VALUE_TOLERANCE)
    }

    /// Value equality within `delta`. Candidates of different length never match.
    pub fn matches_within(&self, other: &Candidate, delta: f64) -> bool {
        self.components.len() == other.components.len()
            && self
                .components
                .iter()
                .zip(&other.components)
                .all(|(a, b)| (a.value - b.value).abs() <= delta)
    }

    /// True when the cost is the dud sentinel.
    pub fn is_dud(&self) -> bool {
        self.cost == DUD_COST
    }

    /// Failed or dud: ranks last and is never re-scored.
    pub fn is_unusable(&self) -> bool {
        self.failed || self.is_dud()
    }

    /// Record a failed evaluation.
    pub fn mark_failed(&mut self) {
        self.failed = true;
        self.cost = DUD_COST;
    }

    /// Fresh proposal sharing this candidate's components.
    pub fn as_proposal(&self) -> Candidate {
        Candidate::from_components(self.components.clone())
    }

    /// Any component exactly zero (structurally invalid for the evaluator).
    pub fn has_zero_component(&self) -> bool {
        self.components.iter().any(|c| c.value == 0.0)
    }

    /// Check that this candidate can seed a search within `bounds`.
    pub fn validate_template(&self, bounds: &SearchBounds) -> Result<(), TemplateError> {
        if self.is_empty() {
            return Err(TemplateError::Empty);
        }
        for (index, component) in self.components.iter().enumerate() {
            if !bounds.get(component.class).contains(component.value) {
                return Err(TemplateError::OutOfBounds {
                    index,
                    class: component.class,
                    value: component.value,
                });
            }
        }
        Ok(())
    }
}

/// Inclusive value range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }
}

/// A value held separately for each component class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerClass<T> {
    pub coefficient: T,
    pub exponent: T,
}

impl<T> PerClass<T> {
    pub fn new(coefficient: T, exponent: T) -> Self {
        Self {
            coefficient,
            exponent,
        }
    }

    pub fn get(&self, class: ComponentClass) -> &T {
        match class {
            ComponentClass::Coefficient => &self.coefficient,
            ComponentClass::Exponent => &self.exponent,
        }
    }
}

impl<T: Clone> PerClass<T> {
    /// Same value for both classes.
    pub fn splat(value: T) -> Self {
        Self::new(value.clone(), value)
    }
}

/// Per-class search boundaries.
pub type SearchBounds = PerClass<Bounds>;

impl Default for PerClass<Bounds> {
    fn default() -> Self {
        Self::splat(Bounds::new(0.0, 1000.0))
    }
}

impl PerClass<Bounds> {
    /// Every component lies within the range of its class.
    pub fn contains(&self, candidate: &Candidate) -> bool {
        candidate
            .components
            .iter()
            .all(|c| self.get(c.class).contains(c.value))
    }
}

/// Invalid starting template. Fatal for a run.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Candidate template has no components")]
    Empty,
    #[error("Template component {index} ({value}) lies outside the {class:?} bounds")]
    OutOfBounds {
        index: usize,
        class: ComponentClass,
        value: f64,
    },
}
