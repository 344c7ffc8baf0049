//! Substrate configuration with documented defaults
//!
//! Loaded from TOML. Every section falls back to its defaults, so a partial
//! file only needs to name what it changes. Configuration is always passed
//! explicitly into the simulation and the decision modules; there is no
//! process-wide copy.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::error::{Result, SubstrateError};

/// Complete substrate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubstrateConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub q_learning: QLearningConfig,
    #[serde(default)]
    pub mutables: MutableConfig,
}

/// Step loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed for the simulation RNG
    ///
    /// Every random draw made during dispatch comes from one ChaCha8 stream
    /// seeded with this value, so identical inputs give identical runs.
    pub seed: u64,

    /// Size of each cell in the spatial grid index (world units)
    ///
    /// When set, `Simulation::start` initializes the grid before the first
    /// step. When unset the grid stays lazy until `initialize_grid` is called.
    pub grid_size: Option<f64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 12345,
            grid_size: None,
        }
    }
}

/// Whether a Q-learning module is allowed to change its table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LearningMode {
    /// Explore, bank history, update and persist the table
    #[default]
    Train,
    /// Exploit the table only; nothing is banked or written
    Test,
}

/// Q-learning decision settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QLearningConfig {
    /// Weight of the next step's (already credited) loss added to each item
    ///
    /// At 0.9 a consequence three steps later still carries ~73% weight.
    pub discount_factor: f64,

    /// Probability of exploring even when the observation has a table entry
    pub nonconformity_probability: f64,

    /// Table loaded when the module is attached (absence means a cold start)
    pub input_file_name: Option<PathBuf>,

    /// Table written when the simulation completes
    pub output_file_name: Option<PathBuf>,

    pub mode: LearningMode,
}

impl Default for QLearningConfig {
    fn default() -> Self {
        Self {
            discount_factor: 0.9,
            nonconformity_probability: 0.1,
            input_file_name: None,
            output_file_name: None,
            mode: LearningMode::Train,
        }
    }
}

/// Decision-mutable value settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MutableConfig {
    /// Fraction of a value's range used as the perturbation window
    ///
    /// At 0.1 a float bounded to [0, 10] moves by at most ±1.0 per perturbation.
    pub perturbation_scale: f64,
}

impl Default for MutableConfig {
    fn default() -> Self {
        Self {
            perturbation_scale: 0.1,
        }
    }
}

impl SubstrateConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parses and validates configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SubstrateError::InvalidValue(format!("TOML serialize error: {}", e)))
    }

    /// Validate configuration for internal consistency
    pub fn validate(&self) -> Result<()> {
        if let Some(grid_size) = self.simulation.grid_size {
            if !(grid_size.is_finite() && grid_size > 0.0) {
                return Err(SubstrateError::InvalidGridSize(grid_size));
            }
        }

        let q = &self.q_learning;
        if !(0.0..=1.0).contains(&q.discount_factor) {
            return Err(SubstrateError::InvalidValue(format!(
                "discount_factor ({}) must be within [0, 1]",
                q.discount_factor
            )));
        }
        if !(0.0..=1.0).contains(&q.nonconformity_probability) {
            return Err(SubstrateError::InvalidValue(format!(
                "nonconformity_probability ({}) must be within [0, 1]",
                q.nonconformity_probability
            )));
        }

        if !(0.0..=1.0).contains(&self.mutables.perturbation_scale) {
            return Err(SubstrateError::InvalidValue(format!(
                "perturbation_scale ({}) must be within [0, 1]",
                self.mutables.perturbation_scale
            )));
        }

        Ok(())
    }
}
