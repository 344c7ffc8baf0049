//! Trackers - named numeric series sampled after every step

use std::sync::Arc;

use crate::core::error::{BoxError, Result, SubstrateError};
use crate::simulation::engine::Simulation;

pub type Probe = Arc<dyn Fn(&Simulation) -> std::result::Result<f64, BoxError> + Send + Sync>;

pub struct Tracker {
    name: String,
    data: Vec<f64>,
    probe: Probe,
}

impl Tracker {
    pub fn new<F>(name: impl Into<String>, probe: F) -> Result<Self>
    where
        F: Fn(&Simulation) -> std::result::Result<f64, BoxError> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SubstrateError::InvalidTracker("tracker name must not be empty".into()));
        }
        Ok(Self {
            name,
            data: Vec::new(),
            probe: Arc::new(probe),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// One sample per invocation: the initial state, then one per step
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn latest(&self) -> Option<f64> {
        self.data.last().copied()
    }

    pub(crate) fn sample(&self, sim: &Simulation) -> Result<f64> {
        (self.probe)(sim).map_err(|e| {
            SubstrateError::InvalidTracker(format!("tracker '{}' failed: {}", self.name, e))
        })
    }

    pub(crate) fn push(&mut self, value: f64) {
        self.data.push(value);
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("name", &self.name)
            .field("samples", &self.data.len())
            .finish_non_exhaustive()
    }
}
