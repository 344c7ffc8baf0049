//! Core type definitions used throughout the codebase

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use glam::DVec2;

/// Unique identifier for agents
///
/// Assigned once at construction and never reused within a process.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[display(fmt = "{}", _0)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

/// Simulation step counter
pub type Tick = u64;

/// Lifecycle state of a simulation
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SimulationState {
    Created,
    Running,
    Ended,
}

/// Rendering-only attributes carried by visual agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualAttributes {
    pub size: f64,
    pub color: [u8; 3],
    pub style: String,
}

impl Default for VisualAttributes {
    fn default() -> Self {
        Self {
            size: 1.0,
            color: [255, 255, 255],
            style: "o".to_string(),
        }
    }
}
