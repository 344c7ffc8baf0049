pub mod config;
pub mod error;
pub mod types;

pub use error::{BoxError, Result, SubstrateError};
pub use types::{AgentId, DVec2, SimulationState, Tick, VisualAttributes};
