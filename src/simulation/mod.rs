pub mod engine;
pub mod tick;
pub mod tracker;

pub use engine::{AgentSnapshot, EndCondition, Simulation};
pub use tracker::{Probe, Tracker};
