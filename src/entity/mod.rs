pub mod agent;
pub mod mutable;
pub mod registry;

pub use agent::{complete_step, Agent, Body};
pub use mutable::{ArrayConstraint, DecisionMutableValue, MutableValue};
pub use registry::AgentRegistry;
