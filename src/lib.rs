//! Agent Substrate - discrete-step agent-based simulation
//!
//! A [`Simulation`] owns a population of [`Agent`]s and steps them in
//! `order`, dispatching each agent's [`Decision`] strategy. Decisions invoke
//! named actions, tune decision-mutable values, and may learn from a loss
//! signal through [`QLearningDecision`]. A callback bus keeps the spatial
//! [`GridIndex`] in sync with agent movement.

pub mod actions;
pub mod core;
pub mod decision;
pub mod entity;
pub mod events;
pub mod simulation;
pub mod spatial;

pub use crate::actions::{invoke_action, Action, ActionPremise, ActionPremiseIteration, ActionResult};
pub use crate::core::config::{LearningMode, QLearningConfig, SubstrateConfig};
pub use crate::core::{AgentId, BoxError, DVec2, Result, SimulationState, SubstrateError, VisualAttributes};
pub use crate::decision::{
    decision_fn, Decision, NoCastDecision, QLearningDecision, QLearningHistoryItem, QTable, QTableEntry,
    RandomRepeatedCastDecision, RandomSingleCastDecision,
};
pub use crate::entity::{complete_step, Agent, ArrayConstraint, DecisionMutableValue, MutableValue};
pub use crate::events::{callback, Callback, CallbackChannel, CallbackSuite};
pub use crate::simulation::{AgentSnapshot, Simulation, Tracker};
pub use crate::spatial::{CellQuery, GridIndex};
