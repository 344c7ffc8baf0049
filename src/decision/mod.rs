//! Decision strategies
//!
//! A decision runs once per agent per step and decides which actions the
//! agent takes. Strategies are shared (`Arc<dyn Decision>`) so one instance
//! can drive many agents.

pub mod q_learning;
pub mod q_table;
pub mod random;

use std::sync::Arc;

use crate::core::error::Result;
use crate::core::types::AgentId;
use crate::simulation::engine::Simulation;

pub use q_learning::{apply_temporal_difference, Loss, Perception, QLearningDecision, QLearningHistoryItem};
pub use q_table::{Observation, QTable, QTableEntry};
pub use random::{RandomRepeatedCastDecision, RandomSingleCastDecision};

pub trait Decision: Send + Sync {
    fn decide(&self, sim: &mut Simulation, agent: AgentId) -> Result<()>;
}

impl<F> Decision for F
where
    F: Fn(&mut Simulation, AgentId) -> Result<()> + Send + Sync,
{
    fn decide(&self, sim: &mut Simulation, agent: AgentId) -> Result<()> {
        self(sim, agent)
    }
}

/// Share a closure as a decision
pub fn decision_fn<F>(f: F) -> Arc<dyn Decision>
where
    F: Fn(&mut Simulation, AgentId) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Does nothing; the default for new agents
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCastDecision;

impl Decision for NoCastDecision {
    fn decide(&self, _sim: &mut Simulation, _agent: AgentId) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::agent::Agent;

    #[test]
    fn test_closure_is_a_decision() {
        let mut sim = Simulation::new();
        let decision = decision_fn(|sim: &mut Simulation, id: AgentId| {
            sim.require_agent_mut(id)?.order = 42;
            Ok(())
        });
        let id = sim.add_agent(Agent::new().with_decision(decision)).unwrap();

        let decision = sim.agent(id).unwrap().decision();
        decision.decide(&mut sim, id).unwrap();
        assert_eq!(sim.agent(id).unwrap().order, 42);
    }

    #[test]
    fn test_no_cast_leaves_agent_untouched() {
        let mut sim = Simulation::new();
        let id = sim.add_agent(Agent::new()).unwrap();

        NoCastDecision.decide(&mut sim, id).unwrap();
        let agent = sim.agent(id).unwrap();
        assert!(!agent.step_complete);
        assert_eq!(agent.order, 0);
    }
}
