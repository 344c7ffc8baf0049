//! Action premises - recorded, replayable per-step behaviour
//!
//! A premise is what an agent did in one step: for each iteration, the
//! values its decision-mutables were set to and the action it then invoked.

use serde::{Deserialize, Serialize};

use crate::actions::catalog::invoke_action;
use crate::core::error::{Result, SubstrateError};
use crate::core::types::AgentId;
use crate::entity::mutable::MutableValue;
use crate::simulation::engine::Simulation;

/// One recorded iteration: assignments first, then the action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPremiseIteration {
    pub action: String,
    pub assignments: Vec<(String, MutableValue)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionPremise {
    pub iterations: Vec<ActionPremiseIteration>,
}

impl ActionPremise {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: impl Into<String>, assignments: Vec<(String, MutableValue)>) {
        self.iterations.push(ActionPremiseIteration {
            action: action.into(),
            assignments,
        });
    }

    pub fn len(&self) -> usize {
        self.iterations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    /// Re-enact the premise on `agent`
    ///
    /// Stops before any iteration once the agent has completed its step or
    /// been removed. Every name must resolve on the agent and every value must
    /// fit its mutable, otherwise `MissingAttribute`.
    pub fn replay(&self, sim: &mut Simulation, agent: AgentId) -> Result<()> {
        for iteration in &self.iterations {
            let target = match sim.agent_mut(agent) {
                Some(a) if a.exists() && !a.step_complete => a,
                _ => break,
            };

            if target.action(&iteration.action).is_none() {
                return Err(SubstrateError::MissingAttribute {
                    agent,
                    attribute: iteration.action.clone(),
                });
            }

            for (name, value) in &iteration.assignments {
                let fits = target.mutable(name).map(|m| m.admits(value));
                if fits != Some(true) {
                    return Err(SubstrateError::MissingAttribute {
                        agent,
                        attribute: name.clone(),
                    });
                }
                target.assign_mutable(name, value)?;
            }

            invoke_action(sim, agent, &iteration.action)?;
        }
        Ok(())
    }
}
