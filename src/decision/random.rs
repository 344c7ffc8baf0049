//! Random-cast strategies and the helpers other strategies build on

use rand::seq::SliceRandom;

use crate::actions::catalog::invoke_action;
use crate::actions::premise::ActionPremise;
use crate::core::error::{Result, SubstrateError};
use crate::core::types::AgentId;
use crate::decision::Decision;
use crate::entity::mutable::MutableValue;
use crate::simulation::engine::Simulation;

/// Draw a fresh value for every mutable of `agent` from the simulation RNG
///
/// Returns the assigned values in name order.
pub fn randomize_mutables(sim: &mut Simulation, agent: AgentId) -> Result<Vec<(String, MutableValue)>> {
    let target = sim.agents.get_mut(agent).ok_or(SubstrateError::AgentNotFound(agent))?;
    let rng = &mut sim.rng;
    Ok(target
        .mutables_mut()
        .map(|(name, mutable)| {
            mutable.set_value_random(&mut *rng);
            (name.clone(), mutable.value())
        })
        .collect())
}

/// Nudge every mutable of `agent` within the configured perturbation scale
pub fn perturb_mutables(sim: &mut Simulation, agent: AgentId) -> Result<Vec<(String, MutableValue)>> {
    let scale = sim.config.mutables.perturbation_scale;
    let target = sim.agents.get_mut(agent).ok_or(SubstrateError::AgentNotFound(agent))?;
    let rng = &mut sim.rng;
    Ok(target
        .mutables_mut()
        .map(|(name, mutable)| {
            mutable.set_value_perturbed(&mut *rng, scale);
            (name.clone(), mutable.value())
        })
        .collect())
}

/// Pick one of the agent's actions uniformly; `None` when it has none
pub fn choose_action(sim: &mut Simulation, agent: AgentId) -> Result<Option<String>> {
    let names: Vec<String> = sim
        .require_agent(agent)?
        .action_names()
        .map(str::to_string)
        .collect();
    Ok(names.choose(&mut sim.rng).cloned())
}

fn is_live(sim: &Simulation, agent: AgentId) -> bool {
    sim.agent(agent).is_some_and(|a| a.exists())
}

fn wants_more(sim: &Simulation, agent: AgentId) -> bool {
    sim.agent(agent).is_some_and(|a| a.exists() && !a.step_complete)
}

/// Randomize, invoke a random action, repeat until the agent is done
///
/// Records every iteration. Returns an empty premise for agents without
/// actions. An agent whose actions never complete the step loops forever.
pub(crate) fn explore(sim: &mut Simulation, agent: AgentId) -> Result<ActionPremise> {
    let mut premise = ActionPremise::new();
    while wants_more(sim, agent) {
        let Some(action) = choose_action(sim, agent)? else {
            break;
        };
        let assignments = randomize_mutables(sim, agent)?;
        premise.push(action.clone(), assignments);
        invoke_action(sim, agent, &action)?;
    }
    Ok(premise)
}

/// One random action per step, after randomizing every mutable
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSingleCastDecision;

impl Decision for RandomSingleCastDecision {
    fn decide(&self, sim: &mut Simulation, agent: AgentId) -> Result<()> {
        if !is_live(sim, agent) || !sim.require_agent(agent)?.has_actions() {
            return Ok(());
        }
        randomize_mutables(sim, agent)?;
        if let Some(action) = choose_action(sim, agent)? {
            invoke_action(sim, agent, &action)?;
        }
        Ok(())
    }
}

/// Random actions until one of them marks the step complete
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomRepeatedCastDecision;

impl Decision for RandomRepeatedCastDecision {
    fn decide(&self, sim: &mut Simulation, agent: AgentId) -> Result<()> {
        if !is_live(sim, agent) || !sim.require_agent(agent)?.has_actions() {
            return Ok(());
        }
        explore(sim, agent).map(|_| ())
    }
}
