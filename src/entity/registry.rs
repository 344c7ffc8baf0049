//! Agent registry - owns every live agent of a simulation

use ahash::AHashMap;
use std::collections::BTreeMap;

use crate::core::error::Result;
use crate::core::types::AgentId;
use crate::entity::agent::Agent;
use crate::events::callbacks::CallbackSuite;

/// Arena of agents keyed by id, iterated in insertion order
///
/// Adding binds the agent-moved channel to spatial agents and fires
/// agent-added; removing marks the agent dead before it leaves the arena and
/// fires agent-removed.
pub struct AgentRegistry {
    agents: AHashMap<AgentId, (u64, Agent)>,
    sequence: BTreeMap<u64, AgentId>,
    next_slot: u64,
    callbacks: CallbackSuite,
}

impl AgentRegistry {
    pub fn new(callbacks: CallbackSuite) -> Self {
        Self {
            agents: AHashMap::new(),
            sequence: BTreeMap::new(),
            next_slot: 0,
            callbacks,
        }
    }

    /// Register an agent and fire agent-added
    ///
    /// If a subscriber rejects the agent it is taken back out and dropped;
    /// subscribers that ran before the failing one have already seen it.
    pub fn add(&mut self, mut agent: Agent) -> Result<AgentId> {
        let id = agent.id();
        agent.mark_added(&self.callbacks.agent_moved);

        let slot = self.next_slot;
        self.next_slot += 1;
        self.sequence.insert(slot, id);
        self.agents.insert(id, (slot, agent));
        tracing::trace!("Agent {} added (slot {})", id, slot);

        let (_, agent) = &self.agents[&id];
        if let Err(err) = self.callbacks.agent_added.fire(agent) {
            self.sequence.remove(&slot);
            self.agents.remove(&id);
            tracing::debug!("Agent {} rejected on add: {}", id, err);
            return Err(err);
        }
        Ok(id)
    }

    /// Remove an agent; ids not in the registry are a no-op
    pub fn remove(&mut self, id: AgentId) -> Result<Option<Agent>> {
        let Some((slot, mut agent)) = self.agents.remove(&id) else {
            tracing::trace!("Agent {} already gone, nothing to remove", id);
            return Ok(None);
        };
        agent.mark_removed();
        self.sequence.remove(&slot);
        tracing::trace!("Agent {} removed", id);

        self.callbacks.agent_removed.fire(&agent)?;
        Ok(Some(agent))
    }

    /// Mark a caller-held agent as removed and notify subscribers
    ///
    /// For agents already taken out of the registry. Flags end up the same
    /// however often this is called; agent-removed fires every time.
    pub fn remove_detached(&mut self, agent: &mut Agent) -> Result<()> {
        agent.mark_removed();
        self.callbacks.agent_removed.fire(agent)
    }

    pub fn get(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(&id).map(|(_, a)| a)
    }

    pub fn get_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.agents.get_mut(&id).map(|(_, a)| a)
    }

    pub fn contains(&self, id: AgentId) -> bool {
        self.agents.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Ids in insertion order
    pub fn ids(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.sequence.values().copied()
    }

    /// Agents in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Agent> + '_ {
        self.sequence.values().map(|id| &self.agents[id].1)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Agent> + '_ {
        self.agents.values_mut().map(|(_, a)| a)
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agents.len())
            .field("next_slot", &self.next_slot)
            .finish()
    }
}
