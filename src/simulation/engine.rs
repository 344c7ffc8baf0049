//! The simulation: agents, callbacks, grid index, trackers and RNG in one place
//!
//! The lifecycle (`start`/`step`/`end`) lives in `tick.rs`.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::sync::Arc;

use crate::core::config::SubstrateConfig;
use crate::core::error::{BoxError, Result, SubstrateError};
use crate::core::types::{AgentId, DVec2, SimulationState, Tick, VisualAttributes};
use crate::entity::agent::Agent;
use crate::entity::registry::AgentRegistry;
use crate::events::callbacks::CallbackSuite;
use crate::simulation::tracker::Tracker;
use crate::spatial::grid_index::GridIndex;

/// Checked after every step; `true` stops the current `step` call
pub type EndCondition = Arc<dyn Fn(&Simulation) -> std::result::Result<bool, BoxError> + Send + Sync>;

/// Owned rendering view of one spatial agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub position: DVec2,
    pub visual: Option<VisualAttributes>,
}

pub struct Simulation {
    pub(crate) state: SimulationState,
    pub(crate) time: Tick,
    pub(crate) agents: AgentRegistry,
    pub(crate) callbacks: CallbackSuite,
    pub(crate) grid: GridIndex,
    pub(crate) trackers: Vec<Tracker>,
    pub(crate) end_condition: Option<EndCondition>,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) config: SubstrateConfig,
    /// Whether the trackers have captured the state before the first step
    pub(crate) initial_tracked: bool,
}

impl Simulation {
    pub fn new() -> Self {
        Self::build(SubstrateConfig::default())
    }

    pub fn with_seed(seed: u64) -> Self {
        let mut config = SubstrateConfig::default();
        config.simulation.seed = seed;
        Self::build(config)
    }

    pub fn from_config(config: SubstrateConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: SubstrateConfig) -> Self {
        let callbacks = CallbackSuite::new();
        Self {
            state: SimulationState::Created,
            time: 0,
            agents: AgentRegistry::new(callbacks.clone()),
            callbacks,
            grid: GridIndex::new(),
            trackers: Vec::new(),
            end_condition: None,
            rng: ChaCha8Rng::seed_from_u64(config.simulation.seed),
            config,
            initial_tracked: false,
        }
    }

    pub fn state(&self) -> SimulationState {
        self.state
    }

    /// Completed steps
    pub fn time(&self) -> Tick {
        self.time
    }

    pub fn config(&self) -> &SubstrateConfig {
        &self.config
    }

    pub fn callbacks(&self) -> &CallbackSuite {
        &self.callbacks
    }

    /// The simulation's random stream; draw from this to keep runs reproducible
    pub fn rng_mut(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    // === AGENTS ===

    pub fn add_agent(&mut self, agent: Agent) -> Result<AgentId> {
        self.agents.add(agent)
    }

    /// Remove an agent; `Ok(None)` if it was not registered
    pub fn remove_agent(&mut self, id: AgentId) -> Result<Option<Agent>> {
        self.agents.remove(id)
    }

    /// Mark an agent the caller already holds as removed and notify subscribers
    pub fn remove_detached(&mut self, agent: &mut Agent) -> Result<()> {
        self.agents.remove_detached(agent)
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.agents.get_mut(id)
    }

    pub fn require_agent(&self, id: AgentId) -> Result<&Agent> {
        self.agents.get(id).ok_or(SubstrateError::AgentNotFound(id))
    }

    pub fn require_agent_mut(&mut self, id: AgentId) -> Result<&mut Agent> {
        self.agents.get_mut(id).ok_or(SubstrateError::AgentNotFound(id))
    }

    /// Agents in insertion order
    pub fn agents(&self) -> impl Iterator<Item = &Agent> + '_ {
        self.agents.iter()
    }

    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.ids().collect()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    // === GRID ===

    /// Build the grid index and keep it in sync from now on
    pub fn initialize_grid(&mut self, grid_size: f64) -> Result<()> {
        self.grid.initialize(grid_size, self.agents.iter(), &self.callbacks)
    }

    pub fn grid(&self) -> &GridIndex {
        &self.grid
    }

    // === TRACKERS ===

    pub fn add_tracker<F>(&mut self, name: impl Into<String>, probe: F) -> Result<()>
    where
        F: Fn(&Simulation) -> std::result::Result<f64, BoxError> + Send + Sync + 'static,
    {
        let tracker = Tracker::new(name, probe)?;
        if self.trackers.iter().any(|t| t.name() == tracker.name()) {
            return Err(SubstrateError::InvalidTracker(format!(
                "a tracker named '{}' already exists",
                tracker.name()
            )));
        }
        self.trackers.push(tracker);
        Ok(())
    }

    pub fn tracker(&self, name: &str) -> Option<&Tracker> {
        self.trackers.iter().find(|t| t.name() == name)
    }

    pub fn trackers(&self) -> &[Tracker] {
        &self.trackers
    }

    // === END CONDITION ===

    pub fn set_end_condition<F>(&mut self, condition: F)
    where
        F: Fn(&Simulation) -> std::result::Result<bool, BoxError> + Send + Sync + 'static,
    {
        self.end_condition = Some(Arc::new(condition));
    }

    pub fn clear_end_condition(&mut self) {
        self.end_condition = None;
    }

    // === VISUALISATION ===

    /// Position and rendering attributes of every spatial agent, in insertion order
    pub fn visual_snapshot(&self) -> Vec<AgentSnapshot> {
        self.agents
            .iter()
            .filter_map(|agent| {
                agent.position().map(|position| AgentSnapshot {
                    id: agent.id(),
                    position,
                    visual: agent.visual_attributes().cloned(),
                })
            })
            .collect()
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("state", &self.state)
            .field("time", &self.time)
            .field("agents", &self.agents.len())
            .field("trackers", &self.trackers.len())
            .field("grid", &self.grid)
            .finish_non_exhaustive()
    }
}
