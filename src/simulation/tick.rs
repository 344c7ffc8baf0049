//! Tick system - the simulation lifecycle
//!
//! `start` -> `step(n)`* -> `end`. Each step:
//! step-started -> reset step flags -> dispatch decisions in `order` ->
//! advance time -> trackers -> step-complete -> end condition.

use std::sync::Arc;

use crate::core::error::{Result, SubstrateError};
use crate::core::types::{AgentId, SimulationState};
use crate::events::callbacks::{CallbackChannel, CallbackSuite};
use crate::simulation::engine::Simulation;

impl Simulation {
    fn require_state(&self, expected: SimulationState, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SubstrateError::Workflow {
                operation,
                state: self.state.to_string(),
            })
        }
    }

    fn fire_milestone(
        &mut self,
        select: fn(&CallbackSuite) -> &Arc<CallbackChannel<Simulation>>,
    ) -> Result<()> {
        let channel = Arc::clone(select(&self.callbacks));
        channel.fire(self)
    }

    pub fn start(&mut self) -> Result<()> {
        self.require_state(SimulationState::Created, "start")?;

        if let Some(grid_size) = self.config.simulation.grid_size {
            self.initialize_grid(grid_size)?;
        }
        self.state = SimulationState::Running;
        self.initial_tracked = false;

        tracing::info!(
            "Simulation started: {} agents, seed {}",
            self.agents.len(),
            self.config.simulation.seed
        );
        self.fire_milestone(|c| &c.simulation_started)
    }

    /// Run up to `steps` steps; stops early when the end condition holds
    pub fn step(&mut self, steps: u64) -> Result<()> {
        self.require_state(SimulationState::Running, "step")?;

        for _ in 0..steps {
            if self.step_once()? {
                tracing::info!("End condition met at time {}", self.time);
                break;
            }
        }
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        self.require_state(SimulationState::Running, "end")?;
        self.state = SimulationState::Ended;

        tracing::info!("Simulation ended at time {}", self.time);
        self.fire_milestone(|c| &c.simulation_complete)
    }

    /// `start`, `step(steps)`, `end`
    pub fn simulate(&mut self, steps: u64) -> Result<()> {
        self.start()?;
        self.step(steps)?;
        self.end()
    }

    /// One step; returns whether the end condition is met
    fn step_once(&mut self) -> Result<bool> {
        if !self.initial_tracked {
            self.record_trackers()?;
            self.initial_tracked = true;
        }

        self.fire_milestone(|c| &c.step_started)?;

        for agent in self.agents.iter_mut() {
            agent.step_complete = false;
        }

        // Stable: equal orders keep registry order
        let mut schedule: Vec<(i64, AgentId)> = self.agents.iter().map(|a| (a.order, a.id())).collect();
        schedule.sort_by_key(|&(order, _)| order);

        let mut dispatched = 0;
        for (_, id) in schedule {
            let decision = match self.agents.get(id) {
                Some(agent) if agent.exists() => agent.decision(),
                _ => continue,
            };
            tracing::trace!("Dispatching agent {}", id);
            decision.decide(self, id)?;
            dispatched += 1;
        }

        self.time += 1;
        self.record_trackers()?;

        self.fire_milestone(|c| &c.step_complete)?;
        tracing::debug!("Step {} complete: {} agents dispatched", self.time, dispatched);

        self.end_condition_met()
    }

    fn record_trackers(&mut self) -> Result<()> {
        let sim: &Simulation = self;
        let samples = sim
            .trackers
            .iter()
            .map(|tracker| tracker.sample(sim))
            .collect::<Result<Vec<f64>>>()?;
        for (tracker, value) in self.trackers.iter_mut().zip(samples) {
            tracker.push(value);
        }
        Ok(())
    }

    fn end_condition_met(&self) -> Result<bool> {
        match &self.end_condition {
            Some(condition) => {
                condition(self).map_err(|e| SubstrateError::InvalidEndCondition(e.to_string()))
            }
            None => Ok(false),
        }
    }
}
