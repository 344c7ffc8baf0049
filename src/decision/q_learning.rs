//! Tabular Q-learning over action premises
//!
//! Per agent-step: observe, look the observation up, replay the stored
//! premise or explore a fresh one, evaluate the loss, bank the result.
//! When the simulation completes, banked histories are credited backwards
//! (temporal difference), folded into the table (lower loss wins) and the
//! table is persisted.

use ahash::AHashMap;
use rand::Rng;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::actions::premise::ActionPremise;
use crate::core::config::{LearningMode, QLearningConfig};
use crate::core::error::{BoxError, Result, SubstrateError};
use crate::core::types::AgentId;
use crate::decision::q_table::{Observation, QTable, QTableEntry};
use crate::decision::random::explore;
use crate::decision::Decision;
use crate::events::callbacks::callback;
use crate::simulation::engine::Simulation;

/// Discretized view of the simulation from one agent's perspective
pub type Perception<O> = Arc<dyn Fn(&Simulation, AgentId) -> std::result::Result<O, BoxError> + Send + Sync>;

/// Momentary loss of one agent; lower is better
pub type Loss = Arc<dyn Fn(&Simulation, AgentId) -> std::result::Result<f64, BoxError> + Send + Sync>;

/// What one agent saw, did, and scored in one step
#[derive(Debug, Clone, PartialEq)]
pub struct QLearningHistoryItem<O> {
    pub observation: O,
    pub premise: ActionPremise,
    pub loss: f64,
}

/// Credit each item with the discounted loss of the item after it
///
/// Runs from the second-to-last item back to the first, so each item picks
/// up the already credited loss of its successor.
pub fn apply_temporal_difference<O>(items: &mut [QLearningHistoryItem<O>], discount_factor: f64) {
    for i in (0..items.len().saturating_sub(1)).rev() {
        let next = items[i + 1].loss;
        items[i].loss += discount_factor * next;
    }
}

struct LearningState<O: Observation> {
    table: QTable<O>,
    /// Histories in first-banked order
    bank: Vec<(AgentId, Vec<QLearningHistoryItem<O>>)>,
    bank_slots: AHashMap<AgentId, usize>,
}

impl<O: Observation> LearningState<O> {
    fn bank(&mut self, agent: AgentId, item: QLearningHistoryItem<O>) {
        let slot = match self.bank_slots.get(&agent) {
            Some(&slot) => slot,
            None => {
                self.bank.push((agent, Vec::new()));
                self.bank_slots.insert(agent, self.bank.len() - 1);
                self.bank.len() - 1
            }
        };
        self.bank[slot].1.push(item);
    }
}

pub struct QLearningDecision<O: Observation> {
    config: QLearningConfig,
    perception: Perception<O>,
    loss: Loss,
    state: Mutex<LearningState<O>>,
}

impl<O: Observation> QLearningDecision<O> {
    /// Build the module and attach it to `sim`
    ///
    /// Loads `input_file_name` when configured (a missing file is a cold
    /// start) and subscribes the table update to simulation-complete.
    pub fn new<P, L>(sim: &Simulation, config: QLearningConfig, perception: P, loss: L) -> Result<Arc<Self>>
    where
        P: Fn(&Simulation, AgentId) -> std::result::Result<O, BoxError> + Send + Sync + 'static,
        L: Fn(&Simulation, AgentId) -> std::result::Result<f64, BoxError> + Send + Sync + 'static,
    {
        if !(0.0..=1.0).contains(&config.discount_factor) {
            return Err(SubstrateError::InvalidDecision(format!(
                "discount_factor ({}) must be within [0, 1]",
                config.discount_factor
            )));
        }
        if !(0.0..=1.0).contains(&config.nonconformity_probability) {
            return Err(SubstrateError::InvalidDecision(format!(
                "nonconformity_probability ({}) must be within [0, 1]",
                config.nonconformity_probability
            )));
        }

        let table = match &config.input_file_name {
            Some(path) => QTable::load(path)?.unwrap_or_default(),
            None => QTable::new(),
        };

        let module = Arc::new(Self {
            config,
            perception: Arc::new(perception),
            loss: Arc::new(loss),
            state: Mutex::new(LearningState {
                table,
                bank: Vec::new(),
                bank_slots: AHashMap::new(),
            }),
        });

        let hook = {
            let module = Arc::clone(&module);
            callback(move |_: &Simulation| module.finalize())
        };
        sim.callbacks().simulation_complete.subscribe(&hook);

        Ok(module)
    }

    pub fn config(&self) -> &QLearningConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, LearningState<O>>> {
        self.state
            .lock()
            .map_err(|_| SubstrateError::LockPoisoned("q-learning state"))
    }

    fn nonconforms(&self, sim: &mut Simulation) -> bool {
        self.config.mode == LearningMode::Train
            && sim.rng_mut().gen::<f64>() < self.config.nonconformity_probability
    }

    /// Fold banked histories into the table, clear the bank, persist
    ///
    /// Runs on simulation-complete. Test mode leaves the table file alone.
    pub fn finalize(&self) -> Result<()> {
        let mut state = self.lock()?;
        let histories = std::mem::take(&mut state.bank);
        state.bank_slots.clear();

        let mut items = 0;
        let mut improved = 0;
        for (_, mut history) in histories {
            apply_temporal_difference(&mut history, self.config.discount_factor);
            for item in history {
                items += 1;
                if state.table.offer(item.observation, item.premise, item.loss) {
                    improved += 1;
                }
            }
        }
        tracing::info!(
            "Q-learning folded {} items, {} improved, table has {} entries",
            items,
            improved,
            state.table.len()
        );

        if self.config.mode == LearningMode::Train {
            if let Some(path) = &self.config.output_file_name {
                state.table.save(path)?;
            }
        }
        Ok(())
    }

    // === INTROSPECTION ===

    pub fn table_len(&self) -> Result<usize> {
        Ok(self.lock()?.table.len())
    }

    pub fn entry(&self, observation: &O) -> Result<Option<QTableEntry>> {
        Ok(self.lock()?.table.get(observation).cloned())
    }

    /// Table entries from lowest to highest loss
    pub fn ranked_entries(&self) -> Result<Vec<(O, QTableEntry)>> {
        Ok(self
            .lock()?
            .table
            .ranked_entries()
            .into_iter()
            .map(|(o, e)| (o.clone(), e.clone()))
            .collect())
    }

    /// Number of history items waiting for the next finalize
    pub fn banked_items(&self) -> Result<usize> {
        Ok(self.lock()?.bank.iter().map(|(_, h)| h.len()).sum())
    }

    pub fn history(&self, agent: AgentId) -> Result<Vec<QLearningHistoryItem<O>>> {
        let state = self.lock()?;
        Ok(state
            .bank_slots
            .get(&agent)
            .map(|&slot| state.bank[slot].1.clone())
            .unwrap_or_default())
    }

    pub fn save_table(&self, path: &Path) -> Result<()> {
        self.lock()?.table.save(path)
    }

    /// Replace the table with the one at `path`; false when there is none
    pub fn load_table(&self, path: &Path) -> Result<bool> {
        match QTable::load(path)? {
            Some(table) => {
                self.lock()?.table = table;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl<O: Observation> Decision for QLearningDecision<O> {
    fn decide(&self, sim: &mut Simulation, agent: AgentId) -> Result<()> {
        let observation =
            (self.perception)(sim, agent).map_err(|source| SubstrateError::Perception { agent, source })?;

        let known = self
            .lock()?
            .table
            .get(&observation)
            .map(|entry| entry.premise.clone());

        let premise = match known {
            Some(premise) if !self.nonconforms(sim) => {
                tracing::trace!("Agent {} replays premise for {:?}", agent, observation);
                premise.replay(sim, agent)?;
                premise
            }
            _ => {
                tracing::trace!("Agent {} explores for {:?}", agent, observation);
                explore(sim, agent)?
            }
        };

        let loss = (self.loss)(sim, agent).map_err(|source| SubstrateError::Loss { agent, source })?;
        if !loss.is_finite() {
            return Err(SubstrateError::Loss {
                agent,
                source: format!("loss must be finite, got {}", loss).into(),
            });
        }

        if self.config.mode == LearningMode::Train {
            self.lock()?.bank(
                agent,
                QLearningHistoryItem {
                    observation,
                    premise,
                    loss,
                },
            );
        }
        Ok(())
    }
}

impl<O: Observation> std::fmt::Debug for QLearningDecision<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QLearningDecision")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
