//! Callback bus
//!
//! Typed, synchronous pub/sub channels. The agent channels carry the agent
//! that triggered them; the milestone channels carry the simulation.
//!
//! Subscribers are identified by `Arc` pointer identity, so subscribing the
//! same handle twice is a no-op and the handle returned to the caller is
//! what unsubscribes it.

use std::sync::{Arc, RwLock};

use crate::core::error::Result;
use crate::entity::agent::Agent;
use crate::simulation::engine::Simulation;

/// A subscriber: receives the triggering object, may fail
pub type Callback<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

/// Wrap a closure as a subscriber handle
pub fn callback<T, F>(f: F) -> Callback<T>
where
    F: Fn(&T) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn same_subscriber<T>(a: &Callback<T>, b: &Callback<T>) -> bool {
    // Compare data pointers only; vtable addresses are not stable across codegen units.
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// One named channel
pub struct CallbackChannel<T> {
    name: &'static str,
    subscribers: RwLock<Vec<Callback<T>>>,
}

impl<T> CallbackChannel<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Add a subscriber. Returns false if it was already subscribed.
    pub fn subscribe(&self, subscriber: &Callback<T>) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if subscribers.iter().any(|s| same_subscriber(s, subscriber)) {
            return false;
        }
        subscribers.push(Arc::clone(subscriber));
        true
    }

    /// Remove a subscriber. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, subscriber: &Callback<T>) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = subscribers.len();
        subscribers.retain(|s| !same_subscriber(s, subscriber));
        subscribers.len() != before
    }

    pub fn contains(&self, subscriber: &Callback<T>) -> bool {
        self.subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .any(|s| same_subscriber(s, subscriber))
    }

    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every subscriber in subscription order.
    ///
    /// The subscriber list is copied before the first call, so a subscriber
    /// may (un)subscribe on this channel without deadlocking; the change
    /// takes effect on the next fire. Stops at the first error.
    pub fn fire(&self, payload: &T) -> Result<()> {
        let subscribers: Vec<Callback<T>> = self
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for subscriber in &subscribers {
            subscriber(payload)?;
        }
        Ok(())
    }
}

impl<T> std::fmt::Debug for CallbackChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackChannel")
            .field("name", &self.name)
            .field("subscribers", &self.len())
            .finish()
    }
}

/// All channels of one simulation
///
/// Channels are shared handles: the registry keeps the agent channels and
/// every registered spatial agent keeps `agent_moved` as its movement hook.
#[derive(Debug, Clone)]
pub struct CallbackSuite {
    pub agent_added: Arc<CallbackChannel<Agent>>,
    pub agent_removed: Arc<CallbackChannel<Agent>>,
    pub agent_moved: Arc<CallbackChannel<Agent>>,
    pub simulation_started: Arc<CallbackChannel<Simulation>>,
    pub step_started: Arc<CallbackChannel<Simulation>>,
    pub step_complete: Arc<CallbackChannel<Simulation>>,
    pub simulation_complete: Arc<CallbackChannel<Simulation>>,
}

impl CallbackSuite {
    pub fn new() -> Self {
        Self {
            agent_added: Arc::new(CallbackChannel::new("agent_added")),
            agent_removed: Arc::new(CallbackChannel::new("agent_removed")),
            agent_moved: Arc::new(CallbackChannel::new("agent_moved")),
            simulation_started: Arc::new(CallbackChannel::new("simulation_started")),
            step_started: Arc::new(CallbackChannel::new("step_started")),
            step_complete: Arc::new(CallbackChannel::new("step_complete")),
            simulation_complete: Arc::new(CallbackChannel::new("simulation_complete")),
        }
    }
}

impl Default for CallbackSuite {
    fn default() -> Self {
        Self::new()
    }
}
