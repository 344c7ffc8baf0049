//! Agents
//!
//! An agent carries lifecycle flags, a dispatch order, named actions, a
//! decision strategy and its registry of decision-mutable values. Spatial
//! agents add a position; visual agents add rendering attributes on top.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::actions::catalog::{Action, ActionResult};
use crate::core::error::{Result, SubstrateError};
use crate::core::types::{AgentId, DVec2, VisualAttributes};
use crate::decision::{Decision, NoCastDecision};
use crate::entity::mutable::{DecisionMutableValue, MutableValue};
use crate::events::callbacks::CallbackChannel;
use crate::simulation::engine::Simulation;

/// Spatial payload of an agent
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// No position; ignored by the grid index
    Abstract,
    Spatial {
        position: DVec2,
        visual: Option<VisualAttributes>,
    },
}

pub struct Agent {
    id: AgentId,
    exists: bool,
    /// Set by actions when nothing else should run this step
    pub step_complete: bool,
    /// Dispatch sort key, read at the start of every step
    pub order: i64,
    body: Body,
    actions: BTreeMap<String, Action>,
    decision: Arc<dyn Decision>,
    mutables: BTreeMap<String, DecisionMutableValue>,
    movement_hook: Option<Arc<CallbackChannel<Agent>>>,
    data: Option<Box<dyn Any + Send + Sync>>,
}

impl Agent {
    fn with_body(body: Body) -> Self {
        Self {
            id: AgentId::new(),
            exists: true,
            step_complete: false,
            order: 0,
            body,
            actions: BTreeMap::new(),
            decision: Arc::new(NoCastDecision),
            mutables: BTreeMap::new(),
            movement_hook: None,
            data: None,
        }
    }

    /// Non-spatial agent
    pub fn new() -> Self {
        Self::with_body(Body::Abstract)
    }

    /// Spatial agent at `position`
    pub fn spatial(position: DVec2) -> Result<Self> {
        validate_position(position)?;
        Ok(Self::with_body(Body::Spatial {
            position,
            visual: None,
        }))
    }

    /// Spatial agent with rendering attributes
    pub fn visual(position: DVec2, visual: VisualAttributes) -> Result<Self> {
        validate_position(position)?;
        Ok(Self::with_body(Body::Spatial {
            position,
            visual: Some(visual),
        }))
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    pub fn with_action<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&mut Simulation, AgentId) -> ActionResult + Send + Sync + 'static,
    {
        self.add_action(name, action);
        self
    }

    pub fn with_decision(mut self, decision: Arc<dyn Decision>) -> Self {
        self.decision = decision;
        self
    }

    pub fn with_mutable(mut self, name: impl Into<String>, value: DecisionMutableValue) -> Result<Self> {
        self.register_mutable(name, value)?;
        Ok(self)
    }

    pub fn with_data<T: Any + Send + Sync>(mut self, data: T) -> Self {
        self.data = Some(Box::new(data));
        self
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    /// False once the agent has been removed from its simulation
    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn is_spatial(&self) -> bool {
        matches!(self.body, Body::Spatial { .. })
    }

    pub fn position(&self) -> Option<DVec2> {
        match self.body {
            Body::Spatial { position, .. } => Some(position),
            Body::Abstract => None,
        }
    }

    /// Store a new position and notify the movement hook
    ///
    /// The hook fires on every write, even when the position is unchanged.
    /// If a subscriber rejects the move the previous position is restored.
    pub fn set_position(&mut self, new_position: DVec2) -> Result<()> {
        validate_position(new_position)?;
        let previous = match &mut self.body {
            Body::Spatial { position, .. } => std::mem::replace(position, new_position),
            Body::Abstract => {
                return Err(SubstrateError::InvalidAgent(format!(
                    "agent {} has no position",
                    self.id
                )))
            }
        };
        if let Some(hook) = self.movement_hook.clone() {
            if let Err(err) = hook.fire(self) {
                if let Body::Spatial { position, .. } = &mut self.body {
                    *position = previous;
                }
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn x(&self) -> Option<f64> {
        self.position().map(|p| p.x)
    }

    pub fn y(&self) -> Option<f64> {
        self.position().map(|p| p.y)
    }

    pub fn set_x(&mut self, x: f64) -> Result<()> {
        let current = self.require_position()?;
        self.set_position(DVec2::new(x, current.y))
    }

    pub fn set_y(&mut self, y: f64) -> Result<()> {
        let current = self.require_position()?;
        self.set_position(DVec2::new(current.x, y))
    }

    fn require_position(&self) -> Result<DVec2> {
        self.position().ok_or_else(|| {
            SubstrateError::InvalidAgent(format!("agent {} has no position", self.id))
        })
    }

    pub fn visual_attributes(&self) -> Option<&VisualAttributes> {
        match &self.body {
            Body::Spatial { visual, .. } => visual.as_ref(),
            Body::Abstract => None,
        }
    }

    pub fn visual_attributes_mut(&mut self) -> Option<&mut VisualAttributes> {
        match &mut self.body {
            Body::Spatial { visual, .. } => visual.as_mut(),
            Body::Abstract => None,
        }
    }

    // === ACTIONS ===

    /// Register (or replace) a named action
    pub fn add_action<F>(&mut self, name: impl Into<String>, action: F)
    where
        F: Fn(&mut Simulation, AgentId) -> ActionResult + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(action));
    }

    pub fn remove_action(&mut self, name: &str) -> bool {
        self.actions.remove(name).is_some()
    }

    pub fn action(&self, name: &str) -> Option<Action> {
        self.actions.get(name).cloned()
    }

    /// Action names in sorted order
    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    pub fn has_actions(&self) -> bool {
        !self.actions.is_empty()
    }

    // === DECISION ===

    pub fn decision(&self) -> Arc<dyn Decision> {
        Arc::clone(&self.decision)
    }

    pub fn set_decision(&mut self, decision: Arc<dyn Decision>) {
        self.decision = decision;
    }

    // === DECISION-MUTABLE VALUES ===

    /// Register a named decision-mutable value; names are unique per agent
    pub fn register_mutable(&mut self, name: impl Into<String>, value: DecisionMutableValue) -> Result<()> {
        let name = name.into();
        if self.mutables.contains_key(&name) {
            return Err(SubstrateError::InvalidValue(format!(
                "agent {} already has a mutable named '{}'",
                self.id, name
            )));
        }
        self.mutables.insert(name, value);
        Ok(())
    }

    pub fn mutable(&self, name: &str) -> Option<&DecisionMutableValue> {
        self.mutables.get(name)
    }

    pub fn mutable_value(&self, name: &str) -> Option<MutableValue> {
        self.mutables.get(name).map(DecisionMutableValue::value)
    }

    /// Mutables in name order
    pub fn mutables(&self) -> impl Iterator<Item = (&str, &DecisionMutableValue)> {
        self.mutables.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn mutables_mut(&mut self) -> impl Iterator<Item = (&String, &mut DecisionMutableValue)> {
        self.mutables.iter_mut()
    }

    /// Apply a recorded assignment
    pub(crate) fn assign_mutable(&mut self, name: &str, value: &MutableValue) -> Result<()> {
        let id = self.id;
        let mutable = self
            .mutables
            .get_mut(name)
            .ok_or_else(|| SubstrateError::MissingAttribute {
                agent: id,
                attribute: name.to_string(),
            })?;
        mutable.set_value(value)
    }

    // === USER DATA ===

    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.as_ref().and_then(|d| d.downcast_ref::<T>())
    }

    pub fn data_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.data.as_mut().and_then(|d| d.downcast_mut::<T>())
    }

    pub fn set_data<T: Any + Send + Sync>(&mut self, data: T) {
        self.data = Some(Box::new(data));
    }

    // === LIFECYCLE (registry only) ===

    pub(crate) fn mark_added(&mut self, movement_hook: &Arc<CallbackChannel<Agent>>) {
        self.exists = true;
        if self.is_spatial() {
            self.movement_hook = Some(Arc::clone(movement_hook));
        }
    }

    pub(crate) fn mark_removed(&mut self) {
        self.exists = false;
        self.step_complete = true;
        self.movement_hook = None;
    }
}

impl Default for Agent {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("exists", &self.exists)
            .field("step_complete", &self.step_complete)
            .field("order", &self.order)
            .field("body", &self.body)
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("mutables", &self.mutables)
            .finish_non_exhaustive()
    }
}

fn validate_position(position: DVec2) -> Result<()> {
    if position.is_finite() {
        Ok(())
    } else {
        Err(SubstrateError::InvalidPosition(format!(
            "position must be finite, got {}",
            position
        )))
    }
}

/// Convenience for actions: mark the acting agent done for this step
pub fn complete_step(sim: &mut Simulation, agent: AgentId) -> ActionResult {
    sim.require_agent_mut(agent)?.step_complete = true;
    Ok(())
}
