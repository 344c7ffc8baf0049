//! Action definitions and invocation

use std::sync::Arc;

use crate::core::error::{BoxError, Result, SubstrateError};
use crate::core::types::AgentId;
use crate::simulation::engine::Simulation;

/// What an action body returns; any error type the caller likes
pub type ActionResult = std::result::Result<(), BoxError>;

/// A named unit of agent behaviour
///
/// Receives the whole simulation and the id of the acting agent, so an action
/// may move its agent, touch other agents, or add and remove agents.
pub type Action = Arc<dyn Fn(&mut Simulation, AgentId) -> ActionResult + Send + Sync>;

/// Run the agent's action called `name`
///
/// A name the agent does not have is `MissingAttribute`; a failing body is
/// wrapped as `InvalidAction`.
pub fn invoke_action(sim: &mut Simulation, agent: AgentId, name: &str) -> Result<()> {
    let action = sim
        .require_agent(agent)?
        .action(name)
        .ok_or_else(|| SubstrateError::MissingAttribute {
            agent,
            attribute: name.to_string(),
        })?;

    tracing::trace!("Agent {} invokes '{}'", agent, name);
    action(sim, agent).map_err(|source| SubstrateError::InvalidAction {
        action: name.to_string(),
        source,
    })
}
