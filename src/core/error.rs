use thiserror::Error;

use crate::core::types::AgentId;

/// Boxed error returned by user-supplied closures (actions, probes, perceptions, losses)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum SubstrateError {
    #[error("Invalid agent: {0}")]
    InvalidAgent(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),

    #[error("Action '{action}' failed: {source}")]
    InvalidAction {
        action: String,
        #[source]
        source: BoxError,
    },

    #[error("Invalid decision: {0}")]
    InvalidDecision(String),

    #[error("Invalid tracker: {0}")]
    InvalidTracker(String),

    #[error("Invalid end condition: {0}")]
    InvalidEndCondition(String),

    #[error("Perception failed for agent {agent}: {source}")]
    Perception {
        agent: AgentId,
        #[source]
        source: BoxError,
    },

    #[error("Loss failed for agent {agent}: {source}")]
    Loss {
        agent: AgentId,
        #[source]
        source: BoxError,
    },

    #[error("Agent {agent} has no attribute '{attribute}'")]
    MissingAttribute { agent: AgentId, attribute: String },

    #[error("Grid index queried before initialize()")]
    IndexNotInitialized,

    #[error("Grid size must be positive and finite, got {0}")]
    InvalidGridSize(f64),

    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    #[error("Invalid decision-mutable value: {0}")]
    InvalidValue(String),

    #[error("Cannot {operation} a simulation in state {state}")]
    Workflow {
        operation: &'static str,
        state: String,
    },

    #[error("Q-table persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    ConfigError(#[from] toml::de::Error),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

pub type Result<T> = std::result::Result<T, SubstrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_error_keeps_source() {
        let source: BoxError = "out of energy".into();
        let err = SubstrateError::InvalidAction {
            action: "eat".to_string(),
            source,
        };

        assert_eq!(err.to_string(), "Action 'eat' failed: out of energy");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_io_error_converts() {
        fn open_missing() -> Result<String> {
            Ok(std::fs::read_to_string("/definitely/not/here.json")?)
        }

        assert!(matches!(open_missing(), Err(SubstrateError::IoError(_))));
    }
}
