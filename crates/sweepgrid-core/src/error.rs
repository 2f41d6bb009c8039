//! Error types for SweepGrid core types.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the domain state machines and config loading.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid attempt transition: {from} -> {to}")]
    InvalidAttemptTransition {
        from: crate::AttemptStatus,
        to: crate::AttemptStatus,
    },

    #[error("invalid agent transition: {from} -> {to}")]
    InvalidAgentTransition {
        from: crate::AgentState,
        to: crate::AgentState,
    },

    #[error("failed to read config: {0}")]
    ConfigRead(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),
}
