//! Error taxonomy for the BerinIA runtime.
//!
//! Every failure mode a component can surface maps onto one variant here.
//! Configuration errors are fatal at bootstrap; everything else is
//! recoverable and is translated by the Overseer or the webhook layer into
//! a structured result record, never a panic.

use thiserror::Error;

/// Errors raised by agents and runtime components.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Missing required environment variable or malformed agent definition.
    /// Surfaced at bootstrap; fatal.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// An agent name was requested that the registry does not know.
    #[error("unknown agent: {name}")]
    UnknownAgent { name: String },

    /// A leaf agent failed while running.
    #[error("invocation error in {agent}: {message}")]
    Invocation { agent: String, message: String },

    /// A leaf agent exceeded its per-call budget.
    #[error("timeout")]
    Timeout { agent: String, budget_s: u64 },

    /// A payload was missing required fields.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A webhook signature did not match.
    #[error("authentication error: {message}")]
    Authentication { message: String },

    /// The LLM or the vector store is unreachable or answered badly.
    #[error("downstream service error: {message}")]
    Downstream { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl AgentError {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Shorthand for a downstream service error.
    pub fn downstream(message: impl Into<String>) -> Self {
        Self::Downstream {
            message: message.into(),
        }
    }

    /// Shorthand for a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
