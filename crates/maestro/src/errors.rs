use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sanitize::sanitize_error_message;

/// Errors raised out of the orchestration entry points (`Agent::run`,
/// builders, conductors). Tool-level failures use [`ToolError`] and are
/// reported back to the model instead of propagating.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing required field: {0}")]
    MissingRequired(String),

    #[error("Duplicate agent id: {0}")]
    DuplicateId(String),

    #[error("Agent not found: {0}")]
    NotFound(String),

    #[error("Quorum not met: {active} active of {required} required voters")]
    QuorumNotMet { active: usize, required: usize },

    #[error("Insufficient voting options: need at least 2, got {0}")]
    InsufficientOptions(usize),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Maximum delegations exceeded: {0}")]
    MaxDelegations(usize),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Wrap a backend failure, redacting anything credential-shaped from
    /// the vendor's message before it can reach a caller.
    pub fn provider(err: impl std::fmt::Display) -> Self {
        OrchestratorError::Provider(sanitize_error_message(&err.to_string()))
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        OrchestratorError::Internal(sanitize_error_message(&err.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors produced while executing a single tool call. These never abort
/// the agent loop: they are serialized into a tool message so the model
/// can react.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToolError {
    #[error("Tool '{0}' not found")]
    NotFound(String),

    #[error("The parameters to the tool call were invalid: {0}")]
    InvalidParameters(String),

    #[error("The tool failed during execution with the following output: \n{0}")]
    ExecutionError(String),

    #[error("The tool call timed out after {0} ms")]
    Timeout(u64),
}

pub type ToolResult<T> = std::result::Result<T, ToolError>;
