//! Lifecycle hooks for agents and conductors.
//!
//! Every hook is optional (default no-op) and may suspend. A failing hook
//! never alters the operation's outcome: the error is logged and, when a
//! trace step is active, recorded in that step's metadata.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::errors::OrchestratorError;
use crate::models::{Message, ToolCall};
use crate::trace::ExecutionTrace;

/// Observes one agent's reasoning loop.
#[async_trait]
pub trait AgentHooks: Send + Sync {
    async fn before_generate(&self, _messages: &[Message], _iteration: usize) -> Result<()> {
        Ok(())
    }

    async fn after_generate(&self, _response: &Message, _iteration: usize) -> Result<()> {
        Ok(())
    }

    async fn before_tool_call(&self, _call: &ToolCall) -> Result<()> {
        Ok(())
    }

    /// Fired after a successful tool invocation only; failures are
    /// reported to the model, not to this hook.
    async fn after_tool_call(&self, _call: &ToolCall, _result: &Value) -> Result<()> {
        Ok(())
    }

    async fn on_error(&self, _error: &OrchestratorError) -> Result<()> {
        Ok(())
    }
}

/// Observes agent steps and strategy-specific events across an ensemble
/// run. Registered on the ensemble, the conductor, or both.
#[async_trait]
pub trait OrchestrationHooks: Send + Sync {
    async fn before_agent(&self, _agent_id: &str, _input: &str) -> Result<()> {
        Ok(())
    }

    async fn after_agent(&self, _agent_id: &str, _response: &str) -> Result<()> {
        Ok(())
    }

    async fn agent_error(&self, _agent_id: &str, _error: &OrchestratorError) -> Result<()> {
        Ok(())
    }

    /// Fired once per debate round with every debater's latest statement.
    async fn debate_round(&self, _round: usize, _statements: &HashMap<String, String>) -> Result<()> {
        Ok(())
    }

    /// Fired once per parsed ballot. `choices` holds 1-based option
    /// numbers (a single entry except for ranked voting).
    async fn vote(&self, _agent_id: &str, _choices: &[usize], _raw_response: &str) -> Result<()> {
        Ok(())
    }
}

/// Record a hook failure without disturbing the surrounding operation.
pub(crate) fn note_hook_failure(
    trace: Option<(&ExecutionTrace, usize)>,
    hook: &str,
    err: &anyhow::Error,
) {
    tracing::warn!(hook, error = %err, "hook failed; continuing");
    if let Some((trace, step)) = trace {
        trace.annotate_step(step, format!("hook_error:{hook}"), Value::String(err.to_string()));
    }
}
