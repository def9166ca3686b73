//! Agent-to-agent task transfer, implemented as a tool.
//!
//! An agent hands work off by calling the `handoff` tool with a declared
//! target id; a [`HandoffHandler`] decides whether to accept and produces
//! the result. The [`HandoffChain`] combinator strings agents together
//! with response-driven jumps, bounded so a misconfigured predicate
//! cannot loop forever.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agent::{Agent, RunOptions};
use crate::errors::{OrchestratorError, Result};
use crate::models::{Message, Tool};
use crate::sanitize::sanitize_error_message;

/// A request to transfer a task from one agent to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub from_agent: String,
    pub to_agent: String,
    pub reason: String,
    pub task: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<Message>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

/// The receiving side's answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandoffResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl HandoffResponse {
    pub fn accepted<S: Into<String>>(result: S) -> Self {
        Self {
            accepted: true,
            result: Some(result.into()),
            ..Self::default()
        }
    }

    pub fn rejected<S: Into<String>>(reason: S) -> Self {
        Self {
            accepted: false,
            rejection_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// Receives handoff requests for a set of target agents.
#[async_trait]
pub trait HandoffHandler: Send + Sync {
    async fn handle(&self, request: HandoffRequest) -> anyhow::Result<HandoffResponse>;
}

/// Build the `handoff` tool for an agent, parameterized by the declared
/// target ids and a handler. Unknown targets are rejected before the
/// handler runs; handler exceptions are serialized into the tool result.
pub fn handoff_tool<S: Into<String>>(
    from_agent: S,
    targets: Vec<String>,
    handler: Arc<dyn HandoffHandler>,
) -> Tool {
    let from_agent = from_agent.into();
    let description = format!(
        "Hand the current task off to another agent. Valid targets: {}",
        targets.join(", ")
    );

    Tool::new(
        "handoff",
        description,
        json!({
            "type": "object",
            "properties": {
                "target_agent": {
                    "type": "string",
                    "description": "Id of the agent to hand off to"
                },
                "task": {
                    "type": "string",
                    "description": "The task being transferred"
                },
                "reason": {
                    "type": "string",
                    "description": "Why the handoff is needed"
                },
                "context": {
                    "type": "object",
                    "description": "Optional context for the receiving agent"
                },
                "priority": {
                    "type": "string",
                    "description": "Optional priority hint"
                }
            },
            "required": ["target_agent", "task", "reason"],
            "additionalProperties": false
        }),
        move |args| {
            let from_agent = from_agent.clone();
            let targets = targets.clone();
            let handler = handler.clone();
            async move {
                let target = args["target_agent"].as_str().unwrap_or_default().to_string();
                if !targets.contains(&target) {
                    return Ok(json!({
                        "success": false,
                        "rejected": true,
                        "error": format!("Invalid target '{target}'"),
                    }));
                }

                let request = HandoffRequest {
                    from_agent,
                    to_agent: target.clone(),
                    reason: args["reason"].as_str().unwrap_or_default().to_string(),
                    task: args["task"].as_str().unwrap_or_default().to_string(),
                    context: args.get("context").filter(|v| !v.is_null()).cloned(),
                    history: None,
                    priority: args["priority"].as_str().map(str::to_string),
                };

                match handler.handle(request).await {
                    Ok(response) if response.accepted => Ok(json!({
                        "success": true,
                        "agent": target,
                        "result": response.result,
                        "data": response.data,
                    })),
                    Ok(response) => Ok(json!({
                        "success": false,
                        "rejected": true,
                        "reason": response.rejection_reason,
                    })),
                    Err(error) => Ok(json!({
                        "success": false,
                        "error": sanitize_error_message(&error.to_string()),
                    })),
                }
            }
        },
    )
}

/// Resolves targets by id and runs the target agent with the task,
/// prefixed by the serialized context when one is present.
#[derive(Default)]
pub struct SimpleHandoffHandler {
    agents: HashMap<String, Arc<Agent>>,
}

impl SimpleHandoffHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent<S: Into<String>>(mut self, id: S, agent: Arc<Agent>) -> Self {
        self.agents.insert(id.into(), agent);
        self
    }
}

#[async_trait]
impl HandoffHandler for SimpleHandoffHandler {
    async fn handle(&self, request: HandoffRequest) -> anyhow::Result<HandoffResponse> {
        let Some(agent) = self.agents.get(&request.to_agent) else {
            return Ok(HandoffResponse::rejected(format!(
                "No agent registered for '{}'",
                request.to_agent
            )));
        };

        let input = match &request.context {
            Some(context) => format!("Context: {context}\n\nTask: {}", request.task),
            None => request.task.clone(),
        };
        let result = agent.run(&input, RunOptions::default()).await?;
        Ok(HandoffResponse::accepted(result.response))
    }
}

/// Rejects a request before dispatch; return the rejection message.
pub type ValidateFn =
    Arc<dyn Fn(&HandoffRequest) -> std::result::Result<(), String> + Send + Sync>;
pub type TransformInputFn = Arc<dyn Fn(&HandoffRequest) -> String + Send + Sync>;
pub type TransformOutputFn = Arc<dyn Fn(String) -> String + Send + Sync>;
pub type HandoffCallback = Arc<dyn Fn(&HandoffRequest) + Send + Sync>;

/// [`SimpleHandoffHandler`] plus optional validation, input/output
/// transformers, and lifecycle callbacks.
#[derive(Default)]
pub struct AdvancedHandoffHandler {
    agents: HashMap<String, Arc<Agent>>,
    validate: Option<ValidateFn>,
    transform_input: Option<TransformInputFn>,
    transform_output: Option<TransformOutputFn>,
    on_handoff: Option<HandoffCallback>,
    on_complete: Option<HandoffCallback>,
}

impl AdvancedHandoffHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent<S: Into<String>>(mut self, id: S, agent: Arc<Agent>) -> Self {
        self.agents.insert(id.into(), agent);
        self
    }

    pub fn validate(mut self, validate: ValidateFn) -> Self {
        self.validate = Some(validate);
        self
    }

    pub fn transform_input(mut self, transform: TransformInputFn) -> Self {
        self.transform_input = Some(transform);
        self
    }

    pub fn transform_output(mut self, transform: TransformOutputFn) -> Self {
        self.transform_output = Some(transform);
        self
    }

    pub fn on_handoff(mut self, callback: HandoffCallback) -> Self {
        self.on_handoff = Some(callback);
        self
    }

    pub fn on_complete(mut self, callback: HandoffCallback) -> Self {
        self.on_complete = Some(callback);
        self
    }
}

#[async_trait]
impl HandoffHandler for AdvancedHandoffHandler {
    async fn handle(&self, request: HandoffRequest) -> anyhow::Result<HandoffResponse> {
        if let Some(validate) = &self.validate {
            if let Err(reason) = validate(&request) {
                return Ok(HandoffResponse::rejected(reason));
            }
        }

        let Some(agent) = self.agents.get(&request.to_agent) else {
            return Ok(HandoffResponse::rejected(format!(
                "No agent registered for '{}'",
                request.to_agent
            )));
        };

        if let Some(on_handoff) = &self.on_handoff {
            on_handoff(&request);
        }

        let input = match &self.transform_input {
            Some(transform) => transform(&request),
            None => match &request.context {
                Some(context) => format!("Context: {context}\n\nTask: {}", request.task),
                None => request.task.clone(),
            },
        };

        let result = agent.run(&input, RunOptions::default()).await?;
        let output = match &self.transform_output {
            Some(transform) => transform(result.response),
            None => result.response,
        };

        if let Some(on_complete) = &self.on_complete {
            on_complete(&request);
        }
        Ok(HandoffResponse::accepted(output))
    }
}

/// Decides the next link id from the current response; `None` ends the
/// chain.
pub type ShouldHandoffFn = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub struct ChainLink {
    pub id: String,
    pub agent: Arc<Agent>,
    pub should_handoff: Option<ShouldHandoffFn>,
}

impl ChainLink {
    pub fn new<S: Into<String>>(id: S, agent: Arc<Agent>) -> Self {
        Self {
            id: id.into(),
            agent,
            should_handoff: None,
        }
    }

    pub fn with_should_handoff(mut self, should_handoff: ShouldHandoffFn) -> Self {
        self.should_handoff = Some(should_handoff);
        self
    }
}

/// The outcome of a chain run: the ids visited in order and the last
/// response.
#[derive(Debug, Clone)]
pub struct ChainResult {
    pub visited: Vec<String>,
    pub response: String,
}

/// Runs links in response-driven order, starting from the first. Each
/// link's `should_handoff` inspects the response and may name the next
/// link; an unknown id or `None` terminates the chain. Jumps are capped
/// (default: twice the chain length) and exceeding the cap fails with
/// `MaxDelegations`.
pub struct HandoffChain {
    links: Vec<ChainLink>,
    max_jumps: usize,
}

impl HandoffChain {
    pub fn new(links: Vec<ChainLink>) -> Self {
        let max_jumps = links.len() * 2;
        Self { links, max_jumps }
    }

    pub fn max_jumps(mut self, max_jumps: usize) -> Self {
        self.max_jumps = max_jumps;
        self
    }

    pub async fn run(&self, input: &str, options: RunOptions) -> Result<ChainResult> {
        let Some(first) = self.links.first() else {
            return Err(OrchestratorError::MissingRequired(
                "at least one chain link".to_string(),
            ));
        };

        let mut current = first;
        let mut current_input = input.to_string();
        let mut visited = Vec::new();
        let mut jumps = 0usize;

        loop {
            if options
                .cancel
                .as_ref()
                .is_some_and(|token| token.is_cancelled())
            {
                return Err(OrchestratorError::Cancelled);
            }

            let result = current.agent.run(&current_input, options.clone()).await?;
            visited.push(current.id.clone());

            let next_id = current
                .should_handoff
                .as_ref()
                .and_then(|should| should(&result.response));
            let next = next_id
                .as_deref()
                .and_then(|id| self.links.iter().find(|link| link.id == id));

            match next {
                Some(link) => {
                    jumps += 1;
                    if jumps > self.max_jumps {
                        return Err(OrchestratorError::MaxDelegations(self.max_jumps));
                    }
                    current_input = result.response;
                    current = link;
                }
                None => {
                    return Ok(ChainResult {
                        visited,
                        response: result.response,
                    });
                }
            }
        }
    }
}
