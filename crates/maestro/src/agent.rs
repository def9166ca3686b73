//! A single agent: an LLM bound to a system prompt and a tool set, driven
//! by a bounded generate/dispatch-tools loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{OrchestratorError, Result, ToolError};
use crate::hooks::AgentHooks;
use crate::models::{Message, Tool, Usage};
use crate::providers::{CompletionRequest, FinishReason, Provider};
use crate::sanitize::sanitize_error_message;

pub const DEFAULT_MAX_ITERATIONS: usize = 10;
pub const DEFAULT_MAX_INPUT_LENGTH: usize = 100_000;
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Options for a single run.
#[derive(Default, Clone)]
pub struct RunOptions {
    pub cancel: Option<CancellationToken>,
}

impl RunOptions {
    pub fn cancellable(cancel: CancellationToken) -> Self {
        Self {
            cancel: Some(cancel),
        }
    }
}

/// The outcome of one agent run.
#[derive(Debug, Clone)]
pub struct AgentResult {
    /// The last assistant message's text, or empty
    pub response: String,
    /// The full conversation, starting with the system and user messages
    pub messages: Vec<Message>,
    /// How many backend calls were made
    pub iterations: usize,
    /// Token usage summed across all backend calls
    pub usage: Usage,
}

/// A named worker bound to a backend, a system prompt and a tool set.
#[derive(Clone)]
pub struct Agent {
    name: String,
    description: Option<String>,
    system_prompt: String,
    provider: Arc<dyn Provider>,
    model: Option<String>,
    tools: Vec<Tool>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    max_iterations: usize,
    max_input_length: usize,
    tool_timeout: Duration,
    hooks: Vec<Arc<dyn AgentHooks>>,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    /// A derived agent with additional tools appended to its tool list.
    /// The original agent is left untouched; conductors use this to inject
    /// runtime tools such as task delegation.
    pub fn with_extra_tools(&self, extra: Vec<Tool>) -> Agent {
        let mut derived = self.clone();
        derived.tools.extend(extra);
        derived
    }

    /// Drive the tool-use conversation to a final assistant response.
    ///
    /// Backend errors, cancellation, and input validation errors propagate
    /// out of here (after firing `on_error`). Tool failures never do: they
    /// are serialized into tool messages so the model can react.
    pub async fn run(&self, input: &str, options: RunOptions) -> Result<AgentResult> {
        match self.run_loop(input, &options).await {
            Ok(result) => Ok(result),
            Err(error) => {
                for hook in &self.hooks {
                    if let Err(err) = hook.on_error(&error).await {
                        crate::hooks::note_hook_failure(None, "on_error", &err);
                    }
                }
                Err(error)
            }
        }
    }

    async fn run_loop(&self, input: &str, options: &RunOptions) -> Result<AgentResult> {
        if input.chars().count() > self.max_input_length {
            return Err(OrchestratorError::InvalidInput(format!(
                "input exceeds {} characters",
                self.max_input_length
            )));
        }

        let cancel = options.cancel.as_ref();
        let mut messages = vec![
            Message::system(&self.system_prompt),
            Message::user(input),
        ];
        let mut usage = Usage::default();
        let mut iterations = 0;
        let mut done = false;

        while !done && iterations < self.max_iterations {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                return Err(OrchestratorError::Cancelled);
            }
            iterations += 1;
            debug!(agent = %self.name, iteration = iterations, "generating");

            for hook in &self.hooks {
                if let Err(err) = hook.before_generate(&messages, iterations).await {
                    crate::hooks::note_hook_failure(None, "before_generate", &err);
                }
            }

            let request = CompletionRequest {
                messages: messages.clone(),
                tools: self.tools.iter().map(Tool::spec).collect(),
                model: self.model.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                stop: None,
            };
            let response = await_cancellable(cancel, self.provider.complete(request))
                .await?
                .map_err(OrchestratorError::provider)?;

            if let Some(call_usage) = &response.usage {
                usage.add(call_usage);
            }
            messages.push(response.message.clone());

            for hook in &self.hooks {
                if let Err(err) = hook.after_generate(&response.message, iterations).await {
                    crate::hooks::note_hook_failure(None, "after_generate", &err);
                }
            }

            if response.finish_reason == FinishReason::ToolCalls {
                let calls = response.message.tool_calls().to_vec();
                for call in calls {
                    let content = self.dispatch_tool_call(&call, cancel).await?;
                    messages.push(Message::tool_result(&call.id, content));
                }
            } else {
                done = true;
            }
        }

        let response = messages
            .iter()
            .rev()
            .find(|m| m.is_assistant())
            .and_then(|m| m.text())
            .unwrap_or_default()
            .to_string();

        Ok(AgentResult {
            response,
            messages,
            iterations,
            usage,
        })
    }

    /// Execute one requested tool call, returning the content for its tool
    /// message. Failures and timeouts become `{"error": …}` payloads.
    async fn dispatch_tool_call(
        &self,
        call: &crate::models::ToolCall,
        cancel: Option<&CancellationToken>,
    ) -> Result<String> {
        let Some(tool) = self.tools.iter().find(|t| t.name == call.name) else {
            warn!(agent = %self.name, tool = %call.name, "unknown tool requested");
            return Ok(tool_error_content(&ToolError::NotFound(call.name.clone())));
        };

        for hook in &self.hooks {
            if let Err(err) = hook.before_tool_call(call).await {
                crate::hooks::note_hook_failure(None, "before_tool_call", &err);
            }
        }

        let invocation = tokio::time::timeout(self.tool_timeout, tool.invoke(call.arguments.clone()));
        let outcome = match await_cancellable(cancel, invocation).await? {
            Err(_) => Err(ToolError::Timeout(self.tool_timeout.as_millis() as u64)),
            Ok(result) => result,
        };

        match outcome {
            Ok(value) => {
                for hook in &self.hooks {
                    if let Err(err) = hook.after_tool_call(call, &value).await {
                        crate::hooks::note_hook_failure(None, "after_tool_call", &err);
                    }
                }
                Ok(stringify_tool_result(&value))
            }
            Err(tool_error) => {
                warn!(agent = %self.name, tool = %call.name, error = %tool_error, "tool failed");
                Ok(tool_error_content(&tool_error))
            }
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("tools", &self.tools.len())
            .field("max_iterations", &self.max_iterations)
            .finish_non_exhaustive()
    }
}

/// Race a future against the cancel token, surfacing `Cancelled` if the
/// token trips first.
pub(crate) async fn await_cancellable<T>(
    cancel: Option<&CancellationToken>,
    future: impl Future<Output = T>,
) -> Result<T> {
    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(OrchestratorError::Cancelled),
                output = future => Ok(output),
            }
        }
        None => Ok(future.await),
    }
}

/// Strings pass through unquoted; anything else is JSON-encoded.
fn stringify_tool_result(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn tool_error_content(error: &ToolError) -> String {
    json!({ "error": sanitize_error_message(&error.to_string()) }).to_string()
}

/// Builds an [`Agent`]. `name`, `system_prompt` and `provider` are
/// required; everything else has the documented defaults.
#[derive(Default)]
pub struct AgentBuilder {
    name: Option<String>,
    description: Option<String>,
    system_prompt: Option<String>,
    provider: Option<Arc<dyn Provider>>,
    model: Option<String>,
    tools: Vec<Tool>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    max_iterations: Option<usize>,
    max_input_length: Option<usize>,
    tool_timeout: Option<Duration>,
    hooks: Vec<Arc<dyn AgentHooks>>,
}

impl AgentBuilder {
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn system_prompt<S: Into<String>>(mut self, system_prompt: S) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations.max(1));
        self
    }

    pub fn max_input_length(mut self, max_input_length: usize) -> Self {
        self.max_input_length = Some(max_input_length);
        self
    }

    pub fn tool_timeout(mut self, tool_timeout: Duration) -> Self {
        self.tool_timeout = Some(tool_timeout);
        self
    }

    pub fn hook(mut self, hook: Arc<dyn AgentHooks>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn build(self) -> Result<Agent> {
        let name = self
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| OrchestratorError::MissingRequired("name".to_string()))?;
        let system_prompt = self
            .system_prompt
            .filter(|p| !p.is_empty())
            .ok_or_else(|| OrchestratorError::MissingRequired("system_prompt".to_string()))?;
        let provider = self
            .provider
            .ok_or_else(|| OrchestratorError::MissingRequired("provider".to_string()))?;

        let mut seen = std::collections::HashSet::new();
        for tool in &self.tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(OrchestratorError::DuplicateId(format!(
                    "tool '{}'",
                    tool.name
                )));
            }
        }

        Ok(Agent {
            name,
            description: self.description,
            system_prompt,
            provider,
            model: self.model,
            tools: self.tools,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            max_iterations: self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
            max_input_length: self.max_input_length.unwrap_or(DEFAULT_MAX_INPUT_LENGTH),
            tool_timeout: self.tool_timeout.unwrap_or(DEFAULT_TOOL_TIMEOUT),
            hooks: self.hooks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ToolCall;
    use crate::providers::{CompletionResponse, MockProvider};
    use anyhow::Result as AnyhowResult;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn weather_tool() -> Tool {
        Tool::new(
            "get_weather",
            "look up current weather",
            json!({
                "type": "object",
                "properties": { "location": { "type": "string" } },
                "required": ["location"]
            }),
            |_args| async move { Ok(json!({ "temp": 72 })) },
        )
    }

    fn agent_with(provider: MockProvider, tools: Vec<Tool>) -> Agent {
        Agent::builder()
            .name("test")
            .system_prompt("You are helpful.")
            .provider(Arc::new(provider))
            .tools(tools)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_one_shot_response() -> AnyhowResult<()> {
        let provider = MockProvider::new(vec![
            CompletionResponse::text("Hello!").with_usage(Usage::new(10, 5, 15))
        ]);
        let agent = agent_with(provider, vec![]);

        let result = agent.run("hi", RunOptions::default()).await?;
        assert_eq!(result.response, "Hello!");
        assert_eq!(result.iterations, 1);
        assert_eq!(result.usage, Usage::new(10, 5, 15));
        assert_eq!(result.messages.len(), 3);
        assert_eq!(result.messages[0].role(), "system");
        assert_eq!(result.messages[1].role(), "user");
        assert_eq!(result.messages[2].role(), "assistant");
        Ok(())
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() -> AnyhowResult<()> {
        let provider = MockProvider::new(vec![
            CompletionResponse::tool_calls(vec![ToolCall::new(
                "c1",
                "get_weather",
                json!({"location": "SF"}),
            )]),
            CompletionResponse::text("72°F and sunny."),
        ]);
        let agent = agent_with(provider, vec![weather_tool()]);

        let result = agent.run("weather SF?", RunOptions::default()).await?;
        assert_eq!(result.response, "72°F and sunny.");
        assert_eq!(result.iterations, 2);

        let tool_message = result
            .messages
            .iter()
            .find(|m| m.role() == "tool")
            .expect("tool message present");
        match tool_message {
            Message::Tool {
                tool_call_id,
                content,
            } => {
                assert_eq!(tool_call_id, "c1");
                assert!(content.contains("72"));
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_tool_messages_follow_assistant_requests() -> AnyhowResult<()> {
        let provider = MockProvider::new(vec![
            CompletionResponse::tool_calls(vec![
                ToolCall::new("c1", "get_weather", json!({"location": "SF"})),
                ToolCall::new("c2", "get_weather", json!({"location": "LA"})),
            ]),
            CompletionResponse::text("done"),
        ]);
        let agent = agent_with(provider, vec![weather_tool()]);

        let result = agent.run("both cities", RunOptions::default()).await?;

        // Every tool message refers to a call in a preceding assistant message
        let mut seen_call_ids: Vec<String> = Vec::new();
        for message in &result.messages {
            match message {
                Message::Assistant { .. } => {
                    seen_call_ids.extend(message.tool_calls().iter().map(|c| c.id.clone()));
                }
                Message::Tool { tool_call_id, .. } => {
                    assert!(seen_call_ids.contains(tool_call_id));
                }
                _ => {}
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_tool_is_reported_not_fatal() -> AnyhowResult<()> {
        let provider = MockProvider::new(vec![
            CompletionResponse::tool_calls(vec![ToolCall::new("c1", "missing", json!({}))]),
            CompletionResponse::text("recovered"),
        ]);
        let agent = agent_with(provider, vec![weather_tool()]);

        let result = agent.run("use a bad tool", RunOptions::default()).await?;
        assert_eq!(result.response, "recovered");

        let tool_message = result.messages.iter().find(|m| m.role() == "tool").unwrap();
        let payload: Value = serde_json::from_str(tool_message.text().unwrap())?;
        assert_eq!(payload["error"], "Tool 'missing' not found");
        Ok(())
    }

    #[tokio::test]
    async fn test_tool_failure_is_reported_not_fatal() -> AnyhowResult<()> {
        let failing = Tool::new(
            "flaky",
            "always fails",
            json!({"type": "object", "properties": {}}),
            |_args| async move {
                Err(ToolError::ExecutionError("disk on fire".to_string()))
            },
        );
        let provider = MockProvider::new(vec![
            CompletionResponse::tool_calls(vec![ToolCall::new("c1", "flaky", json!({}))]),
            CompletionResponse::text("noted"),
        ]);
        let agent = agent_with(provider, vec![failing]);

        let result = agent.run("try it", RunOptions::default()).await?;
        assert_eq!(result.response, "noted");
        let tool_message = result.messages.iter().find(|m| m.role() == "tool").unwrap();
        assert!(tool_message.text().unwrap().contains("disk on fire"));
        Ok(())
    }

    #[tokio::test]
    async fn test_tool_timeout_becomes_tool_message() -> AnyhowResult<()> {
        let slow = Tool::new(
            "slow",
            "sleeps forever",
            json!({"type": "object", "properties": {}}),
            |_args| async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(json!(null))
            },
        );
        let provider = MockProvider::new(vec![
            CompletionResponse::tool_calls(vec![ToolCall::new("c1", "slow", json!({}))]),
            CompletionResponse::text("moved on"),
        ]);
        let agent = Agent::builder()
            .name("test")
            .system_prompt("You are helpful.")
            .provider(Arc::new(provider))
            .tool(slow)
            .tool_timeout(Duration::from_millis(20))
            .build()
            .unwrap();

        let result = agent.run("go", RunOptions::default()).await?;
        assert_eq!(result.response, "moved on");
        let tool_message = result.messages.iter().find(|m| m.role() == "tool").unwrap();
        assert!(tool_message.text().unwrap().contains("timed out"));
        Ok(())
    }

    #[tokio::test]
    async fn test_max_iterations_bounds_loop() -> AnyhowResult<()> {
        // A provider that always asks for another tool call
        let provider = MockProvider::from_fn(|_request| {
            Ok(CompletionResponse::tool_calls(vec![ToolCall::new(
                "c",
                "get_weather",
                json!({"location": "SF"}),
            )]))
        });
        let agent = Agent::builder()
            .name("test")
            .system_prompt("You are helpful.")
            .provider(Arc::new(provider))
            .tool(weather_tool())
            .max_iterations(3)
            .build()
            .unwrap();

        let result = agent.run("loop forever", RunOptions::default()).await?;
        assert_eq!(result.iterations, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_input_length_validation() {
        let agent = agent_with(MockProvider::new(vec![]), vec![]);
        let long_input = "x".repeat(DEFAULT_MAX_INPUT_LENGTH + 1);
        let error = agent.run(&long_input, RunOptions::default()).await.unwrap_err();
        assert!(matches!(error, OrchestratorError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_cancellation_before_iteration() {
        let provider = MockProvider::new(vec![CompletionResponse::text("should not run")]);
        let agent = agent_with(provider, vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = agent
            .run("hi", RunOptions::cancellable(cancel))
            .await
            .unwrap_err();
        assert!(matches!(error, OrchestratorError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_slow_tool() {
        let slow = Tool::new(
            "slow",
            "sleeps forever",
            json!({"type": "object", "properties": {}}),
            |_args| async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(json!(null))
            },
        );
        let provider = MockProvider::new(vec![CompletionResponse::tool_calls(vec![
            ToolCall::new("c1", "slow", json!({})),
        ])]);
        let agent = Agent::builder()
            .name("test")
            .system_prompt("You are helpful.")
            .provider(Arc::new(provider))
            .tool(slow)
            .build()
            .unwrap();

        let cancel = CancellationToken::new();
        let trip = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trip.cancel();
        });

        let error = agent
            .run("go", RunOptions::cancellable(cancel))
            .await
            .unwrap_err();
        assert!(matches!(error, OrchestratorError::Cancelled));
    }

    #[tokio::test]
    async fn test_provider_error_propagates_sanitized() {
        let agent = agent_with(MockProvider::failing("401 with api_key=sk-secret"), vec![]);
        let error = agent.run("hi", RunOptions::default()).await.unwrap_err();
        match error {
            OrchestratorError::Provider(message) => {
                assert!(message.contains("api_key=***"));
                assert!(!message.contains("sk-secret"));
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_on_error_hook_fires() {
        struct Counter(AtomicUsize);

        #[async_trait::async_trait]
        impl AgentHooks for Counter {
            async fn on_error(&self, _error: &OrchestratorError) -> AnyhowResult<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let agent = Agent::builder()
            .name("test")
            .system_prompt("You are helpful.")
            .provider(Arc::new(MockProvider::failing("boom")))
            .hook(counter.clone())
            .build()
            .unwrap();

        let _ = agent.run("hi", RunOptions::default()).await.unwrap_err();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_hook_does_not_change_outcome() -> AnyhowResult<()> {
        struct Broken;

        #[async_trait::async_trait]
        impl AgentHooks for Broken {
            async fn before_generate(
                &self,
                _messages: &[Message],
                _iteration: usize,
            ) -> AnyhowResult<()> {
                Err(anyhow::anyhow!("hook exploded"))
            }
        }

        let agent = Agent::builder()
            .name("test")
            .system_prompt("You are helpful.")
            .provider(Arc::new(MockProvider::new(vec![CompletionResponse::text(
                "fine",
            )])))
            .hook(Arc::new(Broken))
            .build()
            .unwrap();

        let result = agent.run("hi", RunOptions::default()).await?;
        assert_eq!(result.response, "fine");
        Ok(())
    }

    #[test]
    fn test_builder_requires_fields() {
        let missing_prompt = Agent::builder()
            .name("x")
            .provider(Arc::new(MockProvider::new(vec![])))
            .build();
        assert!(matches!(
            missing_prompt.unwrap_err(),
            OrchestratorError::MissingRequired(field) if field == "system_prompt"
        ));

        let missing_provider = Agent::builder()
            .name("x")
            .system_prompt("p")
            .build();
        assert!(matches!(
            missing_provider.unwrap_err(),
            OrchestratorError::MissingRequired(field) if field == "provider"
        ));
    }

    #[test]
    fn test_builder_rejects_duplicate_tool_names() {
        let result = Agent::builder()
            .name("x")
            .system_prompt("p")
            .provider(Arc::new(MockProvider::new(vec![])))
            .tool(weather_tool())
            .tool(weather_tool())
            .build();
        assert!(matches!(
            result.unwrap_err(),
            OrchestratorError::DuplicateId(_)
        ));
    }
}
