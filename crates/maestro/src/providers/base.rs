use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{Message, ToolSpec, Usage};

/// Why the backend stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of the assistant turn
    Stop,
    /// The assistant requested one or more tool calls
    ToolCalls,
    /// The token limit was hit mid-response
    Length,
    /// The vendor reported a generation error
    Error,
}

/// One generation request. Carries everything the backend needs; no state
/// is retained between calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Option<Vec<String>>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            model: None,
            temperature: None,
            max_tokens: None,
            stop: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

/// The backend's answer: one assistant message (text and/or tool calls),
/// optional usage accounting, and a finish classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub message: Message,
    pub usage: Option<Usage>,
    pub finish_reason: FinishReason,
}

impl CompletionResponse {
    /// A plain text response that finished naturally.
    pub fn text<S: Into<String>>(content: S) -> Self {
        Self {
            message: Message::assistant(content),
            usage: None,
            finish_reason: FinishReason::Stop,
        }
    }

    /// A response requesting the given tool calls.
    pub fn tool_calls(calls: Vec<crate::models::ToolCall>) -> Self {
        Self {
            message: Message::assistant_with_tool_calls(None, calls),
            usage: None,
            finish_reason: FinishReason::ToolCalls,
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Base trait for AI backends (OpenAI, Anthropic, etc).
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate the next assistant message for the given conversation.
    ///
    /// Implementations translate vendor-specific stop reasons into
    /// [`FinishReason`] and may fill in [`Usage`] when the vendor reports
    /// token counts. No ordering is guaranteed across concurrent requests.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_finish_reason_serialization() -> Result<()> {
        assert_eq!(serde_json::to_string(&FinishReason::ToolCalls)?, "\"tool_calls\"");
        assert_eq!(serde_json::to_string(&FinishReason::Stop)?, "\"stop\"");
        Ok(())
    }

    #[test]
    fn test_response_builders() {
        let response = CompletionResponse::text("Hello!").with_usage(Usage::new(10, 5, 15));
        assert_eq!(response.message.text(), Some("Hello!"));
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(response.usage.unwrap().total_tokens, 15);
    }
}
