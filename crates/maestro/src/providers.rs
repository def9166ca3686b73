//! The abstract LLM backend consumed by the agent loop.
//!
//! Vendor adapters implement [`base::Provider`], rendering the messages
//! and tool specs into their wire format and translating vendor stop
//! reasons into [`base::FinishReason`]. The engine performs no vendor I/O
//! itself; all state lives in the request/response pair.
pub mod base;
pub mod mock;

pub use base::{CompletionRequest, CompletionResponse, FinishReason, Provider};
pub use mock::MockProvider;
