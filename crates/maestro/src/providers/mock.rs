use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::providers::base::{CompletionRequest, CompletionResponse, Provider};

type ResponseFn = dyn Fn(&CompletionRequest) -> Result<CompletionResponse> + Send + Sync;

enum MockBehavior {
    /// Pre-configured responses returned in order
    Script(Mutex<Vec<CompletionResponse>>),
    /// Compute each response from the incoming request
    Handler(Box<ResponseFn>),
}

/// A mock backend for testing: either a FIFO script of canned responses,
/// or a closure that derives the response from the request (useful when a
/// reply must echo the input).
pub struct MockProvider {
    behavior: MockBehavior,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses.
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self {
            behavior: MockBehavior::Script(Mutex::new(responses)),
        }
    }

    /// Create a mock provider whose responses are computed per request.
    pub fn from_fn<F>(handler: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<CompletionResponse> + Send + Sync + 'static,
    {
        Self {
            behavior: MockBehavior::Handler(Box::new(handler)),
        }
    }

    /// A provider that always fails with the given message.
    pub fn failing<S: Into<String>>(message: S) -> Self {
        let message = message.into();
        Self::from_fn(move |_| Err(anyhow!(message.clone())))
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        match &self.behavior {
            MockBehavior::Script(responses) => {
                let mut responses = responses.lock().unwrap();
                if responses.is_empty() {
                    // Return empty response if no more pre-configured responses
                    Ok(CompletionResponse::text(""))
                } else {
                    Ok(responses.remove(0))
                }
            }
            MockBehavior::Handler(handler) => handler(&request),
        }
    }
}
