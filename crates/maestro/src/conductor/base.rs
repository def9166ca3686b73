//! Shared execution substrate for every conductor strategy: step
//! execution with trace binding, context appends, hook dispatch, the
//! retry/error policy, and usage aggregation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::agent::{AgentResult, RunOptions};
use crate::context::SharedContext;
use crate::ensemble::AgentRole;
use crate::errors::{OrchestratorError, Result};
use crate::hooks::{note_hook_failure, OrchestrationHooks};
use crate::models::{Message, Usage};
use crate::trace::ExecutionTrace;

/// How a conductor reacts to a failing agent step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorMode {
    /// First error aborts the run and propagates
    #[default]
    FailFast,
    /// Errors are recorded in the trace; other agents proceed
    Continue,
    /// Retry the failing step before behaving as fail-fast
    Retry,
}

/// One agent's recorded outcome within an ensemble run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunRecord {
    pub agent_id: String,
    pub role: Option<String>,
    pub response: String,
    pub iterations: usize,
    pub usage: Usage,
}

struct RunInner {
    ensemble_name: String,
    input: String,
    roles: Vec<AgentRole>,
    context: SharedContext,
    trace: ExecutionTrace,
    cancel: Option<CancellationToken>,
    hooks: Vec<Arc<dyn OrchestrationHooks>>,
    records: Mutex<HashMap<String, AgentRunRecord>>,
    error_mode: ErrorMode,
    retry_count: usize,
    agent_timeout: Option<Duration>,
    max_rounds: usize,
}

/// A live ensemble run: the roles, shared context, trace, cancel signal
/// and error policy threaded through a conductor. Cloning is cheap and
/// aliases the same run (tool closures and parallel tasks rely on this).
#[derive(Clone)]
pub struct OrchestrationRun {
    inner: Arc<RunInner>,
}

#[allow(clippy::too_many_arguments)]
impl OrchestrationRun {
    pub(crate) fn new(
        ensemble_name: String,
        input: String,
        roles: Vec<AgentRole>,
        context: SharedContext,
        trace: ExecutionTrace,
        cancel: Option<CancellationToken>,
        hooks: Vec<Arc<dyn OrchestrationHooks>>,
        error_mode: ErrorMode,
        retry_count: usize,
        agent_timeout: Option<Duration>,
        max_rounds: usize,
    ) -> Self {
        Self {
            inner: Arc::new(RunInner {
                ensemble_name,
                input,
                roles,
                context,
                trace,
                cancel,
                hooks,
                records: Mutex::new(HashMap::new()),
                error_mode,
                retry_count,
                agent_timeout,
                max_rounds,
            }),
        }
    }

    pub fn ensemble_name(&self) -> &str {
        &self.inner.ensemble_name
    }

    /// The original user input to the ensemble.
    pub fn input(&self) -> &str {
        &self.inner.input
    }

    pub fn roles(&self) -> &[AgentRole] {
        &self.inner.roles
    }

    /// Look up a role, failing with `NotFound` when absent.
    pub fn role(&self, agent_id: &str) -> Result<&AgentRole> {
        self.inner
            .roles
            .iter()
            .find(|r| r.id == agent_id)
            .ok_or_else(|| OrchestratorError::NotFound(agent_id.to_string()))
    }

    pub fn context(&self) -> &SharedContext {
        &self.inner.context
    }

    pub fn trace(&self) -> &ExecutionTrace {
        &self.inner.trace
    }

    pub fn error_mode(&self) -> ErrorMode {
        self.inner.error_mode
    }

    pub fn max_rounds(&self) -> usize {
        self.inner.max_rounds
    }

    /// Raise `Cancelled` if the signal has tripped. Called at every
    /// natural suspension point.
    pub fn check_cancel(&self) -> Result<()> {
        if self
            .inner
            .cancel
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
        {
            return Err(OrchestratorError::Cancelled);
        }
        Ok(())
    }

    /// Execute one agent step: trace start/end, lifecycle hooks, the
    /// agent-level timeout, and the shared-context append on success.
    pub async fn run_agent(&self, role: &AgentRole, input: &str) -> Result<AgentResult> {
        self.check_cancel()?;
        let step = self.inner.trace.start_step(&role.id, input);
        debug!(agent = %role.id, step, "agent step started");

        for hook in &self.inner.hooks {
            if let Err(err) = hook.before_agent(&role.id, input).await {
                note_hook_failure(Some((&self.inner.trace, step)), "before_agent", &err);
            }
        }

        let options = RunOptions {
            cancel: self.inner.cancel.clone(),
        };
        let future = role.agent.run(input, options);
        let outcome = match self.inner.agent_timeout {
            Some(limit) => match tokio::time::timeout(limit, future).await {
                Ok(result) => result,
                Err(_) => Err(OrchestratorError::Timeout(limit)),
            },
            None => future.await,
        };

        match outcome {
            Ok(result) => {
                self.inner.trace.complete_step(step, &result.response);
                self.inner
                    .context
                    .append_agent_message(&role.id, Message::assistant(&result.response));
                self.inner
                    .context
                    .append_history(Message::assistant(&result.response));

                for hook in &self.inner.hooks {
                    if let Err(err) = hook.after_agent(&role.id, &result.response).await {
                        note_hook_failure(Some((&self.inner.trace, step)), "after_agent", &err);
                    }
                }

                self.record(role, &result);
                Ok(result)
            }
            Err(error) => {
                self.inner.trace.fail_step(step, error.to_string());
                for hook in &self.inner.hooks {
                    if let Err(err) = hook.agent_error(&role.id, &error).await {
                        note_hook_failure(Some((&self.inner.trace, step)), "agent_error", &err);
                    }
                }
                Err(error)
            }
        }
    }

    /// [`Self::run_agent`] with the retry policy applied: under
    /// `ErrorMode::Retry` the step is retried up to the configured count
    /// before the error propagates. Cancellation is never retried.
    pub async fn run_step(&self, role: &AgentRole, input: &str) -> Result<AgentResult> {
        if self.inner.error_mode != ErrorMode::Retry {
            return self.run_agent(role, input).await;
        }

        let mut attempt = 0;
        loop {
            match self.run_agent(role, input).await {
                Ok(result) => return Ok(result),
                Err(OrchestratorError::Cancelled) => return Err(OrchestratorError::Cancelled),
                Err(error) if attempt < self.inner.retry_count => {
                    attempt += 1;
                    debug!(agent = %role.id, attempt, error = %error, "retrying failed step");
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn record(&self, role: &AgentRole, result: &AgentResult) {
        let mut records = self.inner.records.lock().unwrap();
        records.insert(
            role.id.clone(),
            AgentRunRecord {
                agent_id: role.id.clone(),
                role: role.role.clone(),
                response: result.response.clone(),
                iterations: result.iterations,
                usage: result.usage,
            },
        );
    }

    /// All recorded agent outcomes, keyed by agent id.
    pub fn records(&self) -> HashMap<String, AgentRunRecord> {
        self.inner.records.lock().unwrap().clone()
    }

    pub fn record_for(&self, agent_id: &str) -> Option<AgentRunRecord> {
        self.inner.records.lock().unwrap().get(agent_id).cloned()
    }

    /// Element-wise sum of usage across all recorded agent results.
    pub fn total_usage(&self) -> Usage {
        let records = self.inner.records.lock().unwrap();
        let mut total = Usage::default();
        for record in records.values() {
            total.add(&record.usage);
        }
        total
    }

    /// Fire the `debate_round` hook on every registered observer.
    pub(crate) async fn notify_debate_round(
        &self,
        round: usize,
        statements: &HashMap<String, String>,
    ) {
        for hook in &self.inner.hooks {
            if let Err(err) = hook.debate_round(round, statements).await {
                note_hook_failure(None, "debate_round", &err);
            }
        }
    }

    /// Fire the `vote` hook on every registered observer.
    pub(crate) async fn notify_vote(&self, agent_id: &str, choices: &[usize], raw: &str) {
        for hook in &self.inner.hooks {
            if let Err(err) = hook.vote(agent_id, choices, raw).await {
                note_hook_failure(None, "vote", &err);
            }
        }
    }
}
