//! A named collection of agent roles with a default conductor.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::agent::Agent;
use crate::conductor::{base::OrchestrationRun, AgentRunRecord, Conductor};
use crate::context::SharedContext;
use crate::errors::{OrchestratorError, Result};
use crate::hooks::OrchestrationHooks;
use crate::models::Usage;
use crate::trace::ExecutionTrace;

/// An agent's binding inside an ensemble: id, agent, and optional
/// human-readable role, priority and tags. Registered at build, never
/// mutated afterwards.
#[derive(Clone)]
pub struct AgentRole {
    pub id: String,
    pub agent: Arc<Agent>,
    pub role: Option<String>,
    pub priority: Option<i32>,
    pub tags: Vec<String>,
}

impl AgentRole {
    pub fn new<S: Into<String>>(id: S, agent: Arc<Agent>) -> Self {
        Self {
            id: id.into(),
            agent,
            role: None,
            priority: None,
            tags: Vec::new(),
        }
    }

    pub fn with_role<S: Into<String>>(mut self, role: S) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

impl std::fmt::Debug for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRole")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// Options for one ensemble run.
#[derive(Default, Clone)]
pub struct EnsembleRunOptions {
    /// Overrides the ensemble's default conductor
    pub conductor: Option<Conductor>,
    pub cancel: Option<CancellationToken>,
    /// Adopt an existing context instead of creating a fresh one
    pub context: Option<SharedContext>,
    /// Adopt a trace handle; lets the caller observe partial step data
    /// even when the run fails
    pub trace: Option<ExecutionTrace>,
}

/// The outcome of one ensemble run.
#[derive(Debug, Clone)]
pub struct EnsembleResult {
    /// The conductor's final response
    pub response: String,
    /// Per-agent outcomes, keyed by agent id
    pub agent_results: HashMap<String, AgentRunRecord>,
    /// Element-wise sum of all agent usage
    pub usage: Usage,
    pub trace: ExecutionTrace,
    pub context: SharedContext,
}

/// A named set of agent roles plus a default conductor.
pub struct Ensemble {
    name: String,
    roles: Vec<AgentRole>,
    default_conductor: Option<Conductor>,
    hooks: Vec<Arc<dyn OrchestrationHooks>>,
}

impl std::fmt::Debug for Ensemble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ensemble")
            .field("name", &self.name)
            .field("roles", &self.roles.iter().map(|r| &r.id).collect::<Vec<_>>())
            .field("default_conductor_set", &self.default_conductor.is_some())
            .field("hooks_count", &self.hooks.len())
            .finish()
    }
}

impl Ensemble {
    pub fn builder() -> EnsembleBuilder {
        EnsembleBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn roles(&self) -> &[AgentRole] {
        &self.roles
    }

    pub fn role(&self, agent_id: &str) -> Option<&AgentRole> {
        self.roles.iter().find(|r| r.id == agent_id)
    }

    /// Run the ensemble against one input under the selected conductor.
    ///
    /// The context receives the run inputs under `ensemble:input` and
    /// `ensemble:name`; the trace is closed on every exit path, so
    /// completed and in-flight-but-failed steps stay observable.
    pub async fn run(&self, input: &str, options: EnsembleRunOptions) -> Result<EnsembleResult> {
        let conductor = options
            .conductor
            .as_ref()
            .or(self.default_conductor.as_ref())
            .ok_or_else(|| OrchestratorError::MissingRequired("conductor".to_string()))?;

        let context = options.context.unwrap_or_default();
        context.set("ensemble:input", json!(input));
        context.set("ensemble:name", json!(self.name));

        let trace = options.trace.unwrap_or_default();
        let mut hooks = self.hooks.clone();
        hooks.extend(conductor.hooks().iter().cloned());

        let run = OrchestrationRun::new(
            self.name.clone(),
            input.to_string(),
            self.roles.clone(),
            context.clone(),
            trace.clone(),
            options.cancel.clone(),
            hooks,
            conductor.error_mode(),
            conductor.retry_count(),
            conductor.agent_timeout(),
            conductor.max_rounds(),
        );

        debug!(ensemble = %self.name, strategy = conductor.strategy_name(), "ensemble run started");
        let outcome = conductor.orchestrate(&run).await;
        trace.finish();

        match outcome {
            Ok(response) => Ok(EnsembleResult {
                response,
                agent_results: run.records(),
                usage: run.total_usage(),
                trace,
                context,
            }),
            Err(error) => {
                debug!(ensemble = %self.name, error = %error, "ensemble run failed");
                Err(error)
            }
        }
    }
}

/// Builds an [`Ensemble`]: a unique name, at least one agent role, an
/// optional default conductor, and ensemble-level hooks.
#[derive(Default)]
pub struct EnsembleBuilder {
    name: Option<String>,
    roles: Vec<AgentRole>,
    default_conductor: Option<Conductor>,
    hooks: Vec<Arc<dyn OrchestrationHooks>>,
}

impl EnsembleBuilder {
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Register an agent under its own name as the role id.
    pub fn agent(mut self, agent: Arc<Agent>) -> Self {
        self.roles.push(AgentRole::new(agent.name().to_string(), agent));
        self
    }

    pub fn role(mut self, role: AgentRole) -> Self {
        self.roles.push(role);
        self
    }

    pub fn default_conductor(mut self, conductor: Conductor) -> Self {
        self.default_conductor = Some(conductor);
        self
    }

    pub fn hook(mut self, hook: Arc<dyn OrchestrationHooks>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn build(self) -> Result<Ensemble> {
        let name = self
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| OrchestratorError::MissingRequired("name".to_string()))?;
        if self.roles.is_empty() {
            return Err(OrchestratorError::MissingRequired(
                "at least one agent".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for role in &self.roles {
            if !seen.insert(role.id.as_str()) {
                return Err(OrchestratorError::DuplicateId(role.id.clone()));
            }
        }

        Ok(Ensemble {
            name,
            roles: self.roles,
            default_conductor: self.default_conductor,
            hooks: self.hooks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockProvider;

    fn test_agent(name: &str) -> Arc<Agent> {
        Arc::new(
            Agent::builder()
                .name(name)
                .system_prompt("test")
                .provider(Arc::new(MockProvider::new(vec![])))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_builder_rejects_duplicate_ids() {
        let result = Ensemble::builder()
            .name("team")
            .agent(test_agent("a"))
            .agent(test_agent("a"))
            .build();
        assert!(matches!(
            result.unwrap_err(),
            OrchestratorError::DuplicateId(id) if id == "a"
        ));
    }

    #[test]
    fn test_builder_requires_name_and_agents() {
        let unnamed = Ensemble::builder().agent(test_agent("a")).build();
        assert!(matches!(
            unnamed.unwrap_err(),
            OrchestratorError::MissingRequired(_)
        ));

        let empty = Ensemble::builder().name("team").build();
        assert!(matches!(
            empty.unwrap_err(),
            OrchestratorError::MissingRequired(_)
        ));
    }

    #[tokio::test]
    async fn test_run_requires_a_conductor() {
        let ensemble = Ensemble::builder()
            .name("team")
            .agent(test_agent("a"))
            .build()
            .unwrap();
        let error = ensemble
            .run("hi", EnsembleRunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            OrchestratorError::MissingRequired(field) if field == "conductor"
        ));
    }

    #[test]
    fn test_role_lookup() {
        let ensemble = Ensemble::builder()
            .name("team")
            .role(AgentRole::new("writer", test_agent("writer")).with_role("prose"))
            .build()
            .unwrap();
        assert_eq!(ensemble.role("writer").unwrap().role.as_deref(), Some("prose"));
        assert!(ensemble.role("ghost").is_none());
    }
}
