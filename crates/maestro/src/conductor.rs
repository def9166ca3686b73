//! Orchestration policies composing multiple agents against one input.
//!
//! A [`Conductor`] is a sealed strategy variant plus the shared policy
//! fields (round bound, timeout, error mode, hooks). Strategy-specific
//! configuration lives in the per-strategy config types; the concrete
//! behavior is dispatched by tag in [`Conductor::orchestrate`].

pub mod base;
mod debate;
mod hierarchical;
mod parallel;
mod sequential;
mod voting;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::ensemble::AgentRole;
use crate::errors::{OrchestratorError, Result};
use crate::hooks::OrchestrationHooks;

pub use base::{AgentRunRecord, ErrorMode, OrchestrationRun};
pub use debate::default_agreement_detector;

pub const DEFAULT_MAX_ROUNDS: usize = 10;
pub const DEFAULT_RETRY_COUNT: usize = 3;
pub const DEFAULT_MAX_DELEGATIONS: usize = 10;
pub const DEFAULT_CONSENSUS_THRESHOLD: f64 = 0.8;
pub const DEFAULT_QUORUM: f64 = 0.5;
pub const DEFAULT_CONCAT_SEPARATOR: &str = "\n\n---\n\n";

/// Rewrites one step's output into the next step's input (sequential).
pub type TransformFn = Arc<dyn Fn(&str, &AgentRole) -> String + Send + Sync>;
/// Chooses the index of the winning result (parallel select-best).
pub type SelectorFn = Arc<dyn Fn(&[AgentRunRecord]) -> usize + Send + Sync>;
/// Fuses the id-keyed result mapping into one response (parallel custom).
pub type MergeFn = Arc<dyn Fn(&HashMap<String, AgentRunRecord>) -> String + Send + Sync>;
/// Decides whether a statement signals agreement (debate).
pub type AgreementDetector = Arc<dyn Fn(&str) -> bool + Send + Sync>;
/// A caller-supplied orchestration body (custom strategy).
pub type OrchestrateFn =
    Arc<dyn Fn(OrchestrationRun) -> BoxFuture<'static, Result<String>> + Send + Sync>;

#[derive(Default, Clone)]
pub struct SequentialConfig {
    /// Agent ids in pipe order; registration order when absent
    pub order: Option<Vec<String>>,
    /// Applied between every pair of steps, not before the first
    pub transform: Option<TransformFn>,
}

impl SequentialConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order = Some(order.into_iter().map(Into::into).collect());
        self
    }

    pub fn transform(mut self, transform: TransformFn) -> Self {
        self.transform = Some(transform);
        self
    }
}

/// How the parallel strategy fuses per-agent results into one response.
#[derive(Clone)]
pub enum Merger {
    /// Join responses, each prefixed by its role label
    Concatenate { separator: String },
    /// Feed a labeled concatenation to a designated summarizer agent
    Summarize { summarizer_id: String },
    /// Caller-provided selector over the results vector
    SelectBest { selector: SelectorFn },
    /// Caller-provided merge over the id-keyed results mapping
    Custom { merge: MergeFn },
}

impl Merger {
    pub fn concatenate() -> Self {
        Merger::Concatenate {
            separator: DEFAULT_CONCAT_SEPARATOR.to_string(),
        }
    }

    pub fn concatenate_with<S: Into<String>>(separator: S) -> Self {
        Merger::Concatenate {
            separator: separator.into(),
        }
    }

    pub fn summarize<S: Into<String>>(summarizer_id: S) -> Self {
        Merger::Summarize {
            summarizer_id: summarizer_id.into(),
        }
    }

    pub fn select_best(selector: SelectorFn) -> Self {
        Merger::SelectBest { selector }
    }

    pub fn custom(merge: MergeFn) -> Self {
        Merger::Custom { merge }
    }
}

#[derive(Default, Clone)]
pub struct ParallelConfig {
    /// Subset of agent ids to fan out to; everyone when absent
    pub agent_ids: Option<Vec<String>>,
    /// Max agent calls in flight; number of selected agents when absent
    pub concurrency: Option<usize>,
    pub merger: Option<Merger>,
}

impl ParallelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agents<I, S>(mut self, agent_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.agent_ids = Some(agent_ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency.max(1));
        self
    }

    pub fn merger(mut self, merger: Merger) -> Self {
        self.merger = Some(merger);
        self
    }
}

#[derive(Default, Clone)]
pub struct HierarchicalConfig {
    pub manager_id: Option<String>,
    /// Worker ids; everyone but the manager when absent
    pub worker_ids: Option<Vec<String>>,
    pub max_delegations: Option<usize>,
}

impl HierarchicalConfig {
    pub fn new<S: Into<String>>(manager_id: S) -> Self {
        Self {
            manager_id: Some(manager_id.into()),
            worker_ids: None,
            max_delegations: None,
        }
    }

    pub fn workers<I, S>(mut self, worker_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.worker_ids = Some(worker_ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn max_delegations(mut self, max_delegations: usize) -> Self {
        self.max_delegations = Some(max_delegations);
        self
    }
}

/// How a debate converges on a final response.
#[derive(Clone)]
pub enum Consensus {
    /// A designated judge reads initial and final statements and decides
    Judge { judge_id: String },
    /// Early-exit when enough statements signal agreement; final response
    /// is a labeled concatenation
    Agreement {
        threshold: f64,
        detector: AgreementDetector,
    },
    /// Debaters vote for each other's positions by id mention
    Voting,
}

impl Consensus {
    pub fn judge<S: Into<String>>(judge_id: S) -> Self {
        Consensus::Judge {
            judge_id: judge_id.into(),
        }
    }

    /// The default agreement heuristic: an English keyword substring
    /// match (see [`default_agreement_detector`]). Locale-specific;
    /// supply your own detector for non-English debates.
    pub fn agreement() -> Self {
        Consensus::Agreement {
            threshold: DEFAULT_CONSENSUS_THRESHOLD,
            detector: default_agreement_detector(),
        }
    }

    pub fn agreement_with(threshold: f64, detector: AgreementDetector) -> Self {
        Consensus::Agreement {
            threshold,
            detector,
        }
    }

    pub fn voting() -> Self {
        Consensus::Voting
    }
}

#[derive(Clone)]
pub struct DebateConfig {
    /// Debater ids; everyone when absent. At least two are required.
    pub debater_ids: Option<Vec<String>>,
    pub consensus: Consensus,
}

impl DebateConfig {
    pub fn new(consensus: Consensus) -> Self {
        Self {
            debater_ids: None,
            consensus,
        }
    }

    pub fn debaters<I, S>(mut self, debater_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.debater_ids = Some(debater_ids.into_iter().map(Into::into).collect());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteMethod {
    Majority,
    Unanimous,
    Weighted,
    /// Instant-runoff: eliminate the lowest first-choice option until one
    /// exceeds half
    Ranked,
}

#[derive(Clone)]
pub struct VotingConfig {
    /// Voter ids; everyone when absent
    pub voter_ids: Option<Vec<String>>,
    /// Explicit options; generated from voter proposals when absent
    pub options: Option<Vec<String>>,
    pub method: VoteMethod,
    /// Per-voter weights (weighted tally; default weight 1 when missing)
    pub weights: HashMap<String, f64>,
    pub quorum: f64,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            voter_ids: None,
            options: None,
            method: VoteMethod::Majority,
            weights: HashMap::new(),
            quorum: DEFAULT_QUORUM,
        }
    }
}

impl VotingConfig {
    pub fn new(method: VoteMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn voters<I, S>(mut self, voter_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.voter_ids = Some(voter_ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    pub fn weight<S: Into<String>>(mut self, voter_id: S, weight: f64) -> Self {
        self.weights.insert(voter_id.into(), weight);
        self
    }

    pub fn quorum(mut self, quorum: f64) -> Self {
        self.quorum = quorum;
        self
    }
}

#[derive(Clone)]
pub struct CustomConfig {
    pub orchestrate: OrchestrateFn,
}

impl CustomConfig {
    /// A custom strategy must supply its orchestration body up front.
    pub fn new(orchestrate: OrchestrateFn) -> Self {
        Self { orchestrate }
    }
}

/// The sealed strategy variant carried by a conductor.
#[derive(Clone)]
pub enum Strategy {
    Sequential(SequentialConfig),
    Parallel(ParallelConfig),
    Hierarchical(HierarchicalConfig),
    Debate(DebateConfig),
    Voting(VotingConfig),
    Custom(CustomConfig),
}

impl Strategy {
    fn name(&self) -> &'static str {
        match self {
            Strategy::Sequential(_) => "sequential",
            Strategy::Parallel(_) => "parallel",
            Strategy::Hierarchical(_) => "hierarchical",
            Strategy::Debate(_) => "debate",
            Strategy::Voting(_) => "voting",
            Strategy::Custom(_) => "custom",
        }
    }
}

/// An orchestration policy: one strategy plus the shared policy fields.
#[derive(Clone)]
pub struct Conductor {
    strategy: Strategy,
    max_rounds: usize,
    agent_timeout: Option<Duration>,
    error_mode: ErrorMode,
    retry_count: usize,
    hooks: Vec<Arc<dyn OrchestrationHooks>>,
}

impl Conductor {
    pub fn builder(strategy: Strategy) -> ConductorBuilder {
        ConductorBuilder {
            strategy,
            max_rounds: None,
            agent_timeout: None,
            error_mode: None,
            retry_count: None,
            hooks: Vec::new(),
        }
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub(crate) fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    pub(crate) fn agent_timeout(&self) -> Option<Duration> {
        self.agent_timeout
    }

    pub(crate) fn error_mode(&self) -> ErrorMode {
        self.error_mode
    }

    pub(crate) fn retry_count(&self) -> usize {
        self.retry_count
    }

    pub(crate) fn hooks(&self) -> &[Arc<dyn OrchestrationHooks>] {
        &self.hooks
    }

    /// Execute the strategy against a live run and produce the final
    /// response.
    pub(crate) async fn orchestrate(&self, run: &OrchestrationRun) -> Result<String> {
        match &self.strategy {
            Strategy::Sequential(cfg) => sequential::run(cfg, run).await,
            Strategy::Parallel(cfg) => parallel::run(cfg, run).await,
            Strategy::Hierarchical(cfg) => hierarchical::run(cfg, run).await,
            Strategy::Debate(cfg) => debate::run(cfg, run).await,
            Strategy::Voting(cfg) => voting::run(cfg, run).await,
            Strategy::Custom(cfg) => (cfg.orchestrate)(run.clone()).await,
        }
    }
}

impl std::fmt::Debug for Conductor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conductor")
            .field("strategy", &self.strategy.name())
            .field("max_rounds", &self.max_rounds)
            .field("error_mode", &self.error_mode)
            .finish_non_exhaustive()
    }
}

/// Builds a [`Conductor`], validating strategy invariants at build time.
pub struct ConductorBuilder {
    strategy: Strategy,
    max_rounds: Option<usize>,
    agent_timeout: Option<Duration>,
    error_mode: Option<ErrorMode>,
    retry_count: Option<usize>,
    hooks: Vec<Arc<dyn OrchestrationHooks>>,
}

impl ConductorBuilder {
    pub fn max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = Some(max_rounds.max(1));
        self
    }

    pub fn agent_timeout(mut self, agent_timeout: Duration) -> Self {
        self.agent_timeout = Some(agent_timeout);
        self
    }

    pub fn error_mode(mut self, error_mode: ErrorMode) -> Self {
        self.error_mode = Some(error_mode);
        self
    }

    pub fn retry_count(mut self, retry_count: usize) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn hook(mut self, hook: Arc<dyn OrchestrationHooks>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn build(self) -> Result<Conductor> {
        match &self.strategy {
            Strategy::Parallel(cfg) => {
                if cfg.merger.is_none() {
                    return Err(OrchestratorError::MissingRequired("merger".to_string()));
                }
            }
            Strategy::Hierarchical(cfg) => {
                if cfg.manager_id.is_none() {
                    return Err(OrchestratorError::MissingRequired(
                        "manager_id".to_string(),
                    ));
                }
            }
            Strategy::Debate(cfg) => {
                if let Some(ids) = &cfg.debater_ids {
                    if ids.len() < 2 {
                        return Err(OrchestratorError::InvalidInput(
                            "debate requires at least 2 debaters".to_string(),
                        ));
                    }
                }
            }
            Strategy::Voting(cfg) => {
                if let Some(options) = &cfg.options {
                    let distinct = voting::dedupe_options(options);
                    if distinct.len() < 2 {
                        return Err(OrchestratorError::InsufficientOptions(distinct.len()));
                    }
                }
            }
            Strategy::Sequential(_) | Strategy::Custom(_) => {}
        }

        Ok(Conductor {
            strategy: self.strategy,
            max_rounds: self.max_rounds.unwrap_or(DEFAULT_MAX_ROUNDS),
            agent_timeout: self.agent_timeout,
            error_mode: self.error_mode.unwrap_or_default(),
            retry_count: self.retry_count.unwrap_or(DEFAULT_RETRY_COUNT),
            hooks: self.hooks,
        })
    }
}
