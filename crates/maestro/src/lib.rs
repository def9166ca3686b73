//! Multi-agent orchestration runtime for LLM-driven workers.
//!
//! The crate drives a single LLM through a bounded tool-calling loop
//! ([`agent::Agent`]) and composes several such agents under
//! orchestration policies ([`conductor::Conductor`]): sequential
//! pipelines, bounded parallel fan-out with result mergers,
//! manager/worker delegation, adversarial debate, democratic voting, and
//! a custom escape hatch. Runs share a scratchpad
//! ([`context::SharedContext`]) and produce a uniform observability
//! record ([`trace::ExecutionTrace`]). Direct agent-to-agent transfer is
//! a tool ([`handoff`]).
//!
//! LLM vendors plug in behind the [`providers::Provider`] trait; the
//! engine performs no vendor I/O itself.

pub mod agent;
pub mod conductor;
pub mod context;
pub mod ensemble;
pub mod errors;
pub mod handoff;
pub mod hooks;
pub mod models;
pub mod prompts;
pub mod providers;
pub mod sanitize;
pub mod schema;
pub mod trace;

pub use agent::{Agent, AgentBuilder, AgentResult, RunOptions};
pub use conductor::{
    AgentRunRecord, AgreementDetector, Conductor, ConductorBuilder, Consensus, CustomConfig,
    DebateConfig, ErrorMode, HierarchicalConfig, MergeFn, Merger, OrchestrateFn,
    OrchestrationRun, ParallelConfig, SelectorFn, SequentialConfig, Strategy, TransformFn,
    VoteMethod, VotingConfig,
};
pub use context::{ContextSnapshot, SharedContext};
pub use ensemble::{AgentRole, Ensemble, EnsembleBuilder, EnsembleResult, EnsembleRunOptions};
pub use errors::{OrchestratorError, Result, ToolError, ToolResult};
pub use handoff::{
    handoff_tool, AdvancedHandoffHandler, ChainLink, ChainResult, HandoffChain, HandoffHandler,
    HandoffRequest, HandoffResponse, SimpleHandoffHandler,
};
pub use hooks::{AgentHooks, OrchestrationHooks};
pub use models::{Message, Tool, ToolCall, ToolSpec, Usage};
pub use providers::{CompletionRequest, CompletionResponse, FinishReason, MockProvider, Provider};
pub use trace::{ExecutionTrace, TraceStep};
