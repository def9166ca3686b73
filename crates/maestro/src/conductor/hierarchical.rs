//! Manager/worker delegation: the manager agent is re-built for the run
//! with a synthesized `delegate_task` tool and drives the workers itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use crate::conductor::{HierarchicalConfig, OrchestrationRun, DEFAULT_MAX_DELEGATIONS};
use crate::ensemble::AgentRole;
use crate::errors::{OrchestratorError, Result, ToolError};
use crate::models::Tool;
use crate::prompts;

pub(super) async fn run(cfg: &HierarchicalConfig, run: &OrchestrationRun) -> Result<String> {
    let manager_id = cfg
        .manager_id
        .as_deref()
        .ok_or_else(|| OrchestratorError::MissingRequired("manager_id".to_string()))?;
    let manager = run.role(manager_id)?.clone();

    let workers: Vec<AgentRole> = match &cfg.worker_ids {
        Some(ids) => ids
            .iter()
            .map(|id| run.role(id).cloned())
            .collect::<Result<_>>()?,
        None => run
            .roles()
            .iter()
            .filter(|role| role.id != manager.id)
            .cloned()
            .collect(),
    };

    let directory = worker_directory(&workers);
    let delegate_tool = build_delegate_tool(
        run.clone(),
        &workers,
        cfg.max_delegations.unwrap_or(DEFAULT_MAX_DELEGATIONS),
        &directory,
    );

    // The registered manager is never mutated: a derived agent carries
    // the injected tool for the duration of this run only.
    let enhanced = AgentRole {
        agent: Arc::new(manager.agent.with_extra_tools(vec![delegate_tool])),
        ..manager
    };

    let prompt = prompts::render(
        prompts::HIERARCHICAL_MANAGER,
        &[("workers", directory.as_str()), ("input", run.input())],
    );
    let result = run.run_step(&enhanced, &prompt).await?;
    Ok(result.response)
}

fn build_delegate_tool(
    run: OrchestrationRun,
    workers: &[AgentRole],
    max_delegations: usize,
    directory: &str,
) -> Tool {
    let workers: Arc<HashMap<String, AgentRole>> = Arc::new(
        workers
            .iter()
            .map(|role| (role.id.clone(), role.clone()))
            .collect(),
    );
    let delegations = Arc::new(AtomicUsize::new(0));
    let description = prompts::render(
        prompts::DELEGATE_TOOL_DESCRIPTION,
        &[("workers", directory)],
    );

    Tool::new(
        "delegate_task",
        description,
        json!({
            "type": "object",
            "properties": {
                "worker_id": {
                    "type": "string",
                    "description": "Id of the worker to delegate to"
                },
                "task": {
                    "type": "string",
                    "description": "The task for the worker"
                }
            },
            "required": ["worker_id", "task"],
            "additionalProperties": false
        }),
        move |args| {
            let run = run.clone();
            let workers = workers.clone();
            let delegations = delegations.clone();
            async move {
                let used = delegations.fetch_add(1, Ordering::SeqCst) + 1;
                if used > max_delegations {
                    return Err(ToolError::ExecutionError(format!(
                        "maximum delegations ({max_delegations}) exceeded"
                    )));
                }

                let worker_id = args["worker_id"].as_str().unwrap_or_default();
                let task = args["task"].as_str().unwrap_or_default();
                let Some(worker) = workers.get(worker_id) else {
                    return Ok(json!({
                        "success": false,
                        "error": format!("Unknown worker '{worker_id}'"),
                    }));
                };

                match run.run_step(worker, task).await {
                    Ok(result) => Ok(json!({
                        "success": true,
                        "worker": worker_id,
                        "response": result.response,
                    })),
                    Err(error) => Err(ToolError::ExecutionError(error.to_string())),
                }
            }
        },
    )
}

/// One line per worker: id, role, and capabilities. Shapes what the
/// manager sees; dispatch itself is unconstrained, the model chooses.
fn worker_directory(workers: &[AgentRole]) -> String {
    if workers.is_empty() {
        return "(no workers available)".to_string();
    }
    workers
        .iter()
        .map(|role| {
            let mut line = format!("- {}", role.id);
            if let Some(label) = &role.role {
                line.push_str(&format!(" ({label})"));
            }
            if let Some(description) = role.agent.description() {
                line.push_str(&format!(": {description}"));
            }
            if !role.tags.is_empty() {
                line.push_str(&format!(" [capabilities: {}]", role.tags.join(", ")));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}
