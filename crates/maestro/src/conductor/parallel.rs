//! Concurrent fan-out over a selected agent subset, bounded by a
//! concurrency cap, with a merger fusing the id-keyed results.

use std::collections::HashMap;

use futures::stream::{self, StreamExt};

use crate::conductor::{
    AgentRunRecord, ErrorMode, Merger, OrchestrationRun, ParallelConfig,
};
use crate::ensemble::AgentRole;
use crate::errors::{OrchestratorError, Result};

pub(super) async fn run(cfg: &ParallelConfig, run: &OrchestrationRun) -> Result<String> {
    let selected: Vec<AgentRole> = match &cfg.agent_ids {
        Some(ids) => ids
            .iter()
            .map(|id| run.role(id).cloned())
            .collect::<Result<_>>()?,
        None => run.roles().to_vec(),
    };
    if selected.is_empty() {
        return Err(OrchestratorError::InvalidInput(
            "parallel strategy requires at least one agent".to_string(),
        ));
    }

    let merger = cfg
        .merger
        .as_ref()
        .ok_or_else(|| OrchestratorError::MissingRequired("merger".to_string()))?;

    let concurrency = cfg.concurrency.unwrap_or(selected.len()).max(1);
    let error_mode = run.error_mode();

    // Keep at most `concurrency` agent calls in flight; completion order
    // is non-deterministic but results are keyed by agent id.
    let mut in_flight = stream::iter(selected.clone().into_iter().map(|role| {
        let run = run.clone();
        let input = run.input().to_string();
        async move {
            let outcome = run.run_step(&role, &input).await;
            (role.id.clone(), outcome)
        }
    }))
    .buffer_unordered(concurrency);

    let mut first_error: Option<OrchestratorError> = None;
    let mut succeeded = 0usize;

    while let Some((agent_id, outcome)) = in_flight.next().await {
        match outcome {
            Ok(_) => succeeded += 1,
            Err(OrchestratorError::Cancelled) => return Err(OrchestratorError::Cancelled),
            Err(error) => {
                tracing::debug!(agent = %agent_id, error = %error, "parallel agent failed");
                if error_mode == ErrorMode::Continue {
                    first_error.get_or_insert(error);
                } else {
                    return Err(error);
                }
            }
        }
    }

    // If every agent failed the first error propagates regardless of mode
    if succeeded == 0 {
        return Err(first_error
            .unwrap_or_else(|| OrchestratorError::Internal("no agents selected".to_string())));
    }

    merge(merger, &selected, run).await
}

async fn merge(
    merger: &Merger,
    selected: &[AgentRole],
    run: &OrchestrationRun,
) -> Result<String> {
    // Successful outcomes in registration order: the merged output is a
    // function of the result set, never of arrival order.
    let ordered: Vec<AgentRunRecord> = selected
        .iter()
        .filter_map(|role| run.record_for(&role.id))
        .collect();

    match merger {
        Merger::Concatenate { separator } => Ok(labeled_concat(&ordered, separator)),
        Merger::Summarize { summarizer_id } => {
            let summarizer = run.role(summarizer_id)?.clone();
            let summary_input = labeled_concat(&ordered, crate::conductor::DEFAULT_CONCAT_SEPARATOR);
            let result = run.run_step(&summarizer, &summary_input).await?;
            Ok(result.response)
        }
        Merger::SelectBest { selector } => {
            let index = selector(&ordered);
            ordered
                .get(index)
                .map(|record| record.response.clone())
                .ok_or_else(|| {
                    OrchestratorError::Internal(format!(
                        "select-best index {index} out of range for {} results",
                        ordered.len()
                    ))
                })
        }
        Merger::Custom { merge } => {
            let by_id: HashMap<String, AgentRunRecord> = ordered
                .into_iter()
                .map(|record| (record.agent_id.clone(), record))
                .collect();
            Ok(merge(&by_id))
        }
    }
}

fn labeled_concat(records: &[AgentRunRecord], separator: &str) -> String {
    records
        .iter()
        .map(|record| {
            let label = record.role.as_deref().unwrap_or(&record.agent_id);
            format!("[{label}]\n{}", record.response)
        })
        .collect::<Vec<_>>()
        .join(separator)
}
