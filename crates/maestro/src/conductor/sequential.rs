//! Run agents one after another, piping each step's output into the next
//! step's input.

use crate::conductor::{ErrorMode, OrchestrationRun, SequentialConfig};
use crate::ensemble::AgentRole;
use crate::errors::Result;

pub(super) async fn run(cfg: &SequentialConfig, run: &OrchestrationRun) -> Result<String> {
    let order: Vec<AgentRole> = match &cfg.order {
        Some(ids) => ids
            .iter()
            .map(|id| run.role(id).cloned())
            .collect::<Result<_>>()?,
        None => run.roles().to_vec(),
    };

    let mut current_input = run.input().to_string();
    let mut last_response = String::new();

    for (index, role) in order.iter().enumerate() {
        run.check_cancel()?;
        match run.run_step(role, &current_input).await {
            Ok(result) => {
                last_response = result.response.clone();
                current_input = match (&cfg.transform, order.get(index + 1)) {
                    // The transform applies between steps, never before the first
                    (Some(transform), Some(next_role)) => transform(&result.response, next_role),
                    _ => result.response,
                };
            }
            Err(error) if run.error_mode() == ErrorMode::Continue => {
                // Recorded in the trace by the step executor; the previous
                // output flows on to the next agent unchanged.
                tracing::debug!(agent = %role.id, error = %error, "skipping failed step");
            }
            Err(error) => return Err(error),
        }
    }

    Ok(last_response)
}
