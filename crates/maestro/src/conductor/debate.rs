//! Adversarial debate: initial positions, cross-response rounds, and a
//! judge/agreement/vote consensus to pick the final response.

use std::collections::HashMap;
use std::sync::Arc;

use crate::conductor::{AgreementDetector, Consensus, DebateConfig, ErrorMode, OrchestrationRun};
use crate::ensemble::AgentRole;
use crate::errors::{OrchestratorError, Result};
use crate::prompts;

/// The documented default agreement heuristic: a fixed English keyword
/// set matched as case-insensitive substrings. Locale-specific; swap in
/// your own detector via [`Consensus::agreement_with`].
pub fn default_agreement_detector() -> AgreementDetector {
    const KEYWORDS: [&str; 6] = [
        "i agree",
        "you're right",
        "good point",
        "consensus",
        "we all",
        "common ground",
    ];
    Arc::new(|statement: &str| {
        let lowered = statement.to_lowercase();
        KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
    })
}

pub(super) async fn run(cfg: &DebateConfig, run: &OrchestrationRun) -> Result<String> {
    let debaters: Vec<AgentRole> = match &cfg.debater_ids {
        Some(ids) => ids
            .iter()
            .map(|id| run.role(id).cloned())
            .collect::<Result<_>>()?,
        None => run.roles().to_vec(),
    };
    if debaters.len() < 2 {
        return Err(OrchestratorError::InvalidInput(
            "debate requires at least 2 debaters".to_string(),
        ));
    }

    let topic = run.input();
    let mut latest: HashMap<String, String> = HashMap::new();

    // Initial round: independent position statements
    for debater in &debaters {
        let prompt = prompts::render(prompts::DEBATE_POSITION, &[("topic", topic)]);
        match run.run_step(debater, &prompt).await {
            Ok(result) => {
                latest.insert(debater.id.clone(), result.response);
            }
            Err(error) if run.error_mode() == ErrorMode::Continue => {
                tracing::debug!(agent = %debater.id, error = %error, "debater skipped");
            }
            Err(error) => return Err(error),
        }
    }
    if latest.is_empty() {
        return Err(OrchestratorError::Internal(
            "no debater produced an initial statement".to_string(),
        ));
    }
    let initial = latest.clone();

    for round in 1..=run.max_rounds() {
        run.check_cancel()?;

        for debater in &debaters {
            let others = statements_block(&debaters, &latest, Some(&debater.id));
            let own = latest.get(&debater.id).cloned().unwrap_or_default();
            let prompt = prompts::render(
                prompts::DEBATE_REBUTTAL,
                &[("topic", topic), ("others", &others), ("own", &own)],
            );
            match run.run_step(debater, &prompt).await {
                Ok(result) => {
                    latest.insert(debater.id.clone(), result.response);
                }
                Err(error) if run.error_mode() == ErrorMode::Continue => {
                    tracing::debug!(agent = %debater.id, round, error = %error, "debater skipped");
                }
                Err(error) => return Err(error),
            }
        }
        run.notify_debate_round(round, &latest).await;

        if let Consensus::Agreement {
            threshold,
            detector,
        } = &cfg.consensus
        {
            let agreeing = latest.values().filter(|s| detector(s)).count();
            if (agreeing as f64) >= threshold * latest.len() as f64 {
                tracing::debug!(round, agreeing, "agreement threshold reached");
                break;
            }
        }
    }

    match &cfg.consensus {
        Consensus::Judge { judge_id } => {
            judge_verdict(run, judge_id, topic, &debaters, &initial, &latest).await
        }
        Consensus::Agreement { .. } => Ok(statements_block(&debaters, &latest, None)),
        Consensus::Voting => peer_vote(run, topic, &debaters, &latest).await,
    }
}

async fn judge_verdict(
    run: &OrchestrationRun,
    judge_id: &str,
    topic: &str,
    debaters: &[AgentRole],
    initial: &HashMap<String, String>,
    latest: &HashMap<String, String>,
) -> Result<String> {
    let judge = run.role(judge_id)?.clone();
    let summaries = debaters
        .iter()
        .filter(|d| latest.contains_key(&d.id))
        .map(|d| {
            format!(
                "## {}\nInitial position:\n{}\n\nFinal position:\n{}",
                d.id,
                initial.get(&d.id).map(String::as_str).unwrap_or("(none)"),
                latest.get(&d.id).map(String::as_str).unwrap_or("(none)"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = prompts::render(
        prompts::DEBATE_JUDGE,
        &[("topic", topic), ("summaries", &summaries)],
    );
    let result = run.run_step(&judge, &prompt).await?;
    Ok(result.response)
}

/// Each debater votes for a position other than its own by mentioning
/// the target's id; the most-mentioned id wins. Tie or no usable ballots
/// falls back to the labeled concatenation of final positions.
async fn peer_vote(
    run: &OrchestrationRun,
    topic: &str,
    debaters: &[AgentRole],
    latest: &HashMap<String, String>,
) -> Result<String> {
    let positions = statements_block(debaters, latest, None);
    let mut mentions: HashMap<String, usize> = HashMap::new();

    for debater in debaters {
        run.check_cancel()?;
        let prompt = prompts::render(
            prompts::DEBATE_VOTE,
            &[("topic", topic), ("positions", &positions)],
        );
        let ballot = match run.run_step(debater, &prompt).await {
            Ok(result) => result.response,
            Err(error) if run.error_mode() == ErrorMode::Continue => {
                tracing::debug!(agent = %debater.id, error = %error, "vote skipped");
                continue;
            }
            Err(error) => return Err(error),
        };

        // Credit the earliest-mentioned id that is not the voter's own
        let choice = debaters
            .iter()
            .filter(|candidate| candidate.id != debater.id)
            .filter_map(|candidate| ballot.find(&candidate.id).map(|at| (at, &candidate.id)))
            .min_by_key(|(at, _)| *at)
            .map(|(_, id)| id.clone());
        if let Some(id) = choice {
            *mentions.entry(id).or_default() += 1;
        }
    }

    let mut ranked: Vec<(&String, &usize)> = mentions.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1));
    match ranked.as_slice() {
        [] => Ok(positions),
        [_single] => Ok(latest
            .get(ranked[0].0)
            .cloned()
            .unwrap_or(positions)),
        [first, second, ..] if first.1 > second.1 => Ok(latest
            .get(first.0)
            .cloned()
            .unwrap_or(positions)),
        // Tie: no single winner
        _ => Ok(positions),
    }
}

fn statements_block(
    debaters: &[AgentRole],
    statements: &HashMap<String, String>,
    exclude: Option<&str>,
) -> String {
    debaters
        .iter()
        .filter(|d| exclude != Some(d.id.as_str()))
        .filter_map(|d| {
            statements
                .get(&d.id)
                .map(|statement| format!("[{}]\n{}", d.id, statement))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
