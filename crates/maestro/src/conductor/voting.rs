//! Democratic voting: quorum check, option generation, lenient ballot
//! parsing, and the majority/unanimous/weighted/ranked-IRV tallies.

use std::collections::{BTreeSet, HashMap};

use regex::Regex;

use crate::conductor::{ErrorMode, OrchestrationRun, VoteMethod, VotingConfig};
use crate::ensemble::AgentRole;
use crate::errors::{OrchestratorError, Result};
use crate::prompts;

struct Ballot {
    voter_id: String,
    /// 0-based preference order over all options (a single leading
    /// preference is what the non-ranked tallies use)
    ranking: Vec<usize>,
}

pub(super) async fn run(cfg: &VotingConfig, run: &OrchestrationRun) -> Result<String> {
    let requested: Vec<String> = match &cfg.voter_ids {
        Some(ids) => ids.clone(),
        None => run.roles().iter().map(|r| r.id.clone()).collect(),
    };
    // Unknown ids reduce the active set instead of failing outright;
    // quorum decides whether the vote can proceed.
    let voters: Vec<AgentRole> = requested
        .iter()
        .filter_map(|id| run.role(id).ok().cloned())
        .collect();
    let required = (requested.len() as f64 * cfg.quorum).ceil() as usize;
    if voters.len() < required {
        return Err(OrchestratorError::QuorumNotMet {
            active: voters.len(),
            required,
        });
    }

    let topic = run.input();
    let options = match &cfg.options {
        Some(options) => dedupe_options(options),
        None => generate_options(run, &voters, topic).await?,
    };
    if options.len() < 2 {
        return Err(OrchestratorError::InsufficientOptions(options.len()));
    }

    let ballots = collect_ballots(cfg, run, &voters, topic, &options).await?;
    Ok(tally(cfg, &ballots, &options))
}

/// Drop duplicate options while preserving first-seen order.
pub(super) fn dedupe_options(options: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    options
        .iter()
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty() && seen.insert(o.clone()))
        .collect()
}

/// Each voter proposes one concise option; duplicates are dropped.
async fn generate_options(
    run: &OrchestrationRun,
    voters: &[AgentRole],
    topic: &str,
) -> Result<Vec<String>> {
    let mut proposals = Vec::new();
    for voter in voters {
        run.check_cancel()?;
        let prompt = prompts::render(prompts::VOTE_PROPOSE, &[("topic", topic)]);
        match run.run_step(voter, &prompt).await {
            Ok(result) => {
                if let Some(first_line) = result.response.lines().next() {
                    proposals.push(first_line.trim().to_string());
                }
            }
            Err(error) if run.error_mode() == ErrorMode::Continue => {
                tracing::debug!(agent = %voter.id, error = %error, "proposal skipped");
            }
            Err(error) => return Err(error),
        }
    }
    Ok(dedupe_options(&proposals))
}

async fn collect_ballots(
    cfg: &VotingConfig,
    run: &OrchestrationRun,
    voters: &[AgentRole],
    topic: &str,
    options: &[String],
) -> Result<Vec<Ballot>> {
    let numbered = options
        .iter()
        .enumerate()
        .map(|(i, option)| format!("{}. {}", i + 1, option))
        .collect::<Vec<_>>()
        .join("\n");
    let template = if cfg.method == VoteMethod::Ranked {
        prompts::VOTE_RANKED_BALLOT
    } else {
        prompts::VOTE_BALLOT
    };

    let mut ballots = Vec::new();
    let mut first_error: Option<OrchestratorError> = None;

    for voter in voters {
        run.check_cancel()?;
        let prompt = prompts::render(template, &[("topic", topic), ("options", &numbered)]);
        let raw = match run.run_step(voter, &prompt).await {
            Ok(result) => result.response,
            Err(error) if run.error_mode() == ErrorMode::Continue => {
                tracing::debug!(agent = %voter.id, error = %error, "ballot skipped");
                first_error.get_or_insert(error);
                continue;
            }
            Err(error) => return Err(error),
        };

        let ranking = if cfg.method == VoteMethod::Ranked {
            parse_ranking(&raw, options.len())
        } else {
            vec![parse_choice(&raw, options.len())]
        };
        let one_based: Vec<usize> = ranking.iter().map(|i| i + 1).collect();
        run.notify_vote(&voter.id, &one_based, &raw).await;

        ballots.push(Ballot {
            voter_id: voter.id.clone(),
            ranking,
        });
    }

    if ballots.is_empty() {
        return Err(first_error
            .unwrap_or_else(|| OrchestratorError::Internal("no ballots cast".to_string())));
    }
    Ok(ballots)
}

/// First integer in the response, clamped to the valid option range;
/// option 1 when no integer is found. Returns a 0-based index.
fn parse_choice(response: &str, option_count: usize) -> usize {
    let re = Regex::new(r"\d+").unwrap();
    match re.find(response) {
        Some(found) => {
            let value = found
                .as_str()
                .parse::<u64>()
                .unwrap_or(option_count as u64);
            (value.clamp(1, option_count as u64) - 1) as usize
        }
        None => 0,
    }
}

/// All integers in the response, clamped and deduplicated, completed
/// with the unmentioned options in natural order. Returns 0-based
/// indices, most preferred first.
fn parse_ranking(response: &str, option_count: usize) -> Vec<usize> {
    let re = Regex::new(r"\d+").unwrap();
    let mut ranking = Vec::new();
    for found in re.find_iter(response) {
        let value = found
            .as_str()
            .parse::<u64>()
            .unwrap_or(option_count as u64);
        let index = (value.clamp(1, option_count as u64) - 1) as usize;
        if !ranking.contains(&index) {
            ranking.push(index);
        }
    }
    for index in 0..option_count {
        if !ranking.contains(&index) {
            ranking.push(index);
        }
    }
    ranking
}

fn tally(cfg: &VotingConfig, ballots: &[Ballot], options: &[String]) -> String {
    match cfg.method {
        VoteMethod::Majority => {
            let counts = first_choice_counts(ballots, options.len(), None);
            let winner = arg_max(&counts);
            format!(
                "Winner: '{}' (option {}) with {} of {} votes.\nBreakdown: {}",
                options[winner],
                winner + 1,
                counts[winner],
                ballots.len(),
                breakdown(&counts, options),
            )
        }
        VoteMethod::Weighted => {
            let weights: HashMap<&str, f64> = ballots
                .iter()
                .map(|b| {
                    (
                        b.voter_id.as_str(),
                        cfg.weights.get(&b.voter_id).copied().unwrap_or(1.0),
                    )
                })
                .collect();
            let counts = first_choice_counts(ballots, options.len(), Some(&weights));
            let winner = arg_max(&counts);
            format!(
                "Winner: '{}' (option {}) with weight {} of {}.\nBreakdown: {}",
                options[winner],
                winner + 1,
                counts[winner],
                counts.iter().sum::<f64>(),
                breakdown(&counts, options),
            )
        }
        VoteMethod::Unanimous => {
            let first = ballots[0].ranking[0];
            if ballots.iter().all(|b| b.ranking[0] == first) {
                format!(
                    "Winner: '{}' (option {}) by unanimous vote of {} voters.",
                    options[first],
                    first + 1,
                    ballots.len(),
                )
            } else {
                let counts = first_choice_counts(ballots, options.len(), None);
                format!(
                    "No winner: the vote was not unanimous.\nBreakdown: {}",
                    breakdown(&counts, options),
                )
            }
        }
        VoteMethod::Ranked => {
            let (winner, final_counts, rounds) = instant_runoff(ballots, options.len());
            format!(
                "Winner: '{}' (option {}) with {} of {} votes after {} instant-runoff round(s).\nBreakdown: {}",
                options[winner],
                winner + 1,
                final_counts[winner],
                ballots.len(),
                rounds,
                breakdown(&final_counts, options),
            )
        }
    }
}

fn first_choice_counts(
    ballots: &[Ballot],
    option_count: usize,
    weights: Option<&HashMap<&str, f64>>,
) -> Vec<f64> {
    let mut counts = vec![0.0; option_count];
    for ballot in ballots {
        let weight = weights
            .and_then(|w| w.get(ballot.voter_id.as_str()).copied())
            .unwrap_or(1.0);
        counts[ballot.ranking[0]] += weight;
    }
    counts
}

/// Highest count wins; ties break toward the first option encountered.
fn arg_max(counts: &[f64]) -> usize {
    let mut winner = 0;
    for (index, &count) in counts.iter().enumerate() {
        if count > counts[winner] {
            winner = index;
        }
    }
    winner
}

/// Instant-runoff: repeatedly count first choices among remaining
/// options; a strict majority wins, else the lowest-count option is
/// eliminated (ties eliminate the later option). The last survivor wins
/// if no round produces a majority.
fn instant_runoff(ballots: &[Ballot], option_count: usize) -> (usize, Vec<f64>, usize) {
    let mut remaining: BTreeSet<usize> = (0..option_count).collect();
    let cast = ballots.len();
    let mut rounds = 0;

    loop {
        rounds += 1;
        let mut counts = vec![0.0; option_count];
        for ballot in ballots {
            if let Some(&preferred) = ballot.ranking.iter().find(|i| remaining.contains(i)) {
                counts[preferred] += 1.0;
            }
        }

        let leader = remaining
            .iter()
            .copied()
            .max_by(|a, b| counts[*a].partial_cmp(&counts[*b]).unwrap())
            .unwrap_or(0);
        if counts[leader] * 2.0 > cast as f64 || remaining.len() == 1 {
            return (leader, counts, rounds);
        }

        let lowest = remaining
            .iter()
            .copied()
            .rev()
            .min_by(|a, b| counts[*a].partial_cmp(&counts[*b]).unwrap())
            .unwrap_or(0);
        remaining.remove(&lowest);
    }
}

fn breakdown(counts: &[f64], options: &[String]) -> String {
    counts
        .iter()
        .zip(options)
        .map(|(count, option)| {
            if count.fract() == 0.0 {
                format!("{}: {}", option, *count as u64)
            } else {
                format!("{}: {:.2}", option, count)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ballot(voter: &str, ranking: &[usize]) -> Ballot {
        Ballot {
            voter_id: voter.to_string(),
            ranking: ranking.to_vec(),
        }
    }

    #[test]
    fn test_parse_choice_is_lenient() {
        assert_eq!(parse_choice("I pick option 2", 3), 1);
        assert_eq!(parse_choice("2", 3), 1);
        assert_eq!(parse_choice("option 99 obviously", 3), 2);
        assert_eq!(parse_choice("0", 3), 0);
        assert_eq!(parse_choice("none of them", 3), 0);
    }

    #[test]
    fn test_parse_ranking_completes_and_dedupes() {
        assert_eq!(parse_ranking("3, 1, 2", 3), vec![2, 0, 1]);
        assert_eq!(parse_ranking("2 then 2 then 9", 3), vec![1, 2, 0]);
        assert_eq!(parse_ranking("whatever", 3), vec![0, 1, 2]);
    }

    #[test]
    fn test_majority_tie_breaks_to_first_option() {
        let ballots = vec![ballot("a", &[0]), ballot("b", &[1])];
        let counts = first_choice_counts(&ballots, 2, None);
        assert_eq!(arg_max(&counts), 0);
    }

    #[test]
    fn test_instant_runoff_transfers_votes() {
        // First choices: option2 x2, option1 x2, option3 x1.
        // Option 3 is eliminated; its ballot transfers to option 1,
        // which then holds 3 of 5.
        let ballots = vec![
            ballot("v1", &[1, 0, 2]),
            ballot("v2", &[1, 0, 2]),
            ballot("v3", &[0, 1, 2]),
            ballot("v4", &[0, 1, 2]),
            ballot("v5", &[2, 0, 1]),
        ];
        let (winner, counts, rounds) = instant_runoff(&ballots, 3);
        assert_eq!(winner, 0);
        assert_eq!(counts[0], 3.0);
        assert_eq!(rounds, 2);
    }

    #[test]
    fn test_instant_runoff_last_survivor() {
        // Two options, one ballot each: no strict majority, eliminate
        // the later option, first survives.
        let ballots = vec![ballot("a", &[0, 1]), ballot("b", &[1, 0])];
        let (winner, _, _) = instant_runoff(&ballots, 2);
        assert_eq!(winner, 0);
    }

    #[test]
    fn test_dedupe_options_preserves_order() {
        let options = vec![
            "red".to_string(),
            "blue".to_string(),
            "red".to_string(),
            "  blue ".to_string(),
            "green".to_string(),
        ];
        assert_eq!(dedupe_options(&options), vec!["red", "blue", "green"]);
    }
}
