//! Tally mechanisms.
//!
//! All mechanisms iterate the ballot's option list in order, so a tie
//! resolves to the earliest listed option reaching the maximum.

use std::collections::BTreeMap;

use crate::voting::ballot::{CastVote, Mechanism, TallyResult};

/// Fraction of cast votes the top option needs under consensus
const CONSENSUS_THRESHOLD: f64 = 0.8;

/// Agent-id markers that double a vote's weight under weighted tallying
const WEIGHTED_VOTER_MARKERS: [&str; 3] = ["specialist", "expert", "senior"];

pub(crate) fn tally_simple_majority(
    votes_cast: &BTreeMap<String, CastVote>,
    options: &[String],
) -> TallyResult {
    let (tally, winner) = count_votes(votes_cast, options, |_| 1);
    TallyResult {
        outcome: winner.unwrap_or_else(|| "no_votes".to_string()),
        tally,
        total_votes: votes_cast.len(),
        mechanism: Mechanism::SimpleMajority,
        consensus_threshold: None,
    }
}

pub(crate) fn tally_weighted(
    votes_cast: &BTreeMap<String, CastVote>,
    options: &[String],
) -> TallyResult {
    let (tally, winner) = count_votes(votes_cast, options, voter_weight);
    TallyResult {
        outcome: winner.unwrap_or_else(|| "no_votes".to_string()),
        tally,
        total_votes: votes_cast.len(),
        mechanism: Mechanism::Weighted,
        consensus_threshold: None,
    }
}

pub(crate) fn tally_consensus(
    votes_cast: &BTreeMap<String, CastVote>,
    options: &[String],
) -> TallyResult {
    let (tally, winner) = count_votes(votes_cast, options, |_| 1);
    let total_votes = votes_cast.len();

    let outcome = match winner {
        Some(winner) if total_votes > 0 => {
            let share = f64::from(tally[&winner]) / total_votes as f64;
            if share >= CONSENSUS_THRESHOLD {
                winner
            } else {
                "no_consensus".to_string()
            }
        }
        _ => "no_consensus".to_string(),
    };

    TallyResult {
        outcome,
        tally,
        total_votes,
        mechanism: Mechanism::Consensus,
        consensus_threshold: Some(CONSENSUS_THRESHOLD),
    }
}

fn voter_weight(agent_id: &str) -> u32 {
    if WEIGHTED_VOTER_MARKERS
        .iter()
        .any(|marker| agent_id.contains(marker))
    {
        2
    } else {
        1
    }
}

/// Count (weighted) votes per option, in option order; returns the tally and
/// the first option to reach the maximum, or `None` when nothing was cast.
fn count_votes(
    votes_cast: &BTreeMap<String, CastVote>,
    options: &[String],
    weight: impl Fn(&str) -> u32,
) -> (BTreeMap<String, u32>, Option<String>) {
    let mut tally: BTreeMap<String, u32> =
        options.iter().map(|option| (option.clone(), 0)).collect();
    for (voter, vote) in votes_cast {
        if let Some(count) = tally.get_mut(&vote.choice) {
            *count += weight(voter);
        }
    }

    if votes_cast.is_empty() {
        return (tally, None);
    }

    let mut winner: Option<(String, u32)> = None;
    for option in options {
        let count = tally[option];
        if winner.as_ref().map_or(true, |(_, best)| count > *best) {
            winner = Some((option.clone(), count));
        }
    }
    (tally, winner.map(|(option, _)| option))
}
