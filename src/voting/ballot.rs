//! Ballot documents and vote value types.
//!
//! Ballots persist as one pretty-printed JSON document per vote under
//! `.claude/votes/`, keeping the relational schema narrow; the engine
//! treats voting state as opaque document storage.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How a ballot's outcome is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mechanism {
    /// Most votes wins; ties resolve to the earliest listed option
    SimpleMajority,
    /// Specialist/expert/senior voters count double
    Weighted,
    /// The top option must hold at least 80% of votes cast
    Consensus,
}

impl Mechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SimpleMajority => "simple_majority",
            Self::Weighted => "weighted",
            Self::Consensus => "consensus",
        }
    }
}

/// Ballot lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BallotStatus {
    Open,
    Closed,
}

/// A single recorded vote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastVote {
    pub choice: String,
    #[serde(default)]
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of a tally run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TallyResult {
    /// Winning option, or `no_votes` / `no_consensus`
    pub outcome: String,
    /// Votes (or vote weight) per option
    pub tally: BTreeMap<String, u32>,
    pub total_votes: usize,
    pub mechanism: Mechanism,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus_threshold: Option<f64>,
}

/// A ballot document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ballot {
    pub vote_id: String,
    pub topic: String,
    pub description: String,
    pub options: Vec<String>,
    pub mechanism: Mechanism,
    pub proposed_by: String,
    pub proposed_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub eligible_voters: Vec<String>,
    /// Voter id → recorded vote; at most one entry per voter
    #[serde(default)]
    pub votes_cast: BTreeMap<String, CastVote>,
    pub status: BallotStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TallyResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

/// Parameters for [`VotingLayer::initiate`](crate::voting::VotingLayer::initiate)
#[derive(Debug, Clone)]
pub struct VoteProposal {
    pub proposer: String,
    pub topic: String,
    pub description: Option<String>,
    pub options: Vec<String>,
    pub mechanism: Mechanism,
    /// `None` enumerates all registered agents at initiation time
    pub eligible_voters: Option<Vec<String>>,
    pub timeout: Duration,
}

impl VoteProposal {
    pub fn new<I, S>(proposer: impl Into<String>, topic: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            proposer: proposer.into(),
            topic: topic.into(),
            description: None,
            options: options.into_iter().map(Into::into).collect(),
            mechanism: Mechanism::SimpleMajority,
            eligible_voters: None,
            timeout: Duration::hours(24),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn mechanism(mut self, mechanism: Mechanism) -> Self {
        self.mechanism = mechanism;
        self
    }

    pub fn eligible_voters<I, S>(mut self, voters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.eligible_voters = Some(voters.into_iter().map(Into::into).collect());
        self
    }

    pub fn timeout_hours(mut self, hours: i64) -> Self {
        self.timeout = Duration::hours(hours);
        self
    }
}
