//! # Voting Layer
//!
//! Stateful ballots with three tally mechanisms, built on top of the
//! message queue: initiation and results are broadcast on `general`, and
//! the eligible-voter default comes from the agent registry.
//!
//! Ballot state lives in one JSON document per vote (see [`Ballot`]);
//! concurrent casts on the same ballot are expected to be serialized by the
//! caller owning that vote's document.

mod ballot;
mod tally;

pub use ballot::{Ballot, BallotStatus, CastVote, Mechanism, TallyResult, VoteProposal};

use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agents::AgentRegistry;
use crate::errors::{CoordinationError, CoordinationResult};
use crate::messaging::{MessageQueue, SendRequest};

/// Sender id stamped on vote lifecycle broadcasts
const VOTING_AGENT: &str = "voting-system";

/// Ballots with fewer eligible voters than this are accepted with a warning;
/// the engine imposes no hard minimum.
const SPARSE_BALLOT_THRESHOLD: usize = 3;

/// Ballot lifecycle management over document storage and the message queue
#[derive(Debug, Clone)]
pub struct VotingLayer {
    votes_dir: PathBuf,
    queue: MessageQueue,
    agents: AgentRegistry,
}

impl VotingLayer {
    pub(crate) fn new(votes_dir: PathBuf, queue: MessageQueue, agents: AgentRegistry) -> Self {
        Self {
            votes_dir,
            queue,
            agents,
        }
    }

    /// Open a new ballot and broadcast `vote.initiate`; returns the vote id.
    ///
    /// When the proposal names no eligible voters, all registered agents are
    /// eligible; with an empty registry the ballot falls back to `system`
    /// so it can still be driven manually.
    pub fn initiate(&self, proposal: &VoteProposal) -> CoordinationResult<String> {
        let vote_id = format!("vote-{}", &Uuid::new_v4().simple().to_string()[..8]);

        let eligible_voters = match &proposal.eligible_voters {
            Some(voters) if !voters.is_empty() => voters.clone(),
            _ => {
                let registered = self.agents.agents()?;
                if registered.is_empty() {
                    vec!["system".to_string()]
                } else {
                    registered
                }
            }
        };
        if eligible_voters.len() < SPARSE_BALLOT_THRESHOLD {
            warn!(
                vote_id = %vote_id,
                voters = eligible_voters.len(),
                "ballot opened with fewer than three eligible voters"
            );
        }

        let now = Utc::now();
        let ballot = Ballot {
            vote_id: vote_id.clone(),
            topic: proposal.topic.clone(),
            description: proposal
                .description
                .clone()
                .unwrap_or_else(|| proposal.topic.clone()),
            options: proposal.options.clone(),
            mechanism: proposal.mechanism,
            proposed_by: proposal.proposer.clone(),
            proposed_at: now,
            deadline: now + proposal.timeout,
            eligible_voters,
            votes_cast: Default::default(),
            status: BallotStatus::Open,
            result: None,
            closed_at: None,
        };
        self.write_ballot(&ballot)?;

        let announcement = serde_json::json!({
            "vote_id": ballot.vote_id,
            "topic": ballot.topic,
            "description": ballot.description,
            "options": ballot.options,
            "mechanism": ballot.mechanism,
            "deadline": ballot.deadline,
        });
        self.queue.send(
            &SendRequest::new(VOTING_AGENT, "vote.initiate").priority(9),
            &announcement,
        )?;

        info!(
            vote_id = %vote_id,
            topic = %ballot.topic,
            mechanism = ballot.mechanism.as_str(),
            voters = ballot.eligible_voters.len(),
            "vote initiated"
        );
        Ok(vote_id)
    }

    /// Record an agent's vote; returns how many votes are now cast.
    ///
    /// A `vote.recorded` progress broadcast follows each successful cast.
    ///
    /// # Errors
    ///
    /// `VoteNotFound`, `NotEligible`, `VoteClosed`, `InvalidChoice`, and
    /// `AlreadyVoted` (votes cannot be changed).
    pub fn cast(
        &self,
        agent_id: &str,
        vote_id: &str,
        choice: &str,
        reasoning: Option<&str>,
    ) -> CoordinationResult<usize> {
        let mut ballot = self.load_ballot(vote_id)?;

        if !ballot.eligible_voters.iter().any(|v| v == agent_id) {
            return Err(CoordinationError::NotEligible {
                agent_id: agent_id.to_string(),
                vote_id: vote_id.to_string(),
            });
        }
        if ballot.status != BallotStatus::Open {
            return Err(CoordinationError::VoteClosed {
                vote_id: vote_id.to_string(),
            });
        }
        if !ballot.options.iter().any(|o| o == choice) {
            return Err(CoordinationError::InvalidChoice {
                choice: choice.to_string(),
                options: ballot.options.clone(),
            });
        }
        if ballot.votes_cast.contains_key(agent_id) {
            return Err(CoordinationError::AlreadyVoted {
                agent_id: agent_id.to_string(),
                vote_id: vote_id.to_string(),
            });
        }

        ballot.votes_cast.insert(
            agent_id.to_string(),
            CastVote {
                choice: choice.to_string(),
                reasoning: reasoning.unwrap_or_default().to_string(),
                timestamp: Utc::now(),
            },
        );
        self.write_ballot(&ballot)?;

        let progress = serde_json::json!({
            "vote_id": vote_id,
            "voter": agent_id,
            "votes_received": ballot.votes_cast.len(),
            "votes_needed": ballot.eligible_voters.len(),
        });
        self.queue.send(
            &SendRequest::new(VOTING_AGENT, "vote.recorded"),
            &progress,
        )?;

        debug!(vote_id = %vote_id, voter = %agent_id, "vote cast");
        Ok(ballot.votes_cast.len())
    }

    /// Close the ballot, compute its outcome, and broadcast `vote.result`.
    ///
    /// Refuses while the deadline is in the future unless `force` is set.
    ///
    /// # Errors
    ///
    /// `VoteNotFound`, `VoteClosed` for an already-tallied ballot, and
    /// `VoteStillOpen` for a premature unforced tally.
    pub fn tally(&self, vote_id: &str, force: bool) -> CoordinationResult<TallyResult> {
        let mut ballot = self.load_ballot(vote_id)?;

        if ballot.status != BallotStatus::Open {
            return Err(CoordinationError::VoteClosed {
                vote_id: vote_id.to_string(),
            });
        }
        if !force && Utc::now() < ballot.deadline {
            return Err(CoordinationError::VoteStillOpen {
                vote_id: vote_id.to_string(),
            });
        }

        let result = match ballot.mechanism {
            Mechanism::SimpleMajority => {
                tally::tally_simple_majority(&ballot.votes_cast, &ballot.options)
            }
            Mechanism::Weighted => tally::tally_weighted(&ballot.votes_cast, &ballot.options),
            Mechanism::Consensus => tally::tally_consensus(&ballot.votes_cast, &ballot.options),
        };

        ballot.status = BallotStatus::Closed;
        ballot.result = Some(result.clone());
        ballot.closed_at = Some(Utc::now());
        self.write_ballot(&ballot)?;

        let outcome = serde_json::json!({
            "vote_id": vote_id,
            "topic": ballot.topic,
            "outcome": result.outcome,
            "tally": result.tally,
            "total_votes": result.total_votes,
        });
        self.queue.send(
            &SendRequest::new(VOTING_AGENT, "vote.result").priority(8),
            &outcome,
        )?;

        info!(
            vote_id = %vote_id,
            outcome = %result.outcome,
            total_votes = result.total_votes,
            "vote tallied"
        );
        Ok(result)
    }

    /// Current ballot document.
    pub fn status(&self, vote_id: &str) -> CoordinationResult<Ballot> {
        self.load_ballot(vote_id)
    }

    /// All open ballots, newest first.
    ///
    /// Unreadable documents are skipped with a warning rather than failing
    /// the listing.
    pub fn open_votes(&self) -> CoordinationResult<Vec<Ballot>> {
        let mut open = Vec::new();
        for entry in fs::read_dir(&self.votes_dir)? {
            let path = entry?.path();
            let is_ballot = path.extension().is_some_and(|ext| ext == "json")
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("vote-"));
            if !is_ballot {
                continue;
            }
            let raw = fs::read_to_string(&path)?;
            match serde_json::from_str::<Ballot>(&raw) {
                Ok(ballot) if ballot.status == BallotStatus::Open => open.push(ballot),
                Ok(_) => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable ballot");
                }
            }
        }
        open.sort_by(|a, b| b.proposed_at.cmp(&a.proposed_at));
        Ok(open)
    }

    fn ballot_path(&self, vote_id: &str) -> PathBuf {
        self.votes_dir.join(format!("{vote_id}.json"))
    }

    fn load_ballot(&self, vote_id: &str) -> CoordinationResult<Ballot> {
        let path = self.ballot_path(vote_id);
        if !path.exists() {
            return Err(CoordinationError::vote_not_found(vote_id));
        }
        let raw = fs::read_to_string(&path)?;
        serde_json::from_str(&raw)
            .map_err(|err| CoordinationError::invalid_ballot(vote_id, err.to_string()))
    }

    fn write_ballot(&self, ballot: &Ballot) -> CoordinationResult<()> {
        let raw = serde_json::to_string_pretty(ballot)
            .map_err(|err| CoordinationError::invalid_ballot(&ballot.vote_id, err.to_string()))?;
        fs::write(self.ballot_path(&ballot.vote_id), raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;

    fn test_engine() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = Engine::open(dir.path()).expect("engine");
        (dir, engine)
    }

    fn three_voter_proposal() -> VoteProposal {
        VoteProposal::new("agent-1", "Use TypeScript?", ["yes", "no"])
            .eligible_voters(["agent-1", "agent-2", "agent-3"])
    }

    #[test]
    fn test_initiate_writes_document_and_announces() {
        let (_dir, engine) = test_engine();
        let vote_id = engine
            .voting()
            .initiate(&three_voter_proposal())
            .expect("initiate");
        assert!(vote_id.starts_with("vote-"));

        let ballot = engine.voting().status(&vote_id).expect("status");
        assert_eq!(ballot.status, BallotStatus::Open);
        assert_eq!(ballot.eligible_voters.len(), 3);
        assert_eq!(ballot.description, "Use TypeScript?");

        engine
            .subscriptions()
            .subscribe("observer", "general")
            .expect("subscribe");
        let messages = engine
            .messages()
            .receive("observer", &["general"], 10, Some("vote.initiate"))
            .expect("receive");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].priority, 9);
        assert_eq!(messages[0].payload["vote_id"], vote_id);
    }

    #[test]
    fn test_eligible_voters_default_to_registry() {
        let (_dir, engine) = test_engine();
        engine
            .agents()
            .heartbeat("agent-a", crate::agents::AgentState::Active, None)
            .expect("heartbeat");
        engine
            .agents()
            .heartbeat("agent-b", crate::agents::AgentState::Active, None)
            .expect("heartbeat");

        let vote_id = engine
            .voting()
            .initiate(&VoteProposal::new("agent-a", "Topic", ["yes", "no"]))
            .expect("initiate");
        let ballot = engine.voting().status(&vote_id).expect("status");
        assert_eq!(ballot.eligible_voters, ["agent-a", "agent-b"]);
    }

    #[test]
    fn test_empty_registry_falls_back_to_system() {
        let (_dir, engine) = test_engine();
        let vote_id = engine
            .voting()
            .initiate(&VoteProposal::new("agent-a", "Topic", ["yes", "no"]))
            .expect("initiate");
        let ballot = engine.voting().status(&vote_id).expect("status");
        assert_eq!(ballot.eligible_voters, ["system"]);
    }

    #[test]
    fn test_cast_validations() {
        let (_dir, engine) = test_engine();
        let voting = engine.voting();
        let vote_id = voting.initiate(&three_voter_proposal()).expect("initiate");

        let err = voting.cast("outsider", &vote_id, "yes", None).unwrap_err();
        assert!(matches!(err, CoordinationError::NotEligible { .. }));

        let err = voting.cast("agent-1", &vote_id, "maybe", None).unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidChoice { .. }));

        assert_eq!(
            voting
                .cast("agent-1", &vote_id, "yes", Some("type safety"))
                .expect("cast"),
            1
        );
        let err = voting.cast("agent-1", &vote_id, "no", None).unwrap_err();
        assert!(matches!(err, CoordinationError::AlreadyVoted { .. }));

        let err = voting.cast("agent-1", "vote-missing", "yes", None).unwrap_err();
        assert!(matches!(err, CoordinationError::VoteNotFound { .. }));
    }

    #[test]
    fn test_tally_requires_deadline_or_force() {
        let (_dir, engine) = test_engine();
        let voting = engine.voting();
        let vote_id = voting.initiate(&three_voter_proposal()).expect("initiate");

        let err = voting.tally(&vote_id, false).unwrap_err();
        assert!(matches!(err, CoordinationError::VoteStillOpen { .. }));

        voting.cast("agent-1", &vote_id, "yes", None).expect("cast");
        let result = voting.tally(&vote_id, true).expect("forced tally");
        assert_eq!(result.outcome, "yes");

        // Tallying twice fails, and casting after close fails.
        let err = voting.tally(&vote_id, true).unwrap_err();
        assert!(matches!(err, CoordinationError::VoteClosed { .. }));
        let err = voting.cast("agent-2", &vote_id, "no", None).unwrap_err();
        assert!(matches!(err, CoordinationError::VoteClosed { .. }));
    }

    #[test]
    fn test_tally_persists_result_and_closed_at() {
        let (_dir, engine) = test_engine();
        let voting = engine.voting();
        let vote_id = voting.initiate(&three_voter_proposal()).expect("initiate");
        voting.cast("agent-1", &vote_id, "yes", None).expect("cast");
        voting.cast("agent-2", &vote_id, "no", None).expect("cast");
        voting.tally(&vote_id, true).expect("tally");

        let ballot = voting.status(&vote_id).expect("status");
        assert_eq!(ballot.status, BallotStatus::Closed);
        assert!(ballot.closed_at.is_some());
        let result = ballot.result.expect("result persisted");
        assert_eq!(result.outcome, "yes", "tie resolves to first option");
    }

    #[test]
    fn test_open_votes_listing() {
        let (_dir, engine) = test_engine();
        let voting = engine.voting();
        let first = voting.initiate(&three_voter_proposal()).expect("initiate");
        let second = voting.initiate(&three_voter_proposal()).expect("initiate");
        voting.tally(&first, true).expect("tally");

        let open = voting.open_votes().expect("open votes");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].vote_id, second);
    }

    #[test]
    fn test_corrupt_ballot_is_invalid() {
        let (dir, engine) = test_engine();
        let votes_dir = dir.path().join(".claude").join("votes");
        std::fs::write(votes_dir.join("vote-corrupt.json"), "{not json").expect("write");

        let err = engine.voting().status("vote-corrupt").unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidBallot { .. }));
    }
}
