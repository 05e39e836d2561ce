//! End-to-end voting scenarios: the initiate → cast → tally flow and its
//! lifecycle broadcasts over the message queue.

mod common;

use swarm_bus::{AgentState, Mechanism, VoteProposal};

use common::test_engine;

#[test]
fn test_full_vote_lifecycle_with_broadcasts() {
    let (_dir, engine) = test_engine();
    let voters = ["frontend-dev", "backend-dev", "infra-dev"];
    for voter in voters {
        engine
            .agents()
            .heartbeat(voter, AgentState::Active, None)
            .expect("heartbeat");
        engine
            .subscriptions()
            .subscribe(voter, "general")
            .expect("subscribe");
    }

    // Eligibility defaults to the registered agents.
    let vote_id = engine
        .voting()
        .initiate(
            &VoteProposal::new("frontend-dev", "Use TypeScript for new components?", [
                "yes", "no", "defer",
            ])
            .description("Type safety for the component library"),
        )
        .expect("initiate");

    // Every voter sees the announcement, then casts from it.
    for voter in voters {
        let announcements = engine
            .messages()
            .receive(voter, &["general"], 10, Some("vote.initiate"))
            .expect("receive");
        assert_eq!(announcements.len(), 1);
        assert!(engine
            .messages()
            .claim(voter, announcements[0].id)
            .expect("claim"));

        let announced_vote = announcements[0].payload["vote_id"]
            .as_str()
            .expect("vote_id in payload")
            .to_string();
        assert_eq!(announced_vote, vote_id);
    }

    engine
        .voting()
        .cast("frontend-dev", &vote_id, "yes", Some("fewer bugs"))
        .expect("cast");
    engine
        .voting()
        .cast("backend-dev", &vote_id, "yes", None)
        .expect("cast");
    engine
        .voting()
        .cast("infra-dev", &vote_id, "defer", None)
        .expect("cast");

    let result = engine.voting().tally(&vote_id, true).expect("tally");
    assert_eq!(result.outcome, "yes");
    assert_eq!(result.total_votes, 3);
    assert_eq!(result.tally["yes"], 2);

    // The result broadcast went out at priority 8.
    let results = engine
        .messages()
        .receive("infra-dev", &["general"], 10, Some("vote.result"))
        .expect("receive");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].priority, 8);
    assert_eq!(results[0].payload["outcome"], "yes");
    assert_eq!(results[0].payload["vote_id"], vote_id);
}

#[test]
fn test_weighted_vote_over_the_engine() {
    let (_dir, engine) = test_engine();
    let vote_id = engine
        .voting()
        .initiate(
            &VoteProposal::new("lead", "Adopt the new build system?", ["yes", "no"])
                .mechanism(Mechanism::Weighted)
                .eligible_voters(["dev-1", "dev-2", "build-specialist-01"]),
        )
        .expect("initiate");

    engine
        .voting()
        .cast("dev-1", &vote_id, "no", None)
        .expect("cast");
    engine
        .voting()
        .cast("dev-2", &vote_id, "no", None)
        .expect("cast");
    engine
        .voting()
        .cast("build-specialist-01", &vote_id, "yes", Some("owns the pipeline"))
        .expect("cast");

    // 2 (specialist) vs 2 (two regulars): the tie resolves to the first
    // listed option.
    let result = engine.voting().tally(&vote_id, true).expect("tally");
    assert_eq!(result.tally["yes"], 2);
    assert_eq!(result.tally["no"], 2);
    assert_eq!(result.outcome, "yes");
    assert_eq!(result.mechanism, Mechanism::Weighted);
}

#[test]
fn test_consensus_vote_over_the_engine() {
    let (_dir, engine) = test_engine();
    let voters = ["a-1", "a-2", "a-3", "a-4", "a-5"];
    let vote_id = engine
        .voting()
        .initiate(
            &VoteProposal::new("a-1", "Freeze the API?", ["yes", "no"])
                .mechanism(Mechanism::Consensus)
                .eligible_voters(voters),
        )
        .expect("initiate");

    for voter in ["a-1", "a-2", "a-3", "a-4"] {
        engine
            .voting()
            .cast(voter, &vote_id, "yes", None)
            .expect("cast");
    }
    engine
        .voting()
        .cast("a-5", &vote_id, "no", None)
        .expect("cast");

    // 4 of 5 is exactly the 80% threshold.
    let result = engine.voting().tally(&vote_id, true).expect("tally");
    assert_eq!(result.outcome, "yes");
    assert_eq!(result.consensus_threshold, Some(0.8));
}

#[test]
fn test_vote_recorded_progress_broadcasts() {
    let (_dir, engine) = test_engine();
    engine
        .subscriptions()
        .subscribe("observer", "general")
        .expect("subscribe");

    let vote_id = engine
        .voting()
        .initiate(
            &VoteProposal::new("lead", "Topic", ["yes", "no"])
                .eligible_voters(["v-1", "v-2", "v-3"]),
        )
        .expect("initiate");

    assert_eq!(
        engine.voting().cast("v-1", &vote_id, "yes", None).expect("cast"),
        1
    );
    assert_eq!(
        engine.voting().cast("v-2", &vote_id, "no", None).expect("cast"),
        2
    );

    let recorded = engine
        .messages()
        .receive("observer", &["general"], 10, Some("vote.recorded"))
        .expect("receive");
    assert_eq!(recorded.len(), 2);
    let latest = recorded
        .iter()
        .find(|m| m.payload["voter"] == "v-2")
        .expect("second cast announced");
    assert_eq!(latest.payload["votes_received"], 2);
    assert_eq!(latest.payload["votes_needed"], 3);
}
