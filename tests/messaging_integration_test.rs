//! End-to-end messaging scenarios: contended claims, broadcast fan-out,
//! subscription routing, response correlation, and TTL expiry.

mod common;

use std::thread;
use std::time::Duration;

use swarm_bus::{CoordinationError, SendRequest};

use common::test_engine;

#[test]
fn test_direct_claim_is_atomic_under_contention() {
    let (_dir, engine) = test_engine();
    let message_id = engine
        .messages()
        .send(
            &SendRequest::new("sender", "work.item").to("receiver"),
            &serde_json::json!({"data": "test"}),
        )
        .expect("send");

    // Ten agents race for the same direct message.
    let results: Vec<bool> = thread::scope(|scope| {
        let handles: Vec<_> = (0..10)
            .map(|i| {
                let engine = &engine;
                scope.spawn(move || {
                    engine
                        .messages()
                        .claim(&format!("agent-{i}"), message_id)
                        .expect("claim should not error")
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().expect("join")).collect()
    });

    let wins = results.iter().filter(|&&won| won).count();
    assert_eq!(wins, 1, "exactly one contender may win the claim");
    assert_eq!(results.len() - wins, 9);
}

#[test]
fn test_broadcast_fan_out_once_per_subscriber() {
    let (_dir, engine) = test_engine();
    let agents = ["agent-1", "agent-2", "agent-3"];
    for agent in agents {
        engine
            .subscriptions()
            .subscribe(agent, "general")
            .expect("subscribe");
    }

    let message_id = engine
        .messages()
        .send(
            &SendRequest::new("broadcaster", "announce.update"),
            &serde_json::json!({"announcement": "hello everyone"}),
        )
        .expect("send");

    // Every subscriber sees the broadcast and claims its own copy.
    for agent in agents {
        let messages = engine
            .messages()
            .receive(agent, &["general"], 10, None)
            .expect("receive");
        assert!(
            messages.iter().any(|m| m.id == message_id),
            "{agent} should see the broadcast"
        );
        assert!(
            engine.messages().claim(agent, message_id).expect("claim"),
            "{agent}'s first claim should win"
        );
    }

    // Re-claims are refused, and the claimed broadcast is no longer listed.
    for agent in agents {
        assert!(
            !engine.messages().claim(agent, message_id).expect("claim"),
            "{agent}'s second claim must lose"
        );
        let messages = engine
            .messages()
            .receive(agent, &["general"], 10, None)
            .expect("receive");
        assert!(messages.iter().all(|m| m.id != message_id));
    }
}

#[test]
fn test_broadcast_respects_subscriptions() {
    let (_dir, engine) = test_engine();
    engine
        .subscriptions()
        .subscribe("agent-1", "technical")
        .expect("subscribe");
    engine
        .subscriptions()
        .subscribe("agent-2", "general")
        .expect("subscribe");
    engine
        .subscriptions()
        .subscribe("agent-3", "technical")
        .expect("subscribe");
    engine
        .subscriptions()
        .subscribe("agent-3", "general")
        .expect("subscribe");

    let message_id = engine
        .messages()
        .send(
            &SendRequest::new("sender", "tech.note").channel("technical"),
            &serde_json::json!({"data": "technical stuff"}),
        )
        .expect("send");

    let sees = |agent: &str| {
        engine
            .messages()
            .receive(agent, &["technical", "general"], 10, None)
            .expect("receive")
            .iter()
            .any(|m| m.id == message_id)
    };
    assert!(sees("agent-1"));
    assert!(!sees("agent-2"), "agent-2 is not subscribed to technical");
    assert!(sees("agent-3"));
}

#[test]
fn test_response_correlation_is_unique() {
    let (_dir, engine) = test_engine();
    let queue = engine.messages();

    let request_id = queue
        .send(
            &SendRequest::new("requester", "context.query")
                .to("responder")
                .correlation_id("corr-1"),
            &serde_json::json!({"query": "what framework?"}),
        )
        .expect("send request");

    let request = queue.message(request_id).expect("lookup");
    assert!(queue.claim("responder", request_id).expect("claim"));

    let response_id = queue
        .send_response(&request, &serde_json::json!({"answer": "axum"}), None)
        .expect("first response succeeds");

    let response = queue.message(response_id).expect("lookup");
    assert_eq!(response.message_type, "context.response");
    assert_eq!(response.correlation_id.as_deref(), Some("corr-1"));
    assert_eq!(response.to_agent.as_deref(), Some("requester"));
    assert_eq!(response.channel, request.channel);
    assert_eq!(response.priority, request.priority);

    let err = queue
        .send_response(&request, &serde_json::json!({"answer": "again"}), None)
        .unwrap_err();
    assert!(
        matches!(
            &err,
            CoordinationError::DuplicateResponseCorrelation { correlation_id }
                if correlation_id == "corr-1"
        ),
        "second response must be rejected, got: {err}"
    );
}

#[test]
fn test_expired_messages_are_cleaned_up() {
    let (_dir, engine) = test_engine();
    let queue = engine.messages();

    queue
        .send(
            &SendRequest::new("sender", "status.ping")
                .to("receiver")
                .ttl(Duration::from_secs(1)),
            &serde_json::json!({"data": "expires soon"}),
        )
        .expect("send");

    thread::sleep(Duration::from_millis(1500));

    // Past its expiry the message is already invisible, then cleanup
    // removes the row entirely.
    assert!(queue
        .receive("receiver", &[], 10, None)
        .expect("receive")
        .is_empty());
    assert!(queue.cleanup_expired().expect("cleanup") >= 1);
    assert!(queue
        .receive("receiver", &[], 10, None)
        .expect("receive")
        .is_empty());
}

#[test]
fn test_poll_claim_complete_round_trip_across_engines() {
    // Two engine handles over the same project root behave like two
    // processes sharing the coordination substrate.
    let (dir, producer) = test_engine();
    let consumer = swarm_bus::Engine::open(dir.path()).expect("second engine");

    consumer
        .subscriptions()
        .subscribe("worker-1", "urgent")
        .expect("subscribe");
    producer
        .messages()
        .send(
            &SendRequest::new("dispatcher", "deploy.request")
                .channel("urgent")
                .priority(9),
            &serde_json::json!({"service": "api"}),
        )
        .expect("send");

    let messages = consumer
        .messages()
        .receive("worker-1", &["urgent"], 10, None)
        .expect("receive");
    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert!(consumer
        .messages()
        .claim("worker-1", message.id)
        .expect("claim"));
    consumer
        .messages()
        .complete(message.id, None)
        .expect("complete");

    let done = producer.messages().message(message.id).expect("lookup");
    assert_eq!(done.status, swarm_bus::MessageStatus::Done);
}
