//! # swarm-bus
//!
//! Durable message bus and job board for multi-agent coordination.
//!
//! Many concurrent worker processes ("agents") exchange typed messages,
//! claim work atomically, run request/response exchanges, and hold
//! structured votes, all over a single embedded SQLite store shared via
//! the local filesystem, so coordination survives process restarts and
//! tolerates partial failures.
//!
//! ## Architecture
//!
//! ```text
//! Engine
//!   ├── Store                 <- WAL SQLite, per-thread connections,
//!   │                            BEGIN IMMEDIATE write scopes
//!   ├── MessageQueue          <- priority-ordered log, direct + broadcast
//!   │                            delivery, TTL expiry, dead-letter queue
//!   ├── SubscriptionRegistry  <- agent ↔ channel map for broadcast fan-out
//!   ├── JobBoard              <- tasks with atomic claim; emits task.claimed /
//!   │                            task.update in the claiming transaction
//!   ├── AgentRegistry         <- heartbeats, current-task tags, counters
//!   └── VotingLayer           <- ballots + tallies over JSON documents,
//!                                announced through the MessageQueue
//! ```
//!
//! ## Guarantees
//!
//! - A direct message is claimed by exactly one agent, ever; broadcasts are
//!   claimed at most once per subscriber. Claims use conditional updates and
//!   unique keys, never row locks, and losing a race is `Ok(false)`.
//! - At most one response per correlation id, enforced by a partial unique
//!   index in the store itself.
//! - A task's open→assigned transition happens at most once, and its
//!   `task.claimed` announcement commits in the same transaction.
//!
//! ## Consumption model
//!
//! The engine is caller-driven: there are no background threads, and
//! delivery is poll-based. Consumers call [`MessageQueue::receive`], then
//! [`MessageQueue::claim`], then [`MessageQueue::complete`], sleeping with
//! backoff between empty polls; any scheduling model works since every
//! operation is a plain blocking call bounded by the store's busy timeout.
//!
//! ```no_run
//! use swarm_bus::{Engine, SendRequest};
//!
//! # fn main() -> swarm_bus::CoordinationResult<()> {
//! let engine = Engine::open(".")?;
//!
//! engine.subscriptions().subscribe("builder-01", "technical")?;
//! engine.messages().send(
//!     &SendRequest::new("planner", "build.request").to("builder-01"),
//!     &serde_json::json!({"target": "release"}),
//! )?;
//!
//! for message in engine.messages().receive("builder-01", &["technical"], 10, None)? {
//!     if engine.messages().claim("builder-01", message.id)? {
//!         // ... do the work ...
//!         engine.messages().complete(message.id, None)?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod agents;
pub mod board;
pub mod engine;
pub mod errors;
pub mod messaging;
pub mod store;
pub mod voting;

pub use agents::{AgentHealth, AgentRegistry, AgentState};
pub use board::{JobBoard, Task, TaskSpec, TaskStatus};
pub use engine::{Engine, EngineConfig, DEFAULT_CHANNELS};
pub use errors::{CoordinationError, CoordinationResult};
pub use messaging::{
    ChannelStats, DeadLetter, HandlerRegistry, Message, MessageQueue, MessageStatus, SendRequest,
    SubscriptionRegistry,
};
pub use store::Store;
pub use voting::{
    Ballot, BallotStatus, CastVote, Mechanism, TallyResult, VoteProposal, VotingLayer,
};

/// Protocol version written by senders and to `protocol_version.txt`
pub const PROTOCOL_VERSION: &str = "1.0";
