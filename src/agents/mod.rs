//! # Agent Registry
//!
//! Heartbeats, current-task tags, and aggregate message counters.
//!
//! Heartbeats are last-write-wins upserts. The three counters
//! (`messages_pending`, `messages_processed`, `error_count`) are never
//! written by agents directly; they mutate only inside message-queue
//! transactions so they stay consistent with the message log.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::CoordinationResult;
use crate::store::{now_ts, parse_ts, Store};

/// Reported liveness state of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Active,
    Idle,
    Degraded,
    Failed,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "idle" => Some(Self::Idle),
            "degraded" => Some(Self::Degraded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Registry row snapshot for one agent
#[derive(Debug, Clone, Serialize)]
pub struct AgentHealth {
    pub agent_id: String,
    pub state: AgentState,
    pub current_task: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub messages_pending: i64,
    pub messages_processed: i64,
    pub error_count: i64,
}

/// Agent liveness registry over the coordination store
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    store: Store,
}

impl AgentRegistry {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }

    /// Record a heartbeat, registering the agent on first contact.
    ///
    /// Last write wins for state, task tag and timestamp; the counters are
    /// untouched.
    pub fn heartbeat(
        &self,
        agent_id: &str,
        state: AgentState,
        current_task: Option<&str>,
    ) -> CoordinationResult<()> {
        self.store.write(|tx| {
            tx.execute(
                "INSERT INTO agent_status (agent_id, status, current_task, last_heartbeat)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (agent_id) DO UPDATE SET
                     status = excluded.status,
                     current_task = excluded.current_task,
                     last_heartbeat = excluded.last_heartbeat",
                rusqlite::params![agent_id, state.as_str(), current_task, now_ts()],
            )?;
            Ok(())
        })?;
        debug!(agent = %agent_id, state = state.as_str(), "heartbeat");
        Ok(())
    }

    /// Health snapshot of one agent, if it ever heartbeat.
    pub fn health(&self, agent_id: &str) -> CoordinationResult<Option<AgentHealth>> {
        self.store.read(|conn| {
            Ok(conn
                .query_row(
                    "SELECT agent_id, status, current_task, last_heartbeat,
                            messages_pending, messages_processed, error_count
                     FROM agent_status
                     WHERE agent_id = ?1",
                    [agent_id],
                    health_from_row,
                )
                .optional()?)
        })
    }

    /// Ids of all registered agents, sorted.
    pub fn agents(&self) -> CoordinationResult<Vec<String>> {
        self.store.read(|conn| {
            let mut stmt =
                conn.prepare("SELECT agent_id FROM agent_status ORDER BY agent_id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            let mut agents = Vec::new();
            for row in rows {
                agents.push(row?);
            }
            Ok(agents)
        })
    }
}

fn health_from_row(row: &Row<'_>) -> rusqlite::Result<AgentHealth> {
    let state_raw: String = row.get(1)?;
    let state = AgentState::parse(&state_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown agent state {state_raw:?}").into(),
        )
    })?;
    let last_heartbeat: String = row.get(3)?;

    Ok(AgentHealth {
        agent_id: row.get(0)?,
        state,
        current_task: row.get(2)?,
        last_heartbeat: parse_ts(3, &last_heartbeat)?,
        messages_pending: row.get(4)?,
        messages_processed: row.get(5)?,
        error_count: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::messaging::SendRequest;

    fn test_engine() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = Engine::open(dir.path()).expect("engine");
        (dir, engine)
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            AgentState::Active,
            AgentState::Idle,
            AgentState::Degraded,
            AgentState::Failed,
        ] {
            assert_eq!(AgentState::parse(state.as_str()), Some(state));
        }
        assert_eq!(AgentState::parse("sleeping"), None);
    }

    #[test]
    fn test_heartbeat_registers_and_updates() {
        let (_dir, engine) = test_engine();
        let registry = engine.agents();

        assert!(registry.health("agent-1").expect("health").is_none());

        registry
            .heartbeat("agent-1", AgentState::Active, Some("indexing"))
            .expect("heartbeat");
        let health = registry.health("agent-1").expect("health").expect("row");
        assert_eq!(health.state, AgentState::Active);
        assert_eq!(health.current_task.as_deref(), Some("indexing"));
        assert_eq!(health.messages_processed, 0);

        // Last write wins.
        registry
            .heartbeat("agent-1", AgentState::Idle, None)
            .expect("heartbeat");
        let health = registry.health("agent-1").expect("health").expect("row");
        assert_eq!(health.state, AgentState::Idle);
        assert!(health.current_task.is_none());
    }

    #[test]
    fn test_agents_enumeration_sorted() {
        let (_dir, engine) = test_engine();
        let registry = engine.agents();
        registry
            .heartbeat("agent-b", AgentState::Active, None)
            .expect("heartbeat");
        registry
            .heartbeat("agent-a", AgentState::Active, None)
            .expect("heartbeat");

        assert_eq!(registry.agents().expect("agents"), ["agent-a", "agent-b"]);
    }

    #[test]
    fn test_counters_follow_message_lifecycle() {
        let (_dir, engine) = test_engine();
        let registry = engine.agents();
        let queue = engine.messages();
        registry
            .heartbeat("sender", AgentState::Active, None)
            .expect("heartbeat");
        registry
            .heartbeat("receiver", AgentState::Active, None)
            .expect("heartbeat");

        let message_id = queue
            .send(
                &SendRequest::new("sender", "work.item").to("receiver"),
                &serde_json::json!({}),
            )
            .expect("send");
        let health = registry.health("receiver").expect("health").expect("row");
        assert_eq!(health.messages_pending, 1);

        assert!(queue.claim("receiver", message_id).expect("claim"));
        let health = registry.health("receiver").expect("health").expect("row");
        assert_eq!(health.messages_pending, 0);

        queue.complete(message_id, None).expect("complete");
        let receiver = registry.health("receiver").expect("health").expect("row");
        let sender = registry.health("sender").expect("health").expect("row");
        assert_eq!(receiver.messages_processed, 1);
        assert_eq!(sender.messages_processed, 1);
        assert_eq!(receiver.error_count, 0);
    }
}
