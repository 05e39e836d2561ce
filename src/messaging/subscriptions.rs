//! Channel subscription registry.
//!
//! Maintains the many-to-many agent/channel map that broadcast fan-out
//! consults. Subscribe and unsubscribe are idempotent; the composite
//! primary key makes a repeated subscribe a no-op rather than an error.

use tracing::debug;

use crate::errors::CoordinationResult;
use crate::store::{now_ts, Store};

/// Agent-to-channel subscription map
#[derive(Debug, Clone)]
pub struct SubscriptionRegistry {
    store: Store,
}

impl SubscriptionRegistry {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }

    /// Subscribe an agent to a channel; repeated calls are no-ops.
    pub fn subscribe(&self, agent_id: &str, channel: &str) -> CoordinationResult<()> {
        self.store.write(|tx| {
            tx.execute(
                "INSERT OR IGNORE INTO channel_subscriptions (channel_name, agent_id, subscribed_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![channel, agent_id, now_ts()],
            )?;
            Ok(())
        })?;
        debug!(agent = %agent_id, channel = %channel, "subscribed");
        Ok(())
    }

    /// Remove an agent's subscription; absent rows are ignored.
    pub fn unsubscribe(&self, agent_id: &str, channel: &str) -> CoordinationResult<()> {
        self.store.write(|tx| {
            tx.execute(
                "DELETE FROM channel_subscriptions
                 WHERE channel_name = ?1 AND agent_id = ?2",
                rusqlite::params![channel, agent_id],
            )?;
            Ok(())
        })?;
        debug!(agent = %agent_id, channel = %channel, "unsubscribed");
        Ok(())
    }

    /// Channels the agent is subscribed to, sorted by name
    pub fn channels_of(&self, agent_id: &str) -> CoordinationResult<Vec<String>> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT channel_name FROM channel_subscriptions
                 WHERE agent_id = ?1
                 ORDER BY channel_name",
            )?;
            let rows = stmt.query_map([agent_id], |row| row.get(0))?;
            let mut channels = Vec::new();
            for row in rows {
                channels.push(row?);
            }
            Ok(channels)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::Engine;

    fn test_engine() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = Engine::open(dir.path()).expect("engine");
        (dir, engine)
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let (_dir, engine) = test_engine();
        let subs = engine.subscriptions();
        subs.subscribe("agent-1", "technical").expect("subscribe");
        subs.subscribe("agent-1", "technical").expect("subscribe");

        assert_eq!(subs.channels_of("agent-1").expect("channels"), ["technical"]);
    }

    #[test]
    fn test_unsubscribe_removes_single_row() {
        let (_dir, engine) = test_engine();
        let subs = engine.subscriptions();
        subs.subscribe("agent-1", "technical").expect("subscribe");
        subs.subscribe("agent-1", "technical").expect("subscribe");
        subs.unsubscribe("agent-1", "technical").expect("unsubscribe");

        assert!(subs.channels_of("agent-1").expect("channels").is_empty());

        // Unsubscribing again is fine.
        subs.unsubscribe("agent-1", "technical").expect("unsubscribe");
    }

    #[test]
    fn test_channels_sorted() {
        let (_dir, engine) = test_engine();
        let subs = engine.subscriptions();
        subs.subscribe("agent-1", "urgent").expect("subscribe");
        subs.subscribe("agent-1", "general").expect("subscribe");
        subs.subscribe("agent-1", "review").expect("subscribe");

        assert_eq!(
            subs.channels_of("agent-1").expect("channels"),
            ["general", "review", "urgent"]
        );
    }

    #[test]
    fn test_system_seeded_with_default_channels() {
        let (_dir, engine) = test_engine();
        assert_eq!(
            engine.subscriptions().channels_of("system").expect("channels"),
            ["general", "review", "technical", "urgent"]
        );
    }
}
