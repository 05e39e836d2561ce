//! Schema DDL for the coordination store.
//!
//! All statements are idempotent (`IF NOT EXISTS`) so initialization can run
//! on every engine start. Indexes are partial where the hot path only ever
//! touches a slice of the table: pending-message routing, open-task scans,
//! and the response-correlation uniqueness guard.

use rusqlite::Connection;

use crate::errors::CoordinationResult;
use crate::store::now_ts;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    version TEXT NOT NULL DEFAULT '1.0',
    timestamp TEXT NOT NULL,
    correlation_id TEXT,
    from_agent TEXT NOT NULL,
    to_agent TEXT,
    channel TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 5,
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    expires_at TEXT,
    delivery_count INTEGER DEFAULT 0,
    last_delivered_at TEXT,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_ready_messages
    ON messages (channel, status, priority DESC, timestamp)
    WHERE status = 'pending';

CREATE INDEX IF NOT EXISTS idx_correlation
    ON messages (correlation_id)
    WHERE correlation_id IS NOT NULL;

-- One successful response per correlation id, enforced by the store itself.
CREATE UNIQUE INDEX IF NOT EXISTS idx_correlation_unique
    ON messages (correlation_id)
    WHERE correlation_id IS NOT NULL AND type LIKE '%.response';

CREATE INDEX IF NOT EXISTS idx_expiration
    ON messages (expires_at)
    WHERE expires_at IS NOT NULL;

CREATE TABLE IF NOT EXISTS channel_subscriptions (
    channel_name TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    subscribed_at TEXT NOT NULL,
    PRIMARY KEY (channel_name, agent_id)
);

CREATE INDEX IF NOT EXISTS idx_agent_channels
    ON channel_subscriptions (agent_id);

CREATE TABLE IF NOT EXISTS agent_status (
    agent_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    current_task TEXT,
    last_heartbeat TEXT NOT NULL,
    messages_pending INTEGER DEFAULT 0,
    messages_processed INTEGER DEFAULT 0,
    error_count INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS message_deliveries (
    message_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    delivered_at TEXT NOT NULL,
    acknowledged_at TEXT,
    PRIMARY KEY (message_id, agent_id),
    FOREIGN KEY (message_id) REFERENCES messages (id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_undelivered
    ON message_deliveries (agent_id, delivered_at);

CREATE TABLE IF NOT EXISTS dead_letter_queue (
    id TEXT PRIMARY KEY,
    original_message TEXT NOT NULL,
    error TEXT NOT NULL,
    moved_at TEXT NOT NULL,
    retry_count INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS job_board (
    task_id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL DEFAULT 'open',
    assigned_to TEXT,
    priority INTEGER DEFAULT 5,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    dependencies TEXT,
    result TEXT
);

CREATE INDEX IF NOT EXISTS idx_open_tasks
    ON job_board (status, priority DESC)
    WHERE status = 'open';
";

/// Create all tables and indexes, then seed the default channels under the
/// `system` subscriber. Safe to call repeatedly.
pub(crate) fn initialize(
    conn: &Connection,
    default_channels: &[String],
) -> CoordinationResult<()> {
    conn.execute_batch(SCHEMA)?;

    let now = now_ts();
    for channel in default_channels {
        conn.execute(
            "INSERT OR IGNORE INTO channel_subscriptions (channel_name, agent_id, subscribed_at)
             VALUES (?1, 'system', ?2)",
            rusqlite::params![channel, now],
        )?;
    }

    Ok(())
}
