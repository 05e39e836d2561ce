//! # Message Queue
//!
//! Durable, priority-ordered, channel-routed message log with direct and
//! broadcast delivery, per-recipient delivery tracking for broadcasts, TTL
//! expiry, and a dead-letter queue.
//!
//! ## Claim exclusivity
//!
//! No row locks are taken anywhere. A direct message is claimed with a
//! conditional `UPDATE … WHERE status = 'pending'`; among concurrent
//! contenders exactly one statement changes a row and that caller gets
//! `true`. A broadcast is claimed by inserting into the per-recipient
//! delivery table; the composite primary key turns a second claim by the
//! same agent into a unique violation, reported as `false`. Losing either
//! race is a normal outcome, not an error.

use rusqlite::{OptionalExtension, Row, ToSql, Transaction};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{is_unique_violation, CoordinationError, CoordinationResult};
use crate::messaging::message::{ChannelStats, DeadLetter, Message, MessageStatus, SendRequest};
use crate::store::{format_ts, now_ts, parse_ts, parse_ts_opt, Store};
use crate::PROTOCOL_VERSION;

/// Failures are retried up to this many deliveries before the message is
/// moved to the dead-letter queue.
const MAX_DELIVERY_ATTEMPTS: i64 = 3;

const MESSAGE_COLUMNS: &str = "id, type, version, timestamp, correlation_id, from_agent, \
     to_agent, channel, priority, payload, status, created_at, expires_at, \
     delivery_count, last_delivered_at, error";

/// Durable message queue over the coordination store
#[derive(Debug, Clone)]
pub struct MessageQueue {
    store: Store,
}

impl MessageQueue {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }

    /// Send a message; returns its id.
    ///
    /// A request with `to_agent` set is a direct message and bumps the
    /// recipient's pending counter in the same transaction. A request
    /// without a recipient is a broadcast on the request's channel.
    ///
    /// # Errors
    ///
    /// `PriorityOutOfRange` for priorities outside 1-10,
    /// `PayloadNotSerializable` when the payload cannot be encoded, and
    /// `DuplicateResponseCorrelation` when a `*.response` with the same
    /// correlation id was already recorded.
    pub fn send<T: Serialize>(
        &self,
        request: &SendRequest,
        payload: &T,
    ) -> CoordinationResult<Uuid> {
        if !(1..=10).contains(&request.priority) {
            return Err(CoordinationError::PriorityOutOfRange(request.priority));
        }
        let payload_json = serde_json::to_string(payload)
            .map_err(|e| CoordinationError::payload_not_serializable(e.to_string()))?;
        let expires_at = request.ttl.map(|ttl| {
            format_ts(chrono::Utc::now() + chrono::Duration::milliseconds(ttl.as_millis() as i64))
        });

        let message_id = self.store.write(|tx| {
            insert_message(
                tx,
                InsertMessage {
                    from_agent: &request.from_agent,
                    to_agent: request.to_agent.as_deref(),
                    message_type: &request.message_type,
                    channel: &request.channel,
                    priority: request.priority,
                    correlation_id: request.correlation_id.as_deref(),
                    expires_at,
                    payload_json: &payload_json,
                },
            )
        })?;

        debug!(
            message_id = %message_id,
            message_type = %request.message_type,
            from = %request.from_agent,
            to = request.to_agent.as_deref().unwrap_or("<broadcast>"),
            channel = %request.channel,
            "message sent"
        );
        Ok(message_id)
    }

    /// Fetch pending messages visible to an agent.
    ///
    /// Returns, in priority-descending then oldest-first order:
    /// - direct messages addressed to `agent_id`, regardless of channel;
    /// - broadcasts on any of `channels` that the agent is subscribed to and
    ///   has not yet claimed.
    ///
    /// Expired messages are filtered out; `type_filter` restricts to an
    /// exact dotted type. Rows are returned as value snapshots and are not
    /// mutated by receiving them.
    pub fn receive(
        &self,
        agent_id: &str,
        channels: &[&str],
        limit: usize,
        type_filter: Option<&str>,
    ) -> CoordinationResult<Vec<Message>> {
        let broadcast_arm = if channels.is_empty() {
            "0".to_string()
        } else {
            let placeholders = vec!["?"; channels.len()].join(", ");
            format!(
                "m.to_agent IS NULL
                 AND m.channel IN ({placeholders})
                 AND EXISTS (
                     SELECT 1 FROM channel_subscriptions cs
                     WHERE cs.channel_name = m.channel AND cs.agent_id = ?
                 )
                 AND NOT EXISTS (
                     SELECT 1 FROM message_deliveries md
                     WHERE md.message_id = m.id AND md.agent_id = ?
                 )"
            )
        };
        let type_clause = if type_filter.is_some() {
            "AND m.type = ?"
        } else {
            ""
        };
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m
             WHERE m.status = 'pending'
               AND (m.to_agent = ? OR ({broadcast_arm}))
               {type_clause}
               AND (m.expires_at IS NULL OR m.expires_at > ?)
             ORDER BY m.priority DESC, m.timestamp ASC
             LIMIT ?"
        );

        let now = now_ts();
        let limit = limit as i64;
        self.store.read(|conn| {
            let mut params: Vec<&dyn ToSql> = Vec::with_capacity(channels.len() + 5);
            params.push(&agent_id);
            if !channels.is_empty() {
                for channel in channels {
                    params.push(channel);
                }
                params.push(&agent_id);
                params.push(&agent_id);
            }
            if let Some(ref message_type) = type_filter {
                params.push(message_type);
            }
            params.push(&now);
            params.push(&limit);

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(params), message_from_row)?;
            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?);
            }
            Ok(messages)
        })
    }

    /// Atomically claim a message for processing.
    ///
    /// Returns `true` iff this call won the claim; `false` means another
    /// contender (or, for broadcasts, an earlier claim by the same agent)
    /// got there first. Direct messages move to `processing`; a broadcast
    /// stays `pending` so other subscribers can still claim their copy.
    ///
    /// # Errors
    ///
    /// `MessageNotFound` if the message does not exist.
    pub fn claim(&self, agent_id: &str, message_id: Uuid) -> CoordinationResult<bool> {
        let id = message_id.to_string();
        let claimed = self.store.write(|tx| {
            let recipient: Option<Option<String>> = tx
                .query_row(
                    "SELECT to_agent FROM messages WHERE id = ?1",
                    [&id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(recipient) = recipient else {
                return Err(CoordinationError::message_not_found(message_id));
            };

            match recipient {
                // Broadcast: claim by recording a delivery for this agent.
                None => {
                    let inserted = tx.execute(
                        "INSERT INTO message_deliveries (message_id, agent_id, delivered_at)
                         VALUES (?1, ?2, ?3)",
                        rusqlite::params![id, agent_id, now_ts()],
                    );
                    match inserted {
                        Ok(_) => Ok(true),
                        Err(err) if is_unique_violation(&err) => Ok(false),
                        Err(err) => Err(err.into()),
                    }
                }
                // Direct: conditional update guarded by the pending status.
                Some(recipient) => {
                    let changed = tx.execute(
                        "UPDATE messages
                         SET status = 'processing',
                             last_delivered_at = ?1,
                             delivery_count = delivery_count + 1
                         WHERE id = ?2 AND status = 'pending'",
                        rusqlite::params![now_ts(), id],
                    )?;
                    if changed == 1 {
                        tx.execute(
                            "UPDATE agent_status
                             SET messages_pending = messages_pending - 1
                             WHERE agent_id = ?1",
                            [&recipient],
                        )?;
                        Ok(true)
                    } else {
                        Ok(false)
                    }
                }
            }
        })?;

        debug!(message_id = %message_id, agent = %agent_id, claimed, "claim attempt");
        Ok(claimed)
    }

    /// Mark a message done, or failed when `error` is given.
    ///
    /// A message failing its third delivery is snapshotted into the
    /// dead-letter queue and removed from the active table. Sender and
    /// recipient processed/error counters are updated either way.
    pub fn complete(&self, message_id: Uuid, error: Option<&str>) -> CoordinationResult<()> {
        let id = message_id.to_string();
        self.store.write(|tx| {
            let row = tx
                .query_row(
                    "SELECT delivery_count, from_agent, to_agent, type, channel, payload
                     FROM messages WHERE id = ?1",
                    [&id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                        ))
                    },
                )
                .optional()?;
            let Some((delivery_count, from_agent, to_agent, message_type, channel, payload)) = row
            else {
                return Err(CoordinationError::message_not_found(message_id));
            };

            let status = if error.is_some() {
                MessageStatus::Failed
            } else {
                MessageStatus::Done
            };
            tx.execute(
                "UPDATE messages SET status = ?1, error = ?2 WHERE id = ?3",
                rusqlite::params![status.as_str(), error, id],
            )?;

            if let Some(error_text) = error {
                if delivery_count >= MAX_DELIVERY_ATTEMPTS {
                    let snapshot = serde_json::json!({
                        "id": id,
                        "type": message_type,
                        "from_agent": from_agent,
                        "to_agent": to_agent,
                        "channel": channel,
                        "payload": decode_payload(message_id, &payload),
                    });
                    tx.execute(
                        "INSERT INTO dead_letter_queue (id, original_message, error, moved_at, retry_count)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        rusqlite::params![
                            Uuid::new_v4().to_string(),
                            snapshot.to_string(),
                            error_text,
                            now_ts(),
                            delivery_count,
                        ],
                    )?;
                    tx.execute("DELETE FROM messages WHERE id = ?1", [&id])?;
                    warn!(
                        message_id = %message_id,
                        delivery_count,
                        "message moved to dead-letter queue"
                    );
                }
            }

            let error_increment = i64::from(error.is_some());
            let counterparty = to_agent.unwrap_or_else(|| from_agent.clone());
            tx.execute(
                "UPDATE agent_status
                 SET messages_processed = messages_processed + 1,
                     error_count = error_count + ?1
                 WHERE agent_id IN (?2, ?3)",
                rusqlite::params![error_increment, from_agent, counterparty],
            )?;
            Ok(())
        })
    }

    /// Send the response to a request message.
    ///
    /// The response flows back over the request's channel and priority,
    /// from the request's recipient to its sender, carrying the same
    /// correlation id. The response type is the request type with its last
    /// dotted segment replaced by `response`. At most one response per
    /// correlation id ever succeeds; a second attempt fails with
    /// `DuplicateResponseCorrelation`.
    ///
    /// An `artifact_path` is spliced into the response payload so large
    /// blobs can travel by reference.
    pub fn send_response<T: Serialize>(
        &self,
        original: &Message,
        payload: &T,
        artifact_path: Option<&str>,
    ) -> CoordinationResult<Uuid> {
        let correlation_id = original.correlation_id.as_deref().ok_or(
            CoordinationError::MissingCorrelation {
                message_id: original.id,
            },
        )?;
        let responder =
            original
                .to_agent
                .as_deref()
                .ok_or(CoordinationError::MissingRecipient {
                    message_id: original.id,
                })?;

        let mut payload = serde_json::to_value(payload)
            .map_err(|e| CoordinationError::payload_not_serializable(e.to_string()))?;
        if let Some(path) = artifact_path {
            match payload.as_object_mut() {
                Some(object) => {
                    object.insert("artifact_path".to_string(), Value::String(path.to_string()));
                }
                None => {
                    return Err(CoordinationError::payload_not_serializable(
                        "artifact paths require an object payload",
                    ));
                }
            }
        }

        let request = SendRequest::new(responder, response_type(&original.message_type))
            .to(original.from_agent.clone())
            .channel(original.channel.clone())
            .priority(original.priority)
            .correlation_id(correlation_id);
        self.send(&request, &payload)
    }

    /// Delete messages whose expiry has passed; returns how many.
    pub fn cleanup_expired(&self) -> CoordinationResult<usize> {
        let deleted = self.store.write(|tx| {
            Ok(tx.execute(
                "DELETE FROM messages
                 WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                [now_ts()],
            )?)
        })?;
        if deleted > 0 {
            debug!(deleted, "expired messages removed");
        }
        Ok(deleted)
    }

    /// Point lookup of a message by id.
    ///
    /// # Errors
    ///
    /// `MessageNotFound` if the message does not exist (it may have expired
    /// or been moved to the dead-letter queue).
    pub fn message(&self, message_id: Uuid) -> CoordinationResult<Message> {
        let id = message_id.to_string();
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1");
        self.store.read(|conn| {
            conn.query_row(&sql, [&id], message_from_row)
                .optional()?
                .ok_or(CoordinationError::message_not_found(message_id))
        })
    }

    /// Pending-backlog statistics for one channel
    pub fn channel_stats(&self, channel: &str) -> CoordinationResult<ChannelStats> {
        self.store.read(|conn| {
            let (pending_count, oldest): (i64, Option<String>) = conn.query_row(
                "SELECT COUNT(*), MIN(timestamp) FROM messages
                 WHERE channel = ?1 AND status = 'pending'",
                [channel],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let oldest_pending_age_ms = oldest
                .as_deref()
                .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
                .map(|ts| {
                    (chrono::Utc::now() - ts.with_timezone(&chrono::Utc))
                        .num_milliseconds()
                        .max(0) as u64
                });
            Ok(ChannelStats {
                channel: channel.to_string(),
                pending_count: pending_count as u64,
                oldest_pending_age_ms,
            })
        })
    }

    /// Most recently dead-lettered messages, newest first.
    ///
    /// The engine only ever writes the dead-letter queue; this read-back
    /// exists for out-of-band inspection and tooling.
    pub fn dead_letters(&self, limit: usize) -> CoordinationResult<Vec<DeadLetter>> {
        let limit = limit as i64;
        self.store.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, original_message, error, moved_at, retry_count
                 FROM dead_letter_queue
                 ORDER BY moved_at DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map([limit], |row| {
                let id: String = row.get(0)?;
                let original_raw: String = row.get(1)?;
                let moved_at: String = row.get(3)?;
                Ok(DeadLetter {
                    id: parse_uuid(0, &id)?,
                    original_message: serde_json::from_str(&original_raw)
                        .unwrap_or(Value::String(original_raw)),
                    error: row.get(2)?,
                    moved_at: parse_ts(3, &moved_at)?,
                    retry_count: row.get(4)?,
                })
            })?;
            let mut letters = Vec::new();
            for row in rows {
                letters.push(row?);
            }
            Ok(letters)
        })
    }
}

// =============================================================================
// Crate-internal insertion (shared with the job board's transactional emits)
// =============================================================================

/// Column values for one message insert
pub(crate) struct InsertMessage<'a> {
    pub from_agent: &'a str,
    pub to_agent: Option<&'a str>,
    pub message_type: &'a str,
    pub channel: &'a str,
    pub priority: i32,
    pub correlation_id: Option<&'a str>,
    pub expires_at: Option<String>,
    pub payload_json: &'a str,
}

/// Insert a pending message inside an open write transaction.
///
/// Used by [`MessageQueue::send`] and by components that must emit a
/// coordination broadcast atomically with their own mutation (the job
/// board). Direct messages bump the recipient's pending counter.
pub(crate) fn insert_message(
    tx: &Transaction<'_>,
    message: InsertMessage<'_>,
) -> CoordinationResult<Uuid> {
    let id = Uuid::new_v4();
    let now = now_ts();
    tx.execute(
        "INSERT INTO messages (
             id, type, version, timestamp, correlation_id,
             from_agent, to_agent, channel, priority, payload,
             status, created_at, expires_at
         )
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending', ?11, ?12)",
        rusqlite::params![
            id.to_string(),
            message.message_type,
            PROTOCOL_VERSION,
            now,
            message.correlation_id,
            message.from_agent,
            message.to_agent,
            message.channel,
            message.priority,
            message.payload_json,
            now,
            message.expires_at,
        ],
    )
    .map_err(|err| classify_insert_error(err, message.message_type, message.correlation_id))?;

    if let Some(recipient) = message.to_agent {
        tx.execute(
            "UPDATE agent_status
             SET messages_pending = messages_pending + 1
             WHERE agent_id = ?1",
            [recipient],
        )?;
    }
    Ok(id)
}

/// Derive `X.response` from a request type `X.Y`
fn response_type(request_type: &str) -> String {
    match request_type.rsplit_once('.') {
        Some((base, _)) => format!("{base}.response"),
        None => "response".to_string(),
    }
}

fn classify_insert_error(
    err: rusqlite::Error,
    message_type: &str,
    correlation_id: Option<&str>,
) -> CoordinationError {
    if is_unique_violation(&err) && message_type.ends_with(".response") {
        if let Some(correlation_id) = correlation_id {
            return CoordinationError::DuplicateResponseCorrelation {
                correlation_id: correlation_id.to_string(),
            };
        }
    }
    err.into()
}

fn decode_payload(message_id: Uuid, raw: &str) -> Value {
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(message_id = %message_id, error = %err, "undecodable message payload");
            serde_json::json!({"error": "invalid payload"})
        }
    }
}

fn parse_uuid(idx: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_status(idx: usize, raw: &str) -> rusqlite::Result<MessageStatus> {
    MessageStatus::parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown message status {raw:?}").into(),
        )
    })
}

/// Map one `messages` row (selected via [`MESSAGE_COLUMNS`]) to a snapshot
fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let id_raw: String = row.get(0)?;
    let id = parse_uuid(0, &id_raw)?;
    let timestamp: String = row.get(3)?;
    let payload_raw: String = row.get(9)?;
    let status_raw: String = row.get(10)?;
    let created_at: String = row.get(11)?;

    Ok(Message {
        id,
        message_type: row.get(1)?,
        version: row.get(2)?,
        timestamp: parse_ts(3, &timestamp)?,
        correlation_id: row.get(4)?,
        from_agent: row.get(5)?,
        to_agent: row.get(6)?,
        channel: row.get(7)?,
        priority: row.get(8)?,
        payload: decode_payload(id, &payload_raw),
        status: parse_status(10, &status_raw)?,
        created_at: parse_ts(11, &created_at)?,
        expires_at: parse_ts_opt(12, row.get(12)?)?,
        delivery_count: row.get(13)?,
        last_delivered_at: parse_ts_opt(14, row.get(14)?)?,
        error: row.get(15)?,
    })
}
