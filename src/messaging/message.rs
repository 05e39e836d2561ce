//! Message envelope and queue-facing value types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Delivery lifecycle of a message row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Visible to receivers
    Pending,
    /// Claimed by a recipient (direct messages only)
    Processing,
    /// Completed successfully
    Done,
    /// Completed with an error
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A message envelope as stored by the engine
///
/// Value snapshot: mutating a `Message` has no effect on the store. The
/// `payload` is decoded JSON; a payload that failed to decode is replaced by
/// an `{"error": "invalid payload"}` marker without touching the row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    /// Dotted type, e.g. `context.query` or `context.response`
    #[serde(rename = "type")]
    pub message_type: String,
    /// Protocol version the sender wrote
    pub version: String,
    pub timestamp: DateTime<Utc>,
    /// Links a response to its request; unique across `*.response` messages
    pub correlation_id: Option<String>,
    pub from_agent: String,
    /// `None` marks a broadcast
    pub to_agent: Option<String>,
    pub channel: String,
    /// 1-10, 10 highest
    pub priority: i32,
    pub payload: Value,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub delivery_count: i64,
    pub last_delivered_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Message {
    /// Whether this message fans out to channel subscribers
    pub fn is_broadcast(&self) -> bool {
        self.to_agent.is_none()
    }
}

/// Parameters for [`MessageQueue::send`](crate::messaging::MessageQueue::send)
///
/// Only sender and type are required; everything else defaults to a
/// broadcast on `general` at priority 5 with no expiry.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub from_agent: String,
    pub message_type: String,
    pub to_agent: Option<String>,
    pub channel: String,
    pub priority: i32,
    pub correlation_id: Option<String>,
    pub ttl: Option<Duration>,
}

impl SendRequest {
    pub fn new(from_agent: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self {
            from_agent: from_agent.into(),
            message_type: message_type.into(),
            to_agent: None,
            channel: "general".to_string(),
            priority: 5,
            correlation_id: None,
            ttl: None,
        }
    }

    /// Address the message to a single recipient instead of broadcasting
    pub fn to(mut self, agent_id: impl Into<String>) -> Self {
        self.to_agent = Some(agent_id.into());
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Soft delivery deadline; expired messages stop being visible and are
    /// removed by `cleanup_expired`
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Pending-backlog snapshot for one channel
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStats {
    pub channel: String,
    pub pending_count: u64,
    /// Age of the oldest pending message, if any
    pub oldest_pending_age_ms: Option<u64>,
}

/// Archived snapshot of a message that failed three processing attempts
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub original_message: Value,
    pub error: String,
    pub moved_at: DateTime<Utc>,
    pub retry_count: i64,
}
