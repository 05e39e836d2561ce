//! # Coordination Error Types
//!
//! Unified error handling for the coordination engine.
//!
//! Claim races are deliberately **not** errors: losing a contended claim is a
//! normal outcome and is reported as `Ok(false)` by the claim operations.
//! Everything else surfaces here, split into validation, not-found, conflict,
//! and transient kinds. Only transient store contention is worth retrying;
//! see [`CoordinationError::is_recoverable`].

use thiserror::Error;
use uuid::Uuid;

/// Engine operation result type
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Comprehensive error types for coordination operations
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("priority must be within 1-10, got {0}")]
    PriorityOutOfRange(i32),

    #[error("payload is not serializable: {0}")]
    PayloadNotSerializable(String),

    #[error("message not found: {message_id}")]
    MessageNotFound { message_id: Uuid },

    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("vote not found: {vote_id}")]
    VoteNotFound { vote_id: String },

    #[error("a response for correlation id {correlation_id} was already recorded")]
    DuplicateResponseCorrelation { correlation_id: String },

    #[error("message {message_id} carries no correlation id")]
    MissingCorrelation { message_id: Uuid },

    #[error("message {message_id} is a broadcast and cannot be responded to")]
    MissingRecipient { message_id: Uuid },

    #[error("agent {agent_id} is not eligible to vote on {vote_id}")]
    NotEligible { agent_id: String, vote_id: String },

    #[error("agent {agent_id} already voted on {vote_id}")]
    AlreadyVoted { agent_id: String, vote_id: String },

    #[error("invalid choice {choice:?}; options are {options:?}")]
    InvalidChoice { choice: String, options: Vec<String> },

    #[error("vote {vote_id} is still open; pass force to tally early")]
    VoteStillOpen { vote_id: String },

    #[error("vote {vote_id} is closed")]
    VoteClosed { vote_id: String },

    #[error("ballot document for {vote_id} is invalid: {reason}")]
    InvalidBallot { vote_id: String, reason: String },

    #[error("store busy: write lock not acquired within the busy timeout")]
    StoreBusy,

    #[error("store error: {0}")]
    Store(rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoordinationError {
    /// Create a message-not-found error
    pub fn message_not_found(message_id: Uuid) -> Self {
        Self::MessageNotFound { message_id }
    }

    /// Create a task-not-found error
    pub fn task_not_found(task_id: impl Into<String>) -> Self {
        Self::TaskNotFound {
            task_id: task_id.into(),
        }
    }

    /// Create a vote-not-found error
    pub fn vote_not_found(vote_id: impl Into<String>) -> Self {
        Self::VoteNotFound {
            vote_id: vote_id.into(),
        }
    }

    /// Create a payload serialization error
    pub fn payload_not_serializable(reason: impl Into<String>) -> Self {
        Self::PayloadNotSerializable(reason.into())
    }

    /// Create an invalid-ballot error for corrupt or unreadable vote documents
    pub fn invalid_ballot(vote_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidBallot {
            vote_id: vote_id.into(),
            reason: reason.into(),
        }
    }

    /// Check if the error is transient (worth retrying)
    ///
    /// Only store write-lock contention qualifies; validation, not-found and
    /// conflict errors will fail the same way on every retry.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::StoreBusy)
    }
}

impl From<rusqlite::Error> for CoordinationError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, _) = &err {
            if matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) {
                return Self::StoreBusy;
            }
        }
        Self::Store(err)
    }
}

/// Check whether a SQLite failure is a UNIQUE / PRIMARY KEY violation
///
/// Claim and send use this to separate "someone got there first" from real
/// store failures.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
