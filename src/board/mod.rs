//! # Job Board
//!
//! Task entities with atomic claiming, status updates, and dependency
//! metadata. The open→assigned transition is the only edge the engine
//! enforces (same conditional-UPDATE technique as direct-message claims);
//! every other transition is caller-policed, with
//! [`TaskStatus::can_transition_to`] available as the legality check.
//!
//! Claims and status updates broadcast their coordination messages
//! (`task.claimed`, `task.update`) **inside the same write transaction** as
//! the board mutation, so observers never see a claim without its
//! announcement or vice versa.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{CoordinationError, CoordinationResult};
use crate::messaging::{insert_message, InsertMessage};
use crate::store::{now_ts, parse_ts, Store};

/// Sender id stamped on the board's coordination broadcasts
const BOARD_AGENT: &str = "job-board";

/// Task lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Open,
    Assigned,
    InProgress,
    Done,
    Failed,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Assigned => "assigned",
            Self::InProgress => "in-progress",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "open" => Some(Self::Open),
            "assigned" => Some(Self::Assigned),
            "in-progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    /// Terminal states are immutable except for their result string.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Legality check for the task state machine.
    ///
    /// `open → assigned → in-progress → {done | failed | blocked}`, with
    /// `blocked` allowed back to `in-progress`. The engine itself enforces
    /// only the first edge (via [`JobBoard::claim_task`]); callers police
    /// the rest with this predicate.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (*self, next),
            (Open, Assigned)
                | (Assigned, InProgress)
                | (InProgress, Done)
                | (InProgress, Failed)
                | (InProgress, Blocked)
                | (Blocked, InProgress)
        )
    }
}

/// A task row snapshot
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub assigned_to: Option<String>,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Prerequisite task ids; stored and surfaced, never enforced by claims
    pub dependencies: Vec<String>,
    pub result: Option<String>,
}

/// Parameters for [`JobBoard::create_task`]
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub priority: i32,
    pub dependencies: Vec<String>,
}

impl TaskSpec {
    pub fn new(task_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            title: title.into(),
            description: String::new(),
            priority: 5,
            dependencies: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }
}

/// Shared task board over the coordination store
#[derive(Debug, Clone)]
pub struct JobBoard {
    store: Store,
}

impl JobBoard {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }

    /// Post a new open task.
    pub fn create_task(&self, spec: &TaskSpec) -> CoordinationResult<()> {
        let dependencies = if spec.dependencies.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(&spec.dependencies)
                    .map_err(|e| CoordinationError::payload_not_serializable(e.to_string()))?,
            )
        };
        self.store.write(|tx| {
            let now = now_ts();
            tx.execute(
                "INSERT INTO job_board (
                     task_id, title, description, status, priority,
                     dependencies, created_at, updated_at
                 )
                 VALUES (?1, ?2, ?3, 'open', ?4, ?5, ?6, ?6)",
                rusqlite::params![
                    spec.task_id,
                    spec.title,
                    spec.description,
                    spec.priority,
                    dependencies,
                    now,
                ],
            )?;
            Ok(())
        })?;
        debug!(task_id = %spec.task_id, priority = spec.priority, "task created");
        Ok(())
    }

    /// Atomically claim an open task.
    ///
    /// Returns `true` iff this call performed the open→assigned transition;
    /// losers of the race see `false`. On success a `task.claimed` broadcast
    /// is inserted in the same transaction.
    ///
    /// Dependency satisfaction is **not** checked here; callers that care
    /// pre-check via [`JobBoard::open_tasks`] or [`JobBoard::task`].
    ///
    /// # Errors
    ///
    /// `TaskNotFound` if the task does not exist.
    pub fn claim_task(&self, agent_id: &str, task_id: &str) -> CoordinationResult<bool> {
        let claimed = self.store.write(|tx| {
            let title: Option<String> = tx
                .query_row(
                    "SELECT title FROM job_board WHERE task_id = ?1",
                    [task_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(title) = title else {
                return Err(CoordinationError::task_not_found(task_id));
            };

            let changed = tx.execute(
                "UPDATE job_board
                 SET status = 'assigned', assigned_to = ?1, updated_at = ?2
                 WHERE task_id = ?3 AND status = 'open'",
                rusqlite::params![agent_id, now_ts(), task_id],
            )?;
            if changed != 1 {
                return Ok(false);
            }

            let payload = serde_json::json!({
                "task_id": task_id,
                "title": title,
                "assigned_to": agent_id,
            });
            insert_message(
                tx,
                InsertMessage {
                    from_agent: BOARD_AGENT,
                    to_agent: None,
                    message_type: "task.claimed",
                    channel: "general",
                    priority: 5,
                    correlation_id: None,
                    expires_at: None,
                    payload_json: &payload.to_string(),
                },
            )?;
            Ok(true)
        })?;

        debug!(task_id = %task_id, agent = %agent_id, claimed, "task claim attempt");
        Ok(claimed)
    }

    /// Update a task's status and (optionally) its result string.
    ///
    /// Unguarded: the engine does not validate the transition (use
    /// [`TaskStatus::can_transition_to`] caller-side). A `task.update`
    /// broadcast is inserted in the same transaction.
    ///
    /// # Errors
    ///
    /// `TaskNotFound` if the task does not exist.
    pub fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<&str>,
    ) -> CoordinationResult<()> {
        self.store.write(|tx| {
            let changed = tx.execute(
                "UPDATE job_board
                 SET status = ?1, result = ?2, updated_at = ?3
                 WHERE task_id = ?4",
                rusqlite::params![status.as_str(), result, now_ts(), task_id],
            )?;
            if changed == 0 {
                return Err(CoordinationError::task_not_found(task_id));
            }

            let payload = serde_json::json!({
                "task_id": task_id,
                "status": status.as_str(),
                "result": result,
            });
            insert_message(
                tx,
                InsertMessage {
                    from_agent: BOARD_AGENT,
                    to_agent: None,
                    message_type: "task.update",
                    channel: "general",
                    priority: 5,
                    correlation_id: None,
                    expires_at: None,
                    payload_json: &payload.to_string(),
                },
            )?;
            Ok(())
        })?;
        debug!(task_id = %task_id, status = status.as_str(), "task status updated");
        Ok(())
    }

    /// Open tasks, highest priority first, then oldest first.
    pub fn open_tasks(&self, limit: usize) -> CoordinationResult<Vec<Task>> {
        let limit = limit as i64;
        self.store.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT task_id, title, description, status, assigned_to, priority,
                        created_at, updated_at, dependencies, result
                 FROM job_board
                 WHERE status = 'open'
                 ORDER BY priority DESC, created_at ASC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map([limit], task_from_row)?;
            let mut tasks = Vec::new();
            for row in rows {
                tasks.push(row?);
            }
            Ok(tasks)
        })
    }

    /// Point lookup of a task by id.
    pub fn task(&self, task_id: &str) -> CoordinationResult<Option<Task>> {
        self.store.read(|conn| {
            Ok(conn
                .query_row(
                    "SELECT task_id, title, description, status, assigned_to, priority,
                            created_at, updated_at, dependencies, result
                     FROM job_board
                     WHERE task_id = ?1",
                    [task_id],
                    task_from_row,
                )
                .optional()?)
        })
    }
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status_raw: String = row.get(3)?;
    let status = TaskStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown task status {status_raw:?}").into(),
        )
    })?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    let dependencies: Option<String> = row.get(8)?;
    let dependencies = dependencies
        .as_deref()
        .map(|raw| {
            serde_json::from_str(raw).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    8,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })
        .transpose()?
        .unwrap_or_default();

    Ok(Task {
        task_id: row.get(0)?,
        title: row.get(1)?,
        description: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        status,
        assigned_to: row.get(4)?,
        priority: row.get(5)?,
        created_at: parse_ts(6, &created_at)?,
        updated_at: parse_ts(7, &updated_at)?,
        dependencies,
        result: row.get(9)?,
    })
}
