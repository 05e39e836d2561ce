//! # Engine Handle
//!
//! Explicit handle wiring the store and all components together. There are
//! no process-wide singletons: everything an engine needs is derived from
//! its configuration, and independent engines (e.g. one per test) never
//! share state unless they point at the same project root.
//!
//! ## On-disk layout
//!
//! Rooted at `<project>/.claude/`:
//!
//! ```text
//! .claude/
//! ├── communications/
//! │   ├── messages.db             <- the store (plus WAL sidecars)
//! │   └── protocol_version.txt    <- single line "1.0"
//! ├── artifacts/                  <- large payload blobs, referenced by path
//! └── votes/
//!     └── <vote_id>.json          <- ballot documents
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use crate::agents::AgentRegistry;
use crate::board::JobBoard;
use crate::errors::CoordinationResult;
use crate::messaging::{MessageQueue, SubscriptionRegistry};
use crate::store::Store;
use crate::voting::VotingLayer;
use crate::PROTOCOL_VERSION;

/// Channels every engine seeds at initialization
pub const DEFAULT_CHANNELS: [&str; 4] = ["general", "urgent", "technical", "review"];

/// Engine construction parameters
///
/// The engine reads no environment; everything is configured here. Only the
/// project root is required.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub project_root: PathBuf,
    /// How long a writer waits for the store's write lock before failing
    /// with the transient `StoreBusy` error
    pub busy_timeout: Duration,
    /// Channels seeded (under the `system` subscriber) at initialization
    pub default_channels: Vec<String>,
}

impl EngineConfig {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            busy_timeout: Duration::from_secs(10),
            default_channels: DEFAULT_CHANNELS.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn default_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_channels = channels.into_iter().map(Into::into).collect();
        self
    }
}

/// The coordination engine: store plus all components, ready to share
///
/// Cloning is cheap; clones share the same store handle. The engine is
/// `Send + Sync`; connections stay thread-local underneath.
#[derive(Debug, Clone)]
pub struct Engine {
    store: Store,
    queue: MessageQueue,
    subscriptions: SubscriptionRegistry,
    board: JobBoard,
    agents: AgentRegistry,
    voting: VotingLayer,
    artifacts_dir: PathBuf,
}

impl Engine {
    /// Open (and initialize, if needed) the engine for a project root.
    pub fn open(project_root: impl Into<PathBuf>) -> CoordinationResult<Self> {
        Self::with_config(EngineConfig::new(project_root))
    }

    /// Open the engine with explicit configuration.
    ///
    /// Creates the `.claude/` directory layout, runs the idempotent schema
    /// initialization, seeds the default channels, and writes the protocol
    /// version file.
    pub fn with_config(config: EngineConfig) -> CoordinationResult<Self> {
        let claude_dir = config.project_root.join(".claude");
        let comm_dir = claude_dir.join("communications");
        let artifacts_dir = claude_dir.join("artifacts");
        let votes_dir = claude_dir.join("votes");
        fs::create_dir_all(&comm_dir)?;
        fs::create_dir_all(&artifacts_dir)?;
        fs::create_dir_all(&votes_dir)?;

        let store = Store::new(comm_dir.join("messages.db"), config.busy_timeout);
        store.initialize(&config.default_channels)?;
        fs::write(comm_dir.join("protocol_version.txt"), PROTOCOL_VERSION)?;

        let queue = MessageQueue::new(store.clone());
        let subscriptions = SubscriptionRegistry::new(store.clone());
        let board = JobBoard::new(store.clone());
        let agents = AgentRegistry::new(store.clone());
        let voting = VotingLayer::new(votes_dir, queue.clone(), agents.clone());

        info!(
            db = %store.db_path().display(),
            version = PROTOCOL_VERSION,
            "coordination engine ready"
        );
        Ok(Self {
            store,
            queue,
            subscriptions,
            board,
            agents,
            voting,
            artifacts_dir,
        })
    }

    /// The message queue
    pub fn messages(&self) -> &MessageQueue {
        &self.queue
    }

    /// The channel subscription registry
    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// The job board
    pub fn job_board(&self) -> &JobBoard {
        &self.board
    }

    /// The agent registry
    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    /// The voting layer
    pub fn voting(&self) -> &VotingLayer {
        &self.voting
    }

    /// The underlying store
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Directory for large payload blobs referenced by path
    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }
}
