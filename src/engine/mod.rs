//! Tool-call execution and round-trip orchestration.
//!
//! The engine owns all per-conversation state:
//! - Deduplication of agent deliveries
//! - The single-batch execution guard
//! - File snapshots for change visualization
//! - Session identifiers echoed back to the agent
//!
//! A delivery flows router → executor → reporter, and the agent's answer
//! to the report arrives as the next delivery.

mod dedup;
mod executor;
mod guard;
mod payload;
mod reporter;
mod router;
mod snapshot;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::channels::PresentationSink;
use crate::tools::{CommandCatalog, FileSystem};

pub use dedup::{DEFAULT_DEDUP_CAPACITY, DedupCache, DedupKey};
pub use executor::{BatchExecutor, BatchRejected, ExecutedBatch, ExecutionBatch};
pub use guard::{BusyPermit, ExecutionGuard};
pub use payload::{
    AgentResponse, CONTENT_FIELDS, SessionFields, extract_content, is_final_turn,
    summarize_command_results,
};
pub use reporter::{
    AgentClient, CommandResultWire, HttpAgentClient, REPORT_MESSAGE, ReplyWait, ReportOutcome,
    ResultReport, ResultReporter, ResultStatus,
};
pub use router::{AgentResponseRouter, PayloadIntent, classify};
pub use snapshot::{DEFAULT_MAX_SNAPSHOTS, FileBackupEntry, FileDiff, FileSnapshotStore};

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Relative command paths resolve against this directory.
    pub workspace_root: PathBuf,
    pub snapshot_capacity: usize,
    pub dedup_capacity: usize,
    /// Where the agent should deliver its next response.
    pub callback_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            snapshot_capacity: DEFAULT_MAX_SNAPSHOTS,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            callback_url: None,
        }
    }
}

/// Collaborators the engine calls out to.
pub struct EngineDeps {
    pub catalog: Arc<dyn CommandCatalog>,
    pub fs: Arc<dyn FileSystem>,
    pub sink: Arc<dyn PresentationSink>,
    pub client: Arc<dyn AgentClient>,
}

/// One conversation's orchestration state.
pub struct Engine {
    router: AgentResponseRouter,
    executor: Arc<BatchExecutor>,
    snapshots: Arc<Mutex<FileSnapshotStore>>,
    guard: Arc<ExecutionGuard>,
    wait: Arc<ReplyWait>,
}

impl Engine {
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Self {
        let guard = Arc::new(ExecutionGuard::new());
        let wait = Arc::new(ReplyWait::new());
        let session = Arc::new(Mutex::new(SessionFields::default()));
        let snapshots = Arc::new(Mutex::new(
            FileSnapshotStore::new(deps.fs, config.workspace_root)
                .with_max_entries(config.snapshot_capacity),
        ));

        let executor = Arc::new(BatchExecutor::new(
            deps.catalog,
            Arc::clone(&snapshots),
            Arc::clone(&guard),
            Arc::clone(&deps.sink),
        ));
        let reporter = Arc::new(ResultReporter::new(
            deps.client,
            Arc::clone(&deps.sink),
            Arc::clone(&wait),
            Arc::clone(&session),
            config.callback_url,
        ));
        let router = AgentResponseRouter::new(
            DedupCache::new(config.dedup_capacity),
            session,
            Arc::clone(&wait),
            Arc::clone(&executor),
            reporter,
            deps.sink,
        );

        Self {
            router,
            executor,
            snapshots,
            guard,
            wait,
        }
    }

    /// Handle one agent delivery.
    pub async fn route(&self, payload: Value) {
        self.router.route(payload).await;
    }

    /// Cancel the batch in flight, if any.
    pub async fn cancel_batch(&self) -> bool {
        self.executor.cancel().await
    }

    /// Whether a batch is executing.
    pub fn is_busy(&self) -> bool {
        self.guard.is_busy()
    }

    /// Whether results were sent and no answer has arrived.
    pub fn is_awaiting_reply(&self) -> bool {
        self.wait.is_awaiting()
    }

    /// Original and current content of a file touched this session.
    pub async fn diff(&self, path: impl AsRef<Path>) -> FileDiff {
        self.snapshots.lock().await.diff(path).await
    }

    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.lock().await.len()
    }

    /// Current session identifiers.
    pub async fn session(&self) -> SessionFields {
        self.router.session().await
    }

    /// Start over: cancel the running batch and forget all session state.
    pub async fn reset_session(&self) {
        if self.executor.cancel().await {
            tracing::info!("Cancelled running batch for session reset");
        }
        self.snapshots.lock().await.clear_all();
        self.router.reset().await;
    }
}
