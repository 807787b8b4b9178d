//! Sequential batch execution.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::channels::{EngineEvent, PresentationSink};
use crate::engine::guard::{BusyPermit, ExecutionGuard};
use crate::engine::snapshot::FileSnapshotStore;
use crate::tools::{CommandCall, CommandCatalog, ToolResult};

/// One ordered set of command calls and their results.
#[derive(Debug, Clone)]
pub struct ExecutionBatch {
    pub batch_id: Uuid,
    pub calls: Vec<CommandCall>,
    /// `results[i]` belongs to `calls[i]`.
    pub results: Vec<ToolResult>,
    pub cancelled: bool,
}

impl ExecutionBatch {
    fn new(calls: Vec<CommandCall>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            results: Vec::with_capacity(calls.len()),
            calls,
            cancelled: false,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.ok).count()
    }

    pub fn cancelled_count(&self) -> usize {
        self.results.iter().filter(|r| r.cancelled).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded() - self.cancelled_count()
    }
}

/// A finished batch still holding the execution guard.
///
/// The reporter decides when the guard is released.
#[derive(Debug)]
pub struct ExecutedBatch {
    pub batch: ExecutionBatch,
    pub permit: BusyPermit,
}

impl ExecutedBatch {
    pub fn into_parts(self) -> (ExecutionBatch, BusyPermit) {
        (self.batch, self.permit)
    }
}

/// Why a batch was not run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchRejected {
    #[error("Another batch is already executing")]
    Busy,

    #[error("Batch contains no command calls")]
    Empty,
}

/// Runs command calls one at a time against a [`CommandCatalog`].
pub struct BatchExecutor {
    catalog: Arc<dyn CommandCatalog>,
    snapshots: Arc<Mutex<FileSnapshotStore>>,
    guard: Arc<ExecutionGuard>,
    sink: Arc<dyn PresentationSink>,
    /// Token of the batch in flight, if any.
    current: Mutex<Option<CancellationToken>>,
}

impl BatchExecutor {
    pub fn new(
        catalog: Arc<dyn CommandCatalog>,
        snapshots: Arc<Mutex<FileSnapshotStore>>,
        guard: Arc<ExecutionGuard>,
        sink: Arc<dyn PresentationSink>,
    ) -> Self {
        Self {
            catalog,
            snapshots,
            guard,
            sink,
            current: Mutex::new(None),
        }
    }

    /// Cancel the batch in flight. Calls already running finish; the rest
    /// are reported as cancelled. Returns false if nothing was running.
    pub async fn cancel(&self) -> bool {
        match self.current.lock().await.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Execute `calls` in order.
    ///
    /// Fails with [`BatchRejected::Busy`] if another batch holds the guard.
    /// On success the returned batch carries the permit; dropping it makes
    /// the engine idle again.
    pub async fn run(
        &self,
        calls: Vec<CommandCall>,
        cancel: CancellationToken,
    ) -> Result<ExecutedBatch, BatchRejected> {
        if calls.is_empty() {
            return Err(BatchRejected::Empty);
        }
        let permit = self.guard.try_begin().ok_or(BatchRejected::Busy)?;

        *self.current.lock().await = Some(cancel.clone());
        let batch = self.execute_all(calls, &cancel).await;
        *self.current.lock().await = None;

        Ok(ExecutedBatch { batch, permit })
    }

    async fn execute_all(
        &self,
        calls: Vec<CommandCall>,
        cancel: &CancellationToken,
    ) -> ExecutionBatch {
        let mut batch = ExecutionBatch::new(calls);
        let batch_id = batch.batch_id;
        let total = batch.calls.len();
        let mut modified: Vec<PathBuf> = Vec::new();

        tracing::info!(batch_id = %batch_id, total, "Executing command batch");

        for (index, call) in batch.calls.iter().enumerate() {
            if cancel.is_cancelled() {
                batch.cancelled = true;
                batch.results.push(ToolResult::cancelled(call));
                continue;
            }

            self.sink.post(EngineEvent::ToolStarted {
                batch_id,
                index,
                total,
                command: call.command.clone(),
            });

            let mutating = self.catalog.is_mutating(&call.command);
            let target = if mutating {
                self.snapshot_target(call).await
            } else {
                None
            };

            let result = self.execute_one(call).await;

            tracing::debug!(
                batch_id = %batch_id,
                index,
                command = %call.command,
                ok = result.ok,
                elapsed_ms = result.elapsed_ms,
                "Command finished"
            );

            self.sink.post(EngineEvent::ToolCompleted {
                batch_id,
                index,
                command: call.command.clone(),
                success: result.ok,
            });

            if result.ok
                && let Some(path) = target
                && !modified.contains(&path)
            {
                modified.push(path);
            }
            batch.results.push(result);
        }

        if !modified.is_empty() {
            self.sink.post(EngineEvent::FilesModified { paths: modified });
        }
        self.snapshots.lock().await.evict();

        if batch.cancelled {
            tracing::info!(batch_id = %batch_id, "Batch cancelled");
        }

        self.sink.post(EngineEvent::BatchSummary {
            batch_id,
            total,
            succeeded: batch.succeeded(),
            failed: batch.failed(),
            cancelled: batch.cancelled_count(),
        });

        batch
    }

    /// Capture the call's target file before it is modified.
    ///
    /// Returns the resolved path. Capture errors do not stop the call.
    async fn snapshot_target(&self, call: &CommandCall) -> Option<PathBuf> {
        let path = call.target_path()?;
        let mut store = self.snapshots.lock().await;
        let resolved = store.resolve(path);
        if !store.is_within_root(&resolved) {
            tracing::debug!(
                path = %resolved.display(),
                command = %call.command,
                "Skipping snapshot for path outside workspace"
            );
            return None;
        }
        if let Err(e) = store.capture(path).await {
            tracing::warn!(
                path = %resolved.display(),
                command = %call.command,
                "Failed to snapshot file before modification: {}",
                e
            );
        }
        Some(resolved)
    }

    /// Run one call, converting errors and panics into a failed result.
    async fn execute_one(&self, call: &CommandCall) -> ToolResult {
        let start = Instant::now();
        let outcome = AssertUnwindSafe(self.catalog.execute(call))
            .catch_unwind()
            .await;
        let elapsed = start.elapsed();

        match outcome {
            Ok(Ok(output)) => ToolResult::success(call, output.output, elapsed),
            Ok(Err(e)) => ToolResult::failure(call, e.to_string(), elapsed),
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(command = %call.command, "Command panicked: {}", detail);
                ToolResult::failure(call, format!("Command panicked: {}", detail), elapsed)
            }
        }
    }
}
