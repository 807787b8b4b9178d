//! Delivery of batch results back to the agent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::channels::{EngineEvent, PresentationSink};
use crate::engine::executor::{ExecutedBatch, ExecutionBatch};
use crate::engine::payload::SessionFields;
use crate::error::ReportError;
use crate::tools::ToolResult;

/// Message sent alongside every result report.
pub const REPORT_MESSAGE: &str = "Command execution results";

/// Outcome status of one command on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
}

/// One command result as the agent expects it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResultWire {
    pub command: String,
    pub status: ResultStatus,
    /// Command output on success, error text on failure.
    pub output: Value,
    pub args: Vec<Value>,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl From<&ToolResult> for CommandResultWire {
    fn from(result: &ToolResult) -> Self {
        let (status, output) = if result.ok {
            (
                ResultStatus::Success,
                result.output.clone().unwrap_or(Value::Null),
            )
        } else {
            (
                ResultStatus::Error,
                Value::String(result.error.clone().unwrap_or_default()),
            )
        };
        Self {
            command: result.command.clone(),
            status,
            output,
            args: result.args.clone(),
            elapsed_ms: result.elapsed_ms,
            id: result.id.clone(),
        }
    }
}

/// Body POSTed to the agent after a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultReport {
    pub message: String,
    pub command_results: Vec<CommandResultWire>,
    #[serde(flatten)]
    pub session: SessionFields,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

/// Transport to the agent service.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn post_results(&self, report: &ResultReport) -> Result<(), ReportError>;
}

/// [`AgentClient`] over HTTP.
pub struct HttpAgentClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAgentClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReportError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn post_results(&self, report: &ResultReport) -> Result<(), ReportError> {
        let response = self.client.post(&self.endpoint).json(report).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Whether results were sent and the agent has not answered yet.
#[derive(Debug, Default)]
pub struct ReplyWait {
    awaiting: AtomicBool,
}

impl ReplyWait {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) {
        self.awaiting.store(true, Ordering::Release);
    }

    pub fn finish(&self) {
        self.awaiting.store(false, Ordering::Release);
    }

    pub fn is_awaiting(&self) -> bool {
        self.awaiting.load(Ordering::Acquire)
    }
}

/// What happened to a batch's results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    Sent,
    /// The batch was cancelled; the agent was not contacted.
    Abandoned,
    Failed(String),
}

/// Converts executed batches to reports and sends them.
pub struct ResultReporter {
    client: Arc<dyn AgentClient>,
    sink: Arc<dyn PresentationSink>,
    wait: Arc<ReplyWait>,
    session: Arc<Mutex<SessionFields>>,
    callback_url: Option<String>,
}

impl ResultReporter {
    pub fn new(
        client: Arc<dyn AgentClient>,
        sink: Arc<dyn PresentationSink>,
        wait: Arc<ReplyWait>,
        session: Arc<Mutex<SessionFields>>,
        callback_url: Option<String>,
    ) -> Self {
        Self {
            client,
            sink,
            wait,
            session,
            callback_url,
        }
    }

    /// Build the report body for `batch`.
    pub fn build_report(&self, batch: &ExecutionBatch, session: SessionFields) -> ResultReport {
        ResultReport {
            message: REPORT_MESSAGE.to_string(),
            command_results: batch.results.iter().map(CommandResultWire::from).collect(),
            session,
            callback_url: self.callback_url.clone(),
        }
    }

    /// Deliver the results of `executed`, consuming its permit.
    ///
    /// The permit is released before the request goes out. A cancelled batch
    /// is dropped without contacting the agent.
    pub async fn report(&self, executed: ExecutedBatch) -> ReportOutcome {
        let (batch, permit) = executed.into_parts();

        if batch.results.iter().any(|r| r.cancelled) {
            permit.release();
            tracing::info!(batch_id = %batch.batch_id, "Not reporting cancelled batch");
            self.sink.post(EngineEvent::TurnAbandoned {
                batch_id: batch.batch_id,
            });
            return ReportOutcome::Abandoned;
        }

        let session = self.session.lock().await.clone();
        let report = self.build_report(&batch, session);

        self.wait.begin();
        // The agent may answer before the POST returns.
        permit.release();

        tracing::debug!(
            batch_id = %batch.batch_id,
            results = report.command_results.len(),
            "Posting command results"
        );

        match self.client.post_results(&report).await {
            Ok(()) => {
                tracing::info!(batch_id = %batch.batch_id, "Command results delivered");
                ReportOutcome::Sent
            }
            Err(e) => {
                tracing::error!(batch_id = %batch.batch_id, "Failed to deliver command results: {}", e);
                self.wait.finish();
                let reason = e.to_string();
                self.sink.post(EngineEvent::WaitingStopped {
                    reason: reason.clone(),
                });
                ReportOutcome::Failed(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::engine::executor::BatchExecutor;
    use crate::engine::executor::tests::{RecordingSink, ScriptedCatalog};
    use crate::engine::guard::ExecutionGuard;
    use crate::engine::snapshot::FileSnapshotStore;
    use crate::tools::{CommandCall, CommandCatalog, FileSystem, MemoryFs};

    /// Records reports and can be told to fail.
    #[derive(Default)]
    struct MockClient {
        reports: StdMutex<Vec<ResultReport>>,
        fail: bool,
        busy_during_post: StdMutex<Option<bool>>,
        guard: StdMutex<Option<Arc<ExecutionGuard>>>,
    }

    #[async_trait]
    impl AgentClient for MockClient {
        async fn post_results(&self, report: &ResultReport) -> Result<(), ReportError> {
            let guard = self.guard.lock().unwrap().clone();
            if let Some(guard) = guard {
                *self.busy_during_post.lock().unwrap() = Some(guard.is_busy());
            }
            self.reports.lock().unwrap().push(report.clone());
            if self.fail {
                return Err(ReportError::Rejected {
                    status: 502,
                    body: "bad gateway".to_string(),
                });
            }
            Ok(())
        }
    }

    struct Fixture {
        guard: Arc<ExecutionGuard>,
        executor: BatchExecutor,
        reporter: ResultReporter,
        client: Arc<MockClient>,
        sink: Arc<RecordingSink>,
        wait: Arc<ReplyWait>,
        session: Arc<Mutex<SessionFields>>,
    }

    fn fixture(fail: bool) -> Fixture {
        let fs = Arc::new(MemoryFs::new());
        let guard = Arc::new(ExecutionGuard::new());
        let sink = Arc::new(RecordingSink::default());
        let client = Arc::new(MockClient {
            fail,
            ..Default::default()
        });
        *client.guard.lock().unwrap() = Some(Arc::clone(&guard));

        let executor = BatchExecutor::new(
            Arc::new(ScriptedCatalog::new(Arc::clone(&fs))) as Arc<dyn CommandCatalog>,
            Arc::new(Mutex::new(FileSnapshotStore::new(
                fs as Arc<dyn FileSystem>,
                "/ws",
            ))),
            Arc::clone(&guard),
            Arc::clone(&sink) as Arc<dyn PresentationSink>,
        );
        let wait = Arc::new(ReplyWait::new());
        let session = Arc::new(Mutex::new(SessionFields::default()));
        let reporter = ResultReporter::new(
            Arc::clone(&client) as Arc<dyn AgentClient>,
            Arc::clone(&sink) as Arc<dyn PresentationSink>,
            Arc::clone(&wait),
            Arc::clone(&session),
            Some("http://127.0.0.1:8787/webhook".to_string()),
        );
        Fixture {
            guard,
            executor,
            reporter,
            client,
            sink,
            wait,
            session,
        }
    }

    fn calls() -> Vec<CommandCall> {
        vec![
            CommandCall::new("echo", vec![json!("a")]).with_id("c1"),
            CommandCall::new("fail", vec![json!(1)]),
        ]
    }

    #[test]
    fn test_wire_format() {
        let ok = ToolResult::success(
            &CommandCall::new("read", vec![json!("a.txt")]).with_id("1"),
            json!("contents"),
            Duration::from_millis(12),
        );
        let err = ToolResult::failure(
            &CommandCall::new("read", vec![json!("b.txt")]),
            "not found",
            Duration::from_millis(3),
        );

        assert_eq!(
            serde_json::to_value(CommandResultWire::from(&ok)).unwrap(),
            json!({
                "command": "read",
                "status": "success",
                "output": "contents",
                "args": ["a.txt"],
                "elapsed_ms": 12,
                "id": "1"
            })
        );
        assert_eq!(
            serde_json::to_value(CommandResultWire::from(&err)).unwrap(),
            json!({
                "command": "read",
                "status": "error",
                "output": "not found",
                "args": ["b.txt"],
                "elapsed_ms": 3
            })
        );
    }

    #[tokio::test]
    async fn test_report_flattens_session_fields() {
        let f = fixture(false);
        *f.session.lock().await = SessionFields {
            task_id: Some("t-1".to_string()),
            session_id: None,
            conversation_id: Some("c-9".to_string()),
        };

        let executed = f
            .executor
            .run(calls(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(f.reporter.report(executed).await, ReportOutcome::Sent);

        let report = f.client.reports.lock().unwrap()[0].clone();
        let body = serde_json::to_value(&report).unwrap();
        assert_eq!(body["message"], REPORT_MESSAGE);
        assert_eq!(body["task_id"], "t-1");
        assert_eq!(body["conversation_id"], "c-9");
        assert!(body.get("session_id").is_none());
        assert_eq!(body["callback_url"], "http://127.0.0.1:8787/webhook");
        assert_eq!(body["command_results"].as_array().unwrap().len(), 2);
        assert_eq!(body["command_results"][1]["status"], "error");
    }

    #[tokio::test]
    async fn test_guard_released_before_post() {
        let f = fixture(false);
        let executed = f
            .executor
            .run(calls(), CancellationToken::new())
            .await
            .unwrap();
        assert!(f.guard.is_busy());

        f.reporter.report(executed).await;

        assert_eq!(*f.client.busy_during_post.lock().unwrap(), Some(false));
        assert!(f.wait.is_awaiting());
    }

    #[tokio::test]
    async fn test_cancelled_batch_not_reported() {
        let f = fixture(false);
        let token = CancellationToken::new();
        token.cancel();

        let executed = f.executor.run(calls(), token).await.unwrap();
        let batch_id = executed.batch.batch_id;
        assert_eq!(f.reporter.report(executed).await, ReportOutcome::Abandoned);

        assert!(f.client.reports.lock().unwrap().is_empty());
        assert!(!f.guard.is_busy());
        assert!(!f.wait.is_awaiting());
        assert!(
            f.sink
                .events()
                .contains(&EngineEvent::TurnAbandoned { batch_id })
        );
    }

    #[tokio::test]
    async fn test_failed_post_stops_waiting() {
        let f = fixture(true);
        let executed = f
            .executor
            .run(calls(), CancellationToken::new())
            .await
            .unwrap();

        let outcome = f.reporter.report(executed).await;
        assert!(matches!(outcome, ReportOutcome::Failed(ref reason) if reason.contains("502")));
        assert!(!f.wait.is_awaiting());
        assert!(!f.guard.is_busy());
        assert_eq!(f.sink.kinds().last(), Some(&"waiting_stopped"));
    }
}
