//! Dispatch of agent callback payloads.
//!
//! Every delivery goes through [`AgentResponseRouter::route`]. Repeated
//! deliveries are dropped, then the payload is classified as a status
//! notice, a command batch or an answer.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::channels::{EngineEvent, PresentationSink};
use crate::engine::dedup::{DedupCache, DedupKey};
use crate::engine::executor::{BatchExecutor, BatchRejected};
use crate::engine::payload::{AgentResponse, SessionFields, summarize_command_results};
use crate::engine::reporter::{ReplyWait, ResultReporter};
use crate::tools::CommandCall;

/// What a payload asks the engine to do.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadIntent {
    /// The agent is still working.
    Status { message: String },
    /// Execute commands; `content` is narration shown alongside.
    ToolBatch {
        content: String,
        calls: Vec<CommandCall>,
    },
    /// Prose to show, possibly ending the conversation.
    Answer { content: String, is_final: bool },
    /// Nothing usable in the payload.
    Empty,
}

/// Classify an extracted payload.
pub fn classify(response: &AgentResponse) -> PayloadIntent {
    if response.is_working_status() {
        let message = if response.content.is_empty() {
            response.status.clone().unwrap_or_default()
        } else {
            response.content.clone()
        };
        return PayloadIntent::Status { message };
    }

    if response.has_command_calls() {
        return PayloadIntent::ToolBatch {
            content: response.content.clone(),
            calls: response.command_calls.clone(),
        };
    }

    let is_final = response.is_final();
    if !response.content.is_empty() {
        return PayloadIntent::Answer {
            content: response.content.clone(),
            is_final,
        };
    }

    match &response.command_results {
        Some(results) => PayloadIntent::Answer {
            content: summarize_command_results(results),
            is_final,
        },
        None => PayloadIntent::Empty,
    }
}

/// Routes agent deliveries to the executor and the presentation sink.
pub struct AgentResponseRouter {
    dedup: Mutex<DedupCache>,
    session: Arc<Mutex<SessionFields>>,
    wait: Arc<ReplyWait>,
    executor: Arc<BatchExecutor>,
    reporter: Arc<ResultReporter>,
    sink: Arc<dyn PresentationSink>,
}

impl AgentResponseRouter {
    pub fn new(
        dedup: DedupCache,
        session: Arc<Mutex<SessionFields>>,
        wait: Arc<ReplyWait>,
        executor: Arc<BatchExecutor>,
        reporter: Arc<ResultReporter>,
        sink: Arc<dyn PresentationSink>,
    ) -> Self {
        Self {
            dedup: Mutex::new(dedup),
            session,
            wait,
            executor,
            reporter,
            sink,
        }
    }

    /// Handle one delivery. All effects happen through the sink, the
    /// executor and the reporter. Only a tool batch or an answer ends the
    /// wait for a reply; status notices leave it running.
    pub async fn route(&self, payload: Value) {
        let key = DedupKey::of(&payload);
        if !self.dedup.lock().await.insert(key) {
            tracing::debug!(key = %key.to_hex(), "Ignoring duplicate agent delivery");
            return;
        }

        let Some(response) = AgentResponse::from_value(&payload) else {
            tracing::warn!("Agent payload is not a JSON object, ignoring");
            return;
        };

        if !response.session.is_empty() {
            self.session.lock().await.merge(&response.session);
        }

        match classify(&response) {
            PayloadIntent::Status { message } => {
                self.sink.post(EngineEvent::Status { message });
            }
            PayloadIntent::ToolBatch { content, calls } => {
                self.wait.finish();
                if !content.is_empty() {
                    self.sink.post(EngineEvent::AgentMessage {
                        content,
                        is_final: false,
                    });
                }
                self.run_batch(calls).await;
            }
            PayloadIntent::Answer { content, is_final } => {
                self.wait.finish();
                self.sink
                    .post(EngineEvent::AgentMessage { content, is_final });
            }
            PayloadIntent::Empty => {
                tracing::warn!(
                    "Agent payload has no content, command calls or command results; treating as empty turn"
                );
            }
        }
    }

    async fn run_batch(&self, calls: Vec<CommandCall>) {
        let total = calls.len();
        match self.executor.run(calls, CancellationToken::new()).await {
            Ok(executed) => {
                self.reporter.report(executed).await;
            }
            Err(BatchRejected::Busy) => {
                tracing::warn!(total, "Dropping command batch: another batch is executing");
            }
            Err(BatchRejected::Empty) => {}
        }
    }

    /// Forget dedup history, session fields and any pending wait.
    pub async fn reset(&self) {
        self.dedup.lock().await.clear();
        *self.session.lock().await = SessionFields::default();
        self.wait.finish();
    }

    /// Current session identifiers.
    pub async fn session(&self) -> SessionFields {
        self.session.lock().await.clone()
    }
}
