//! Outbound engine events for the presentation layer.
//!
//! The engine never renders anything itself. It pushes [`EngineEvent`]s into
//! a [`PresentationSink`], fire-and-forget.

use std::path::PathBuf;

use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

/// Something the presentation layer may want to show.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Transient agent status ("working").
    Status { message: String },
    /// Agent prose. Non-final while a batch is attached.
    AgentMessage { content: String, is_final: bool },
    /// A command is about to run. `index` is zero-based.
    ToolStarted {
        batch_id: Uuid,
        index: usize,
        total: usize,
        command: String,
    },
    /// A command finished.
    ToolCompleted {
        batch_id: Uuid,
        index: usize,
        command: String,
        success: bool,
    },
    /// Batch totals after the last call.
    BatchSummary {
        batch_id: Uuid,
        total: usize,
        succeeded: usize,
        failed: usize,
        cancelled: usize,
    },
    /// Files changed by successful write-class commands.
    FilesModified { paths: Vec<PathBuf> },
    /// A cancelled batch was not reported upstream.
    TurnAbandoned { batch_id: Uuid },
    /// Results could not be delivered; nothing is waiting on the agent.
    WaitingStopped { reason: String },
}

impl EngineEvent {
    /// Short name for logs and stream event types.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::Status { .. } => "status",
            EngineEvent::AgentMessage { .. } => "agent_message",
            EngineEvent::ToolStarted { .. } => "tool_started",
            EngineEvent::ToolCompleted { .. } => "tool_completed",
            EngineEvent::BatchSummary { .. } => "batch_summary",
            EngineEvent::FilesModified { .. } => "files_modified",
            EngineEvent::TurnAbandoned { .. } => "turn_abandoned",
            EngineEvent::WaitingStopped { .. } => "waiting_stopped",
        }
    }
}

/// Receives engine events. Must not block.
pub trait PresentationSink: Send + Sync {
    fn post(&self, event: EngineEvent);
}

/// Fans events out to any number of subscribers.
pub struct BroadcastSink {
    tx: broadcast::Sender<EngineEvent>,
}

impl BroadcastSink {
    /// Create a sink buffering up to `capacity` events per subscriber.
    ///
    /// Slow subscribers miss events rather than stalling the engine.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to raw events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a stream, dropping lagged notifications.
    pub fn stream(&self) -> impl Stream<Item = EngineEvent> + Send + 'static + use<> {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|result| result.ok())
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl PresentationSink for BroadcastSink {
    fn post(&self, event: EngineEvent) {
        // No receivers is fine
        let _ = self.tx.send(event);
    }
}

/// Renders events as log lines when no UI is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl PresentationSink for LogSink {
    fn post(&self, event: EngineEvent) {
        match &event {
            EngineEvent::Status { message } => tracing::info!("Agent status: {}", message),
            EngineEvent::AgentMessage { content, is_final } => {
                tracing::info!(is_final, "Agent: {}", content)
            }
            EngineEvent::ToolStarted {
                index,
                total,
                command,
                ..
            } => tracing::info!("[{}/{}] {}", index + 1, total, command),
            EngineEvent::ToolCompleted {
                command, success, ..
            } => tracing::debug!(command = %command, success, "Command finished"),
            EngineEvent::BatchSummary {
                total,
                succeeded,
                failed,
                cancelled,
                ..
            } => tracing::info!(
                "Batch done: {} total, {} ok, {} failed, {} cancelled",
                total,
                succeeded,
                failed,
                cancelled
            ),
            EngineEvent::FilesModified { paths } => {
                for path in paths {
                    tracing::info!("Modified {}", path.display());
                }
            }
            EngineEvent::TurnAbandoned { batch_id } => {
                tracing::info!(batch_id = %batch_id, "Turn abandoned after cancellation")
            }
            EngineEvent::WaitingStopped { reason } => {
                tracing::warn!("Stopped waiting for agent: {}", reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_without_receivers() {
        let sink = BroadcastSink::default();
        // Should not panic even with no receivers
        sink.post(EngineEvent::Status {
            message: "working".to_string(),
        });
        assert_eq!(sink.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_to_stream() {
        let sink = BroadcastSink::default();
        let mut stream = Box::pin(sink.stream());

        sink.post(EngineEvent::AgentMessage {
            content: "done".to_string(),
            is_final: true,
        });

        let event = stream.next().await.unwrap();
        assert_eq!(event.kind(), "agent_message");
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = EngineEvent::WaitingStopped {
            reason: "timeout".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "waiting_stopped");
        assert_eq!(value["reason"], "timeout");
    }
}
