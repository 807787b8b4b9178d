//! Inbound and outbound edges of the engine.
//!
//! - [`WebhookIngress`] accepts agent callbacks over HTTP
//! - [`WebhookServer`] binds and runs the listener
//! - [`PresentationSink`] carries engine events to whatever renders them

mod http;
mod sink;
mod webhook_server;

pub use http::{DEFAULT_CALLBACK_PATH, WebhookIngress};
pub use sink::{BroadcastSink, EngineEvent, LogSink, PresentationSink};
pub use webhook_server::{WebhookServer, WebhookServerConfig};
