//! Error types for the bridge.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Errors raised by the webhook ingress listener.
#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error(
        "Port {port} is already in use ({addr}). Set BRIDGE_PORT to a free port or stop the process holding it"
    )]
    PortInUse { addr: SocketAddr, port: u16 },

    #[error("Failed to bind webhook listener on {addr}: {reason}")]
    BindFailed { addr: SocketAddr, reason: String },

    #[error("Webhook server is already running")]
    AlreadyStarted,
}

/// Errors raised while posting command results back to the agent.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Request to agent failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Agent rejected results with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Agent transport unavailable: {0}")]
    Transport(String),
}

/// Errors raised while validating the bridge configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid agent URL '{url}': {reason}")]
    InvalidAgentUrl { url: String, reason: String },

    #[error("Invalid public URL '{url}': {reason}")]
    InvalidPublicUrl { url: String, reason: String },

    #[error("Callback path must start with '/', got '{0}'")]
    InvalidCallbackPath(String),

    #[error("{name} must be greater than zero")]
    ZeroValue { name: &'static str },

    #[error("Workspace root is not a directory: {}", .0.display())]
    MissingWorkspace(PathBuf),
}
