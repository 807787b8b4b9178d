//! Bridge configuration.
//!
//! Every option can be given on the command line or through a `BRIDGE_*`
//! environment variable. A `.env` file in the working directory is loaded
//! first by the binary.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use reqwest::Url;

use crate::channels::DEFAULT_CALLBACK_PATH;
use crate::engine::{DEFAULT_DEDUP_CAPACITY, DEFAULT_MAX_SNAPSHOTS, EngineConfig};
use crate::error::ConfigError;

/// Runtime configuration for the bridge binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "toolcall-bridge",
    version,
    about = "Execute agent command batches against a local workspace"
)]
pub struct BridgeConfig {
    /// Interface the webhook listener binds to
    #[arg(long, env = "BRIDGE_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port the webhook listener binds to
    #[arg(long, env = "BRIDGE_PORT", default_value_t = 8787)]
    pub port: u16,

    /// Route the agent posts its responses to
    #[arg(long, env = "BRIDGE_CALLBACK_PATH", default_value = DEFAULT_CALLBACK_PATH)]
    pub callback_path: String,

    /// Endpoint command results are POSTed to
    #[arg(long, env = "BRIDGE_AGENT_URL")]
    pub agent_url: String,

    /// Externally reachable base URL of this bridge, if it differs from the
    /// bind address (e.g. behind a tunnel)
    #[arg(long, env = "BRIDGE_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Workspace root commands operate on
    #[arg(long, env = "BRIDGE_WORKSPACE", default_value = ".")]
    pub workspace: PathBuf,

    /// Timeout for each POST to the agent, in seconds
    #[arg(long, env = "BRIDGE_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Number of file snapshots kept for diffs
    #[arg(long, env = "BRIDGE_SNAPSHOT_CAPACITY", default_value_t = DEFAULT_MAX_SNAPSHOTS)]
    pub snapshot_capacity: usize,

    /// Number of recent deliveries remembered for deduplication
    #[arg(long, env = "BRIDGE_DEDUP_CAPACITY", default_value_t = DEFAULT_DEDUP_CAPACITY)]
    pub dedup_capacity: usize,

    /// Emit logs as JSON lines
    #[arg(long, env = "BRIDGE_LOG_JSON")]
    pub log_json: bool,
}

impl BridgeConfig {
    /// Check values clap cannot check on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_http_url(&self.agent_url).map_err(|reason| ConfigError::InvalidAgentUrl {
            url: self.agent_url.clone(),
            reason,
        })?;

        if let Some(public) = &self.public_url {
            parse_http_url(public).map_err(|reason| ConfigError::InvalidPublicUrl {
                url: public.clone(),
                reason,
            })?;
        }

        if !self.callback_path.starts_with('/') {
            return Err(ConfigError::InvalidCallbackPath(self.callback_path.clone()));
        }

        for (name, value) in [
            ("BRIDGE_REQUEST_TIMEOUT_SECS", self.request_timeout_secs as usize),
            ("BRIDGE_SNAPSHOT_CAPACITY", self.snapshot_capacity),
            ("BRIDGE_DEDUP_CAPACITY", self.dedup_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroValue { name });
            }
        }

        if !self.workspace.is_dir() {
            return Err(ConfigError::MissingWorkspace(self.workspace.clone()));
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// URL the agent should deliver its next response to.
    ///
    /// `port` is the port actually bound, which differs from the configured
    /// one when the configured port is 0.
    pub fn callback_url(&self, port: u16) -> String {
        match &self.public_url {
            Some(base) => format!("{}{}", base.trim_end_matches('/'), self.callback_path),
            None => {
                let addr = SocketAddr::new(self.host, port);
                format!("http://{}{}", addr, self.callback_path)
            }
        }
    }

    /// Engine settings, with the workspace resolved to an absolute path.
    pub fn engine_config(&self, callback_url: String) -> EngineConfig {
        let workspace_root = self
            .workspace
            .canonicalize()
            .unwrap_or_else(|_| self.workspace.clone());
        EngineConfig {
            workspace_root,
            snapshot_capacity: self.snapshot_capacity,
            dedup_capacity: self.dedup_capacity,
            callback_url: Some(callback_url),
        }
    }
}

fn parse_http_url(raw: &str) -> Result<Url, String> {
    if raw.trim().is_empty() {
        return Err("URL is empty".to_string());
    }
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme '{}'", other)),
    }
    if url.host_str().is_none() {
        return Err("URL has no host".to_string());
    }
    Ok(url)
}
