use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use toolcall_bridge::channels::{LogSink, WebhookIngress, WebhookServer, WebhookServerConfig};
use toolcall_bridge::config::BridgeConfig;
use toolcall_bridge::engine::{Engine, EngineDeps, HttpAgentClient};
use toolcall_bridge::tools::LocalFs;
use toolcall_bridge::tools::builtin::WorkspaceCatalog;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = BridgeConfig::parse();
    init_tracing(config.log_json);
    config.validate()?;

    let client = HttpAgentClient::new(&config.agent_url, config.request_timeout())
        .context("Failed to build agent HTTP client")?;

    let callback_url = config.callback_url(config.port);
    let engine_config = config.engine_config(callback_url.clone());
    let catalog = WorkspaceCatalog::new(&engine_config.workspace_root);

    tracing::info!(
        workspace = %engine_config.workspace_root.display(),
        agent = %client.endpoint(),
        callback = %callback_url,
        "Starting toolcall bridge"
    );

    let engine = Arc::new(Engine::new(
        engine_config,
        EngineDeps {
            catalog: Arc::new(catalog),
            fs: Arc::new(LocalFs),
            sink: Arc::new(LogSink),
            client: Arc::new(client),
        },
    ));

    let ingress =
        WebhookIngress::new(Arc::clone(&engine)).with_callback_path(&config.callback_path);
    let mut server = WebhookServer::new(WebhookServerConfig {
        addr: config.bind_addr(),
    });
    server.add_routes(ingress.routes());
    server.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    tracing::info!("Shutting down");
    engine.cancel_batch().await;
    server.shutdown().await;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("toolcall_bridge=info,tower_http=info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
