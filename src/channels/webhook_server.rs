//! HTTP server hosting the webhook ingress routes.
//!
//! Routes are defined by [`WebhookIngress`](crate::channels::WebhookIngress);
//! this type only binds the listener and owns the server task.

use std::io;
use std::net::SocketAddr;

use axum::Router;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::IngressError;

/// Configuration for the webhook server.
pub struct WebhookServerConfig {
    /// Address to bind the server to. Port 0 picks a free port.
    pub addr: SocketAddr,
}

/// A single HTTP server for the agent callback routes.
pub struct WebhookServer {
    config: WebhookServerConfig,
    routes: Vec<Router>,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl WebhookServer {
    /// Create a new webhook server with the given bind address.
    pub fn new(config: WebhookServerConfig) -> Self {
        Self {
            config,
            routes: Vec::new(),
            local_addr: None,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Accumulate a route fragment. Each fragment should already have its
    /// state applied via `.with_state()`.
    pub fn add_routes(&mut self, router: Router) {
        self.routes.push(router);
    }

    /// Bind the listener, merge all route fragments, and spawn the server.
    ///
    /// A port already in use is reported as [`IngressError::PortInUse`];
    /// no other port is tried.
    pub async fn start(&mut self) -> Result<SocketAddr, IngressError> {
        if self.handle.is_some() {
            return Err(IngressError::AlreadyStarted);
        }

        let addr = self.config.addr;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| bind_error(addr, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| bind_error(addr, e))?;

        let mut app = Router::new();
        for fragment in self.routes.drain(..) {
            app = app.merge(fragment);
        }
        let app = app.layer(tower_http::trace::TraceLayer::new_for_http());

        tracing::info!("Webhook server listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                    tracing::info!("Webhook server shutting down");
                })
                .await
            {
                tracing::error!("Webhook server error: {}", e);
            }
        });

        self.local_addr = Some(local_addr);
        self.handle = Some(handle);
        Ok(local_addr)
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Signal graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        self.local_addr = None;
    }
}

fn bind_error(addr: SocketAddr, err: io::Error) -> IngressError {
    if err.kind() == io::ErrorKind::AddrInUse {
        IngressError::PortInUse {
            addr,
            port: addr.port(),
        }
    } else {
        IngressError::BindFailed {
            addr,
            reason: err.to_string(),
        }
    }
}
