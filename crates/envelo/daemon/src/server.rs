//! Server setup and lifecycle management

use crate::api::{create_router, AppState};
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use envelo_agent::Agent;
use envelo_boundary::BoundaryDocument;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Envelo local enforcement server
pub struct Server {
    config: DaemonConfig,
    agent: Arc<Agent>,
}

impl Server {
    /// Start the agent and install the local boundary document.
    ///
    /// A set received from the authority at registration wins over the
    /// local file.
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let agent = Agent::start(config.agent.clone()).await?;

        if let Some(path) = &config.boundaries_path {
            if agent.boundaries().is_empty() {
                let document = BoundaryDocument::load(path)?;
                let installed = agent.load_document(&document)?;
                tracing::info!(path = %path.display(), boundaries = installed, "boundary document loaded");
            } else {
                tracing::warn!(
                    path = %path.display(),
                    "authority supplied boundaries, ignoring local document"
                );
            }
        }

        Ok(Self {
            config,
            agent: Arc::new(agent),
        })
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// Run the server until Ctrl-C or SIGTERM, then stop the agent
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;

        let state = AppState::new(self.agent.clone());
        let app = create_router(state, self.config.server.enable_cors);

        let listener = TcpListener::bind(addr).await?;

        tracing::info!(
            %addr,
            session_id = %self.agent.session_id(),
            boundaries = self.agent.boundaries().len(),
            "envelod listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("envelod shutting down");

        self.agent.stop().await;

        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
