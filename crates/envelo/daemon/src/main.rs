//! envelod - local Envelo enforcement server

use clap::Parser;
use envelo_agent::AuthorityConfig;
use envelo_daemon::error::{DaemonError, DaemonResult};
use envelo_daemon::{DaemonConfig, Server};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Envelo daemon CLI
#[derive(Parser)]
#[command(name = "envelod")]
#[command(about = "Envelo local enforcement server", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "ENVELO_CONFIG")]
    config: Option<String>,

    /// Listen address
    #[arg(short, long, env = "ENVELO_LISTEN_ADDR")]
    listen: Option<String>,

    /// Boundary document to enforce
    #[arg(short, long, env = "ENVELO_BOUNDARIES")]
    boundaries: Option<PathBuf>,

    /// Certification authority base URL
    #[arg(long, env = "ENVELO_AUTHORITY_URL")]
    authority_url: Option<String>,

    /// Identifier of the monitored system
    #[arg(long, env = "ENVELO_SYSTEM_ID")]
    system_id: Option<String>,

    /// Log level
    #[arg(long, env = "ENVELO_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "ENVELO_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // CLI args override file and environment
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }
    if let Some(path) = cli.boundaries {
        config.boundaries_path = Some(path);
    }
    if let Some(url) = cli.authority_url {
        config.agent.authority = Some(AuthorityConfig::new(url));
    }
    if let Some(system_id) = cli.system_id {
        config.agent.system_id = system_id;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        system_id = %config.agent.system_id,
        listen = %config.server.listen_addr,
        authority = config.agent.authority.as_ref().map(|a| a.base_url.as_str()).unwrap_or("none"),
        "starting envelod"
    );

    let server = Server::new(config).await?;
    server.run().await
}
