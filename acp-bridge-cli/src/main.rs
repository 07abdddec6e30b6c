//! ACP Bridge CLI
//!
//! Serves the Agent Client Protocol on stdin/stdout, backed by a session
//! server reached over HTTP and server-sent events. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use acp_bridge::{run_stdio, BridgeConfig, ConfigOverrides};
use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod http;
mod sse;

use http::HttpSessionApi;
use sse::SseEventSource;

#[derive(Debug, Parser)]
#[command(
    name = "acp-bridge",
    version,
    about = "Agent Client Protocol bridge for a session server"
)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base URL of the session server
    #[arg(long)]
    server_url: Option<String>,

    /// Fallback model as provider/model
    #[arg(long)]
    model: Option<String>,

    /// Preferred agent mode for new sessions
    #[arg(long)]
    agent: Option<String>,

    /// Log filter, e.g. `debug` or `acp_bridge=trace`; overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            server_url: self.server_url.clone(),
            default_model: self.model.clone(),
            default_agent: self.agent.clone(),
        }
    }
}

fn log_filter(log_level: Option<&str>) -> EnvFilter {
    match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.log_level.as_deref()))
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let config = BridgeConfig::load(cli.config.as_deref(), cli.overrides())
        .context("loading configuration")?;
    tracing::info!("Bridging to session server at {}", config.server_url);

    let api = Arc::new(HttpSessionApi::new(&config)?);
    let events = Arc::new(SseEventSource::new(&config)?);

    run_stdio(config, api, events)
        .await
        .context("serving the ACP connection")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing_defaults() {
        let cli = Cli::parse_from(["acp-bridge"]);
        assert!(cli.config.is_none());
        let overrides = cli.overrides();
        assert!(overrides.server_url.is_none());
        assert!(overrides.default_model.is_none());
    }

    #[test]
    fn test_cli_parsing_overrides() {
        let cli = Cli::parse_from([
            "acp-bridge",
            "--server-url",
            "http://localhost:5000",
            "--model",
            "p/m1",
            "--agent",
            "plan",
            "--log-level",
            "debug",
        ]);
        let overrides = cli.overrides();
        assert_eq!(overrides.server_url.as_deref(), Some("http://localhost:5000"));
        assert_eq!(overrides.default_model.as_deref(), Some("p/m1"));
        assert_eq!(overrides.default_agent.as_deref(), Some("plan"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }
}
