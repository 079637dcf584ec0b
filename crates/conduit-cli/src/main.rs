//! # conduit-cli
//!
//! Command-line host bridging a model vendor to MCP tool providers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use conduit_agent::build_orchestrator;
use conduit_core::config::load_servers_file;
use conduit_core::{Settings, VendorKind};
use conduit_mcp::SessionRegistry;

mod shell;

/// Conduit - chat with a model that can call MCP tools
#[derive(Parser)]
#[command(name = "conduit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Tool-provider configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Model vendor (anthropic, openai, google)
    #[arg(long)]
    vendor: Option<VendorKind>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let mut settings = Settings::load_validated().context("Invalid settings")?;
    if let Some(vendor) = cli.vendor {
        settings.vendor = vendor;
    }
    if let Some(path) = cli.config {
        settings.servers_file = path;
    }

    let configs = load_servers_file(&settings.servers_file).with_context(|| {
        format!(
            "Failed to load servers file {}",
            settings.servers_file.display()
        )
    })?;

    let mut registry = SessionRegistry::new();
    let report = registry.create_sessions(&configs).await;
    for name in &report.skipped {
        info!(server = %name, "Skipping disabled server");
    }
    for (name, err) in &report.failed {
        warn!(server = %name, error = %err, "Provider unavailable");
    }
    let registry = Arc::new(registry);

    let orchestrator = match build_orchestrator(&settings, registry.clone()) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            registry.close_all().await;
            return Err(e).context("Failed to set up the model client");
        }
    };

    let shell = shell::Shell::new(orchestrator, registry.clone(), settings.logs_uri.clone());
    let outcome = shell::run(&shell, &report).await;

    registry.close_all().await;
    outcome
}
