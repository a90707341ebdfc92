//! Command-line host for the PwaKit service worker engine.
//!
//! Drives one worker against the real network. Cache storage is kept in a
//! JSON snapshot so consecutive runs see each other's entries.
//!
//! ## Usage
//!
//! ```bash
//! # Write a default config to edit
//! pwa-cli config-init --scope https://shop.example/
//!
//! # Pre-cache the essential resources and activate
//! pwa-cli install
//!
//! # Fetch through the engine, as a navigation
//! pwa-cli fetch --navigate /offers.html /img/product-1.png
//!
//! # Inspect and clear stores
//! pwa-cli stats
//! pwa-cli clear ALL
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pwakit_common::{init_logging, LogConfig, LogFormat};
use pwakit_net::{HttpFetcher, LoaderConfig};
use pwakit_sw::{ClientMessage, EngineConfig, MessageReply};
use tracing::warn;

mod host;

use host::Host;

#[derive(Parser)]
#[command(name = "pwa-cli")]
#[command(about = "Run the PwaKit service worker engine from the command line")]
struct Cli {
    /// Engine config (JSON). Defaults apply when the file is missing.
    #[arg(short, long, default_value = "pwa.json")]
    config: PathBuf,

    /// Cache snapshot (JSON)
    #[arg(short, long, default_value = "pwa-cache.json")]
    store: PathBuf,

    /// Log filter, e.g. `pwakit_sw=debug`
    #[arg(long)]
    log: Option<String>,

    /// Log format: pretty, compact or json
    #[arg(long)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pre-cache the essential resources and activate the configured version
    Install,

    /// Fetch URLs through the engine
    Fetch {
        /// URLs, or paths under the scope
        #[arg(required = true)]
        urls: Vec<String>,
        /// Send as navigations
        #[arg(short, long)]
        navigate: bool,
    },

    /// Print per-store counts, sizes and sample entries
    Stats,

    /// Delete one store (full name or class alias) or `ALL`
    Clear { name: String },

    /// Re-fetch the essential list and the newest pages
    Refresh,

    /// Write a default config file
    ConfigInit {
        /// Scope the relative resource paths resolve against
        #[arg(long)]
        scope: Option<String>,
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::default();
    if let Some(filter) = cli.log {
        log_config = log_config.with_filter(filter);
    }
    if let Some(format) = cli.log_format {
        log_config = log_config.with_format(format);
    }
    init_logging(log_config);

    match cli.command {
        Commands::ConfigInit { scope, force } => config_init(&cli.config, scope.as_deref(), force),
        command => {
            let config = load_config(&cli.config)?;
            let fetcher = Arc::new(HttpFetcher::new(LoaderConfig::default())?);
            let host = Host::open(config, &cli.store, fetcher)?;
            run(&host, command).await?;
            host.persist().await
        }
    }
}

async fn run(host: &Host, command: Commands) -> Result<()> {
    match command {
        Commands::Install => {
            let (installed, activated) = host.install().await?;
            println!("Installed {}:", host.worker().state().config.version);
            println!("  Cached:  {}", installed.cached.len());
            for (url, reason) in &installed.failed {
                println!("  Failed:  {url} ({reason})");
            }
            println!("  Deleted: {}", activated.deleted.join(", "));
        }

        Commands::Fetch { urls, navigate } => {
            for target in &urls {
                let report = host.fetch(target, navigate).await?;
                match report.response {
                    Some(response) => println!(
                        "{} {} {:?} {} bytes",
                        response.status.as_u16(),
                        report.url,
                        response.source,
                        response.body.len()
                    ),
                    None => println!("--- {} excluded, not handled", report.url),
                }
            }
        }

        Commands::Stats => {
            let reply = host.message(ClientMessage::GetStats).await;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }

        Commands::Clear { name } => {
            let reply = host.message(ClientMessage::ClearCache { cache_name: name }).await;
            print_ack(&reply);
        }

        Commands::Refresh => match host.refresh().await {
            Some(report) => println!("Refreshed {}, failed {}", report.refreshed, report.failed),
            None => warn!("Refresh not handled"),
        },

        Commands::ConfigInit { .. } => bail!("config-init does not start a worker"),
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        warn!(path = %path.display(), "Config not found, using defaults");
        return Ok(EngineConfig::default());
    }
    EngineConfig::load(path).with_context(|| format!("failed to load config {}", path.display()))
}

fn config_init(path: &Path, scope: Option<&str>, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists, pass --force to overwrite", path.display());
    }

    let mut config = EngineConfig::default();
    if let Some(scope) = scope {
        config.scope = scope.parse().with_context(|| format!("invalid scope {scope}"))?;
    }
    config.save(path)?;
    println!("Config written to: {}", path.display());
    Ok(())
}

fn print_ack(reply: &MessageReply) {
    match reply {
        MessageReply::Ack { success, message } => {
            let status = if *success { "ok" } else { "failed" };
            println!("{status}: {}", message.as_deref().unwrap_or(""));
        }
        MessageReply::Stats(_) => println!("unexpected stats reply"),
    }
}
