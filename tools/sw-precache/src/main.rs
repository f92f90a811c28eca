//! Precache runner for the CoderVerse offline agent.
//!
//! Runs the agent's install step against the live network and reports what
//! ended up in the cache generation.
//!
//! ## Usage
//!
//! ```bash
//! # Install with the built-in configuration and print the report
//! sw-precache install
//!
//! # Install a staging deployment, write the report to a file
//! sw-precache install --config staging.json --output report.json
//!
//! # Show the effective configuration
//! sw-precache config --config staging.json
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use coderverse_common::{init_logging, LogConfig, LogFormat};
use coderverse_net::{FetcherConfig, HttpFetcher, ResponseType, Url};
use coderverse_sw::{
    AgentConfig, AgentEvent, CacheEntry, CacheKey, CacheStorage, ClientRegistry, EventDispatcher,
    MemoryCacheStorage, NotificationCenter, OfflineAgent, Platform, ServiceWorkerState,
};
use serde::Serialize;
use tracing::info;

#[derive(Parser)]
#[command(name = "sw-precache")]
#[command(about = "Run the CoderVerse offline agent's install step against the live network")]
struct Cli {
    /// Log format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    /// Log filter, e.g. "coderverse_sw=debug"
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Precache the manifest and report the resulting cache generation
    Install {
        /// Agent configuration (JSON); built-in defaults when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the configured origin
        #[arg(long)]
        origin: Option<Url>,
        /// Request timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
        /// Write the JSON report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration and resolved manifest
    Config {
        /// Agent configuration (JSON); built-in defaults when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Result of one install run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InstallReport {
    version: String,
    origin: String,
    state: ServiceWorkerState,
    cache_ready: bool,
    total_bytes: usize,
    entries: Vec<EntryReport>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EntryReport {
    url: String,
    status: u16,
    response_type: ResponseType,
    content_type: Option<String>,
    bytes: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigReport<'a> {
    config: &'a AgentConfig,
    resolved_manifest: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::default().with_format(cli.log_format);
    if let Some(filter) = cli.log {
        log_config = log_config.with_filter(filter);
    }
    init_logging(log_config)?;

    match cli.command {
        Commands::Install {
            config,
            origin,
            timeout,
            output,
        } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(origin) = origin {
                config.origin = origin;
            }

            let report = install(config, Duration::from_secs(timeout)).await?;
            let json = serde_json::to_string_pretty(&report)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    println!("Report written to: {}", path.display());
                }
                None => println!("{json}"),
            }

            if !report.cache_ready {
                std::process::exit(1);
            }
        }

        Commands::Config { config } => {
            let config = load_config(config.as_ref())?;
            let resolved_manifest = config
                .manifest_urls()?
                .into_iter()
                .map(String::from)
                .collect();
            let report = ConfigReport {
                config: &config,
                resolved_manifest,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<AgentConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "Loading agent configuration");
            Ok(AgentConfig::load(path)?)
        }
        None => Ok(AgentConfig::default()),
    }
}

async fn install(
    config: AgentConfig,
    timeout: Duration,
) -> Result<InstallReport, Box<dyn std::error::Error>> {
    let fetcher_config = FetcherConfig {
        default_timeout: timeout,
        ..FetcherConfig::default()
    };
    let network = HttpFetcher::new(config.origin.clone(), fetcher_config)?;
    let caches = Arc::new(MemoryCacheStorage::new());

    let agent = OfflineAgent::new(
        config.clone(),
        Platform {
            caches: caches.clone(),
            network: Arc::new(network),
            clients: Arc::new(ClientRegistry::new(config.origin.clone())),
            notifier: Arc::new(NotificationCenter::new()),
        },
    )?;
    let dispatcher = EventDispatcher::new(Arc::clone(&agent));

    let outcome = dispatcher.run(AgentEvent::Install).await;
    let error = outcome.settled.err().map(|err| err.to_string());

    let mut entries = Vec::new();
    for key in caches.entries(agent.version()).await? {
        if let Some(entry) = caches.match_request(agent.version(), &key).await? {
            entries.push(report_entry(&key, &entry));
        }
    }
    let total_bytes: usize = entries.iter().map(|e| e.bytes).sum();

    info!(
        version = %agent.version(),
        entries = entries.len(),
        total_bytes,
        "Install finished"
    );

    Ok(InstallReport {
        version: agent.version().to_string(),
        origin: config.origin.to_string(),
        state: agent.state().await,
        cache_ready: agent.cache_ready().await,
        total_bytes,
        entries,
        error,
    })
}

fn report_entry(key: &CacheKey, entry: &CacheEntry) -> EntryReport {
    EntryReport {
        url: key.url.clone(),
        status: entry.status,
        response_type: entry.response_type,
        content_type: entry.header("content-type").map(str::to_string),
        bytes: entry.body.len(),
    }
}
