//! CivitAI Fetcher - Main entry point

use anyhow::{Context, Result};
use civitai_fetcher::transfer::FallbackStrategy;
use civitai_fetcher::{FetchRequest, FetcherConfig, LoraFetcher, paths};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "civitai-fetcher")]
#[command(about = "Resolve, download, and cache CivitAI model artifacts", long_about = None)]
#[command(version)]
struct Cli {
    /// Model identifier, `<model>` or `<model>@<version>` (ex: 12345@67890)
    identifier: Option<String>,

    /// Return this already-downloaded file as-is, skipping all network activity
    #[arg(long)]
    existing_file: Option<String>,

    /// API token override (else config file, else CIVITAI_API_TOKEN)
    #[arg(long)]
    api_key: Option<String>,

    /// Short label of the model directory to download into
    #[arg(long)]
    download_path: Option<String>,

    /// Download strategy: auto, aria2c, wget, curl, or direct-only
    #[arg(long)]
    fallback: Option<FallbackStrategy>,

    /// Try external tools before the in-process streaming client
    #[arg(long)]
    prefer_external_tools: bool,

    /// Per-request HTTP timeout in seconds (5-300)
    #[arg(long)]
    timeout_seconds: Option<u64>,

    /// Parallel connections for multi-connection tools (1-64)
    #[arg(long)]
    connections: Option<u32>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List local files and directory labels instead of fetching
    #[arg(long)]
    list_local: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    match cli.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .init();
        }
    }

    // Load configuration
    let mut config = FetcherConfig::load(cli.config)?;

    // CLI overrides
    if let Some(fallback) = cli.fallback {
        config.fallback = fallback;
    }
    if cli.prefer_external_tools {
        config.prefer_external_tools = true;
    }
    if let Some(timeout) = cli.timeout_seconds {
        config.timeout_secs = timeout;
    }
    if let Some(connections) = cli.connections {
        config.connections = connections;
    }

    config.validate()?;

    tracing::debug!(
        model_dirs = ?config.model_dirs,
        ledger_file = ?config.ledger_file,
        fallback = %config.fallback,
        "Configuration loaded"
    );

    if cli.list_local {
        for (label, path) in paths::short_labels(&config.model_dirs) {
            println!("# {label}: {}", path.display());
        }
        for name in paths::list_local_files(&config.model_dirs) {
            println!("{name}");
        }
        return Ok(());
    }

    let identifier = cli
        .identifier
        .context("a model identifier is required (ex: 12345@67890)")?;

    let request = FetchRequest {
        identifier,
        existing_file: cli.existing_file,
        api_key: cli.api_key,
        download_path: cli.download_path,
    };

    let fetcher = LoraFetcher::new(config);
    let file_name = fetcher.fetch(&request).await?;

    // The resolved local filename is the tool's one output
    println!("{file_name}");

    Ok(())
}
