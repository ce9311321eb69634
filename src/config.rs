//! Configuration structures and loading logic

use crate::transfer::FallbackStrategy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main fetcher configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Directories scanned for already-downloaded artifacts. Downloads land
    /// in the first one unless a short label selects another.
    pub model_dirs: Vec<PathBuf>,

    /// Location of the JSON download ledger
    pub ledger_file: PathBuf,

    /// Registry metadata API root
    pub api_root: String,

    /// Direct-download URL root, used by degraded resolution when version
    /// metadata cannot be fetched
    pub download_root: String,

    /// Bearer token for the registry. `CIVITAI_API_TOKEN` fills this when the
    /// config file leaves it unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Per-request HTTP timeout in seconds (5-300)
    pub timeout_secs: u64,

    /// Parallel connections requested from multi-connection tools (1-64)
    pub connections: u32,

    /// Write-buffer capacity for the in-process streaming client
    pub chunk_size_bytes: usize,

    /// Which external downloaders may be used, and in what order
    pub fallback: FallbackStrategy,

    /// Try external tools before the in-process streaming client
    pub prefer_external_tools: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            model_dirs: default_model_dirs(),
            ledger_file: default_ledger_file(),
            api_root: default_api_root(),
            download_root: default_download_root(),
            token: None,
            timeout_secs: default_timeout_secs(),
            connections: default_connections(),
            chunk_size_bytes: default_chunk_size_bytes(),
            fallback: FallbackStrategy::Auto,
            prefer_external_tools: false,
        }
    }
}

impl FetcherConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if config.token.is_none()
            && let Ok(token) = std::env::var("CIVITAI_API_TOKEN")
        {
            config.token = Some(token);
        }
        if let Ok(ledger) = std::env::var("CIVITAI_FETCHER_LEDGER") {
            config.ledger_file = PathBuf::from(ledger);
        }
        if let Ok(dir) = std::env::var("CIVITAI_FETCHER_MODEL_DIR") {
            config.model_dirs = vec![PathBuf::from(dir)];
        }

        // Tokens arrive from config files and env vars with stray whitespace
        config.token = config.token.and_then(|token| {
            let token = token.trim().to_string();
            (!token.is_empty()).then_some(token)
        });

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.model_dirs.is_empty() {
            anyhow::bail!("At least one model directory must be configured");
        }

        if !(5..=300).contains(&self.timeout_secs) {
            anyhow::bail!(
                "timeout_secs must be between 5 and 300 (got {})",
                self.timeout_secs
            );
        }

        if !(1..=64).contains(&self.connections) {
            anyhow::bail!(
                "connections must be between 1 and 64 (got {})",
                self.connections
            );
        }

        if self.chunk_size_bytes == 0 {
            anyhow::bail!("chunk_size_bytes must be non-zero");
        }

        if self.api_root.is_empty() || self.download_root.is_empty() {
            anyhow::bail!("api_root and download_root must be non-empty");
        }

        // Ensure the download targets and the ledger's directory exist
        for dir in &self.model_dirs {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create model directory: {:?}", dir))?;
        }
        if let Some(parent) = self.ledger_file.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create ledger directory: {:?}", parent))?;
        }

        Ok(())
    }
}

// Default functions
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("civitai-fetcher"))
        .unwrap_or_else(|| PathBuf::from("/tmp/civitai-fetcher"))
}
fn default_model_dirs() -> Vec<PathBuf> {
    vec![default_data_dir().join("models")]
}
fn default_ledger_file() -> PathBuf {
    default_data_dir().join("download_history.json")
}
fn default_api_root() -> String {
    "https://civitai.com/api/v1".to_string()
}
fn default_download_root() -> String {
    "https://civitai.com/api/download/models".to_string()
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_connections() -> u32 {
    16
}
fn default_chunk_size_bytes() -> usize {
    1024 * 1024
}
