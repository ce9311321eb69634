//! Fetch orchestration
//!
//! Top-level entry point: given a raw identifier and per-request options,
//! serves from the download ledger when the artifact is already on disk,
//! otherwise resolves it against the registry, downloads it into the selected
//! model directory, and records the result. Ledger recording is best-effort —
//! a persistence failure never takes down a fetch that succeeded.

use crate::config::FetcherConfig;
use crate::error::{FetchError, FetchResult};
use crate::identifier::ModelIdentifier;
use crate::ledger::LedgerStore;
use crate::paths;
use crate::registry::{RegistryClient, build_http_client};
use crate::transfer::{SystemToolRunner, ToolRunner, TransferExecutor, TransferOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Per-request inputs, mirroring the host form fields
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    /// Raw `model[@version]` identifier
    pub identifier: String,
    /// Already-downloaded filename to return as-is; the sentinel `"none"`
    /// means unset
    pub existing_file: Option<String>,
    /// API token override; wins over config file and environment
    pub api_key: Option<String>,
    /// Short label of the model directory downloads should land in
    pub download_path: Option<String>,
}

impl FetchRequest {
    pub fn for_identifier(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            ..Default::default()
        }
    }
}

/// Orchestrates the resolve-fetch-cache pipeline
pub struct LoraFetcher {
    config: FetcherConfig,
    ledger: LedgerStore,
    runner: Arc<dyn ToolRunner>,
}

impl LoraFetcher {
    /// Create a fetcher with the production tool runner
    pub fn new(config: FetcherConfig) -> Self {
        Self::with_runner(config, Arc::new(SystemToolRunner::new()))
    }

    /// Create a fetcher with a custom tool runner
    pub fn with_runner(config: FetcherConfig, runner: Arc<dyn ToolRunner>) -> Self {
        let ledger = LedgerStore::new(config.ledger_file.clone());
        Self {
            config,
            ledger,
            runner,
        }
    }

    /// Resolve and fetch one artifact, returning its local filename
    ///
    /// An explicit existing-file override always wins and a ledger cache hit
    /// is served from disk; both paths involve no network activity.
    pub async fn fetch(&self, request: &FetchRequest) -> FetchResult<String> {
        if let Some(existing) = request.existing_file.as_deref()
            && existing != "none"
            && !existing.is_empty()
        {
            tracing::info!(file = %existing, "using existing local file");
            return Ok(existing.to_string());
        }

        let identifier = ModelIdentifier::parse(&request.identifier)?;

        let mut ledger = self.ledger.load().await;
        if let Some(cached) =
            ledger.find_cached(identifier.model_id, identifier.version_id, &self.config.model_dirs)
        {
            tracing::info!(
                identifier = %identifier,
                file = %cached,
                "serving cached artifact"
            );
            return Ok(cached);
        }

        let download_dir =
            paths::resolve_download_dir(request.download_path.as_deref(), &self.config.model_dirs)
                .ok_or_else(|| {
                    FetchError::Validation("no model directories configured".to_string())
                })?;

        let token = self.effective_token(request);
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let http = build_http_client(token.as_deref(), timeout)?;

        let registry = RegistryClient::new(
            http.clone(),
            &self.config.api_root,
            &self.config.download_root,
            token.clone(),
        );
        let resolved = registry
            .resolve_download(identifier.model_id, identifier.version_id)
            .await?;

        // Registry filenames are treated as bare names; path components are
        // never allowed to escape the download directory
        let file_name = bare_file_name(&resolved.file_name).ok_or_else(|| {
            FetchError::Registry("registry returned an unusable file name".to_string())
        })?;

        tokio::fs::create_dir_all(&download_dir).await.map_err(|error| {
            FetchError::Transfer(format!(
                "cannot create download directory {}: {error}",
                download_dir.display()
            ))
        })?;
        let destination = download_dir.join(&file_name);

        let executor = TransferExecutor::with_runner(
            http,
            TransferOptions {
                token,
                connections: self.config.connections,
                chunk_size_bytes: self.config.chunk_size_bytes,
                fallback: self.config.fallback,
                prefer_external_tools: self.config.prefer_external_tools,
            },
            self.runner.clone(),
        );
        executor.fetch(&resolved.download_url, &destination).await?;

        self.ledger
            .record(
                &mut ledger,
                identifier.model_id,
                resolved.version_id,
                &file_name,
                &resolved.download_url,
            )
            .await;

        tracing::info!(
            file = %file_name,
            dir = %download_dir.display(),
            "downloaded artifact"
        );
        Ok(file_name)
    }

    /// Explicit override, else configured/environment default, else none
    fn effective_token(&self, request: &FetchRequest) -> Option<String> {
        request
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .or_else(|| self.config.token.clone())
    }
}

/// Final path component of a filename, dropping any directory parts
fn bare_file_name(name: &str) -> Option<String> {
    Path::new(name)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
}
