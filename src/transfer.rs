//! Download execution
//!
//! Transfers a resolved URL to a destination file, guaranteeing on return
//! that the destination is complete or absent — partial files are removed
//! before an error propagates.
//!
//! Two strategies exist: an in-process streaming client and delegation to
//! external command-line downloaders (aria2c, wget, curl). Which runs first
//! is configurable; whichever order applies, a failed strategy is cleaned up
//! and the next is tried, and the final error aggregates every attempt.
//! External tools run through the [`ToolRunner`] trait so tests can
//! substitute a fake runner instead of spawning real processes.

use crate::error::{FetchError, FetchResult};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::process::Command;

/// Which download strategies may run, and for tools, in what order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackStrategy {
    /// Every known external tool, in the default preference order
    Auto,
    /// Only aria2c
    Aria2c,
    /// Only wget
    Wget,
    /// Only curl
    Curl,
    /// Never shell out; the in-process client is the only strategy
    DirectOnly,
}

impl FallbackStrategy {
    /// External tools this strategy permits, in attempt order
    pub fn tools(&self) -> &'static [ExternalTool] {
        match self {
            Self::Auto => &[ExternalTool::Aria2c, ExternalTool::Wget, ExternalTool::Curl],
            Self::Aria2c => &[ExternalTool::Aria2c],
            Self::Wget => &[ExternalTool::Wget],
            Self::Curl => &[ExternalTool::Curl],
            Self::DirectOnly => &[],
        }
    }
}

impl std::str::FromStr for FallbackStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "aria2c" => Ok(Self::Aria2c),
            "wget" => Ok(Self::Wget),
            "curl" => Ok(Self::Curl),
            "direct-only" => Ok(Self::DirectOnly),
            other => Err(format!(
                "unknown fallback strategy `{other}` (expected auto, aria2c, wget, curl, or direct-only)"
            )),
        }
    }
}

impl std::fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Aria2c => write!(f, "aria2c"),
            Self::Wget => write!(f, "wget"),
            Self::Curl => write!(f, "curl"),
            Self::DirectOnly => write!(f, "direct-only"),
        }
    }
}

/// A recognized external downloader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalTool {
    /// Multi-connection downloader
    Aria2c,
    /// Single-stream, follows redirects via --content-disposition
    Wget,
    /// Single-stream, follows redirects via -L
    Curl,
}

impl ExternalTool {
    pub fn program(&self) -> &'static str {
        match self {
            Self::Aria2c => "aria2c",
            Self::Wget => "wget",
            Self::Curl => "curl",
        }
    }

    /// Build the invocation for one transfer attempt
    fn build_command(
        &self,
        url: &str,
        destination: &Path,
        options: &TransferOptions,
    ) -> Result<Command, String> {
        let mut command = Command::new(self.program());

        match self {
            Self::Aria2c => {
                let directory = destination
                    .parent()
                    .ok_or("destination has no parent directory")?;
                let file_name = destination
                    .file_name()
                    .ok_or("destination has no file name")?;
                command.args(["--allow-overwrite=true", "--auto-file-renaming=false"]);
                command.arg("-x").arg(options.connections.to_string());
                command.arg("-s").arg(options.connections.to_string());
                command.arg("-d").arg(directory);
                command.arg("-o").arg(file_name);
                if let Some(token) = &options.token {
                    command
                        .arg("--header")
                        .arg(format!("Authorization: Bearer {token}"));
                }
                command.arg(url);
            }
            Self::Wget => {
                command.arg("-O").arg(destination);
                command.arg("--content-disposition");
                if let Some(token) = &options.token {
                    command
                        .arg("--header")
                        .arg(format!("Authorization: Bearer {token}"));
                }
                command.arg(url);
            }
            Self::Curl => {
                command.arg("-L").arg(url);
                command.arg("-o").arg(destination);
                if let Some(token) = &options.token {
                    command
                        .arg("-H")
                        .arg(format!("Authorization: Bearer {token}"));
                }
            }
        }

        Ok(command)
    }
}

impl std::fmt::Display for ExternalTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program())
    }
}

/// Per-transfer settings
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Bearer token forwarded to tools as an authorization header
    pub token: Option<String>,
    /// Parallel connections requested from multi-connection tools
    pub connections: u32,
    /// Write-buffer capacity for the in-process client
    pub chunk_size_bytes: usize,
    pub fallback: FallbackStrategy,
    /// Try external tools before the in-process client
    pub prefer_external_tools: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            token: None,
            connections: 16,
            chunk_size_bytes: 1024 * 1024,
            fallback: FallbackStrategy::Auto,
            prefer_external_tools: false,
        }
    }
}

// ============================================================================
// Tool runner
// ============================================================================

/// Trait for executing one external-tool transfer attempt
///
/// An `Err` carries a short human-readable failure reason; the executor
/// handles cleanup and aggregation.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn attempt(
        &self,
        tool: ExternalTool,
        url: &str,
        destination: &Path,
        options: &TransferOptions,
    ) -> Result<(), String>;
}

/// Production runner spawning real processes via tokio::process
pub struct SystemToolRunner;

impl SystemToolRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemToolRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolRunner for SystemToolRunner {
    async fn attempt(
        &self,
        tool: ExternalTool,
        url: &str,
        destination: &Path,
        options: &TransferOptions,
    ) -> Result<(), String> {
        let mut command = tool.build_command(url, destination, options)?;

        // No enforced timeout: the tool runs to completion or failure
        let output = command
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|error| {
                if error.kind() == std::io::ErrorKind::NotFound {
                    "executable not found".to_string()
                } else {
                    format!("failed to spawn: {error}")
                }
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.lines().rev().find(|line| !line.trim().is_empty());
        match detail {
            Some(line) => Err(format!("{} ({})", output.status, line.trim())),
            None => Err(output.status.to_string()),
        }
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Executes a transfer with the configured strategy chain
pub struct TransferExecutor {
    http: reqwest::Client,
    runner: Arc<dyn ToolRunner>,
    options: TransferOptions,
}

impl TransferExecutor {
    /// Create an executor with the production tool runner
    pub fn new(http: reqwest::Client, options: TransferOptions) -> Self {
        Self::with_runner(http, options, Arc::new(SystemToolRunner::new()))
    }

    /// Create an executor with a custom tool runner
    pub fn with_runner(
        http: reqwest::Client,
        options: TransferOptions,
        runner: Arc<dyn ToolRunner>,
    ) -> Self {
        Self {
            http,
            runner,
            options,
        }
    }

    /// Transfer `url` to `destination`
    ///
    /// On `Ok`, the destination exists and is complete. On `Err`, every
    /// configured strategy was tried, each partial file was removed, and the
    /// message aggregates the per-strategy failures in attempt order.
    pub async fn fetch(&self, url: &str, destination: &Path) -> FetchResult<()> {
        let tools = self.options.fallback.tools();

        if self.options.prefer_external_tools && !tools.is_empty() {
            let mut messages = match self.fetch_with_tools(tools, url, destination).await {
                Ok(()) => return Ok(()),
                Err(messages) => messages,
            };
            tracing::warn!("external downloaders failed, falling back to direct streaming");
            match self.stream_direct(url, destination).await {
                Ok(()) => Ok(()),
                Err(direct) => {
                    messages.push(format!("direct: {direct}"));
                    Err(FetchError::Transfer(messages.join("; ")))
                }
            }
        } else {
            let direct = match self.stream_direct(url, destination).await {
                Ok(()) => return Ok(()),
                Err(direct) => direct,
            };
            if tools.is_empty() {
                return Err(FetchError::Transfer(format!("direct: {direct}")));
            }
            tracing::warn!(error = %direct, "direct download failed, trying external tools");
            match self.fetch_with_tools(tools, url, destination).await {
                Ok(()) => Ok(()),
                Err(mut messages) => {
                    messages.insert(0, format!("direct: {direct}"));
                    Err(FetchError::Transfer(messages.join("; ")))
                }
            }
        }
    }

    /// Try each permitted tool in order; `Err` collects every failure message
    async fn fetch_with_tools(
        &self,
        tools: &[ExternalTool],
        url: &str,
        destination: &Path,
    ) -> Result<(), Vec<String>> {
        // A partial file from an earlier strategy would confuse tools that
        // refuse to overwrite
        cleanup_partial(destination).await;

        let mut messages = Vec::new();
        for tool in tools {
            tracing::info!(tool = %tool, destination = %destination.display(), "attempting external download");
            match self
                .runner
                .attempt(*tool, url, destination, &self.options)
                .await
            {
                Ok(()) => {
                    tracing::info!(tool = %tool, "external download complete");
                    return Ok(());
                }
                Err(message) => {
                    tracing::warn!(tool = %tool, error = %message, "external downloader failed");
                    cleanup_partial(destination).await;
                    messages.push(format!("{tool}: {message}"));
                }
            }
        }

        if messages.is_empty() {
            messages.push("no external downloader available".to_string());
        }
        Err(messages)
    }

    /// In-process streaming download with partial-file cleanup
    async fn stream_direct(&self, url: &str, destination: &Path) -> Result<(), String> {
        let result = self.try_stream(url, destination).await;
        if result.is_err() {
            cleanup_partial(destination).await;
        }
        result
    }

    async fn try_stream(&self, url: &str, destination: &Path) -> Result<(), String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|error| format!("request failed: {error}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }

        if let Some(total) = response.content_length() {
            tracing::debug!(total_bytes = total, "download size known");
        }

        let file = tokio::fs::File::create(destination)
            .await
            .map_err(|error| format!("cannot create {}: {error}", destination.display()))?;
        let mut writer = BufWriter::with_capacity(self.options.chunk_size_bytes, file);

        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|error| format!("read failed: {error}"))?;
            downloaded += chunk.len() as u64;
            writer
                .write_all(&chunk)
                .await
                .map_err(|error| format!("write failed: {error}"))?;
        }

        writer
            .flush()
            .await
            .map_err(|error| format!("flush failed: {error}"))?;

        tracing::info!(
            bytes = downloaded,
            destination = %destination.display(),
            "direct download complete"
        );
        Ok(())
    }
}

/// Remove a leftover destination file, best-effort
async fn cleanup_partial(destination: &Path) {
    if tokio::fs::metadata(destination).await.is_ok() {
        if let Err(error) = tokio::fs::remove_file(destination).await {
            tracing::warn!(
                destination = %destination.display(),
                error = %error,
                "failed to remove partial download"
            );
        } else {
            tracing::debug!(destination = %destination.display(), "removed partial download");
        }
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================
