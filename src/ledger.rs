//! Download ledger persistence
//!
//! The ledger is a JSON file mapping model ids to the version records ever
//! downloaded for them; it doubles as the cache index. The file on disk is the
//! single source of truth: every lookup re-reads it and every successful
//! insert rewrites it, so it can be inspected or edited between runs.
//!
//! Persistence is deliberately forgiving in both directions: a missing or
//! corrupt file reads as an empty ledger, and a failed write is logged and
//! swallowed. Losing download history must never fail a fetch that already
//! succeeded.

use crate::paths::find_existing_file;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// One file downloaded for a model version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Registry file id; unused, kept for wire compatibility
    pub id: Option<u64>,
    /// Filename as stored in a model directory
    pub name: String,
    #[serde(rename = "downloadUrl")]
    pub download_url: String,
    /// When the file was fetched; absent in ledgers written by older versions
    #[serde(
        rename = "downloadedAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub downloaded_at: Option<DateTime<Utc>>,
}

/// Every file downloaded for one (model, version) pair
///
/// `id` is `None` for entries produced by degraded resolution where the
/// version id never came back from the registry, and for legacy entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub id: Option<u64>,
    #[serde(default)]
    pub files: Vec<FileRecord>,
}

/// The persisted download history, keyed by model id
///
/// Serialized as a bare JSON object (`{"12345": [...]}`); unknown fields
/// inside records are ignored on read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadLedger {
    models: BTreeMap<String, Vec<VersionRecord>>,
}

impl DownloadLedger {
    /// Look up a previously downloaded filename for (model, version)
    ///
    /// When a specific version is requested, records with an unresolved
    /// (`None`) id are skipped. A name only counts as a hit while the file
    /// still exists in one of the configured model directories — stale ledger
    /// entries for deleted files are not hits.
    pub fn find_cached(
        &self,
        model_id: u64,
        version_id: Option<u64>,
        model_dirs: &[PathBuf],
    ) -> Option<String> {
        let records = self.models.get(&model_id.to_string())?;

        for record in records {
            if let Some(version_id) = version_id
                && record.id != Some(version_id)
            {
                continue;
            }
            for file in &record.files {
                if file.name.is_empty() {
                    continue;
                }
                if find_existing_file(&file.name, model_dirs).is_some() {
                    return Some(file.name.clone());
                }
            }
        }

        None
    }

    /// Record a successful download
    ///
    /// Finds or creates the version record for (model, version) and appends a
    /// file entry unless one with the same name is already present. Returns
    /// true only when something was actually appended.
    pub fn record(
        &mut self,
        model_id: u64,
        version_id: Option<u64>,
        file_name: &str,
        download_url: &str,
    ) -> bool {
        let records = self.models.entry(model_id.to_string()).or_default();

        let index = match records.iter().position(|record| record.id == version_id) {
            Some(index) => index,
            None => {
                records.push(VersionRecord {
                    id: version_id,
                    files: Vec::new(),
                });
                records.len() - 1
            }
        };
        let record = &mut records[index];

        if record.files.iter().any(|file| file.name == file_name) {
            return false;
        }

        record.files.push(FileRecord {
            id: None,
            name: file_name.to_string(),
            download_url: download_url.to_string(),
            downloaded_at: Some(Utc::now()),
        });
        true
    }

    /// Number of models with at least one recorded version
    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// All version records for a model, if any
    pub fn versions(&self, model_id: u64) -> Option<&[VersionRecord]> {
        self.models.get(&model_id.to_string()).map(Vec::as_slice)
    }
}

// ============================================================================
// Storage backend
// ============================================================================

/// Trait for ledger file IO, so tests can substitute an in-memory store
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Save content to a file path atomically
    async fn save(&self, path: &Path, content: &str) -> Result<()>;

    /// Load content from a file path; `None` when the file doesn't exist
    async fn load(&self, path: &Path) -> Result<Option<String>>;
}

/// Production storage backend using tokio::fs
pub struct FileSystemStorage;

impl FileSystemStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileSystemStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for FileSystemStorage {
    async fn save(&self, path: &Path, content: &str) -> Result<()> {
        // Atomic write: write to temp file, then rename
        let temp_file = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_file)
            .await
            .context("Failed to create temp ledger file")?;
        file.write_all(content.as_bytes())
            .await
            .context("Failed to write ledger file")?;
        file.sync_all()
            .await
            .context("Failed to sync ledger file")?;

        fs::rename(&temp_file, path)
            .await
            .context("Failed to rename temp ledger file")?;

        Ok(())
    }

    async fn load(&self, path: &Path) -> Result<Option<String>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read ledger file: {:?}", path))?;

        Ok(Some(content))
    }
}

// ============================================================================
// Ledger store
// ============================================================================

/// File-backed ledger access with best-effort persistence
pub struct LedgerStore {
    path: PathBuf,
    storage: Arc<dyn StorageBackend>,
}

impl LedgerStore {
    /// Create a store with a custom storage backend
    pub fn new_with_storage(path: PathBuf, storage: Arc<dyn StorageBackend>) -> Self {
        Self { path, storage }
    }

    /// Create a store backed by the filesystem
    pub fn new(path: PathBuf) -> Self {
        Self::new_with_storage(path, Arc::new(FileSystemStorage::new()))
    }

    /// Read the ledger from disk
    ///
    /// Never fails: a missing, unreadable, or malformed file reads as an
    /// empty ledger ("no history"), with a diagnostic on the log stream.
    pub async fn load(&self) -> DownloadLedger {
        let content = match self.storage.load(&self.path).await {
            Ok(Some(content)) => content,
            Ok(None) => {
                tracing::debug!(path = ?self.path, "no ledger file, starting with empty history");
                return DownloadLedger::default();
            }
            Err(error) => {
                tracing::warn!(
                    path = ?self.path,
                    error = %error,
                    "ledger file unreadable, treating as empty history"
                );
                return DownloadLedger::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(ledger) => ledger,
            Err(error) => {
                tracing::warn!(
                    path = ?self.path,
                    error = %error,
                    "ledger file malformed, treating as empty history"
                );
                DownloadLedger::default()
            }
        }
    }

    /// Write the ledger to disk, best-effort
    ///
    /// A failure is logged, never raised: losing history must not abort a
    /// download that already succeeded.
    pub async fn save(&self, ledger: &DownloadLedger) {
        if let Err(error) = self.try_save(ledger).await {
            tracing::warn!(
                path = ?self.path,
                error = %error,
                "failed to persist download ledger"
            );
        }
    }

    async fn try_save(&self, ledger: &DownloadLedger) -> Result<()> {
        let content =
            serde_json::to_string_pretty(ledger).context("Failed to serialize ledger")?;
        self.storage.save(&self.path, &content).await
    }

    /// Record a successful download and persist when something changed
    ///
    /// Returns true when a new file entry was appended (and a save was
    /// attempted); false when the entry already existed.
    pub async fn record(
        &self,
        ledger: &mut DownloadLedger,
        model_id: u64,
        version_id: Option<u64>,
        file_name: &str,
        download_url: &str,
    ) -> bool {
        if !ledger.record(model_id, version_id, file_name, download_url) {
            return false;
        }
        self.save(ledger).await;
        true
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================
