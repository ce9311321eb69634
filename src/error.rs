//! Error types for the fetch pipeline

use thiserror::Error;

/// Errors surfaced by the resolve-fetch-cache pipeline
///
/// The variants follow the propagation policy: `Validation` and the registry
/// variants abort a fetch immediately, `Transfer` is raised only after the
/// configured fallback chain is exhausted. Ledger persistence failures never
/// appear here — they degrade to `warn!` events (see [`crate::ledger`]).
#[derive(Debug, Error)]
pub enum FetchError {
    /// Malformed identifier or request input. Never retried.
    #[error("{0}")]
    Validation(String),

    /// The registry rejected a metadata request with a non-success status.
    #[error("registry request failed with status {status}")]
    RegistryStatus {
        /// HTTP status code returned by the registry
        status: u16,
    },

    /// The registry could not be reached, or its metadata cannot produce a
    /// downloadable file.
    #[error("{0}")]
    Registry(String),

    /// All configured download strategies failed. The message aggregates the
    /// per-strategy failures in the order they were attempted.
    #[error("download failed: {0}")]
    Transfer(String),
}

impl FetchError {
    /// True for any registry-side failure, regardless of variant
    pub fn is_registry(&self) -> bool {
        matches!(self, Self::RegistryStatus { .. } | Self::Registry(_))
    }
}

pub type FetchResult<T> = Result<T, FetchError>;
