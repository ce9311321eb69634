//! Compact model identifier parsing
//!
//! A fetch request names a registry model, and optionally one of its published
//! versions, as `"<model>"` or `"<model>@<version>"` — e.g. `12345@67890`.
//! An absent version means "latest published version".

use crate::error::{FetchError, FetchResult};

/// A parsed model identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelIdentifier {
    /// Numeric registry model id
    pub model_id: u64,
    /// Numeric version id; `None` selects the latest published version
    pub version_id: Option<u64>,
}

impl ModelIdentifier {
    /// Parse the compact `model[@version]` form
    ///
    /// Splits on the first `@`. An empty right-hand segment (`"12345@"`) is
    /// treated the same as no segment at all.
    pub fn parse(text: &str) -> FetchResult<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(FetchError::Validation(
                "model identifier required (ex: 12345@67890)".to_string(),
            ));
        }

        let (model_part, version_part) = match trimmed.split_once('@') {
            Some((model, version)) => (model, Some(version)),
            None => (trimmed, None),
        };

        let model_id = model_part
            .parse::<u64>()
            .map_err(|_| FetchError::Validation("invalid model id".to_string()))?;

        let version_id = match version_part {
            None | Some("") => None,
            Some(version) => Some(
                version
                    .parse::<u64>()
                    .map_err(|_| FetchError::Validation("invalid version id".to_string()))?,
            ),
        };

        Ok(Self {
            model_id,
            version_id,
        })
    }
}

impl std::fmt::Display for ModelIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.version_id {
            Some(version_id) => write!(f, "{}@{}", self.model_id, version_id),
            None => write!(f, "{}", self.model_id),
        }
    }
}
