//! Remote model registry client
//!
//! Fetches model and model-version metadata from a CivitAI-style API and
//! resolves which file to download for a given model + version. When version
//! metadata cannot be fetched, resolution degrades to the well-known direct
//! download URL for that version, probing it for a filename instead of
//! failing the whole fetch.

use crate::error::{FetchError, FetchResult};
use reqwest::header;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Build the shared HTTP client used for registry calls and direct downloads
///
/// The timeout bounds connection setup and per-read stalls, not the total
/// transfer time — a large artifact may legitimately stream for much longer.
pub fn build_http_client(token: Option<&str>, timeout: Duration) -> FetchResult<reqwest::Client> {
    let mut headers = header::HeaderMap::new();
    if let Some(token) = token {
        let mut value = header::HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| FetchError::Validation("API token contains invalid characters".into()))?;
        value.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, value);
    }

    reqwest::Client::builder()
        .user_agent(concat!("civitai-fetcher/", env!("CARGO_PKG_VERSION")))
        .default_headers(headers)
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()
        .map_err(|error| FetchError::Registry(format!("failed to build HTTP client: {error}")))
}

// ============================================================================
// Wire types (partial — only the fields resolution needs)
// ============================================================================

/// `GET /models/{id}` response
#[derive(Debug, Clone, Deserialize)]
pub struct ModelResponse {
    #[serde(rename = "modelVersions", default)]
    pub model_versions: Vec<VersionResponse>,
}

/// `GET /model-versions/{id}` response, also nested in [`ModelResponse`]
#[derive(Debug, Clone, Deserialize)]
pub struct VersionResponse {
    pub id: Option<u64>,
    #[serde(default)]
    pub files: Vec<VersionFile>,
    /// Version-level download URL, a fallback when the file carries none
    #[serde(rename = "downloadUrl")]
    pub download_url: Option<String>,
}

/// One downloadable file within a version
#[derive(Debug, Clone, Deserialize)]
pub struct VersionFile {
    pub id: Option<u64>,
    pub name: Option<String>,
    #[serde(default)]
    pub primary: bool,
    #[serde(rename = "downloadUrl")]
    pub download_url: Option<String>,
}

/// Outcome of registry resolution; not persisted until a download succeeds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDownload {
    pub model_id: u64,
    /// `None` only when the registry's own metadata omitted the version id
    pub version_id: Option<u64>,
    pub file_name: String,
    pub download_url: String,
}

/// The registry-designated primary file, else the first offered
///
/// Order-dependent on the registry's returned list; this is the documented
/// selection policy, not a heuristic.
pub fn primary_or_first(files: &[VersionFile]) -> Option<&VersionFile> {
    files.iter().find(|file| file.primary).or_else(|| files.first())
}

// ============================================================================
// Client
// ============================================================================

/// Authenticated client for the model registry
pub struct RegistryClient {
    http: reqwest::Client,
    api_root: String,
    download_root: String,
    token: Option<String>,
}

impl RegistryClient {
    pub fn new(
        http: reqwest::Client,
        api_root: &str,
        download_root: &str,
        token: Option<String>,
    ) -> Self {
        Self {
            http,
            api_root: api_root.trim_end_matches('/').to_string(),
            download_root: download_root.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Issue an authenticated GET against the metadata API
    pub async fn fetch_json<T: DeserializeOwned>(&self, endpoint: &str) -> FetchResult<T> {
        let url = format!("{}/{}", self.api_root, endpoint.trim_start_matches('/'));

        let mut request = self.http.get(&url);
        if let Some(token) = &self.token {
            request = request.query(&[("token", token.as_str())]);
        }

        let response = request
            .send()
            .await
            .map_err(|error| FetchError::Registry(format!("registry request failed: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::RegistryStatus {
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|error| FetchError::Registry(format!("invalid registry response: {error}")))
    }

    /// Resolve which file and URL to download for (model, version)
    ///
    /// With a version id, fetches that version's metadata, degrading to a
    /// synthesized direct-download URL when the lookup fails. Without one,
    /// fetches the model and takes its first (most recent) version.
    pub async fn resolve_download(
        &self,
        model_id: u64,
        version_id: Option<u64>,
    ) -> FetchResult<ResolvedDownload> {
        let (version, version_id) = match version_id {
            Some(version_id) => {
                let endpoint = format!("model-versions/{version_id}");
                match self.fetch_json::<VersionResponse>(&endpoint).await {
                    Ok(version) => (version, Some(version_id)),
                    Err(error) => {
                        tracing::warn!(
                            version_id = version_id,
                            error = %error,
                            "version metadata lookup failed, degrading to direct download URL"
                        );
                        return Ok(self.degraded_resolution(model_id, version_id).await);
                    }
                }
            }
            None => {
                let model: ModelResponse = self.fetch_json(&format!("models/{model_id}")).await?;
                let mut versions = model.model_versions;
                if versions.is_empty() {
                    return Err(FetchError::Registry(
                        "model has no versions available".into(),
                    ));
                }
                // The registry lists versions newest-first
                let version = versions.remove(0);
                let version_id = version.id;
                (version, version_id)
            }
        };

        let file = primary_or_first(&version.files).ok_or_else(|| {
            FetchError::Registry("model version has no downloadable files".into())
        })?;

        let download_url = file
            .download_url
            .clone()
            .or_else(|| version.download_url.clone())
            .ok_or_else(|| FetchError::Registry("no download URL returned by the registry".into()))?;

        let file_name = file
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| basename_of(&download_url));

        Ok(ResolvedDownload {
            model_id,
            version_id,
            file_name,
            download_url: self.with_token(&download_url),
        })
    }

    /// Resolution without metadata: synthesize the direct download URL and
    /// probe it for a filename. Probe failures never fail the resolution —
    /// the worst case is a placeholder filename.
    async fn degraded_resolution(&self, model_id: u64, version_id: u64) -> ResolvedDownload {
        let download_url = self.with_token(&format!("{}/{version_id}", self.download_root));

        let file_name = self
            .probe_file_name(&download_url)
            .await
            .unwrap_or_else(|| format!("civitai_model_{version_id}.safetensors"));

        tracing::info!(
            version_id = version_id,
            file = %file_name,
            "resolved via direct download URL"
        );

        ResolvedDownload {
            model_id,
            version_id: Some(version_id),
            file_name,
            download_url,
        }
    }

    /// Metadata-only probe for the filename a URL would download as
    async fn probe_file_name(&self, url: &str) -> Option<String> {
        let response = match self.http.head(url).send().await {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!(error = %error, "filename probe failed");
                return None;
            }
        };

        if let Some(value) = response.headers().get(header::CONTENT_DISPOSITION)
            && let Ok(value) = value.to_str()
            && let Some(name) = file_name_from_disposition(value)
        {
            return Some(name);
        }

        // Fall back to the basename of the final (post-redirect) URL, but
        // only when it looks like a real filename
        let base = basename_of(response.url().path());
        (!base.is_empty() && base.contains('.')).then_some(base)
    }

    /// Append the token as a query parameter unless one is already present
    fn with_token(&self, url: &str) -> String {
        let Some(token) = &self.token else {
            return url.to_string();
        };
        if url.contains("token=") {
            return url.to_string();
        }
        let separator = if url.contains('?') { '&' } else { '?' };
        format!("{url}{separator}token={}", urlencoding::encode(token))
    }
}

/// Last path segment of a URL, with query/fragment stripped
fn basename_of(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// Extract a bare filename from a `Content-Disposition` header value
fn file_name_from_disposition(value: &str) -> Option<String> {
    for part in value.split(';') {
        let part = part.trim();
        let is_filename = part
            .get(..9)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("filename="));
        if is_filename {
            let name = part[9..].trim().trim_matches('"').trim();
            // Header values can smuggle path components
            let name = name.rsplit(['/', '\\']).next().unwrap_or(name);
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_token(token: Option<&str>) -> RegistryClient {
        RegistryClient::new(
            reqwest::Client::new(),
            "https://civitai.example/api/v1/",
            "https://civitai.example/api/download/models/",
            token.map(str::to_string),
        )
    }

    fn file(name: &str, primary: bool) -> VersionFile {
        VersionFile {
            id: None,
            name: Some(name.to_string()),
            primary,
            download_url: None,
        }
    }

    #[test]
    fn test_primary_file_selected() {
        let files = vec![file("A", false), file("B", true)];
        let chosen = primary_or_first(&files).unwrap();
        assert_eq!(chosen.name.as_deref(), Some("B"));
    }

    #[test]
    fn test_first_file_selected_without_primary() {
        let files = vec![file("A", false), file("B", false)];
        let chosen = primary_or_first(&files).unwrap();
        assert_eq!(chosen.name.as_deref(), Some("A"));
    }

    #[test]
    fn test_no_files_selects_nothing() {
        assert!(primary_or_first(&[]).is_none());
    }

    #[test]
    fn test_parse_model_response() {
        let json = r#"{
            "id": 12345,
            "name": "Some Style",
            "type": "LORA",
            "modelVersions": [
                {
                    "id": 999,
                    "downloadUrl": "https://civitai.example/api/download/models/999",
                    "files": [
                        {
                            "id": 111,
                            "name": "style.safetensors",
                            "primary": true,
                            "sizeKB": 144,
                            "downloadUrl": "https://civitai.example/api/download/models/999"
                        }
                    ]
                },
                { "id": 888, "files": [] }
            ]
        }"#;

        let model: ModelResponse = serde_json::from_str(json).unwrap();
        assert_eq!(model.model_versions.len(), 2);
        assert_eq!(model.model_versions[0].id, Some(999));
        assert!(model.model_versions[0].files[0].primary);
        assert_eq!(model.model_versions[1].id, Some(888));
    }

    #[test]
    fn test_parse_version_response_defaults() {
        // `primary` and `downloadUrl` may be absent entirely
        let json = r#"{ "id": 7, "files": [{ "name": "a.safetensors" }] }"#;
        let version: VersionResponse = serde_json::from_str(json).unwrap();
        assert!(!version.files[0].primary);
        assert_eq!(version.download_url, None);
    }

    #[test]
    fn test_with_token_appends_query_parameter() {
        let client = client_with_token(Some("secret"));
        assert_eq!(
            client.with_token("https://x.example/dl"),
            "https://x.example/dl?token=secret"
        );
        assert_eq!(
            client.with_token("https://x.example/dl?type=Model"),
            "https://x.example/dl?type=Model&token=secret"
        );
    }

    #[test]
    fn test_with_token_skips_when_already_present() {
        let client = client_with_token(Some("secret"));
        let url = "https://x.example/dl?token=other";
        assert_eq!(client.with_token(url), url);
    }

    #[test]
    fn test_with_token_without_token() {
        let client = client_with_token(None);
        let url = "https://x.example/dl";
        assert_eq!(client.with_token(url), url);
    }

    #[test]
    fn test_with_token_encodes_value() {
        let client = client_with_token(Some("a b&c"));
        assert_eq!(
            client.with_token("https://x.example/dl"),
            "https://x.example/dl?token=a%20b%26c"
        );
    }

    #[test]
    fn test_basename_strips_query_and_fragment() {
        assert_eq!(
            basename_of("https://x.example/a/b/style.safetensors?token=t#frag"),
            "style.safetensors"
        );
        assert_eq!(basename_of("/download/models/999"), "999");
    }

    #[test]
    fn test_disposition_quoted_filename() {
        let name =
            file_name_from_disposition("attachment; filename=\"style.safetensors\"").unwrap();
        assert_eq!(name, "style.safetensors");
    }

    #[test]
    fn test_disposition_unquoted_filename() {
        let name = file_name_from_disposition("attachment; filename=style.safetensors").unwrap();
        assert_eq!(name, "style.safetensors");
    }

    #[test]
    fn test_disposition_case_insensitive() {
        let name = file_name_from_disposition("Attachment; FileName=\"x.ckpt\"").unwrap();
        assert_eq!(name, "x.ckpt");
    }

    #[test]
    fn test_disposition_strips_path_components() {
        let name = file_name_from_disposition("attachment; filename=\"../../evil.bin\"").unwrap();
        assert_eq!(name, "evil.bin");
    }

    #[test]
    fn test_disposition_without_filename() {
        assert!(file_name_from_disposition("inline").is_none());
        assert!(file_name_from_disposition("attachment; filename=\"\"").is_none());
    }

    #[test]
    fn test_client_trims_trailing_slashes() {
        let client = client_with_token(Some("t"));
        assert_eq!(client.api_root, "https://civitai.example/api/v1");
        assert_eq!(
            client.download_root,
            "https://civitai.example/api/download/models"
        );
    }
}
