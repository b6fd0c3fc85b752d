//! Versioned blob store client (GitHub contents API shape).
//!
//! Blocking reqwest client (no Tokio runtime required). One attempt per
//! request; every request carries the configured timeout.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Blob store client (blocking).
#[derive(Clone)]
pub struct StoreClient {
    http: reqwest::blocking::Client,
    api_base: String,
    owner: String,
    repository: String,
    branch: Option<String>,
    token: String,
}

/// Error type for store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Network error (connect, timeout, TLS)
    Network(String),
    /// HTTP error with status code
    Http(u16, String),
    /// The blob changed since it was read; the write was rejected
    Conflict { path: String, expected: Option<String> },
    /// Token rejected
    Unauthorized(String),
    /// Response body did not have the expected shape
    Parse(String),
    /// Local file I/O error
    Io(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Network(msg) => write!(f, "Network error: {}", msg),
            StoreError::Http(code, msg) => write!(f, "HTTP {}: {}", code, msg),
            StoreError::Conflict { path, expected } => match expected {
                Some(sha) => write!(f, "{} changed remotely (expected revision {})", path, sha),
                None => write!(f, "{} already exists remotely; refusing to overwrite", path),
            },
            StoreError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            StoreError::Parse(msg) => write!(f, "Parse error: {}", msg),
            StoreError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// A blob as read from the store, with the revision id needed to replace it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub sha: String,
    pub bytes: Vec<u8>,
}

pub(crate) fn build_http(timeout: Duration) -> Result<reqwest::blocking::Client, StoreError> {
    reqwest::blocking::Client::builder()
        .user_agent(format!("rcaledger/{}", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .map_err(|e| StoreError::Network(format!("Failed to create HTTP client: {}", e)))
}

impl StoreClient {
    pub fn new(
        api_base: &str,
        owner: &str,
        repository: &str,
        token: String,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            http: build_http(timeout)?,
            api_base: api_base.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            repository: repository.to_string(),
            branch: None,
            token,
        })
    }

    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch.filter(|b| !b.trim().is_empty());
        self
    }

    /// `owner/repository`, for logs.
    pub fn describe(&self) -> String {
        format!("{}/{}", self.owner, self.repository)
    }

    /// Read a blob. `Ok(None)` when the path does not exist yet.
    pub fn fetch(&self, path: &str) -> Result<Option<Blob>, StoreError> {
        let mut req = self
            .http
            .get(self.contents_url(path))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json");
        if let Some(branch) = &self.branch {
            req = req.query(&[("ref", branch.as_str())]);
        }
        let response = req.send().map_err(|e| StoreError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 404 {
            return Ok(None);
        }
        let response = check_status(response, path, None)?;
        let json: serde_json::Value = response.json().map_err(|e| StoreError::Parse(e.to_string()))?;

        let sha = json["sha"]
            .as_str()
            .ok_or_else(|| StoreError::Parse(format!("Missing sha for {}", path)))?
            .to_string();

        // Large files come back without inline content; follow download_url
        let inline = json["content"].as_str().unwrap_or("");
        let bytes = if json["encoding"].as_str() == Some("base64") && !inline.is_empty() {
            decode_content(inline)?
        } else {
            let url = json["download_url"]
                .as_str()
                .ok_or_else(|| StoreError::Parse(format!("No content or download_url for {}", path)))?;
            self.get_raw(url)?
        };

        log::info!("fetched {} from {} at {} ({} bytes)", path, self.describe(), short(&sha), bytes.len());
        Ok(Some(Blob { sha, bytes }))
    }

    /// Replace a blob, conditional on its current revision being `expected_sha`.
    ///
    /// `expected_sha = None` only succeeds when the path does not exist yet.
    /// Returns the new revision id.
    pub fn put(
        &self,
        path: &str,
        bytes: &[u8],
        expected_sha: Option<&str>,
        message: &str,
    ) -> Result<String, StoreError> {
        let mut body = serde_json::json!({
            "message": message,
            "content": STANDARD.encode(bytes),
        });
        if let Some(sha) = expected_sha {
            body["sha"] = serde_json::Value::String(sha.to_string());
        }
        if let Some(branch) = &self.branch {
            body["branch"] = serde_json::Value::String(branch.clone());
        }

        let response = self
            .http
            .put(self.contents_url(path))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send()
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let response = check_status(response, path, expected_sha)?;
        let json: serde_json::Value = response.json().map_err(|e| StoreError::Parse(e.to_string()))?;
        let sha = json["content"]["sha"]
            .as_str()
            .ok_or_else(|| StoreError::Parse("Missing content.sha in response".into()))?
            .to_string();

        log::info!("published {} to {} at {}", path, self.describe(), short(&sha));
        Ok(sha)
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base,
            self.owner,
            self.repository,
            path.trim_start_matches('/')
        )
    }

    fn get_raw(&self, url: &str) -> Result<Vec<u8>, StoreError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .map_err(|e| StoreError::Network(e.to_string()))?;
        let response = check_status(response, url, None)?;
        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| StoreError::Network(e.to_string()))
    }
}

/// Map non-success responses. 409/412, and 422 on a write, mean the precondition failed.
fn check_status(
    response: reqwest::blocking::Response,
    path: &str,
    expected_sha: Option<&str>,
) -> Result<reqwest::blocking::Response, StoreError> {
    let status = response.status().as_u16();
    if response.status().is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    let conflict = || StoreError::Conflict {
        path: path.to_string(),
        expected: expected_sha.map(String::from),
    };
    match status {
        401 | 403 => Err(StoreError::Unauthorized(body)),
        409 | 412 => Err(conflict()),
        422 if body.contains("sha") => Err(conflict()),
        _ => Err(StoreError::Http(status, body)),
    }
}

fn decode_content(content: &str) -> Result<Vec<u8>, StoreError> {
    // The API wraps base64 at 60 columns
    let compact: String = content.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| StoreError::Parse(format!("Invalid base64 content: {}", e)))
}

fn short(sha: &str) -> &str {
    sha.get(..12).unwrap_or(sha)
}
