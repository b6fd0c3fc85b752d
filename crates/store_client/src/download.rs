//! Plain HTTP download of a snapshot workbook into a caller-owned directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::{build_http, StoreError};

/// Download `url` into `dir`, naming the file after the last URL path segment.
pub fn download(
    url: &str,
    token: Option<&str>,
    timeout: Duration,
    dir: &Path,
) -> Result<PathBuf, StoreError> {
    let http = build_http(timeout)?;
    let mut req = http.get(url);
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }

    let response = req.send().map_err(|e| StoreError::Network(e.to_string()))?;
    let status = response.status().as_u16();
    if !response.status().is_success() {
        let body = response.text().unwrap_or_default();
        return Err(match status {
            401 | 403 => StoreError::Unauthorized(body),
            _ => StoreError::Http(status, format!("Failed to download {}", url)),
        });
    }
    let bytes = response.bytes().map_err(|e| StoreError::Network(e.to_string()))?;

    let path = dir.join(file_name(url));
    std::fs::write(&path, &bytes).map_err(|e| StoreError::Io(e.to_string()))?;
    log::info!("downloaded {} ({} bytes)", url, bytes.len());
    Ok(path)
}

fn file_name(url: &str) -> String {
    let name = reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segs| segs.next_back().map(String::from))
        })
        .filter(|s| !s.is_empty() && s != "." && s != "..");
    name.unwrap_or_else(|| "snapshot.xlsx".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn test_download_writes_into_dir() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/reports/RCA.xlsx").header("authorization", "Bearer t");
            then.status(200).body("PK\x03\x04workbook");
        });

        let dir = tempfile::tempdir().unwrap();
        let path = download(&server.url("/reports/RCA.xlsx"), Some("t"), Duration::from_secs(5), dir.path())
            .unwrap();
        mock.assert();
        assert_eq!(path, dir.path().join("RCA.xlsx"));
        assert_eq!(std::fs::read(&path).unwrap(), b"PK\x03\x04workbook");
    }

    #[test]
    fn test_download_http_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/missing.xlsx");
            then.status(404);
        });

        let dir = tempfile::tempdir().unwrap();
        let err = download(&server.url("/missing.xlsx"), None, Duration::from_secs(5), dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::Http(404, _)));
    }

    #[test]
    fn test_file_name_fallback() {
        assert_eq!(file_name("https://h/a/b/RCA%20Jan.xlsx"), "RCA%20Jan.xlsx");
        assert_eq!(file_name("https://h/"), "snapshot.xlsx");
    }
}
