//! Remote-source fetch
//!
//! Downloads an artifact the client referenced by URL into scratch storage.
//! The whole download, connect to last byte, is bounded by one timeout.

use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use tokio::io::AsyncWriteExt;

use super::types::TransferError;
use crate::archive::sanitize_file_name;

/// Default bound on a remote fetch: 60 seconds
pub const REMOTE_TIMEOUT_SECS: u64 = 60;

/// File name used when the URL has no usable last segment
const FALLBACK_FILE_NAME: &str = "download";

/// A finished download
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: u64,
}

/// HTTP client for remote-source imports
#[derive(Clone)]
pub struct RemoteFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl RemoteFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// Download `url` into `dest`, refusing bodies larger than `max_bytes`
    pub async fn fetch_to(
        &self,
        url: &Url,
        dest: &Path,
        max_bytes: u64,
    ) -> Result<Fetched, TransferError> {
        tracing::info!(url = %url, "Fetching remote source");

        match tokio::time::timeout(self.timeout, self.download(url, dest, max_bytes)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(url = %url, timeout_secs = self.timeout.as_secs(), "Remote fetch timed out");
                Err(self.timed_out(url))
            }
        }
    }

    async fn download(
        &self,
        url: &Url,
        dest: &Path,
        max_bytes: u64,
    ) -> Result<Fetched, TransferError> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.request_error(url, e))?;

        if !response.status().is_success() {
            return Err(TransferError::RemoteFetch(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        if let Some(len) = response.content_length() {
            if len > max_bytes {
                return Err(TransferError::TooLarge { size: len, max: max_bytes });
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        let mut file = tokio::fs::File::create(dest).await?;
        let mut bytes: u64 = 0;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.request_error(url, e))?
        {
            bytes += chunk.len() as u64;
            if bytes > max_bytes {
                return Err(TransferError::TooLarge { size: bytes, max: max_bytes });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        tracing::info!(
            url = %url,
            bytes = bytes,
            content_type = %content_type,
            "Remote source fetched"
        );

        Ok(Fetched { bytes })
    }

    fn request_error(&self, url: &Url, err: reqwest::Error) -> TransferError {
        if err.is_timeout() {
            self.timed_out(url)
        } else {
            TransferError::RemoteFetch(format!("{}: {}", url, err))
        }
    }

    fn timed_out(&self, url: &Url) -> TransferError {
        TransferError::RemoteTimeout {
            url: url.to_string(),
            secs: self.timeout.as_secs(),
        }
    }
}

/// File name for a raw remote import: the URL's last path segment
pub fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .and_then(|segment| urlencoding::decode(segment).ok())
        .and_then(|decoded| sanitize_file_name(&decoded).ok())
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use tempfile::TempDir;

    async fn serve(router: Router) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[test]
    fn test_file_name_from_url() {
        let url = Url::parse("http://example.com/tools/restorer_3.0.0.zip?x=1").unwrap();
        assert_eq!(file_name_from_url(&url), "restorer_3.0.0.zip");

        let url = Url::parse("http://example.com/a/my%20file.txt").unwrap();
        assert_eq!(file_name_from_url(&url), "my file.txt");

        let url = Url::parse("http://example.com/").unwrap();
        assert_eq!(file_name_from_url(&url), "download");

        let url = Url::parse("http://example.com/a/%2E%2E").unwrap();
        assert_eq!(file_name_from_url(&url), "download");
    }

    #[tokio::test]
    async fn test_fetch_to_file() {
        let addr = serve(Router::new().route("/data.bin", get(|| async { vec![7u8; 10_000] }))).await;
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("data.bin");

        let fetcher = RemoteFetcher::new(Duration::from_secs(5));
        let url = Url::parse(&format!("http://{}/data.bin", addr)).unwrap();
        let fetched = fetcher.fetch_to(&url, &dest, u64::MAX).await.unwrap();

        assert_eq!(fetched.bytes, 10_000);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), vec![7u8; 10_000]);
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let addr = serve(Router::new()).await;
        let temp_dir = TempDir::new().unwrap();

        let fetcher = RemoteFetcher::new(Duration::from_secs(5));
        let url = Url::parse(&format!("http://{}/missing.zip", addr)).unwrap();
        let result = fetcher
            .fetch_to(&url, &temp_dir.path().join("missing.zip"), u64::MAX)
            .await;

        assert!(matches!(result, Err(TransferError::RemoteFetch(_))));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let router = Router::new().route(
            "/slow.zip",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let addr = serve(router).await;
        let temp_dir = TempDir::new().unwrap();

        let fetcher = RemoteFetcher::new(Duration::from_millis(100));
        let url = Url::parse(&format!("http://{}/slow.zip", addr)).unwrap();
        let result = fetcher
            .fetch_to(&url, &temp_dir.path().join("slow.zip"), u64::MAX)
            .await;

        assert!(matches!(result, Err(TransferError::RemoteTimeout { .. })));
    }

    #[tokio::test]
    async fn test_fetch_too_large() {
        let addr = serve(Router::new().route("/big.bin", get(|| async { vec![0u8; 4096] }))).await;
        let temp_dir = TempDir::new().unwrap();

        let fetcher = RemoteFetcher::new(Duration::from_secs(5));
        let url = Url::parse(&format!("http://{}/big.bin", addr)).unwrap();
        let result = fetcher
            .fetch_to(&url, &temp_dir.path().join("big.bin"), 1024)
            .await;

        assert!(matches!(result, Err(TransferError::TooLarge { .. })));
    }
}
