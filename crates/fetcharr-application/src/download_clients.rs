use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fetcharr_domain::{Error, Result};
use serde::Deserialize;
use tokio::time::Duration;
use tracing::{debug, info};

use crate::rate_limit::RateLimiter;

/// Outcome of handing an artifact to the downloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOutcome {
    /// Opaque job handle, echoed back in webhooks.
    pub handle: String,
    /// Content hash, if the downloader exposes one.
    pub hash: String,
    /// Free-text detail; a cached hit announces itself here.
    pub detail: String,
}

impl EnqueueOutcome {
    pub fn indicates_cached(&self) -> bool {
        self.detail.to_lowercase().contains("cached")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub id: i64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryItem {
    pub id: i64,
    pub title: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadInfo {
    pub cached: bool,
    pub download_present: bool,
    pub download_finished: bool,
    pub files: Vec<String>,
}

/// Out-of-process component that actually transfers release bytes.
#[async_trait]
pub trait DownloaderClient: Send + Sync {
    async fn enqueue(
        &self,
        data: Vec<u8>,
        filename: &str,
        category: &str,
        priority: i64,
        params: &HashMap<String, String>,
    ) -> Result<EnqueueOutcome>;
    async fn queue(&self) -> Result<Vec<QueueItem>>;
    async fn history(&self) -> Result<Vec<HistoryItem>>;
    async fn find(&self, handle: &str) -> Result<DownloadInfo>;
    async fn cancel(&self, handle: &str) -> Result<()>;
    async fn delete_from_history(&self, handle: &str) -> Result<()>;
}

const TORBOX_API_BASE: &str = "https://api.torbox.app/v1/api";

pub struct TorboxClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
}

impl TorboxClient {
    pub fn new(cfg: &fetcharr_config::DownloaderConfig, limiter: Arc<RateLimiter>) -> Self {
        Self::with_base_url(cfg, limiter, TORBOX_API_BASE.to_string())
    }

    pub fn with_base_url(
        cfg: &fetcharr_config::DownloaderConfig,
        limiter: Arc<RateLimiter>,
        base_url: String,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .expect("reqwest client");

        Self {
            base_url,
            api_key: cfg.api_key.clone(),
            http,
            limiter,
        }
    }

    async fn list_downloads(&self) -> Result<Vec<UsenetDownload>> {
        self.limiter.acquire().await;

        let response = self
            .http
            .get(format!("{}/usenet/mylist", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = response.status();
        let body = response.text().await.map_err(map_reqwest)?;
        if !status.is_success() {
            return Err(Error::external("downloader", format!("status {}: {}", status.as_u16(), body)));
        }

        let parsed: UsenetListResponse = serde_json::from_str(&body)
            .map_err(|e| Error::external("downloader", format!("bad list response: {e}")))?;
        if !parsed.success {
            return Err(Error::external("downloader", parsed.detail));
        }
        Ok(parsed.data)
    }

    async fn control(&self, handle: &str, operation: &str) -> Result<()> {
        let usenet_id: i64 = handle
            .parse()
            .map_err(|_| Error::InvalidInput(format!("bad download handle '{handle}'")))?;

        self.limiter.acquire().await;

        let body = serde_json::json!({ "usenet_id": usenet_id, "operation": operation });
        let response = self
            .http
            .post(format!("{}/usenet/controlusenetdownload", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::external("downloader", format!("status {}: {}", status.as_u16(), body)));
        }

        info!(target: "downloader", handle, operation, "controlled download");
        Ok(())
    }
}

#[async_trait]
impl DownloaderClient for TorboxClient {
    async fn enqueue(
        &self,
        data: Vec<u8>,
        filename: &str,
        category: &str,
        _priority: i64,
        params: &HashMap<String, String>,
    ) -> Result<EnqueueOutcome> {
        self.limiter.acquire().await;

        debug!(target: "downloader", filename, size = data.len(), "uploading artifact");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(data).file_name(filename.to_string()),
            )
            .text("name", filename.trim_end_matches(".nzb").to_string())
            .text("category", category.to_string());
        for (key, value) in params {
            form = form.text(key.clone(), value.clone());
        }

        let response = self
            .http
            .post(format!("{}/usenet/createusenetdownload", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = response.status();
        let body = response.text().await.map_err(map_reqwest)?;
        if !status.is_success() {
            return Err(Error::external("downloader", format!("status {}: {}", status.as_u16(), body)));
        }

        let parsed: CreateDownloadResponse = serde_json::from_str(&body)
            .map_err(|e| Error::external("downloader", format!("bad enqueue response: {e}")))?;
        if !parsed.success {
            return Err(Error::external("downloader", parsed.detail));
        }

        info!(target: "downloader", handle = parsed.data.usenetdownload_id, detail = %parsed.detail, "enqueued download");
        Ok(EnqueueOutcome {
            handle: parsed.data.usenetdownload_id.to_string(),
            hash: parsed.data.hash,
            detail: parsed.detail,
        })
    }

    async fn queue(&self) -> Result<Vec<QueueItem>> {
        let downloads = self.list_downloads().await?;
        Ok(downloads
            .into_iter()
            .filter(|d| !d.download_finished)
            .map(|d| QueueItem { id: d.id, title: d.name })
            .collect())
    }

    async fn history(&self) -> Result<Vec<HistoryItem>> {
        let downloads = self.list_downloads().await?;
        Ok(downloads
            .into_iter()
            .filter(|d| d.download_finished)
            .map(|d| HistoryItem { id: d.id, title: d.name, status: d.download_state })
            .collect())
    }

    async fn find(&self, handle: &str) -> Result<DownloadInfo> {
        let id: i64 = handle
            .parse()
            .map_err(|_| Error::InvalidInput(format!("bad download handle '{handle}'")))?;

        let downloads = self.list_downloads().await?;
        let download = downloads
            .into_iter()
            .find(|d| d.id == id)
            .ok_or_else(|| Error::NotFound(format!("download {handle}")))?;

        Ok(DownloadInfo {
            cached: download.cached,
            download_present: download.download_present,
            download_finished: download.download_finished,
            files: download.files.into_iter().map(|f| f.name).collect(),
        })
    }

    async fn cancel(&self, handle: &str) -> Result<()> {
        self.control(handle, "delete").await
    }

    async fn delete_from_history(&self, handle: &str) -> Result<()> {
        self.control(handle, "delete").await
    }
}

fn map_reqwest(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout
    } else {
        Error::external("downloader", err)
    }
}

#[derive(Debug, Deserialize)]
struct CreateDownloadResponse {
    success: bool,
    #[serde(default)]
    detail: String,
    #[serde(default)]
    data: CreateDownloadData,
}

#[derive(Debug, Default, Deserialize)]
struct CreateDownloadData {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    usenetdownload_id: i64,
}

#[derive(Debug, Deserialize)]
struct UsenetListResponse {
    success: bool,
    #[serde(default)]
    detail: String,
    #[serde(default)]
    data: Vec<UsenetDownload>,
}

#[derive(Debug, Deserialize)]
struct UsenetDownload {
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    download_state: String,
    #[serde(default)]
    cached: bool,
    #[serde(default)]
    download_present: bool,
    #[serde(default)]
    download_finished: bool,
    #[serde(default)]
    files: Vec<UsenetFile>,
}

#[derive(Debug, Deserialize)]
struct UsenetFile {
    #[serde(default)]
    name: String,
}
