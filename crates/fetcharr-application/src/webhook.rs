// SPDX-License-Identifier: GPL-3.0-or-later
use std::sync::Arc;

use fetcharr_domain::{Error, MediaStatus, Nzb, NzbStatus, Result};
use fetcharr_infrastructure::repositories::{MediaRepository, NzbRepository};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::download_clients::DownloaderClient;
use crate::download_tracker::DownloadTracker;
use crate::release_parsing::normalize_release_title;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Completed,
    Failed,
    Unknown,
}

/// A downloader completion/failure event, normalized by the HTTP adapter.
/// The release is resolved by handle, then hash, then dedup-normalized
/// release name.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub handle: Option<String>,
    pub hash: Option<String>,
    pub name: Option<String>,
    pub status: WebhookStatus,
    pub error: Option<String>,
    pub path: Option<String>,
    pub download_id: Option<i64>,
}

/// Maps downloader events to state transitions and retries. Events are
/// serialized so each one is atomic against the repository.
pub struct WebhookHandler {
    media_repo: Arc<dyn MediaRepository>,
    nzb_repo: Arc<dyn NzbRepository>,
    downloader: Arc<dyn DownloaderClient>,
    tracker: Arc<DownloadTracker>,
    max_retries: i64,
    gate: Mutex<()>,
}

impl WebhookHandler {
    pub fn new(
        media_repo: Arc<dyn MediaRepository>,
        nzb_repo: Arc<dyn NzbRepository>,
        downloader: Arc<dyn DownloaderClient>,
        tracker: Arc<DownloadTracker>,
        max_retries: i64,
    ) -> Self {
        Self {
            media_repo,
            nzb_repo,
            downloader,
            tracker,
            max_retries,
            gate: Mutex::new(()),
        }
    }

    pub async fn handle(&self, event: WebhookEvent) -> Result<()> {
        let _guard = self.gate.lock().await;

        info!(
            target: "webhook",
            status = ?event.status,
            handle = event.handle.as_deref().unwrap_or(""),
            name = event.name.as_deref().unwrap_or(""),
            "handling webhook event"
        );

        if event.status == WebhookStatus::Unknown {
            info!(target: "webhook", "unknown event status, acknowledged without state change");
            return Ok(());
        }

        let Some(nzb) = self.resolve_nzb(&event).await? else {
            return Err(Error::NotFound("no release matches webhook event".into()));
        };

        match event.status {
            WebhookStatus::Completed => self.handle_completed(nzb, &event).await,
            WebhookStatus::Failed => self.handle_failed(nzb, &event).await,
            WebhookStatus::Unknown => unreachable!(),
        }
    }

    async fn resolve_nzb(&self, event: &WebhookEvent) -> Result<Option<Nzb>> {
        if let Some(handle) = event.handle.as_deref() {
            if let Some(nzb) = self.nzb_repo.find_by_handle(handle).await? {
                return Ok(Some(nzb));
            }
        }

        if let Some(hash) = event.hash.as_deref() {
            if let Some(nzb) = self.nzb_repo.find_by_hash(hash).await? {
                return Ok(Some(nzb));
            }
        }

        if let Some(name) = event.name.as_deref() {
            if let Some(nzb) = self.nzb_repo.find_by_title(name).await? {
                return Ok(Some(nzb));
            }
            // The downloader may report a mangled title; fall back to
            // dedup-normalized comparison against active downloads.
            let normalized = normalize_release_title(name);
            for nzb in self.nzb_repo.find_by_status(NzbStatus::Downloading).await? {
                if normalize_release_title(&nzb.title) == normalized {
                    return Ok(Some(nzb));
                }
            }
        }

        Ok(None)
    }

    async fn handle_completed(&self, mut nzb: Nzb, event: &WebhookEvent) -> Result<()> {
        // A repeated completion event is a no-op.
        if nzb.status == NzbStatus::Completed {
            debug!(target: "webhook", nzb_id = nzb.id, "duplicate completion event");
            return Ok(());
        }

        nzb.status = NzbStatus::Completed;
        nzb.failed = false;
        self.nzb_repo.update(&nzb).await?;

        let mut media = self
            .media_repo
            .find_by_trakt_id(nzb.trakt_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("media {}", nzb.trakt_id)))?;

        media.status = MediaStatus::Completed;
        if let Some(path) = event.path.as_deref() {
            media.path = path.to_string();
        }
        media.on_disk = !media.path.is_empty();
        if let Some(download_id) = event.download_id {
            media.download_id = download_id;
        }
        self.media_repo.update(&media).await?;

        info!(
            target: "webhook",
            trakt_id = media.trakt_id,
            title = %media.title,
            path = %media.path,
            "download completed"
        );

        // Best-effort history removal; never blocks the response.
        if !nzb.download_handle.is_empty() {
            let downloader = Arc::clone(&self.downloader);
            let handle = nzb.download_handle.clone();
            tokio::spawn(async move {
                remove_from_history_with_backoff(downloader, handle).await;
            });
        }

        Ok(())
    }

    async fn handle_failed(&self, mut nzb: Nzb, event: &WebhookEvent) -> Result<()> {
        // A repeated failure event is a no-op.
        if nzb.status == NzbStatus::Failed {
            debug!(target: "webhook", nzb_id = nzb.id, "duplicate failure event");
            return Ok(());
        }

        if !nzb.download_handle.is_empty() {
            if let Err(err) = self.downloader.cancel(&nzb.download_handle).await {
                warn!(target: "webhook", error = %err, handle = %nzb.download_handle, "failed to cancel download");
            }
        }

        nzb.status = NzbStatus::Failed;
        nzb.failed = true;
        nzb.failure_reason = event.error.clone().unwrap_or_else(|| "download failed".to_string());
        nzb.retry_count += 1;
        self.nzb_repo.update(&nzb).await?;

        warn!(
            target: "webhook",
            trakt_id = nzb.trakt_id,
            retry_count = nzb.retry_count,
            reason = %nzb.failure_reason,
            "download failed"
        );

        if nzb.retry_count < self.max_retries {
            if let Err(err) = self.tracker.retry_with_next_candidate(nzb.trakt_id, nzb.retry_count).await {
                if !err.is_cancelled() {
                    error!(target: "webhook", trakt_id = nzb.trakt_id, error = %err, "retry with next candidate failed");
                }
            }
        } else {
            error!(target: "webhook", trakt_id = nzb.trakt_id, "max retries reached");
            if let Some(mut media) = self.media_repo.find_by_trakt_id(nzb.trakt_id).await? {
                media.status = MediaStatus::Failed;
                self.media_repo.update(&media).await?;
            }
        }

        Ok(())
    }
}

/// Exponential backoff with a total budget of about one minute.
async fn remove_from_history_with_backoff(downloader: Arc<dyn DownloaderClient>, handle: String) {
    let deadline = Instant::now() + Duration::from_secs(60);
    let mut delay = Duration::from_secs(1);

    loop {
        match downloader.delete_from_history(&handle).await {
            Ok(()) => {
                info!(target: "webhook", handle = %handle, "removed from downloader history");
                return;
            }
            Err(err) => {
                if Instant::now() + delay > deadline {
                    error!(target: "webhook", handle = %handle, error = %err, "giving up on history removal");
                    return;
                }
                debug!(target: "webhook", handle = %handle, delay_secs = delay.as_secs(), "history removal failed, backing off");
                sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(30));
            }
        }
    }
}
