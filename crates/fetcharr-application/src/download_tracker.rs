// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use fetcharr_domain::{Error, Media, MediaStatus, Nzb, NzbStatus, Result};
use fetcharr_infrastructure::repositories::{MediaRepository, NzbRepository};
use tokio::sync::Mutex;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::download_clients::{DownloaderClient, HistoryItem, QueueItem};
use crate::indexers::IndexerClient;
use crate::release_parsing::normalize_release_title;

/// Per-cycle shared state for the enqueue fan-out: season packs already
/// enqueued this cycle, and titles queued by any worker.
struct CycleState {
    queue: Vec<QueueItem>,
    history: Vec<HistoryItem>,
    packs_enqueued: Mutex<HashSet<(String, i64)>>,
    queued_titles: Mutex<HashSet<String>>,
}

/// Hands selected releases to the downloader and tracks their lifecycle:
/// dedup against queue/history, season-pack preference, cached-hit fast
/// path, stuck-download sweep, retry with the next candidate.
pub struct DownloadTracker {
    media_repo: Arc<dyn MediaRepository>,
    nzb_repo: Arc<dyn NzbRepository>,
    indexer: Arc<dyn IndexerClient>,
    downloader: Arc<dyn DownloaderClient>,
    download_cfg: fetcharr_config::DownloadConfig,
    downloader_cfg: fetcharr_config::DownloaderConfig,
    workers: usize,
}

impl DownloadTracker {
    pub fn new(
        media_repo: Arc<dyn MediaRepository>,
        nzb_repo: Arc<dyn NzbRepository>,
        indexer: Arc<dyn IndexerClient>,
        downloader: Arc<dyn DownloaderClient>,
        download_cfg: fetcharr_config::DownloadConfig,
        downloader_cfg: fetcharr_config::DownloaderConfig,
        workers: usize,
    ) -> Self {
        Self {
            media_repo,
            nzb_repo,
            indexer,
            downloader,
            download_cfg,
            downloader_cfg,
            workers,
        }
    }

    /// Fan out over media not on disk and enqueue the best release for
    /// each. Per-item failures are logged and never abort the stage.
    pub async fn enqueue_all(self: &Arc<Self>, cancel: &CancellationToken) -> Result<()> {
        let media_list = Arc::new(self.media_repo.find_not_on_disk().await?);

        let state = Arc::new(CycleState {
            queue: self.downloader.queue().await?,
            history: self.downloader.history().await?,
            packs_enqueued: Mutex::new(HashSet::new()),
            queued_titles: Mutex::new(HashSet::new()),
        });

        info!(target: "download", count = media_list.len(), "starting enqueue pass");

        let next = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(self.workers.max(1));

        for worker_id in 0..self.workers.max(1) {
            let tracker = Arc::clone(self);
            let media_list = Arc::clone(&media_list);
            let state = Arc::clone(&state);
            let next = Arc::clone(&next);
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(media) = media_list.get(index) else {
                        break;
                    };
                    if let Err(err) = tracker.process_media(media, &state).await {
                        if err.is_cancelled() {
                            break;
                        }
                        error!(
                            target: "download",
                            trakt_id = media.trakt_id,
                            worker_id,
                            error = %err,
                            "enqueue failed for media"
                        );
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    async fn process_media(&self, media: &Media, state: &CycleState) -> Result<()> {
        // Already handed to the downloader in an earlier cycle.
        if media.download_id > 0 {
            debug!(target: "download", trakt_id = media.trakt_id, download_id = media.download_id, "already has download id");
            return Ok(());
        }

        if media.is_episode() {
            let key = (media.imdb.clone(), media.season);
            if state.packs_enqueued.lock().await.contains(&key) {
                debug!(target: "download", trakt_id = media.trakt_id, season = media.season, "season pack already enqueued this cycle");
                return Ok(());
            }
        }

        // Season packs are preferred over individual episodes.
        let mut nzb = None;
        if media.is_episode() && !media.imdb.is_empty() {
            nzb = self.nzb_repo.find_best_season_pack(&media.imdb, media.season).await?;
        }
        let candidate = match nzb {
            Some(pack) => Some(pack),
            None => self.nzb_repo.find_best_non_failed(media.trakt_id).await?,
        };
        let Some(mut nzb) = candidate else {
            debug!(target: "download", trakt_id = media.trakt_id, "no candidate available");
            return Ok(());
        };

        let normalized = normalize_release_title(&nzb.title);

        {
            let mut queued = state.queued_titles.lock().await;
            if queued.contains(&normalized) {
                debug!(target: "download", title = %nzb.title, "already queued this cycle");
                return Ok(());
            }
            queued.insert(normalized.clone());
        }

        if state.queue.iter().any(|item| normalize_release_title(&item.title) == normalized) {
            debug!(target: "download", title = %nzb.title, "already in downloader queue");
            return Ok(());
        }

        if media.download_id > 0 && state.history.iter().any(|item| item.id == media.download_id) {
            debug!(target: "download", download_id = media.download_id, "already in downloader history");
            return Ok(());
        }

        let mut media = media.clone();
        self.enqueue_nzb(&mut media, &mut nzb).await?;

        if media.is_episode() && nzb.is_season_pack() {
            state
                .packs_enqueued
                .lock()
                .await
                .insert((media.imdb.clone(), media.season));
            info!(target: "download", imdb = %media.imdb, season = media.season, "season pack enqueued for season");
        }

        Ok(())
    }

    /// Fetch the artifact, submit it, persist the handle, and take the
    /// cached-hit fast path when the downloader already holds the bytes.
    pub async fn enqueue_nzb(&self, media: &mut Media, nzb: &mut Nzb) -> Result<()> {
        info!(target: "download", title = %nzb.title, trakt_id = media.trakt_id, "enqueueing release");

        let data = match self
            .indexer
            .download_artifact(&nzb.link, self.download_cfg.max_artifact_bytes)
            .await
        {
            Ok(data) => data,
            Err(err) => {
                nzb.status = NzbStatus::Failed;
                nzb.failed = true;
                nzb.failure_reason = format!("artifact fetch failed: {err}");
                self.nzb_repo.update(nzb).await?;
                return Err(err);
            }
        };

        let params = HashMap::from([("trakt_id".to_string(), media.trakt_id.to_string())]);
        let outcome = match self
            .downloader
            .enqueue(
                data,
                &format!("{}.nzb", nzb.title),
                &self.downloader_cfg.category,
                self.downloader_cfg.priority,
                &params,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                nzb.status = NzbStatus::Failed;
                nzb.failed = true;
                nzb.failure_reason = format!("enqueue failed: {err}");
                self.nzb_repo.update(nzb).await?;
                return Err(err);
            }
        };

        nzb.download_handle = outcome.handle.clone();
        nzb.download_hash = outcome.hash.clone();
        nzb.status = NzbStatus::Downloading;
        self.nzb_repo.update(nzb).await?;

        media.download_id = outcome.handle.parse().unwrap_or(0);
        media.status = MediaStatus::Downloading;
        self.media_repo.update(media).await?;

        info!(target: "download", handle = %outcome.handle, "release handed to downloader");

        if outcome.indicates_cached() {
            // A verification failure here is not a download failure; the
            // webhook will confirm completion eventually.
            if let Err(err) = self.complete_cached(media, nzb).await {
                warn!(target: "download", error = %err, "cached-hit verification failed, waiting for webhook");
            }
        }

        Ok(())
    }

    async fn complete_cached(&self, media: &mut Media, nzb: &mut Nzb) -> Result<()> {
        let info = self.downloader.find(&nzb.download_handle).await?;
        if !info.cached {
            debug!(target: "download", handle = %nzb.download_handle, "not actually cached, waiting for webhook");
            return Ok(());
        }

        nzb.status = NzbStatus::Completed;
        self.nzb_repo.update(nzb).await?;

        media.status = MediaStatus::Completed;
        self.media_repo.update(media).await?;

        info!(target: "download", trakt_id = media.trakt_id, title = %media.title, "cached download completed immediately");
        Ok(())
    }

    /// Sweep downloads that have sat in `downloading` past the timeout:
    /// cancel, fail, and move on to the next candidate.
    pub async fn check_stuck(&self) -> Result<()> {
        let downloading = self.nzb_repo.find_by_status(NzbStatus::Downloading).await?;
        if downloading.is_empty() {
            return Ok(());
        }

        let timeout = Duration::from_secs(self.download_cfg.stuck_timeout_secs);
        let now = Utc::now();
        let mut stuck = 0usize;

        for mut nzb in downloading {
            let age = (now - nzb.updated_at).to_std().unwrap_or_default();
            if age <= timeout {
                continue;
            }
            stuck += 1;

            warn!(
                target: "download",
                nzb_id = nzb.id,
                title = %nzb.title,
                handle = %nzb.download_handle,
                age_secs = age.as_secs(),
                "download timeout detected, cancelling and retrying"
            );

            if !nzb.download_handle.is_empty() {
                if let Err(err) = self.downloader.cancel(&nzb.download_handle).await {
                    warn!(target: "download", error = %err, handle = %nzb.download_handle, "failed to cancel stuck download");
                }
            }

            nzb.status = NzbStatus::Failed;
            nzb.failed = true;
            nzb.failure_reason = format!("download timeout after {}s", age.as_secs());
            nzb.retry_count += 1;
            self.nzb_repo.update(&nzb).await?;

            if nzb.retry_count < self.download_cfg.max_retries {
                if let Err(err) = self.retry_with_next_candidate(nzb.trakt_id, nzb.retry_count).await {
                    if !err.is_cancelled() {
                        error!(target: "download", trakt_id = nzb.trakt_id, error = %err, "retry after timeout failed");
                    }
                }
            } else {
                self.fail_media(nzb.trakt_id).await;
            }
        }

        if stuck > 0 {
            info!(target: "download", count = stuck, "processed stuck downloads");
        }
        Ok(())
    }

    /// Promote the next best candidate and push it through the enqueue
    /// path. The attempt count carries over so a media item exhausts after
    /// `max_retries` candidates total. With no candidates left, the media
    /// item fails.
    pub async fn retry_with_next_candidate(&self, trakt_id: i64, prior_retries: i64) -> Result<()> {
        info!(target: "download", trakt_id, prior_retries, "retrying with next candidate");

        let mut media = self
            .media_repo
            .find_by_trakt_id(trakt_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("media {trakt_id}")))?;

        let Some(mut next) = self.nzb_repo.find_best_non_failed(trakt_id).await? else {
            self.fail_media(trakt_id).await;
            return Err(Error::NotFound(format!("no candidates left for media {trakt_id}")));
        };

        next.status = NzbStatus::Selected;
        next.retry_count = next.retry_count.max(prior_retries);
        self.nzb_repo.update(&next).await?;

        media.download_id = 0;
        self.enqueue_nzb(&mut media, &mut next).await
    }

    async fn fail_media(&self, trakt_id: i64) {
        match self.media_repo.find_by_trakt_id(trakt_id).await {
            Ok(Some(mut media)) => {
                media.status = MediaStatus::Failed;
                if let Err(err) = self.media_repo.update(&media).await {
                    error!(target: "download", trakt_id, error = %err, "failed to mark media failed");
                } else {
                    warn!(target: "download", trakt_id, title = %media.title, "media failed, no candidates left");
                }
            }
            Ok(None) => {}
            Err(err) => error!(target: "download", trakt_id, error = %err, "media lookup failed"),
        }
    }
}
