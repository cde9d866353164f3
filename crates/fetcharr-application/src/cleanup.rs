// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use fetcharr_domain::{Media, MediaKind, Result};
use fetcharr_infrastructure::repositories::{MediaRepository, NzbRepository};
use tracing::{debug, error, info, warn};

use crate::download_clients::DownloaderClient;
use crate::tracker::{TrackerClient, WatchedItem};

/// Two-phase garbage collection: items that vanished from the upstream
/// lists, and items the user has watched.
pub struct CleanupService {
    media_repo: Arc<dyn MediaRepository>,
    nzb_repo: Arc<dyn NzbRepository>,
    tracker: Arc<dyn TrackerClient>,
    downloader: Arc<dyn DownloaderClient>,
    cfg: fetcharr_config::DownloadConfig,
}

impl CleanupService {
    pub fn new(
        media_repo: Arc<dyn MediaRepository>,
        nzb_repo: Arc<dyn NzbRepository>,
        tracker: Arc<dyn TrackerClient>,
        downloader: Arc<dyn DownloaderClient>,
        cfg: fetcharr_config::DownloadConfig,
    ) -> Self {
        Self {
            media_repo,
            nzb_repo,
            tracker,
            downloader,
            cfg,
        }
    }

    /// Remove every row the last complete sync pass did not re-observe.
    /// Callers must skip this when any list fetch failed, or a transient
    /// empty upstream response would wipe the catalog.
    pub async fn cleanup_removed(&self) -> Result<usize> {
        info!(target: "cleanup", "cleaning up media removed from upstream lists");

        let removed: Vec<Media> = self
            .media_repo
            .find_all()
            .await?
            .into_iter()
            .filter(|media| !media.in_tracker)
            .collect();

        if removed.is_empty() {
            debug!(target: "cleanup", "nothing removed upstream");
            return Ok(0);
        }

        info!(target: "cleanup", count = removed.len(), "found media removed from upstream lists");

        let mut cleaned = 0usize;
        for media in &removed {
            match self.delete_media(media).await {
                Ok(()) => cleaned += 1,
                Err(err) => {
                    error!(target: "cleanup", trakt_id = media.trakt_id, error = %err, "failed to delete removed media")
                }
            }
        }

        info!(target: "cleanup", cleaned, "removed-from-upstream cleanup finished");
        Ok(cleaned)
    }

    /// Delete watched movies and episodes reported by the tracker's recent
    /// history. Season packs collect per-episode watched flags and go only
    /// once their final episode is watched.
    pub async fn cleanup_watched(&self) -> Result<usize> {
        info!(target: "cleanup", days = self.cfg.cleanup_watched_days, "cleaning up watched media");

        let history = self.tracker.watched_history(self.cfg.cleanup_watched_days).await?;
        if history.is_empty() {
            info!(target: "cleanup", "no watched items in history window");
            return Ok(0);
        }

        let mut cleaned = 0usize;
        let mut deleted_any = false;

        for item in &history {
            let result = match item.kind {
                MediaKind::Movie => self.cleanup_watched_movie(item).await,
                MediaKind::Episode => self.cleanup_watched_episode(item).await,
            };
            match result {
                Ok(true) => {
                    cleaned += 1;
                    deleted_any = true;
                }
                Ok(false) => {}
                Err(err) => error!(target: "cleanup", imdb = %item.imdb, error = %err, "watched cleanup failed for item"),
            }
        }

        if deleted_any {
            // The history snapshot no longer reflects the catalog.
            self.tracker.invalidate_watched_cache();
        }

        info!(target: "cleanup", cleaned, "watched cleanup finished");
        Ok(cleaned)
    }

    async fn cleanup_watched_movie(&self, item: &WatchedItem) -> Result<bool> {
        let Some(media) = self
            .media_repo
            .find_by_imdb(&item.imdb, MediaKind::Movie, None, None)
            .await?
        else {
            return Ok(false);
        };

        if !media.in_tracker {
            return Ok(false);
        }

        info!(target: "cleanup", trakt_id = media.trakt_id, title = %media.title, "deleting watched movie");
        self.delete_media(&media).await?;
        Ok(true)
    }

    async fn cleanup_watched_episode(&self, item: &WatchedItem) -> Result<bool> {
        let mut deleted = false;

        for media in self.media_repo.find_all().await? {
            if media.imdb != item.imdb || !media.is_episode() || !media.in_tracker {
                continue;
            }

            let nzbs = self.nzb_repo.find_by_media(media.trakt_id).await?;
            let mut handled_as_pack = false;

            for mut nzb in nzbs {
                if !nzb.is_season_pack() || nzb.parsed_season != item.season {
                    continue;
                }

                let mut updated = false;
                for ep in nzb.episodes.iter_mut() {
                    if ep.number == item.episode && !ep.watched {
                        ep.watched = true;
                        ep.watched_at = Some(item.watched_at);
                        updated = true;
                    }
                }
                if !updated {
                    continue;
                }
                handled_as_pack = true;

                self.nzb_repo.update(&nzb).await?;
                debug!(
                    target: "cleanup",
                    nzb_id = nzb.id,
                    season = item.season,
                    episode = item.episode,
                    "marked pack episode watched"
                );

                // The pack goes when its final episode is watched.
                if nzb.episodes.last().map(|ep| ep.watched).unwrap_or(false) {
                    info!(target: "cleanup", nzb_id = nzb.id, season = nzb.parsed_season, "season pack fully watched, deleting");
                    self.delete_media(&media).await?;
                    deleted = true;
                }
            }

            if !handled_as_pack && media.season == item.season && media.number == item.episode {
                info!(
                    target: "cleanup",
                    trakt_id = media.trakt_id,
                    season = item.season,
                    episode = item.episode,
                    "deleting watched episode"
                );
                self.delete_media(&media).await?;
                deleted = true;
            }

            if deleted {
                break;
            }
        }

        Ok(deleted)
    }

    /// Cancel any active downloader job, optionally remove the files, then
    /// drop the candidate rows and the catalog row.
    async fn delete_media(&self, media: &Media) -> Result<()> {
        let nzbs = self.nzb_repo.find_by_media(media.trakt_id).await?;

        let mut handles: HashSet<String> = nzbs
            .iter()
            .filter(|nzb| !nzb.download_handle.is_empty())
            .map(|nzb| nzb.download_handle.clone())
            .collect();
        if media.download_id > 0 {
            handles.insert(media.download_id.to_string());
        }

        for handle in handles {
            if let Err(err) = self.downloader.cancel(&handle).await {
                warn!(target: "cleanup", %handle, error = %err, "failed to cancel download, continuing");
            } else {
                debug!(target: "cleanup", %handle, "cancelled downloader job");
            }
        }

        if self.cfg.delete_files && !media.path.is_empty() {
            match tokio::fs::remove_dir_all(&media.path).await {
                Ok(()) => info!(target: "cleanup", path = %media.path, "deleted directory"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => error!(target: "cleanup", path = %media.path, error = %err, "failed to delete directory"),
            }
        }

        self.nzb_repo.delete_by_media_ids(&[media.trakt_id]).await?;
        self.media_repo.delete(media.trakt_id).await?;

        debug!(
            target: "cleanup",
            trakt_id = media.trakt_id,
            at = %Utc::now(),
            "media deleted"
        );
        Ok(())
    }
}
