// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use fetcharr_domain::{ListSource, Media, MediaStatus, Result};
use fetcharr_infrastructure::repositories::MediaRepository;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::tracker::{ListKind, TrackerClient, TrackerItem};

const SYNC_WORKERS: usize = 5;

/// Reconciles the local catalog against the upstream watchlist and
/// favorites. A full pass starts by flagging every row as absent; rows
/// re-observed upstream are flipped back and, when previously failed,
/// given another chance.
pub struct SyncService {
    media_repo: Arc<dyn MediaRepository>,
    tracker: Arc<dyn TrackerClient>,
    favorites_episode_limit: usize,
}

impl SyncService {
    pub fn new(
        media_repo: Arc<dyn MediaRepository>,
        tracker: Arc<dyn TrackerClient>,
        trakt_cfg: &fetcharr_config::TraktConfig,
    ) -> Self {
        Self {
            media_repo,
            tracker,
            favorites_episode_limit: trakt_cfg.favorites_episode_limit,
        }
    }

    /// Mark every row as not-in-tracker before the per-list passes run.
    pub async fn begin_cycle(&self) -> Result<()> {
        self.media_repo.mark_all_not_in_tracker().await
    }

    pub async fn sync_movies(&self) -> Result<()> {
        info!(target: "sync", "syncing movies");

        let watchlist = self.tracker.watchlist(ListKind::Movies).await?;
        let favorites = self.tracker.favorites(ListKind::Movies).await?;

        // Merge and deduplicate by tracker id; favorites win on conflict.
        let mut merged: HashMap<i64, (TrackerItem, ListSource)> = HashMap::new();
        for item in watchlist {
            merged.insert(item.trakt_id, (item, ListSource::Watchlist));
        }
        for item in favorites {
            merged.insert(item.trakt_id, (item, ListSource::Favorites));
        }

        let mut count = 0usize;
        for (item, source) in merged.into_values() {
            if item.trakt_id <= 0 || item.imdb.trim().is_empty() {
                warn!(target: "sync", title = %item.title, "movie without usable ids, skipping");
                continue;
            }

            let incoming = Media::movie(item.trakt_id, item.imdb, item.title, item.year, source);
            if let Err(err) = self.reconcile(incoming).await {
                error!(target: "sync", error = %err, "failed to upsert movie");
                continue;
            }
            count += 1;
        }

        info!(target: "sync", count, "movies synced");
        Ok(())
    }

    pub async fn sync_shows(self: &Arc<Self>, cancel: &CancellationToken) -> Result<()> {
        info!(target: "sync", "syncing shows");

        let watchlist = self.tracker.watchlist(ListKind::Shows).await?;
        let favorites = self.tracker.favorites(ListKind::Shows).await?;

        // Watchlist shows commit to one upcoming episode, favorites to N.
        let mut jobs: Vec<(TrackerItem, usize, ListSource)> = Vec::new();
        for show in watchlist {
            jobs.push((show, 1, ListSource::Watchlist));
        }
        for show in favorites {
            jobs.push((show, self.favorites_episode_limit, ListSource::Favorites));
        }

        let jobs = Arc::new(jobs);
        let next = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(SYNC_WORKERS);

        for worker_id in 0..SYNC_WORKERS {
            let service = Arc::clone(self);
            let jobs = Arc::clone(&jobs);
            let next = Arc::clone(&next);
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some((show, limit, source)) = jobs.get(index) else {
                        break;
                    };
                    if let Err(err) = service.sync_show_episodes(show, *limit, *source).await {
                        if err.is_cancelled() {
                            break;
                        }
                        error!(
                            target: "sync",
                            show_id = show.trakt_id,
                            worker_id,
                            error = %err,
                            "failed to sync show episodes"
                        );
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        info!(target: "sync", "shows synced");
        Ok(())
    }

    async fn sync_show_episodes(&self, show: &TrackerItem, limit: usize, source: ListSource) -> Result<()> {
        if show.trakt_id <= 0 || show.imdb.trim().is_empty() {
            warn!(target: "sync", title = %show.title, "show without usable ids, skipping");
            return Ok(());
        }

        let episodes = self.tracker.next_n_episodes(show.trakt_id, limit).await?;

        for ep in episodes {
            // Invalid single records are dropped, never the whole show.
            if ep.trakt_id <= 0 || ep.season < 1 || ep.number < 1 {
                warn!(
                    target: "sync",
                    show_imdb = %show.imdb,
                    episode_id = ep.trakt_id,
                    season = ep.season,
                    number = ep.number,
                    "invalid episode record, skipping"
                );
                continue;
            }

            let incoming =
                Media::episode(ep.trakt_id, show.imdb.clone(), ep.title, ep.season, ep.number, source);
            if let Err(err) = self.reconcile(incoming).await {
                error!(target: "sync", error = %err, episode_id = ep.trakt_id, "failed to upsert episode");
            }
        }

        Ok(())
    }

    /// Merge an upstream observation into the catalog. Presence fields are
    /// always refreshed; a failed row gets another chance, a completed row
    /// is never reset.
    async fn reconcile(&self, incoming: Media) -> Result<()> {
        match self.media_repo.find_by_trakt_id(incoming.trakt_id).await? {
            Some(mut existing) => {
                existing.imdb = incoming.imdb;
                existing.title = incoming.title;
                if incoming.year > 0 {
                    existing.year = incoming.year;
                }
                existing.source = incoming.source;
                existing.in_tracker = true;
                existing.last_seen_in_tracker = Utc::now();

                if existing.status == MediaStatus::Failed {
                    debug!(
                        target: "sync",
                        trakt_id = existing.trakt_id,
                        "failed media re-observed upstream, resetting to pending"
                    );
                    existing.status = MediaStatus::Pending;
                }

                self.media_repo.update(&existing).await
            }
            None => {
                info!(
                    target: "sync",
                    trakt_id = incoming.trakt_id,
                    title = %incoming.title,
                    kind = %incoming.kind,
                    source = %incoming.source,
                    "new media from upstream"
                );
                self.media_repo.upsert(&incoming).await
            }
        }
    }
}
