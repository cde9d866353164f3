// SPDX-License-Identifier: GPL-3.0-or-later
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use fetcharr_domain::{Media, MediaStatus, Nzb, NzbStatus, PackEpisode, Result, Strategy};
use fetcharr_infrastructure::repositories::{MediaRepository, NzbRepository};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::blacklist::Blacklist;
use crate::indexers::{IndexerClient, IndexerItem};
use crate::release_parsing::parse_release_title;
use crate::scoring::{quality_score, validation_score, ScoreFloors};
use crate::strategy::resolve_strategy;
use crate::tracker::TrackerClient;

/// Searches the indexer for every media item not on disk, scores the
/// results, persists candidates, and promotes the best ones to `selected`.
pub struct SearchService {
    media_repo: Arc<dyn MediaRepository>,
    nzb_repo: Arc<dyn NzbRepository>,
    indexer: Arc<dyn IndexerClient>,
    tracker: Arc<dyn TrackerClient>,
    blacklist: Arc<Blacklist>,
    floors: ScoreFloors,
    episode_search_limit: usize,
    workers: usize,
}

impl SearchService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        media_repo: Arc<dyn MediaRepository>,
        nzb_repo: Arc<dyn NzbRepository>,
        indexer: Arc<dyn IndexerClient>,
        tracker: Arc<dyn TrackerClient>,
        blacklist: Arc<Blacklist>,
        download_cfg: &fetcharr_config::DownloadConfig,
        trakt_cfg: &fetcharr_config::TraktConfig,
        workers: usize,
    ) -> Self {
        Self {
            media_repo,
            nzb_repo,
            indexer,
            tracker,
            blacklist,
            floors: ScoreFloors {
                min_validation: download_cfg.min_validation_score,
                min_quality: download_cfg.min_quality_score,
                min_total: download_cfg.min_total_score,
            },
            episode_search_limit: trakt_cfg.favorites_episode_limit,
            workers,
        }
    }

    /// Fan out over every media item not on disk. Per-item failures are
    /// logged and never abort the stage.
    pub async fn search_all(self: &Arc<Self>, cancel: &CancellationToken) -> Result<()> {
        // Items already handed to the downloader (or exhausted) are left
        // alone; re-running a cycle with no external changes is a no-op.
        let media_list: Vec<Media> = self
            .media_repo
            .find_not_on_disk()
            .await?
            .into_iter()
            .filter(|m| matches!(m.status, MediaStatus::Pending | MediaStatus::Searching))
            .collect();
        let media_list = Arc::new(media_list);
        info!(target: "search", count = media_list.len(), "searching for media not on disk");

        let next = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(self.workers.max(1));

        for worker_id in 0..self.workers.max(1) {
            let service = Arc::clone(self);
            let media_list = Arc::clone(&media_list);
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
                    if let Err(err) = service.search_for_media(media).await {
                        if err.is_cancelled() {
                            break;
                        }
                        error!(
                            target: "search",
                            trakt_id = media.trakt_id,
                            worker_id,
                            error = %err,
                            "search failed for media"
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

    pub async fn search_for_media(&self, media: &Media) -> Result<()> {
        info!(target: "search", trakt_id = media.trakt_id, title = %media.title, "searching for media");

        let strategy = resolve_strategy(self.tracker.as_ref(), media).await?;

        let mut media = media.clone();
        media.status = MediaStatus::Searching;
        media.last_searched_at = Some(Utc::now());
        self.media_repo.update(&media).await?;

        let results = self.run_searches(&media, &strategy).await?;
        debug!(target: "search", count = results.len(), "search results received");

        let stored = self.score_and_store(&media, &strategy, results).await?;
        if stored == 0 {
            // Nothing to work with; the item goes back to pending and is
            // retried next cycle.
            media.status = MediaStatus::Pending;
            self.media_repo.update(&media).await?;
        }
        Ok(())
    }

    async fn run_searches(&self, media: &Media, strategy: &Strategy) -> Result<Vec<IndexerItem>> {
        match strategy {
            Strategy::SingleMovie => {
                // Movie searches drop the "tt" prefix; TV searches keep it.
                let imdb = media.imdb.trim_start_matches("tt");
                self.indexer.search_movie(imdb).await
            }
            Strategy::SingleEpisode(ep) => {
                self.indexer.search_episode(&media.imdb, ep.season, ep.number).await
            }
            Strategy::SeasonPack { season, episodes } => {
                let mut all = Vec::new();

                match self.indexer.search_season(&media.imdb, *season).await {
                    Ok(items) => all.extend(items),
                    Err(err) => warn!(target: "search", error = %err, "season pack search failed"),
                }

                for ep in episodes.iter().take(self.episode_search_limit) {
                    match self.indexer.search_episode(&media.imdb, ep.season, ep.number).await {
                        Ok(items) => all.extend(items),
                        Err(err) => warn!(
                            target: "search",
                            season = ep.season,
                            episode = ep.number,
                            error = %err,
                            "episode search failed"
                        ),
                    }
                }

                Ok(all)
            }
        }
    }

    async fn score_and_store(
        &self,
        media: &Media,
        strategy: &Strategy,
        results: Vec<IndexerItem>,
    ) -> Result<usize> {
        let mut stored: Vec<Nzb> = Vec::new();
        let mut best_fallback: Option<Nzb> = None;
        let mut blacklisted = 0usize;
        let mut below_floor = 0usize;

        for item in &results {
            if let Some(term) = self.blacklist.matches(&item.title) {
                blacklisted += 1;
                let mut nzb = self.build_nzb(media, item).await;
                nzb.status = NzbStatus::Blacklisted;
                nzb.failure_reason = format!("blacklisted term '{term}'");
                if let Err(err) = self.nzb_repo.create(&nzb).await {
                    error!(target: "search", error = %err, title = %item.title, "failed to store blacklisted nzb");
                }
                continue;
            }

            let nzb = self.build_nzb(media, item).await;

            // Year filter for movies; a missing year is unknown, not a mismatch.
            if media.is_movie() && nzb.parsed_year != 0 && media.year != 0 && nzb.parsed_year != media.year {
                debug!(
                    target: "search",
                    title = %item.title,
                    parsed_year = nzb.parsed_year,
                    media_year = media.year,
                    "dropping movie result on year mismatch"
                );
                continue;
            }

            if best_fallback
                .as_ref()
                .map(|best| nzb.total_score > best.total_score)
                .unwrap_or(true)
            {
                best_fallback = Some(nzb.clone());
            }

            if !self.floors.passes(nzb.validation_score, nzb.quality_score) {
                below_floor += 1;
                debug!(
                    target: "search",
                    title = %item.title,
                    validation = nzb.validation_score,
                    quality = nzb.quality_score,
                    "dropped below score floors"
                );
                continue;
            }

            if let Some(nzb) = self.store_candidate(media, nzb).await {
                stored.push(nzb);
            }
        }

        // Nothing passed: keep the best non-blacklisted result so the
        // pipeline can still make progress.
        if stored.is_empty() {
            if let Some(fallback) = best_fallback {
                warn!(
                    target: "search",
                    title = %fallback.title,
                    validation = fallback.validation_score,
                    quality = fallback.quality_score,
                    total = fallback.total_score,
                    results = results.len(),
                    "no release passed score floors, storing best candidate as fallback"
                );
                if let Some(nzb) = self.store_candidate(media, fallback).await {
                    stored.push(nzb);
                }
            }
        }

        info!(
            target: "search",
            trakt_id = media.trakt_id,
            stored = stored.len(),
            blacklisted,
            below_floor,
            total_results = results.len(),
            "scoring complete"
        );

        let stored_count = stored.len();
        self.select_candidates(strategy, stored).await?;
        Ok(stored_count)
    }

    async fn build_nzb(&self, media: &Media, item: &IndexerItem) -> Nzb {
        let parsed = parse_release_title(&item.title);

        // Episode results belong to the catalog row of that episode when one
        // exists; the searching row is the fallback owner.
        let mut owner = media.trakt_id;
        if media.is_episode() && parsed.episode > 0 {
            if let Ok(Some(sibling)) = self
                .media_repo
                .find_by_imdb(&media.imdb, media.kind, Some(parsed.season), Some(parsed.episode))
                .await
            {
                owner = sibling.trakt_id;
            }
        }

        let mut nzb = Nzb::new(owner, media.imdb.clone(), item.title.clone(), item.link.clone(), item.size);
        nzb.parsed_title = parsed.title.clone();
        nzb.parsed_year = parsed.year;
        nzb.parsed_season = parsed.season;
        nzb.parsed_episode = parsed.episode;
        nzb.resolution = parsed.resolution.clone();
        nzb.source = parsed.source.clone();
        nzb.codec = parsed.codec.clone();
        nzb.proper = parsed.proper;
        nzb.repack = parsed.repack;
        nzb.validation_score = validation_score(media, &parsed);
        nzb.quality_score = quality_score(&parsed);
        nzb.total_score = nzb.validation_score + nzb.quality_score;
        nzb
    }

    /// Persist one candidate, skipping duplicate season packs and filling
    /// the pack's episode list from the tracker.
    async fn store_candidate(&self, media: &Media, mut nzb: Nzb) -> Option<Nzb> {
        if nzb.is_season_pack() && !nzb.imdb.is_empty() {
            match self.nzb_repo.find_best_season_pack(&nzb.imdb, nzb.parsed_season).await {
                Ok(Some(existing)) => {
                    debug!(
                        target: "search",
                        title = %nzb.title,
                        existing = %existing.title,
                        "season pack already stored, skipping duplicate"
                    );
                    return None;
                }
                Ok(None) => {}
                Err(err) => {
                    error!(target: "search", error = %err, "season pack lookup failed");
                    return None;
                }
            }

            match self.tracker.season_episodes(&media.imdb, nzb.parsed_season).await {
                Ok(episodes) => {
                    nzb.episodes = episodes
                        .into_iter()
                        .map(|ep| PackEpisode {
                            number: ep.number,
                            title: ep.title,
                            watched: false,
                            watched_at: None,
                        })
                        .collect();
                }
                Err(err) => {
                    warn!(target: "search", error = %err, "failed to populate season pack episode list");
                }
            }
        }

        match self.nzb_repo.create(&nzb).await {
            Ok(id) => {
                nzb.id = id;
                Some(nzb)
            }
            Err(err) => {
                error!(target: "search", error = %err, title = %nzb.title, "failed to store candidate");
                None
            }
        }
    }

    /// Promote the best candidates: a valid season pack wins outright,
    /// otherwise the best release per target episode, otherwise the best
    /// movie release.
    async fn select_candidates(&self, strategy: &Strategy, mut stored: Vec<Nzb>) -> Result<()> {
        stored.sort_by(|a, b| {
            b.is_season_pack()
                .cmp(&a.is_season_pack())
                .then(b.total_score.cmp(&a.total_score))
                .then(b.quality_score.cmp(&a.quality_score))
                .then(b.size.cmp(&a.size))
        });

        if let Some(pack) = stored.iter_mut().find(|n| n.is_season_pack() && n.status == NzbStatus::Candidate) {
            pack.status = NzbStatus::Selected;
            self.nzb_repo.update(pack).await?;
            info!(target: "search", title = %pack.title, "selected season pack");
            return Ok(());
        }

        match strategy {
            Strategy::SingleMovie => {
                if let Some(best) = stored.iter_mut().find(|n| n.status == NzbStatus::Candidate) {
                    best.status = NzbStatus::Selected;
                    self.nzb_repo.update(best).await?;
                    info!(target: "search", title = %best.title, "selected movie release");
                }
            }
            Strategy::SingleEpisode(ep) => {
                self.select_for_episode(&mut stored, ep.season, ep.number).await?;
            }
            Strategy::SeasonPack { episodes, .. } => {
                for ep in episodes.iter().take(self.episode_search_limit) {
                    self.select_for_episode(&mut stored, ep.season, ep.number).await?;
                }
            }
        }

        Ok(())
    }

    async fn select_for_episode(&self, stored: &mut [Nzb], season: i64, number: i64) -> Result<()> {
        if let Some(best) = stored.iter_mut().find(|n| {
            n.status == NzbStatus::Candidate && n.parsed_season == season && n.parsed_episode == number
        }) {
            best.status = NzbStatus::Selected;
            self.nzb_repo.update(best).await?;
            info!(target: "search", season, episode = number, title = %best.title, "selected episode release");
        }
        Ok(())
    }
}
