// SPDX-License-Identifier: GPL-3.0-or-later
//! In-memory fakes shared by the pipeline tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use fetcharr_application::download_clients::{
    DownloadInfo, DownloaderClient, EnqueueOutcome, HistoryItem, QueueItem,
};
use fetcharr_application::indexers::{IndexerClient, IndexerItem};
use fetcharr_application::tracker::{
    ListKind, SeasonEpisode, ShowProgress, TrackerClient, TrackerEpisode, TrackerItem, WatchedItem,
};
use fetcharr_domain::{Error, Media, MediaKind, Nzb, NzbStatus, Result};
use fetcharr_infrastructure::repositories::{MediaRepository, NzbRepository};

// ============================================================================
// Repositories
// ============================================================================

#[derive(Default)]
pub struct InMemoryMediaRepo {
    rows: Mutex<HashMap<i64, Media>>,
}

impl InMemoryMediaRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, media: Media) {
        self.rows.lock().unwrap().insert(media.trakt_id, media);
    }

    pub fn get(&self, trakt_id: i64) -> Option<Media> {
        self.rows.lock().unwrap().get(&trakt_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl MediaRepository for InMemoryMediaRepo {
    async fn upsert(&self, media: &Media) -> Result<()> {
        self.rows.lock().unwrap().insert(media.trakt_id, media.clone());
        Ok(())
    }

    async fn update(&self, media: &Media) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if !rows.contains_key(&media.trakt_id) {
            return Err(Error::NotFound(format!("media {}", media.trakt_id)));
        }
        rows.insert(media.trakt_id, media.clone());
        Ok(())
    }

    async fn delete(&self, trakt_id: i64) -> Result<()> {
        self.rows.lock().unwrap().remove(&trakt_id);
        Ok(())
    }

    async fn delete_many(&self, trakt_ids: &[i64]) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        for id in trakt_ids {
            rows.remove(id);
        }
        Ok(())
    }

    async fn find_by_trakt_id(&self, trakt_id: i64) -> Result<Option<Media>> {
        Ok(self.rows.lock().unwrap().get(&trakt_id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Media>> {
        let mut all: Vec<Media> = self.rows.lock().unwrap().values().cloned().collect();
        all.sort_by_key(|m| m.trakt_id);
        Ok(all)
    }

    async fn find_not_on_disk(&self) -> Result<Vec<Media>> {
        let mut all: Vec<Media> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|m| !m.on_disk)
            .cloned()
            .collect();
        all.sort_by_key(|m| m.trakt_id);
        Ok(all)
    }

    async fn find_pending(&self) -> Result<Vec<Media>> {
        let mut all: Vec<Media> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.status == fetcharr_domain::MediaStatus::Pending)
            .cloned()
            .collect();
        all.sort_by_key(|m| m.trakt_id);
        Ok(all)
    }

    async fn find_by_imdb(
        &self,
        imdb: &str,
        kind: MediaKind,
        season: Option<i64>,
        episode: Option<i64>,
    ) -> Result<Option<Media>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .find(|m| {
                m.imdb == imdb
                    && m.kind == kind
                    && season.map(|s| m.season == s).unwrap_or(true)
                    && episode.map(|e| m.number == e).unwrap_or(true)
            })
            .cloned())
    }

    async fn mark_all_not_in_tracker(&self) -> Result<()> {
        for media in self.rows.lock().unwrap().values_mut() {
            media.in_tracker = false;
        }
        Ok(())
    }
}

pub struct InMemoryNzbRepo {
    rows: Mutex<Vec<Nzb>>,
    next_id: AtomicI64,
}

impl InMemoryNzbRepo {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn all(&self) -> Vec<Nzb> {
        self.rows.lock().unwrap().clone()
    }

    pub fn get(&self, id: i64) -> Option<Nzb> {
        self.rows.lock().unwrap().iter().find(|n| n.id == id).cloned()
    }
}

#[async_trait]
impl NzbRepository for InMemoryNzbRepo {
    async fn create(&self, nzb: &Nzb) -> Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut stored = nzb.clone();
        stored.id = id;
        self.rows.lock().unwrap().push(stored);
        Ok(id)
    }

    async fn update(&self, nzb: &Nzb) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let Some(slot) = rows.iter_mut().find(|n| n.id == nzb.id) else {
            return Err(Error::NotFound(format!("nzb {}", nzb.id)));
        };
        *slot = nzb.clone();
        Ok(())
    }

    async fn find_by_media(&self, trakt_id: i64) -> Result<Vec<Nzb>> {
        let mut found: Vec<Nzb> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.trakt_id == trakt_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.total_score.cmp(&a.total_score).then(b.size.cmp(&a.size)));
        Ok(found)
    }

    async fn find_best_non_failed(&self, trakt_id: i64) -> Result<Option<Nzb>> {
        let mut found: Vec<Nzb> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|n| {
                n.trakt_id == trakt_id
                    && !n.failed
                    && matches!(n.status, NzbStatus::Selected | NzbStatus::Candidate)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| b.total_score.cmp(&a.total_score).then(b.size.cmp(&a.size)));
        Ok(found.into_iter().next())
    }

    async fn find_best_season_pack(&self, imdb: &str, season: i64) -> Result<Option<Nzb>> {
        let mut found: Vec<Nzb> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|n| {
                n.imdb == imdb
                    && n.parsed_season == season
                    && n.is_season_pack()
                    && !n.failed
                    && matches!(n.status, NzbStatus::Selected | NzbStatus::Candidate)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| b.total_score.cmp(&a.total_score).then(b.size.cmp(&a.size)));
        Ok(found.into_iter().next())
    }

    async fn find_by_status(&self, status: NzbStatus) -> Result<Vec<Nzb>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.status == status)
            .cloned()
            .collect())
    }

    async fn find_by_handle(&self, handle: &str) -> Result<Option<Nzb>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|n| n.download_handle == handle)
            .cloned())
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<Nzb>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|n| n.download_hash == hash)
            .cloned())
    }

    async fn find_by_title(&self, title: &str) -> Result<Option<Nzb>> {
        Ok(self.rows.lock().unwrap().iter().find(|n| n.title == title).cloned())
    }

    async fn mark_failed_by_title(&self, title: &str, reason: &str) -> Result<()> {
        for nzb in self.rows.lock().unwrap().iter_mut() {
            if nzb.title == title {
                nzb.failed = true;
                nzb.status = NzbStatus::Failed;
                nzb.failure_reason = reason.to_string();
            }
        }
        Ok(())
    }

    async fn delete_by_media_ids(&self, trakt_ids: &[i64]) -> Result<()> {
        self.rows
            .lock()
            .unwrap()
            .retain(|n| !trakt_ids.contains(&n.trakt_id));
        Ok(())
    }
}

// ============================================================================
// Tracker
// ============================================================================

#[derive(Default)]
pub struct FakeTracker {
    pub watchlist_movies: Mutex<Vec<TrackerItem>>,
    pub favorites_movies: Mutex<Vec<TrackerItem>>,
    pub watchlist_shows: Mutex<Vec<TrackerItem>>,
    pub favorites_shows: Mutex<Vec<TrackerItem>>,
    pub history: Mutex<Vec<WatchedItem>>,
    pub progress: Mutex<ShowProgress>,
    pub season_episode_list: Mutex<Vec<SeasonEpisode>>,
    pub next_episodes: Mutex<Vec<TrackerEpisode>>,
    pub invalidations: AtomicUsize,
}

impl FakeTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackerClient for FakeTracker {
    async fn authenticate(&self) -> Result<()> {
        Ok(())
    }

    fn is_authenticated(&self) -> bool {
        true
    }

    async fn refresh_token(&self) -> Result<()> {
        Ok(())
    }

    async fn watchlist(&self, kind: ListKind) -> Result<Vec<TrackerItem>> {
        Ok(match kind {
            ListKind::Movies => self.watchlist_movies.lock().unwrap().clone(),
            ListKind::Shows => self.watchlist_shows.lock().unwrap().clone(),
        })
    }

    async fn favorites(&self, kind: ListKind) -> Result<Vec<TrackerItem>> {
        Ok(match kind {
            ListKind::Movies => self.favorites_movies.lock().unwrap().clone(),
            ListKind::Shows => self.favorites_shows.lock().unwrap().clone(),
        })
    }

    async fn watched_history(&self, _days: i64) -> Result<Vec<WatchedItem>> {
        Ok(self.history.lock().unwrap().clone())
    }

    async fn watched_shows(&self) -> Result<Vec<TrackerItem>> {
        Ok(Vec::new())
    }

    async fn show_progress(&self, _imdb: &str) -> Result<ShowProgress> {
        Ok(self.progress.lock().unwrap().clone())
    }

    async fn season_episodes(&self, _imdb: &str, _season: i64) -> Result<Vec<SeasonEpisode>> {
        Ok(self.season_episode_list.lock().unwrap().clone())
    }

    async fn next_n_episodes(&self, _show_id: i64, n: usize) -> Result<Vec<TrackerEpisode>> {
        let episodes = self.next_episodes.lock().unwrap().clone();
        Ok(episodes.into_iter().take(n).collect())
    }

    fn invalidate_watched_cache(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Indexer
// ============================================================================

#[derive(Default)]
pub struct FakeIndexer {
    pub movie_results: Mutex<Vec<IndexerItem>>,
    pub episode_results: Mutex<Vec<IndexerItem>>,
    pub season_results: Mutex<Vec<IndexerItem>>,
    pub artifact: Mutex<Vec<u8>>,
}

impl FakeIndexer {
    pub fn new() -> Self {
        Self {
            artifact: Mutex::new(b"nzb-bytes".to_vec()),
            ..Default::default()
        }
    }
}

pub fn indexer_item(title: &str, size: i64) -> IndexerItem {
    IndexerItem {
        title: title.to_string(),
        link: format!("http://indexer.invalid/get/{}", title.replace('.', "-")),
        guid: title.to_string(),
        size,
        pub_date: String::new(),
    }
}

#[async_trait]
impl IndexerClient for FakeIndexer {
    async fn search_movie(&self, _imdb_no_tt: &str) -> Result<Vec<IndexerItem>> {
        Ok(self.movie_results.lock().unwrap().clone())
    }

    async fn search_episode(&self, _imdb: &str, season: i64, episode: i64) -> Result<Vec<IndexerItem>> {
        Ok(self
            .episode_results
            .lock()
            .unwrap()
            .iter()
            .filter(|item| item.title.contains(&format!("S{season:02}E{episode:02}")))
            .cloned()
            .collect())
    }

    async fn search_season(&self, _imdb: &str, _season: i64) -> Result<Vec<IndexerItem>> {
        Ok(self.season_results.lock().unwrap().clone())
    }

    async fn download_artifact(&self, _link: &str, cap: u64) -> Result<Vec<u8>> {
        let artifact = self.artifact.lock().unwrap().clone();
        if artifact.len() as u64 > cap {
            return Err(Error::ArtifactTooLarge { size: artifact.len() as u64, cap });
        }
        Ok(artifact)
    }
}

// ============================================================================
// Downloader
// ============================================================================

pub struct FakeDownloader {
    pub queue_items: Mutex<Vec<QueueItem>>,
    pub history_items: Mutex<Vec<HistoryItem>>,
    pub enqueued: Mutex<Vec<String>>,
    pub cancelled: Mutex<Vec<String>>,
    pub removed_from_history: Mutex<Vec<String>>,
    pub infos: Mutex<HashMap<String, DownloadInfo>>,
    pub cached_detail: Mutex<bool>,
    next_handle: AtomicI64,
}

impl Default for FakeDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDownloader {
    pub fn new() -> Self {
        Self {
            queue_items: Mutex::new(Vec::new()),
            history_items: Mutex::new(Vec::new()),
            enqueued: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            removed_from_history: Mutex::new(Vec::new()),
            infos: Mutex::new(HashMap::new()),
            cached_detail: Mutex::new(false),
            next_handle: AtomicI64::new(1),
        }
    }

    pub fn enqueue_count(&self) -> usize {
        self.enqueued.lock().unwrap().len()
    }
}

#[async_trait]
impl DownloaderClient for FakeDownloader {
    async fn enqueue(
        &self,
        _data: Vec<u8>,
        filename: &str,
        _category: &str,
        _priority: i64,
        _params: &HashMap<String, String>,
    ) -> Result<EnqueueOutcome> {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.enqueued.lock().unwrap().push(filename.to_string());

        let detail = if *self.cached_detail.lock().unwrap() {
            "Found cached usenet download. Using cached download.".to_string()
        } else {
            "Download queued".to_string()
        };

        Ok(EnqueueOutcome {
            handle: handle.to_string(),
            hash: format!("hash-{handle}"),
            detail,
        })
    }

    async fn queue(&self) -> Result<Vec<QueueItem>> {
        Ok(self.queue_items.lock().unwrap().clone())
    }

    async fn history(&self) -> Result<Vec<HistoryItem>> {
        Ok(self.history_items.lock().unwrap().clone())
    }

    async fn find(&self, handle: &str) -> Result<DownloadInfo> {
        self.infos
            .lock()
            .unwrap()
            .get(handle)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("download {handle}")))
    }

    async fn cancel(&self, handle: &str) -> Result<()> {
        self.cancelled.lock().unwrap().push(handle.to_string());
        Ok(())
    }

    async fn delete_from_history(&self, handle: &str) -> Result<()> {
        self.removed_from_history.lock().unwrap().push(handle.to_string());
        Ok(())
    }
}
