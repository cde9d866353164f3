// SPDX-License-Identifier: GPL-3.0-or-later
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fetcharr_domain::{EpisodeRef, Error, MediaKind, Result};
use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::rate_limit::RateLimiter;

// ============================================================================
// Contract types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Movies,
    Shows,
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movies => "movies",
            Self::Shows => "shows",
        }
    }
}

/// One entry of an upstream list (movie or show level).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerItem {
    pub trakt_id: i64,
    pub imdb: String,
    pub title: String,
    pub year: i64,
}

/// One upcoming episode of a show, resolved from watch progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerEpisode {
    pub trakt_id: i64,
    pub title: String,
    pub season: i64,
    pub number: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedItem {
    pub imdb: String,
    pub kind: MediaKind,
    pub season: i64,
    pub episode: i64,
    pub watched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ShowProgress {
    pub next_episode: Option<EpisodeRef>,
    pub unwatched: Vec<EpisodeRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonEpisode {
    pub number: i64,
    pub title: String,
}

/// Upstream media-tracking service: lists, progress, watched history, and
/// the auth token lifecycle.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Interactive device-code flow; blocks until the user approves or the
    /// code expires.
    async fn authenticate(&self) -> Result<()>;
    fn is_authenticated(&self) -> bool;
    async fn refresh_token(&self) -> Result<()>;
    async fn watchlist(&self, kind: ListKind) -> Result<Vec<TrackerItem>>;
    async fn favorites(&self, kind: ListKind) -> Result<Vec<TrackerItem>>;
    async fn watched_history(&self, days: i64) -> Result<Vec<WatchedItem>>;
    async fn watched_shows(&self) -> Result<Vec<TrackerItem>>;
    async fn show_progress(&self, imdb: &str) -> Result<ShowProgress>;
    async fn season_episodes(&self, imdb: &str, season: i64) -> Result<Vec<SeasonEpisode>>;
    async fn next_n_episodes(&self, show_id: i64, n: usize) -> Result<Vec<TrackerEpisode>>;
    /// Drop the cached watched history; called after cleanup deletes media.
    fn invalidate_watched_cache(&self);
}

// ============================================================================
// Token store
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_in: i64,
}

impl Token {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + ChronoDuration::seconds(self.expires_in)
    }
}

/// Token persisted as a JSON file, mode 0600.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Token> {
        let data = std::fs::read_to_string(&self.path)
            .map_err(|_| Error::NotFound("token file".into()))?;
        serde_json::from_str(&data).map_err(|e| Error::InvalidInput(format!("bad token file: {e}")))
    }

    pub fn save(&self, token: &Token) -> Result<()> {
        let data = serde_json::to_string_pretty(token)
            .map_err(|e| Error::InvalidInput(format!("token not serializable: {e}")))?;
        std::fs::write(&self.path, data).map_err(|e| Error::external("token-store", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| Error::external("token-store", e))?;
        }

        Ok(())
    }
}

// ============================================================================
// Trakt implementation
// ============================================================================

const TRAKT_API_BASE: &str = "https://api.trakt.tv";
const API_VERSION: &str = "2";
/// Refresh when less than this much validity remains.
const REFRESH_MARGIN_HOURS: i64 = 24;

pub struct TraktClient {
    client_id: String,
    client_secret: String,
    base_url: String,
    http: reqwest::Client,
    store: FileTokenStore,
    limiter: Arc<RateLimiter>,
    show_id_cache: Cache<String, i64>,
    watched_cache: Cache<i64, Arc<Vec<WatchedItem>>>,
}

impl TraktClient {
    pub fn new(cfg: &fetcharr_config::TraktConfig, token_path: impl Into<PathBuf>, limiter: Arc<RateLimiter>) -> Self {
        Self::with_base_url(cfg, token_path, limiter, TRAKT_API_BASE.to_string())
    }

    pub fn with_base_url(
        cfg: &fetcharr_config::TraktConfig,
        token_path: impl Into<PathBuf>,
        limiter: Arc<RateLimiter>,
        base_url: String,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .expect("reqwest client");

        Self {
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            base_url,
            http,
            store: FileTokenStore::new(token_path),
            limiter,
            show_id_cache: Cache::new(1_000),
            watched_cache: Cache::new(8),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.ensure_valid_token().await;

        match self.get_once(path).await {
            Err(Error::Unauthorized) => {
                // One refresh-and-retry on the first 401; a second 401
                // surfaces to the caller.
                warn!(target: "trakt", "token rejected, refreshing once");
                self.refresh_token().await?;
                self.get_once(path).await
            }
            other => other,
        }
    }

    async fn get_once<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.limiter.acquire().await;

        let url = format!("{}{}", self.base_url, path);
        debug!(target: "trakt", %url, "tracker request");

        let mut request = self
            .http
            .get(&url)
            .header("Content-Type", "application/json")
            .header("trakt-api-version", API_VERSION)
            .header("trakt-api-key", &self.client_id);

        if let Ok(token) = self.store.load() {
            request = request.bearer_auth(&token.access_token);
        }

        let response = request.send().await.map_err(map_reqwest)?;
        let status = response.status();

        if status.as_u16() == 401 {
            return Err(Error::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::external("trakt", format!("status {}: {}", status.as_u16(), body)));
        }

        response.json::<T>().await.map_err(map_reqwest)
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &serde_json::Value) -> Result<T> {
        self.limiter.acquire().await;

        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::external("trakt", format!("status {}: {}", status.as_u16(), body)));
        }

        response.json::<T>().await.map_err(map_reqwest)
    }

    async fn ensure_valid_token(&self) {
        let Ok(token) = self.store.load() else {
            return;
        };
        if token.expires_at() - Utc::now() < ChronoDuration::hours(REFRESH_MARGIN_HOURS) {
            info!(target: "trakt", "token expires soon, refreshing");
            if let Err(err) = self.refresh_token().await {
                warn!(target: "trakt", error = %err, "token refresh failed");
            }
        }
    }

    async fn fetch_list(&self, list: &str, kind: ListKind) -> Result<Vec<TrackerItem>> {
        let entries: Vec<ListEntry> = self.get_json(&format!("/sync/{}/{}", list, kind.as_str())).await?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let media = match kind {
                    ListKind::Movies => entry.movie,
                    ListKind::Shows => entry.show,
                }?;
                Some(TrackerItem {
                    trakt_id: media.ids.trakt,
                    imdb: media.ids.imdb.unwrap_or_default(),
                    title: media.title,
                    year: media.year.unwrap_or(0),
                })
            })
            .collect())
    }

    async fn lookup_show_id(&self, imdb: &str) -> Result<i64> {
        let imdb_owned = imdb.to_string();
        self.show_id_cache
            .try_get_with(imdb_owned.clone(), async move {
                let results: Vec<SearchEntry> = self
                    .get_json(&format!("/search/imdb/{imdb_owned}?type=show"))
                    .await?;
                results
                    .into_iter()
                    .find_map(|entry| entry.show.map(|s| s.ids.trakt))
                    .ok_or_else(|| Error::NotFound(format!("show {imdb_owned}")))
            })
            .await
            .map_err(flatten_cache_error)
    }

    async fn progress_for_show(&self, show_id: i64) -> Result<ShowProgress> {
        let progress: ProgressResponse = self
            .get_json(&format!("/shows/{show_id}/progress/watched"))
            .await?;

        let mut unwatched = Vec::new();
        for season in &progress.seasons {
            for ep in &season.episodes {
                if !ep.completed {
                    unwatched.push(EpisodeRef { season: season.number, number: ep.number });
                }
            }
        }

        Ok(ShowProgress {
            next_episode: progress
                .next_episode
                .map(|ep| EpisodeRef { season: ep.season, number: ep.number }),
            unwatched,
        })
    }
}

#[async_trait]
impl TrackerClient for TraktClient {
    async fn authenticate(&self) -> Result<()> {
        let device: DeviceCodeResponse = self
            .post_json("/oauth/device/code", &serde_json::json!({ "client_id": self.client_id }))
            .await?;

        info!(
            target: "trakt",
            url = %device.verification_url,
            code = %device.user_code,
            "waiting for device authorization"
        );
        println!("\nPlease visit {} and enter code: {}\n", device.verification_url, device.user_code);

        let interval = Duration::from_secs(device.interval.max(1) as u64);
        let deadline = Utc::now() + ChronoDuration::seconds(device.expires_in);

        loop {
            sleep(interval).await;
            if Utc::now() > deadline {
                return Err(Error::Timeout);
            }

            let body = serde_json::json!({
                "code": device.device_code,
                "client_id": self.client_id,
                "client_secret": self.client_secret,
            });
            match self.post_json::<TokenResponse>("/oauth/device/token", &body).await {
                Ok(token) => {
                    self.store.save(&Token {
                        access_token: token.access_token,
                        refresh_token: token.refresh_token,
                        created_at: Utc::now(),
                        expires_in: token.expires_in,
                    })?;
                    info!(target: "trakt", "authentication successful");
                    return Ok(());
                }
                Err(_) => {
                    debug!(target: "trakt", "waiting for user authorization");
                }
            }
        }
    }

    fn is_authenticated(&self) -> bool {
        self.store.load().is_ok()
    }

    async fn refresh_token(&self) -> Result<()> {
        let token = self.store.load().map_err(|_| Error::Unauthorized)?;

        let body = serde_json::json!({
            "refresh_token": token.refresh_token,
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "grant_type": "refresh_token",
        });
        let refreshed: TokenResponse = self.post_json("/oauth/token", &body).await?;

        self.store.save(&Token {
            access_token: refreshed.access_token,
            refresh_token: refreshed.refresh_token,
            created_at: Utc::now(),
            expires_in: refreshed.expires_in,
        })?;

        info!(target: "trakt", "token refreshed");
        Ok(())
    }

    async fn watchlist(&self, kind: ListKind) -> Result<Vec<TrackerItem>> {
        self.fetch_list("watchlist", kind).await
    }

    async fn favorites(&self, kind: ListKind) -> Result<Vec<TrackerItem>> {
        self.fetch_list("favorites", kind).await
    }

    async fn watched_history(&self, days: i64) -> Result<Vec<WatchedItem>> {
        let items = self
            .watched_cache
            .try_get_with(days, async {
                let start = (Utc::now() - ChronoDuration::days(days)).format("%Y-%m-%d");
                let entries: Vec<HistoryEntry> = self
                    .get_json(&format!("/sync/history?start_at={start}"))
                    .await?;

                let mut items = Vec::new();
                for entry in entries {
                    match entry.kind.as_str() {
                        "movie" => {
                            if let Some(movie) = entry.movie {
                                if let Some(imdb) = movie.ids.imdb {
                                    items.push(WatchedItem {
                                        imdb,
                                        kind: MediaKind::Movie,
                                        season: 0,
                                        episode: 0,
                                        watched_at: entry.watched_at,
                                    });
                                }
                            }
                        }
                        "episode" => {
                            if let (Some(episode), Some(show)) = (entry.episode, entry.show) {
                                if let Some(imdb) = show.ids.imdb {
                                    items.push(WatchedItem {
                                        imdb,
                                        kind: MediaKind::Episode,
                                        season: episode.season,
                                        episode: episode.number,
                                        watched_at: entry.watched_at,
                                    });
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Ok::<_, Error>(Arc::new(items))
            })
            .await
            .map_err(flatten_cache_error)?;

        Ok(items.as_ref().clone())
    }

    async fn watched_shows(&self) -> Result<Vec<TrackerItem>> {
        let entries: Vec<ListEntry> = self.get_json("/sync/watched/shows").await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| entry.show)
            .map(|show| TrackerItem {
                trakt_id: show.ids.trakt,
                imdb: show.ids.imdb.unwrap_or_default(),
                title: show.title,
                year: show.year.unwrap_or(0),
            })
            .collect())
    }

    async fn show_progress(&self, imdb: &str) -> Result<ShowProgress> {
        let show_id = self.lookup_show_id(imdb).await?;
        self.progress_for_show(show_id).await
    }

    async fn season_episodes(&self, imdb: &str, season: i64) -> Result<Vec<SeasonEpisode>> {
        let show_id = self.lookup_show_id(imdb).await?;
        let episodes: Vec<SeasonEpisodeEntry> = self
            .get_json(&format!("/shows/{show_id}/seasons/{season}?extended=episodes"))
            .await?;

        Ok(episodes
            .into_iter()
            .map(|ep| SeasonEpisode { number: ep.number, title: ep.title.unwrap_or_default() })
            .collect())
    }

    async fn next_n_episodes(&self, show_id: i64, n: usize) -> Result<Vec<TrackerEpisode>> {
        let progress = self.progress_for_show(show_id).await?;

        let mut episodes = Vec::new();
        for target in progress.unwatched.iter().take(n) {
            let detail: EpisodeDetail = self
                .get_json(&format!(
                    "/shows/{show_id}/seasons/{}/episodes/{}",
                    target.season, target.number
                ))
                .await?;
            episodes.push(TrackerEpisode {
                trakt_id: detail.ids.trakt,
                title: detail.title.unwrap_or_default(),
                season: detail.season,
                number: detail.number,
            });
        }

        Ok(episodes)
    }

    fn invalidate_watched_cache(&self) {
        self.watched_cache.invalidate_all();
    }
}

fn map_reqwest(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout
    } else {
        Error::external("trakt", err)
    }
}

fn flatten_cache_error(err: Arc<Error>) -> Error {
    match Arc::try_unwrap(err) {
        Ok(err) => err,
        Err(shared) => Error::external("trakt", shared),
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct Ids {
    #[serde(default)]
    trakt: i64,
    #[serde(default)]
    imdb: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListMedia {
    title: String,
    #[serde(default)]
    year: Option<i64>,
    ids: Ids,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    #[serde(default)]
    movie: Option<ListMedia>,
    #[serde(default)]
    show: Option<ListMedia>,
}

#[derive(Debug, Deserialize)]
struct HistoryEpisode {
    season: i64,
    number: i64,
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    watched_at: DateTime<Utc>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    movie: Option<ListMedia>,
    #[serde(default)]
    episode: Option<HistoryEpisode>,
    #[serde(default)]
    show: Option<ListMedia>,
}

#[derive(Debug, Deserialize)]
struct SearchShow {
    ids: Ids,
}

#[derive(Debug, Deserialize)]
struct SearchEntry {
    #[serde(default)]
    show: Option<SearchShow>,
}

#[derive(Debug, Deserialize)]
struct ProgressEpisode {
    season: i64,
    number: i64,
}

#[derive(Debug, Deserialize)]
struct ProgressSeasonEpisode {
    number: i64,
    #[serde(default)]
    completed: bool,
}

#[derive(Debug, Deserialize)]
struct ProgressSeason {
    number: i64,
    #[serde(default)]
    episodes: Vec<ProgressSeasonEpisode>,
}

#[derive(Debug, Deserialize)]
struct ProgressResponse {
    #[serde(default)]
    next_episode: Option<ProgressEpisode>,
    #[serde(default)]
    seasons: Vec<ProgressSeason>,
}

#[derive(Debug, Deserialize)]
struct SeasonEpisodeEntry {
    number: i64,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EpisodeDetail {
    season: i64,
    number: i64,
    #[serde(default)]
    title: Option<String>,
    ids: Ids,
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_url: String,
    expires_in: i64,
    interval: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
}
