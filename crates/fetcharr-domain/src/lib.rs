// SPDX-License-Identifier: GPL-3.0-or-later
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Errors
// ============================================================================

/// Error taxonomy shared by every layer of the pipeline. Per-item failures
/// inside a cycle are logged and skipped; `Cancelled` propagates to the
/// nearest cycle boundary without being logged as an error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate entry: {0}")]
    Duplicate(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("timeout")]
    Timeout,
    #[error("external service error ({service}): {cause}")]
    External { service: &'static str, cause: String },
    #[error("artifact exceeds size cap ({size} > {cap} bytes)")]
    ArtifactTooLarge { size: u64, cap: u64 },
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub fn external(service: &'static str, cause: impl std::fmt::Display) -> Self {
        Self::External { service, cause: cause.to_string() }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Episode,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Movie => write!(f, "movie"),
            Self::Episode => write!(f, "episode"),
        }
    }
}

impl std::str::FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "movie" => Ok(Self::Movie),
            "episode" => Ok(Self::Episode),
            other => Err(format!("unknown media kind: '{other}'")),
        }
    }
}

/// Which upstream list a media item came from. Favorites get season-pack
/// treatment; watchlist items are fetched one episode at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListSource {
    Favorites,
    Watchlist,
}

impl std::fmt::Display for ListSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Favorites => write!(f, "favorites"),
            Self::Watchlist => write!(f, "watchlist"),
        }
    }
}

impl std::str::FromStr for ListSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "favorites" => Ok(Self::Favorites),
            "watchlist" => Ok(Self::Watchlist),
            other => Err(format!("unknown list source: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaStatus {
    Pending,
    Searching,
    Downloading,
    Completed,
    Failed,
}

impl std::fmt::Display for MediaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Searching => write!(f, "searching"),
            Self::Downloading => write!(f, "downloading"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for MediaStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "searching" => Ok(Self::Searching),
            "downloading" => Ok(Self::Downloading),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown media status: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NzbStatus {
    /// Found and scored but not picked.
    Candidate,
    /// Best of its pool, next in line for the downloader.
    Selected,
    Downloading,
    Completed,
    Failed,
    Blacklisted,
}

impl std::fmt::Display for NzbStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Candidate => write!(f, "candidate"),
            Self::Selected => write!(f, "selected"),
            Self::Downloading => write!(f, "downloading"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Blacklisted => write!(f, "blacklisted"),
        }
    }
}

impl std::str::FromStr for NzbStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "candidate" => Ok(Self::Candidate),
            "selected" => Ok(Self::Selected),
            "downloading" => Ok(Self::Downloading),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "blacklisted" => Ok(Self::Blacklisted),
            other => Err(format!("unknown nzb status: '{other}'")),
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Catalog row for one movie or one episode, keyed by the upstream
/// tracker's id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub trakt_id: i64,
    pub imdb: String,
    pub kind: MediaKind,
    /// Season number; 0 for movies.
    pub season: i64,
    /// Episode number; 0 for movies.
    pub number: i64,
    pub title: String,
    pub year: i64,
    pub source: ListSource,
    pub status: MediaStatus,
    pub on_disk: bool,
    pub path: String,
    /// Downloader's handle for the active job; 0 when nothing is queued.
    pub download_id: i64,
    pub in_tracker: bool,
    pub last_seen_in_tracker: DateTime<Utc>,
    pub last_searched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Media {
    pub fn movie(trakt_id: i64, imdb: impl Into<String>, title: impl Into<String>, year: i64, source: ListSource) -> Self {
        let now = Utc::now();
        Self {
            trakt_id,
            imdb: imdb.into(),
            kind: MediaKind::Movie,
            season: 0,
            number: 0,
            title: title.into(),
            year,
            source,
            status: MediaStatus::Pending,
            on_disk: false,
            path: String::new(),
            download_id: 0,
            in_tracker: true,
            last_seen_in_tracker: now,
            last_searched_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn episode(
        trakt_id: i64,
        imdb: impl Into<String>,
        title: impl Into<String>,
        season: i64,
        number: i64,
        source: ListSource,
    ) -> Self {
        let now = Utc::now();
        Self {
            trakt_id,
            imdb: imdb.into(),
            kind: MediaKind::Episode,
            season,
            number,
            title: title.into(),
            year: 0,
            source,
            status: MediaStatus::Pending,
            on_disk: false,
            path: String::new(),
            download_id: 0,
            in_tracker: true,
            last_seen_in_tracker: now,
            last_searched_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_movie(&self) -> bool {
        self.kind == MediaKind::Movie
    }

    pub fn is_episode(&self) -> bool {
        self.kind == MediaKind::Episode
    }
}

/// One episode of a season pack, with its watched flag mirrored from the
/// tracker's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackEpisode {
    pub number: i64,
    pub title: String,
    pub watched: bool,
    pub watched_at: Option<DateTime<Utc>>,
}

/// A release candidate pointing at an artifact the downloader can fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nzb {
    pub id: i64,
    /// Parent media (tracker id).
    pub trakt_id: i64,
    pub imdb: String,
    pub title: String,
    pub link: String,
    pub size: i64,
    pub parsed_title: String,
    pub parsed_year: i64,
    pub parsed_season: i64,
    pub parsed_episode: i64,
    pub resolution: String,
    pub source: String,
    pub codec: String,
    pub proper: bool,
    pub repack: bool,
    pub validation_score: i64,
    pub quality_score: i64,
    pub total_score: i64,
    pub failed: bool,
    pub retry_count: i64,
    pub failure_reason: String,
    /// Opaque downloader handle, empty until enqueued.
    pub download_handle: String,
    /// Content hash echoed by the downloader, if it exposes one.
    pub download_hash: String,
    pub status: NzbStatus,
    /// Populated for season packs only.
    pub episodes: Vec<PackEpisode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Nzb {
    pub fn new(trakt_id: i64, imdb: impl Into<String>, title: impl Into<String>, link: impl Into<String>, size: i64) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            trakt_id,
            imdb: imdb.into(),
            title: title.into(),
            link: link.into(),
            size,
            parsed_title: String::new(),
            parsed_year: 0,
            parsed_season: 0,
            parsed_episode: 0,
            resolution: String::new(),
            source: String::new(),
            codec: String::new(),
            proper: false,
            repack: false,
            validation_score: 0,
            quality_score: 0,
            total_score: 0,
            failed: false,
            retry_count: 0,
            failure_reason: String::new(),
            download_handle: String::new(),
            download_hash: String::new(),
            status: NzbStatus::Candidate,
            episodes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A pack is a release carrying a season but no episode number.
    pub fn is_season_pack(&self) -> bool {
        self.parsed_season > 0 && self.parsed_episode == 0
    }
}

// ============================================================================
// Strategy (transient, never persisted)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpisodeRef {
    pub season: i64,
    pub number: i64,
}

/// What to search for, decided per media item each cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    SingleMovie,
    /// Watchlist shows: the next unwatched episode only.
    SingleEpisode(EpisodeRef),
    /// Favorites shows: a pack for the season of the first unwatched
    /// episode, plus the next unwatched episodes of that season as
    /// individual fallbacks.
    SeasonPack { season: i64, episodes: Vec<EpisodeRef> },
}

// ============================================================================
// Validation
// ============================================================================

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> std::result::Result<(), Vec<ValidationError>>;
}

impl Validate for Media {
    fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.trakt_id <= 0 {
            errors.push(ValidationError { field: "trakt_id", message: "tracker id must be positive".into() });
        }
        if self.imdb.trim().is_empty() {
            errors.push(ValidationError { field: "imdb", message: "imdb id cannot be empty".into() });
        }
        match self.kind {
            MediaKind::Movie => {
                if self.season != 0 || self.number != 0 {
                    errors.push(ValidationError { field: "kind", message: "a movie never has season/episode".into() });
                }
            }
            MediaKind::Episode => {
                if self.season < 1 {
                    errors.push(ValidationError { field: "season", message: "season must be >= 1".into() });
                }
                if self.number < 1 {
                    errors.push(ValidationError { field: "number", message: "episode number must be >= 1".into() });
                }
            }
        }
        if self.on_disk && self.path.trim().is_empty() {
            errors.push(ValidationError { field: "path", message: "on-disk media must have a path".into() });
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

impl Validate for Nzb {
    fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.trakt_id <= 0 {
            errors.push(ValidationError { field: "trakt_id", message: "parent tracker id must be positive".into() });
        }
        if self.title.trim().is_empty() {
            errors.push(ValidationError { field: "title", message: "title cannot be empty".into() });
        }
        if self.link.trim().is_empty() {
            errors.push(ValidationError { field: "link", message: "download link cannot be empty".into() });
        }
        if self.status == NzbStatus::Downloading && self.download_handle.is_empty() {
            errors.push(ValidationError { field: "download_handle", message: "a downloading nzb must carry a handle".into() });
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movie_constructor_has_no_season_or_episode() {
        let m = Media::movie(1, "tt1234567", "Arrival", 2016, ListSource::Watchlist);
        assert!(m.is_movie());
        assert_eq!(m.season, 0);
        assert_eq!(m.number, 0);
        assert!(m.validate().is_ok());
    }

    #[test]
    fn episode_requires_positive_season_and_number() {
        let mut e = Media::episode(2, "tt0944947", "Winter Is Coming", 1, 1, ListSource::Favorites);
        assert!(e.validate().is_ok());

        e.season = 0;
        let errs = e.validate().unwrap_err();
        assert!(errs.iter().any(|e| e.field == "season"));
    }

    #[test]
    fn on_disk_media_must_have_path() {
        let mut m = Media::movie(1, "tt1234567", "Arrival", 2016, ListSource::Watchlist);
        m.on_disk = true;
        let errs = m.validate().unwrap_err();
        assert!(errs.iter().any(|e| e.field == "path"));

        m.path = "/data/movies/Arrival".into();
        assert!(m.validate().is_ok());
    }

    #[test]
    fn season_pack_is_season_without_episode() {
        let mut n = Nzb::new(1, "tt0944947", "Show.S02.1080p", "http://x/1", 0);
        n.parsed_season = 2;
        n.parsed_episode = 0;
        assert!(n.is_season_pack());

        n.parsed_episode = 3;
        assert!(!n.is_season_pack());
    }

    #[test]
    fn downloading_nzb_needs_a_handle() {
        let mut n = Nzb::new(1, "tt1234567", "Arrival.2016.1080p", "http://x/1", 0);
        n.status = NzbStatus::Downloading;
        let errs = n.validate().unwrap_err();
        assert!(errs.iter().any(|e| e.field == "download_handle"));

        n.download_handle = "42".into();
        assert!(n.validate().is_ok());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for s in ["pending", "searching", "downloading", "completed", "failed"] {
            let parsed: MediaStatus = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        for s in ["candidate", "selected", "downloading", "completed", "failed", "blacklisted"] {
            let parsed: NzbStatus = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
    }

    #[test]
    fn cancelled_error_is_distinguishable() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Timeout.is_cancelled());
    }
}
