// SPDX-License-Identifier: GPL-3.0-or-later
use fetcharr_domain::{Media, MediaKind, Nzb, NzbStatus, Result};

// ============================================================================
// Repository Traits
// ============================================================================

/// Durable store for catalog rows. Implementations must be safe for
/// concurrent use; the core never needs cross-row transactions.
#[async_trait::async_trait]
pub trait MediaRepository: Send + Sync {
    /// Insert or fully replace the row keyed by `trakt_id`.
    async fn upsert(&self, media: &Media) -> Result<()>;
    async fn update(&self, media: &Media) -> Result<()>;
    async fn delete(&self, trakt_id: i64) -> Result<()>;
    async fn delete_many(&self, trakt_ids: &[i64]) -> Result<()>;
    async fn find_by_trakt_id(&self, trakt_id: i64) -> Result<Option<Media>>;
    async fn find_all(&self) -> Result<Vec<Media>>;
    async fn find_not_on_disk(&self) -> Result<Vec<Media>>;
    async fn find_pending(&self) -> Result<Vec<Media>>;
    async fn find_by_imdb(
        &self,
        imdb: &str,
        kind: MediaKind,
        season: Option<i64>,
        episode: Option<i64>,
    ) -> Result<Option<Media>>;
    /// Flip `in_tracker` off for every row; a full sync pass turns it back
    /// on for rows still present upstream.
    async fn mark_all_not_in_tracker(&self) -> Result<()>;
}

/// Durable store for release candidates.
#[async_trait::async_trait]
pub trait NzbRepository: Send + Sync {
    /// Returns the assigned surrogate id.
    async fn create(&self, nzb: &Nzb) -> Result<i64>;
    async fn update(&self, nzb: &Nzb) -> Result<()>;
    async fn find_by_media(&self, trakt_id: i64) -> Result<Vec<Nzb>>;
    /// Best remaining candidate for a media item: not failed, not
    /// blacklisted, ordered by total score then size.
    async fn find_best_non_failed(&self, trakt_id: i64) -> Result<Option<Nzb>>;
    async fn find_best_season_pack(&self, imdb: &str, season: i64) -> Result<Option<Nzb>>;
    async fn find_by_status(&self, status: NzbStatus) -> Result<Vec<Nzb>>;
    async fn find_by_handle(&self, handle: &str) -> Result<Option<Nzb>>;
    async fn find_by_hash(&self, hash: &str) -> Result<Option<Nzb>>;
    async fn find_by_title(&self, title: &str) -> Result<Option<Nzb>>;
    async fn mark_failed_by_title(&self, title: &str, reason: &str) -> Result<()>;
    async fn delete_by_media_ids(&self, trakt_ids: &[i64]) -> Result<()>;
}
