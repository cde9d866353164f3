// SPDX-License-Identifier: GPL-3.0-or-later
use chrono::{DateTime, NaiveDateTime, Utc};
use fetcharr_domain::{Error, Media, MediaKind, Nzb, NzbStatus, Result};
use sqlx::Row;
use sqlx::SqlitePool;
use tracing::debug;

use crate::repositories::{MediaRepository, NzbRepository};

/// SQLx-backed Media repository
pub struct SqliteMediaRepository {
    pool: SqlitePool,
}

impl SqliteMediaRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MediaRepository for SqliteMediaRepository {
    async fn upsert(&self, media: &Media) -> Result<()> {
        debug!(target: "repository", trakt_id = media.trakt_id, "upserting media");
        let q = r#"
            INSERT INTO media (
                trakt_id, imdb, kind, season, number, title, year, source, status,
                on_disk, path, download_id, in_tracker, last_seen_in_tracker,
                last_searched_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(trakt_id) DO UPDATE SET
                imdb = excluded.imdb,
                kind = excluded.kind,
                season = excluded.season,
                number = excluded.number,
                title = excluded.title,
                year = excluded.year,
                source = excluded.source,
                status = excluded.status,
                on_disk = excluded.on_disk,
                path = excluded.path,
                download_id = excluded.download_id,
                in_tracker = excluded.in_tracker,
                last_seen_in_tracker = excluded.last_seen_in_tracker,
                last_searched_at = excluded.last_searched_at,
                updated_at = excluded.updated_at
        "#;

        sqlx::query(q)
            .bind(media.trakt_id)
            .bind(media.imdb.clone())
            .bind(media.kind.to_string())
            .bind(media.season)
            .bind(media.number)
            .bind(media.title.clone())
            .bind(media.year)
            .bind(media.source.to_string())
            .bind(media.status.to_string())
            .bind(media.on_disk)
            .bind(media.path.clone())
            .bind(media.download_id)
            .bind(media.in_tracker)
            .bind(media.last_seen_in_tracker.to_rfc3339())
            .bind(media.last_searched_at.map(|t| t.to_rfc3339()))
            .bind(media.created_at.to_rfc3339())
            .bind(media.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn update(&self, media: &Media) -> Result<()> {
        debug!(target: "repository", trakt_id = media.trakt_id, "updating media");
        let q = r#"
            UPDATE media SET
                imdb = ?, season = ?, number = ?, title = ?, year = ?,
                source = ?, status = ?, on_disk = ?, path = ?, download_id = ?,
                in_tracker = ?, last_seen_in_tracker = ?, last_searched_at = ?,
                updated_at = ?
            WHERE trakt_id = ?
        "#;
        let result = sqlx::query(q)
            .bind(media.imdb.clone())
            .bind(media.season)
            .bind(media.number)
            .bind(media.title.clone())
            .bind(media.year)
            .bind(media.source.to_string())
            .bind(media.status.to_string())
            .bind(media.on_disk)
            .bind(media.path.clone())
            .bind(media.download_id)
            .bind(media.in_tracker)
            .bind(media.last_seen_in_tracker.to_rfc3339())
            .bind(media.last_searched_at.map(|t| t.to_rfc3339()))
            .bind(Utc::now().to_rfc3339())
            .bind(media.trakt_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("media {}", media.trakt_id)));
        }
        Ok(())
    }

    async fn delete(&self, trakt_id: i64) -> Result<()> {
        debug!(target: "repository", trakt_id, "deleting media");
        sqlx::query("DELETE FROM media WHERE trakt_id = ?")
            .bind(trakt_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn delete_many(&self, trakt_ids: &[i64]) -> Result<()> {
        if trakt_ids.is_empty() {
            return Ok(());
        }
        debug!(target: "repository", count = trakt_ids.len(), "deleting media batch");
        let placeholders = vec!["?"; trakt_ids.len()].join(", ");
        let q = format!("DELETE FROM media WHERE trakt_id IN ({placeholders})");
        let mut query = sqlx::query(&q);
        for id in trakt_ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn find_by_trakt_id(&self, trakt_id: i64) -> Result<Option<Media>> {
        let row = sqlx::query("SELECT * FROM media WHERE trakt_id = ? LIMIT 1")
            .bind(trakt_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(|r| row_to_media(&r)).transpose()
    }

    async fn find_all(&self) -> Result<Vec<Media>> {
        let rows = sqlx::query("SELECT * FROM media ORDER BY trakt_id")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(row_to_media).collect()
    }

    async fn find_not_on_disk(&self) -> Result<Vec<Media>> {
        let rows = sqlx::query("SELECT * FROM media WHERE on_disk = 0 ORDER BY trakt_id")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(row_to_media).collect()
    }

    async fn find_pending(&self) -> Result<Vec<Media>> {
        let rows = sqlx::query("SELECT * FROM media WHERE status = 'pending' ORDER BY trakt_id")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(row_to_media).collect()
    }

    async fn find_by_imdb(
        &self,
        imdb: &str,
        kind: MediaKind,
        season: Option<i64>,
        episode: Option<i64>,
    ) -> Result<Option<Media>> {
        let mut q = String::from("SELECT * FROM media WHERE imdb = ? AND kind = ?");
        if season.is_some() {
            q.push_str(" AND season = ?");
        }
        if episode.is_some() {
            q.push_str(" AND number = ?");
        }
        q.push_str(" LIMIT 1");

        let mut query = sqlx::query(&q).bind(imdb).bind(kind.to_string());
        if let Some(s) = season {
            query = query.bind(s);
        }
        if let Some(e) = episode {
            query = query.bind(e);
        }
        let row = query.fetch_optional(&self.pool).await.map_err(map_sqlx)?;
        row.map(|r| row_to_media(&r)).transpose()
    }

    async fn mark_all_not_in_tracker(&self) -> Result<()> {
        debug!(target: "repository", "marking all media not in tracker");
        sqlx::query("UPDATE media SET in_tracker = 0")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }
}

/// SQLx-backed NZB repository
pub struct SqliteNzbRepository {
    pool: SqlitePool,
}

impl SqliteNzbRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl NzbRepository for SqliteNzbRepository {
    async fn create(&self, nzb: &Nzb) -> Result<i64> {
        debug!(target: "repository", trakt_id = nzb.trakt_id, title = %nzb.title, "creating nzb");
        let q = r#"
            INSERT INTO nzbs (
                trakt_id, imdb, title, link, size,
                parsed_title, parsed_year, parsed_season, parsed_episode,
                resolution, source, codec, proper, repack, is_season_pack,
                validation_score, quality_score, total_score,
                failed, retry_count, failure_reason,
                download_handle, download_hash, status, episodes,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#;

        let episodes = serde_json::to_string(&nzb.episodes)
            .map_err(|e| Error::InvalidInput(format!("episode list not serializable: {e}")))?;

        let result = sqlx::query(q)
            .bind(nzb.trakt_id)
            .bind(nzb.imdb.clone())
            .bind(nzb.title.clone())
            .bind(nzb.link.clone())
            .bind(nzb.size)
            .bind(nzb.parsed_title.clone())
            .bind(nzb.parsed_year)
            .bind(nzb.parsed_season)
            .bind(nzb.parsed_episode)
            .bind(nzb.resolution.clone())
            .bind(nzb.source.clone())
            .bind(nzb.codec.clone())
            .bind(nzb.proper)
            .bind(nzb.repack)
            .bind(nzb.is_season_pack())
            .bind(nzb.validation_score)
            .bind(nzb.quality_score)
            .bind(nzb.total_score)
            .bind(nzb.failed)
            .bind(nzb.retry_count)
            .bind(nzb.failure_reason.clone())
            .bind(nzb.download_handle.clone())
            .bind(nzb.download_hash.clone())
            .bind(nzb.status.to_string())
            .bind(episodes)
            .bind(nzb.created_at.to_rfc3339())
            .bind(nzb.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(result.last_insert_rowid())
    }

    async fn update(&self, nzb: &Nzb) -> Result<()> {
        debug!(target: "repository", nzb_id = nzb.id, status = %nzb.status, "updating nzb");
        let q = r#"
            UPDATE nzbs SET
                failed = ?, retry_count = ?, failure_reason = ?,
                download_handle = ?, download_hash = ?, status = ?,
                episodes = ?, updated_at = ?
            WHERE id = ?
        "#;
        let episodes = serde_json::to_string(&nzb.episodes)
            .map_err(|e| Error::InvalidInput(format!("episode list not serializable: {e}")))?;
        let result = sqlx::query(q)
            .bind(nzb.failed)
            .bind(nzb.retry_count)
            .bind(nzb.failure_reason.clone())
            .bind(nzb.download_handle.clone())
            .bind(nzb.download_hash.clone())
            .bind(nzb.status.to_string())
            .bind(episodes)
            .bind(Utc::now().to_rfc3339())
            .bind(nzb.id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("nzb {}", nzb.id)));
        }
        Ok(())
    }

    async fn find_by_media(&self, trakt_id: i64) -> Result<Vec<Nzb>> {
        let rows = sqlx::query("SELECT * FROM nzbs WHERE trakt_id = ? ORDER BY total_score DESC, size DESC")
            .bind(trakt_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(row_to_nzb).collect()
    }

    async fn find_best_non_failed(&self, trakt_id: i64) -> Result<Option<Nzb>> {
        let q = r#"
            SELECT * FROM nzbs
            WHERE trakt_id = ? AND failed = 0 AND status IN ('selected', 'candidate')
            ORDER BY total_score DESC, size DESC
            LIMIT 1
        "#;
        let row = sqlx::query(q)
            .bind(trakt_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(|r| row_to_nzb(&r)).transpose()
    }

    async fn find_best_season_pack(&self, imdb: &str, season: i64) -> Result<Option<Nzb>> {
        let q = r#"
            SELECT * FROM nzbs
            WHERE imdb = ? AND parsed_season = ? AND is_season_pack = 1
              AND failed = 0 AND status IN ('selected', 'candidate')
            ORDER BY total_score DESC, size DESC
            LIMIT 1
        "#;
        let row = sqlx::query(q)
            .bind(imdb)
            .bind(season)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(|r| row_to_nzb(&r)).transpose()
    }

    async fn find_by_status(&self, status: NzbStatus) -> Result<Vec<Nzb>> {
        let rows = sqlx::query("SELECT * FROM nzbs WHERE status = ? ORDER BY id")
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(row_to_nzb).collect()
    }

    async fn find_by_handle(&self, handle: &str) -> Result<Option<Nzb>> {
        let row = sqlx::query("SELECT * FROM nzbs WHERE download_handle = ? LIMIT 1")
            .bind(handle)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(|r| row_to_nzb(&r)).transpose()
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<Nzb>> {
        let row = sqlx::query("SELECT * FROM nzbs WHERE download_hash = ? LIMIT 1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(|r| row_to_nzb(&r)).transpose()
    }

    async fn find_by_title(&self, title: &str) -> Result<Option<Nzb>> {
        let row = sqlx::query("SELECT * FROM nzbs WHERE title = ? LIMIT 1")
            .bind(title)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(|r| row_to_nzb(&r)).transpose()
    }

    async fn mark_failed_by_title(&self, title: &str, reason: &str) -> Result<()> {
        sqlx::query("UPDATE nzbs SET failed = 1, status = 'failed', failure_reason = ?, updated_at = ? WHERE title = ?")
            .bind(reason)
            .bind(Utc::now().to_rfc3339())
            .bind(title)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn delete_by_media_ids(&self, trakt_ids: &[i64]) -> Result<()> {
        if trakt_ids.is_empty() {
            return Ok(());
        }
        debug!(target: "repository", count = trakt_ids.len(), "deleting nzb batch");
        let placeholders = vec!["?"; trakt_ids.len()].join(", ");
        let q = format!("DELETE FROM nzbs WHERE trakt_id IN ({placeholders})");
        let mut query = sqlx::query(&q);
        for id in trakt_ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await.map_err(map_sqlx)?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn map_sqlx(err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::RowNotFound => Error::NotFound("row".into()),
        sqlx::Error::Database(db) if db.is_unique_violation() => Error::Duplicate(db.message().to_string()),
        _ => Error::external("database", err),
    }
}

fn parse_dt(s: String) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Ok(dt.with_timezone(&Utc));
    }
    // Fallback to SQLite default CURRENT_TIMESTAMP format: "YYYY-MM-DD HH:MM:SS"
    let ndt = NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
        .map_err(|e| Error::InvalidInput(format!("bad timestamp '{s}': {e}")))?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
}

fn parse_dt_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(parse_dt).transpose()
}

fn row_to_media(row: &sqlx::sqlite::SqliteRow) -> Result<Media> {
    let kind_str: String = row.try_get("kind").map_err(map_sqlx)?;
    let source_str: String = row.try_get("source").map_err(map_sqlx)?;
    let status_str: String = row.try_get("status").map_err(map_sqlx)?;
    let last_seen: String = row.try_get("last_seen_in_tracker").map_err(map_sqlx)?;
    let last_searched: Option<String> = row.try_get("last_searched_at").map_err(map_sqlx)?;
    let created_at: String = row.try_get("created_at").map_err(map_sqlx)?;
    let updated_at: String = row.try_get("updated_at").map_err(map_sqlx)?;

    Ok(Media {
        trakt_id: row.try_get("trakt_id").map_err(map_sqlx)?,
        imdb: row.try_get("imdb").map_err(map_sqlx)?,
        kind: kind_str.parse().map_err(Error::InvalidInput)?,
        season: row.try_get("season").map_err(map_sqlx)?,
        number: row.try_get("number").map_err(map_sqlx)?,
        title: row.try_get("title").map_err(map_sqlx)?,
        year: row.try_get("year").map_err(map_sqlx)?,
        source: source_str.parse().map_err(Error::InvalidInput)?,
        status: status_str.parse().map_err(Error::InvalidInput)?,
        on_disk: row.try_get("on_disk").map_err(map_sqlx)?,
        path: row.try_get("path").map_err(map_sqlx)?,
        download_id: row.try_get("download_id").map_err(map_sqlx)?,
        in_tracker: row.try_get("in_tracker").map_err(map_sqlx)?,
        last_seen_in_tracker: parse_dt(last_seen)?,
        last_searched_at: parse_dt_opt(last_searched)?,
        created_at: parse_dt(created_at)?,
        updated_at: parse_dt(updated_at)?,
    })
}

fn row_to_nzb(row: &sqlx::sqlite::SqliteRow) -> Result<Nzb> {
    let status_str: String = row.try_get("status").map_err(map_sqlx)?;
    let episodes_json: String = row.try_get("episodes").map_err(map_sqlx)?;
    let created_at: String = row.try_get("created_at").map_err(map_sqlx)?;
    let updated_at: String = row.try_get("updated_at").map_err(map_sqlx)?;

    Ok(Nzb {
        id: row.try_get("id").map_err(map_sqlx)?,
        trakt_id: row.try_get("trakt_id").map_err(map_sqlx)?,
        imdb: row.try_get("imdb").map_err(map_sqlx)?,
        title: row.try_get("title").map_err(map_sqlx)?,
        link: row.try_get("link").map_err(map_sqlx)?,
        size: row.try_get("size").map_err(map_sqlx)?,
        parsed_title: row.try_get("parsed_title").map_err(map_sqlx)?,
        parsed_year: row.try_get("parsed_year").map_err(map_sqlx)?,
        parsed_season: row.try_get("parsed_season").map_err(map_sqlx)?,
        parsed_episode: row.try_get("parsed_episode").map_err(map_sqlx)?,
        resolution: row.try_get("resolution").map_err(map_sqlx)?,
        source: row.try_get("source").map_err(map_sqlx)?,
        codec: row.try_get("codec").map_err(map_sqlx)?,
        proper: row.try_get("proper").map_err(map_sqlx)?,
        repack: row.try_get("repack").map_err(map_sqlx)?,
        validation_score: row.try_get("validation_score").map_err(map_sqlx)?,
        quality_score: row.try_get("quality_score").map_err(map_sqlx)?,
        total_score: row.try_get("total_score").map_err(map_sqlx)?,
        failed: row.try_get("failed").map_err(map_sqlx)?,
        retry_count: row.try_get("retry_count").map_err(map_sqlx)?,
        failure_reason: row.try_get("failure_reason").map_err(map_sqlx)?,
        download_handle: row.try_get("download_handle").map_err(map_sqlx)?,
        download_hash: row.try_get("download_hash").map_err(map_sqlx)?,
        status: status_str.parse().map_err(Error::InvalidInput)?,
        episodes: serde_json::from_str(&episodes_json)
            .map_err(|e| Error::InvalidInput(format!("bad episode list: {e}")))?,
        created_at: parse_dt(created_at)?,
        updated_at: parse_dt(updated_at)?,
    })
}
