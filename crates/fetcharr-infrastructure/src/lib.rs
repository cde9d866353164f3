// SPDX-License-Identifier: GPL-3.0-or-later
pub mod repositories;
pub mod sqlite_adapters;

use anyhow::Result;
use fetcharr_config::AppConfig;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

/// Open the SQLite pool and create the schema if it does not exist yet.
pub async fn init_database(config: &AppConfig) -> Result<SqlitePool> {
    let url = format!("sqlite://{}?mode=rwc", config.database.path);
    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.pool_max_size)
        .connect(&url)
        .await?;

    run_migrations(&pool).await?;
    info!(target: "database", path = %config.database.path, "database ready");
    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA).execute(pool).await?;
    Ok(())
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS media (
    trakt_id                INTEGER PRIMARY KEY,
    imdb                    TEXT NOT NULL,
    kind                    TEXT NOT NULL,
    season                  INTEGER NOT NULL DEFAULT 0,
    number                  INTEGER NOT NULL DEFAULT 0,
    title                   TEXT NOT NULL,
    year                    INTEGER NOT NULL DEFAULT 0,
    source                  TEXT NOT NULL,
    status                  TEXT NOT NULL,
    on_disk                 INTEGER NOT NULL DEFAULT 0,
    path                    TEXT NOT NULL DEFAULT '',
    download_id             INTEGER NOT NULL DEFAULT 0,
    in_tracker              INTEGER NOT NULL DEFAULT 1,
    last_seen_in_tracker    TEXT NOT NULL,
    last_searched_at        TEXT,
    created_at              TEXT NOT NULL,
    updated_at              TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_media_on_disk ON media(on_disk);
CREATE INDEX IF NOT EXISTS idx_media_imdb ON media(imdb);

CREATE TABLE IF NOT EXISTS nzbs (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    trakt_id                INTEGER NOT NULL,
    imdb                    TEXT NOT NULL DEFAULT '',
    title                   TEXT NOT NULL,
    link                    TEXT NOT NULL,
    size                    INTEGER NOT NULL DEFAULT 0,
    parsed_title            TEXT NOT NULL DEFAULT '',
    parsed_year             INTEGER NOT NULL DEFAULT 0,
    parsed_season           INTEGER NOT NULL DEFAULT 0,
    parsed_episode          INTEGER NOT NULL DEFAULT 0,
    resolution              TEXT NOT NULL DEFAULT '',
    source                  TEXT NOT NULL DEFAULT '',
    codec                   TEXT NOT NULL DEFAULT '',
    proper                  INTEGER NOT NULL DEFAULT 0,
    repack                  INTEGER NOT NULL DEFAULT 0,
    is_season_pack          INTEGER NOT NULL DEFAULT 0,
    validation_score        INTEGER NOT NULL DEFAULT 0,
    quality_score           INTEGER NOT NULL DEFAULT 0,
    total_score             INTEGER NOT NULL DEFAULT 0,
    failed                  INTEGER NOT NULL DEFAULT 0,
    retry_count             INTEGER NOT NULL DEFAULT 0,
    failure_reason          TEXT NOT NULL DEFAULT '',
    download_handle         TEXT NOT NULL DEFAULT '',
    download_hash           TEXT NOT NULL DEFAULT '',
    status                  TEXT NOT NULL,
    episodes                TEXT NOT NULL DEFAULT '[]',
    created_at              TEXT NOT NULL,
    updated_at              TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_nzbs_trakt_id ON nzbs(trakt_id);
CREATE INDEX IF NOT EXISTS idx_nzbs_failed ON nzbs(failed);
CREATE INDEX IF NOT EXISTS idx_nzbs_total_score ON nzbs(total_score);
CREATE INDEX IF NOT EXISTS idx_nzbs_imdb_season_pack ON nzbs(imdb, parsed_season, is_season_pack);
"#;
