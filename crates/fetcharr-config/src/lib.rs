// SPDX-License-Identifier: GPL-3.0-or-later
use std::path::Path;

use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_max_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "./data/fetcharr.db".to_string(),
            pool_max_size: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub dir: String,
    pub blacklist_file: String,
    pub token_file: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: "./data".to_string(),
            blacklist_file: "./data/blacklist.txt".to_string(),
            token_file: "./data/token.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraktConfig {
    pub client_id: String,
    pub client_secret: String,
    pub timeout_secs: u64,
    /// How many upcoming episodes to sync for favorites shows. Watchlist
    /// shows always fetch exactly one.
    pub favorites_episode_limit: usize,
}

impl Default for TraktConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            timeout_secs: 30,
            favorites_episode_limit: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub url: String,
    pub api_key: String,
    pub timeout_secs: u64,
    /// 0 = no limit.
    pub max_results: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            timeout_secs: 30,
            max_results: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    pub api_key: String,
    pub timeout_secs: u64,
    pub category: String,
    pub priority: i64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            timeout_secs: 30,
            category: "fetcharr".to_string(),
            priority: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    pub min_validation_score: i64,
    pub min_quality_score: i64,
    pub min_total_score: i64,
    pub max_retries: i64,
    pub cleanup_watched_days: i64,
    pub delete_files: bool,
    pub max_artifact_bytes: u64,
    pub stuck_timeout_secs: u64,
    pub stuck_check_interval_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            min_validation_score: 65,
            min_quality_score: 40,
            min_total_score: 105,
            max_retries: 5,
            cleanup_watched_days: 5,
            delete_files: true,
            max_artifact_bytes: 15 * 1024 * 1024,
            stuck_timeout_secs: 600,
            stuck_check_interval_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub startup_delay_secs: u64,
    pub task_timeout_secs: u64,
    pub token_refresh_interval_secs: u64,
    pub search_workers: usize,
    pub enqueue_workers: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 6 * 60 * 60,
            startup_delay_secs: 30,
            task_timeout_secs: 300,
            token_refresh_interval_secs: 3600,
            search_workers: 5,
            enqueue_workers: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 10,
            burst: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub telemetry: TelemetryConfig,
    pub data: DataConfig,
    pub trakt: TraktConfig,
    pub indexer: IndexerConfig,
    pub downloader: DownloaderConfig,
    pub download: DownloadConfig,
    pub orchestrator: OrchestratorConfig,
    pub rate_limit: RateLimitConfig,
}

/// Load configuration from defaults, optional TOML file, and environment
/// overrides (prefix: FETCHARR_, nesting with __).
pub fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("FETCHARR_").split("__"));

    let config: AppConfig = figment.extract()?;
    info!(target: "config", "configuration loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.download.min_validation_score, 65);
        assert_eq!(cfg.download.min_quality_score, 40);
        assert_eq!(cfg.download.min_total_score, 105);
        assert_eq!(cfg.download.max_retries, 5);
        assert_eq!(cfg.download.cleanup_watched_days, 5);
        assert_eq!(cfg.download.max_artifact_bytes, 15 * 1024 * 1024);
        assert_eq!(cfg.orchestrator.interval_secs, 21_600);
        assert_eq!(cfg.orchestrator.startup_delay_secs, 30);
        assert_eq!(cfg.orchestrator.task_timeout_secs, 300);
        assert_eq!(cfg.orchestrator.search_workers, 5);
        assert_eq!(cfg.orchestrator.enqueue_workers, 3);
        assert_eq!(cfg.trakt.favorites_episode_limit, 3);
        assert_eq!(cfg.rate_limit.requests_per_second, 10);
        assert_eq!(cfg.rate_limit.burst, 20);
    }

    #[test]
    fn toml_file_overrides_defaults_and_ignores_unknown_keys() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").expect("temp file");
        writeln!(
            file,
            r#"
[download]
min_total_score = 120
some_future_knob = "ignored"

[orchestrator]
search_workers = 8
"#
        )
        .expect("write config");

        let cfg = load(Some(file.path())).expect("config should load");
        assert_eq!(cfg.download.min_total_score, 120);
        assert_eq!(cfg.orchestrator.search_workers, 8);
        // untouched sections keep their defaults
        assert_eq!(cfg.download.min_validation_score, 65);
    }
}
