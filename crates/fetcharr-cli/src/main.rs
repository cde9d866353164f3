// SPDX-License-Identifier: GPL-3.0-or-later
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::serve;
use fetcharr_api::{router, ApiState};
use fetcharr_application::blacklist::Blacklist;
use fetcharr_application::cleanup::CleanupService;
use fetcharr_application::download_clients::TorboxClient;
use fetcharr_application::download_tracker::DownloadTracker;
use fetcharr_application::indexers::NewznabClient;
use fetcharr_application::rate_limit::RateLimiter;
use fetcharr_application::search::SearchService;
use fetcharr_application::sync::SyncService;
use fetcharr_application::tracker::{TraktClient, TrackerClient};
use fetcharr_application::webhook::WebhookHandler;
use fetcharr_infrastructure::init_database;
use fetcharr_infrastructure::repositories::{MediaRepository, NzbRepository};
use fetcharr_infrastructure::sqlite_adapters::{SqliteMediaRepository, SqliteNzbRepository};
use fetcharr_orchestrator::Orchestrator;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = fetcharr_config::load(config_path().as_deref()).context("load configuration")?;
    init_tracing(&config.telemetry.log_level);

    std::fs::create_dir_all(&config.data.dir).context("create data directory")?;

    let pool = init_database(&config).await.context("initialize database")?;
    let media_repo: Arc<dyn MediaRepository> = Arc::new(SqliteMediaRepository::new(pool.clone()));
    let nzb_repo: Arc<dyn NzbRepository> = Arc::new(SqliteNzbRepository::new(pool));

    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));

    let blacklist = Arc::new(Blacklist::new());
    if let Err(err) = blacklist.load(Path::new(&config.data.blacklist_file)) {
        anyhow::bail!("load blacklist: {err}");
    }

    let tracker: Arc<dyn TrackerClient> = Arc::new(TraktClient::new(
        &config.trakt,
        &config.data.token_file,
        Arc::clone(&limiter),
    ));
    if !tracker.is_authenticated() {
        info!(target: "cli", "no tracker token found, starting device authentication");
        tracker.authenticate().await.context("tracker authentication")?;
    }

    let indexer = Arc::new(NewznabClient::new(&config.indexer, Arc::clone(&limiter)));
    let downloader = Arc::new(TorboxClient::new(&config.downloader, Arc::clone(&limiter)));

    let sync = Arc::new(SyncService::new(
        Arc::clone(&media_repo),
        Arc::clone(&tracker),
        &config.trakt,
    ));
    let search = Arc::new(SearchService::new(
        Arc::clone(&media_repo),
        Arc::clone(&nzb_repo),
        indexer.clone(),
        Arc::clone(&tracker),
        blacklist,
        &config.download,
        &config.trakt,
        config.orchestrator.search_workers,
    ));
    let download_tracker = Arc::new(DownloadTracker::new(
        Arc::clone(&media_repo),
        Arc::clone(&nzb_repo),
        indexer,
        downloader.clone(),
        config.download.clone(),
        config.downloader.clone(),
        config.orchestrator.enqueue_workers,
    ));
    let cleanup = Arc::new(CleanupService::new(
        Arc::clone(&media_repo),
        Arc::clone(&nzb_repo),
        Arc::clone(&tracker),
        downloader.clone(),
        config.download.clone(),
    ));
    let webhook = Arc::new(WebhookHandler::new(
        Arc::clone(&media_repo),
        Arc::clone(&nzb_repo),
        downloader,
        Arc::clone(&download_tracker),
        config.download.max_retries,
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        sync,
        search,
        download_tracker,
        cleanup,
        Arc::clone(&tracker),
        config.orchestrator.clone(),
        &config.download,
    ));

    let cancel = CancellationToken::new();
    let orchestrator_handle = {
        let cancel = cancel.clone();
        tokio::spawn(Arc::clone(&orchestrator).run(cancel))
    };

    let listener = TcpListener::bind(bind_addr(&config.http))
        .await
        .context("bind http listener")?;
    info!(target: "cli", "listening on {}", listener.local_addr()?);

    let state = ApiState { media_repo, webhook, orchestrator };
    serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .context("http server")?;

    cancel.cancel();
    let _ = orchestrator_handle.await;
    info!(target: "cli", "shutdown complete");
    Ok(())
}

fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("FETCHARR_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let default = PathBuf::from("config.toml");
    default.exists().then_some(default)
}

fn init_tracing(level: &str) {
    let fmt_layer = fmt::layer().with_target(true).with_level(true);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn bind_addr(http: &fetcharr_config::HttpConfig) -> SocketAddr {
    let addr = format!("{}:{}", http.host, http.port);
    addr.parse().expect("valid listen address")
}

async fn shutdown_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let mut interrupt = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("install SIGINT handler");

    #[cfg(unix)]
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("install SIGTERM handler");

    #[cfg(unix)]
    tokio::select! {
        _ = interrupt.recv() => {},
        _ = terminate.recv() => {},
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.expect("ctrl_c handler");

    info!(target: "cli", "shutdown signal received");
    cancel.cancel();
}
