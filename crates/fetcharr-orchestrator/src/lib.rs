// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use fetcharr_application::cleanup::CleanupService;
use fetcharr_application::download_tracker::DownloadTracker;
use fetcharr_application::search::SearchService;
use fetcharr_application::sync::SyncService;
use fetcharr_application::tracker::TrackerClient;
use fetcharr_domain::{Error, Result};
use tokio::sync::RwLock;
use tokio::time::{interval, sleep, timeout, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Outcome of one orchestrator task. Timeouts are reported separately from
/// plain errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Success,
    Error,
    Timeout,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Periodic driver for the acquisition pipeline. Each cycle runs
/// sync (parallel) -> removed-cleanup -> search -> enqueue -> watched
/// cleanup, each stage under its own timeout. A token-refresh loop and a
/// stuck-download sweep tick on their own timers.
pub struct Orchestrator {
    sync: Arc<SyncService>,
    search: Arc<SearchService>,
    download_tracker: Arc<DownloadTracker>,
    cleanup: Arc<CleanupService>,
    tracker: Arc<dyn TrackerClient>,
    cfg: fetcharr_config::OrchestratorConfig,
    stuck_check_interval: Duration,
    task_states: RwLock<HashMap<&'static str, TaskStatus>>,
}

impl Orchestrator {
    pub fn new(
        sync: Arc<SyncService>,
        search: Arc<SearchService>,
        download_tracker: Arc<DownloadTracker>,
        cleanup: Arc<CleanupService>,
        tracker: Arc<dyn TrackerClient>,
        cfg: fetcharr_config::OrchestratorConfig,
        download_cfg: &fetcharr_config::DownloadConfig,
    ) -> Self {
        Self {
            sync,
            search,
            download_tracker,
            cleanup,
            tracker,
            stuck_check_interval: Duration::from_secs(download_cfg.stuck_check_interval_secs),
            cfg,
            task_states: RwLock::new(HashMap::new()),
        }
    }

    pub async fn task_states(&self) -> HashMap<&'static str, TaskStatus> {
        self.task_states.read().await.clone()
    }

    /// Run until the token is cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if !self.cfg.enabled {
            info!(target: "orchestrator", "orchestrator is disabled");
            return;
        }

        info!(
            target: "orchestrator",
            interval_secs = self.cfg.interval_secs,
            "starting orchestrator"
        );

        if self.cfg.startup_delay_secs > 0 {
            info!(target: "orchestrator", delay_secs = self.cfg.startup_delay_secs, "waiting before first cycle");
            tokio::select! {
                _ = sleep(Duration::from_secs(self.cfg.startup_delay_secs)) => {}
                _ = cancel.cancelled() => return,
            }
        }

        let refresh = Arc::clone(&self);
        let refresh_cancel = cancel.clone();
        tokio::spawn(async move { refresh.token_refresh_loop(refresh_cancel).await });

        let sweep = Arc::clone(&self);
        let sweep_cancel = cancel.clone();
        tokio::spawn(async move { sweep.stuck_sweep_loop(sweep_cancel).await });

        let mut ticker = interval(Duration::from_secs(self.cfg.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately.
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(target: "orchestrator", "orchestrator stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.run_cycle(&cancel).await;
                }
            }
        }
    }

    pub async fn run_cycle(&self, cancel: &CancellationToken) {
        info!(target: "orchestrator", "starting cycle");
        let started = Instant::now();

        // Sync both lists in parallel; either failure poisons the
        // removed-from-upstream cleanup for this cycle.
        let mark_ok = match self.sync.begin_cycle().await {
            Ok(()) => true,
            Err(err) => {
                error!(target: "orchestrator", error = %err, "failed to begin sync pass");
                false
            }
        };

        let sync_movies = {
            let sync = Arc::clone(&self.sync);
            async move { sync.sync_movies().await }
        };
        let sync_shows = {
            let sync = Arc::clone(&self.sync);
            let cancel = cancel.clone();
            async move { sync.sync_shows(&cancel).await }
        };
        let (movies, shows) = tokio::join!(
            self.run_task("sync_movies", sync_movies),
            self.run_task("sync_shows", sync_shows),
        );

        if cancel.is_cancelled() {
            return;
        }

        if mark_ok && movies == TaskStatus::Success && shows == TaskStatus::Success {
            let cleanup = Arc::clone(&self.cleanup);
            self.run_task("cleanup_removed", async move {
                cleanup.cleanup_removed().await.map(|_| ())
            })
            .await;
        } else {
            warn!(target: "orchestrator", "sync incomplete, skipping removed-from-upstream cleanup");
        }

        if cancel.is_cancelled() {
            return;
        }

        let search = Arc::clone(&self.search);
        let search_cancel = cancel.clone();
        self.run_task("search_media", async move { search.search_all(&search_cancel).await })
            .await;

        if cancel.is_cancelled() {
            return;
        }

        let tracker = Arc::clone(&self.download_tracker);
        let enqueue_cancel = cancel.clone();
        self.run_task("enqueue_downloads", async move { tracker.enqueue_all(&enqueue_cancel).await })
            .await;

        if cancel.is_cancelled() {
            return;
        }

        let cleanup = Arc::clone(&self.cleanup);
        self.run_task("cleanup_watched", async move {
            cleanup.cleanup_watched().await.map(|_| ())
        })
        .await;

        info!(
            target: "orchestrator",
            duration_secs = started.elapsed().as_secs(),
            "cycle completed"
        );
    }

    async fn run_task<F>(&self, name: &'static str, task: F) -> TaskStatus
    where
        F: Future<Output = Result<()>>,
    {
        info!(target: "orchestrator", task = name, timeout_secs = self.cfg.task_timeout_secs, "running task");
        self.task_states.write().await.insert(name, TaskStatus::Running);
        let started = Instant::now();

        let status = match timeout(Duration::from_secs(self.cfg.task_timeout_secs.max(1)), task).await {
            Ok(Ok(())) => TaskStatus::Success,
            Ok(Err(Error::Cancelled)) => {
                info!(target: "orchestrator", task = name, "task cancelled");
                TaskStatus::Error
            }
            Ok(Err(err)) => {
                error!(target: "orchestrator", task = name, error = %err, "task failed");
                TaskStatus::Error
            }
            Err(_) => {
                error!(target: "orchestrator", task = name, timeout_secs = self.cfg.task_timeout_secs, "task timed out");
                TaskStatus::Timeout
            }
        };

        self.task_states.write().await.insert(name, status);
        info!(
            target: "orchestrator",
            task = name,
            status = %status,
            duration_secs = started.elapsed().as_secs(),
            "task completed"
        );
        status
    }

    async fn token_refresh_loop(&self, cancel: CancellationToken) {
        let mut ticker = interval(Duration::from_secs(self.cfg.token_refresh_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    match self.tracker.refresh_token().await {
                        Ok(()) => info!(target: "orchestrator", "tracker token refreshed"),
                        Err(err) => error!(target: "orchestrator", error = %err, "tracker token refresh failed"),
                    }
                }
            }
        }
    }

    async fn stuck_sweep_loop(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.stuck_check_interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(err) = self.download_tracker.check_stuck().await {
                        if !err.is_cancelled() {
                            error!(target: "orchestrator", error = %err, "stuck-download sweep failed");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_display() {
        assert_eq!(TaskStatus::Running.to_string(), "running");
        assert_eq!(TaskStatus::Success.to_string(), "success");
        assert_eq!(TaskStatus::Error.to_string(), "error");
        assert_eq!(TaskStatus::Timeout.to_string(), "timeout");
    }
}
