// SPDX-License-Identifier: GPL-3.0-or-later
mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use fetcharr_application::cleanup::CleanupService;
use fetcharr_application::tracker::WatchedItem;
use fetcharr_domain::{ListSource, Media, MediaKind, Nzb, NzbStatus, PackEpisode};
use fetcharr_infrastructure::repositories::NzbRepository;
use support::*;

struct Harness {
    media_repo: Arc<InMemoryMediaRepo>,
    nzb_repo: Arc<InMemoryNzbRepo>,
    tracker: Arc<FakeTracker>,
    downloader: Arc<FakeDownloader>,
    cleanup: CleanupService,
}

fn harness(delete_files: bool) -> Harness {
    let media_repo = Arc::new(InMemoryMediaRepo::new());
    let nzb_repo = Arc::new(InMemoryNzbRepo::new());
    let tracker = Arc::new(FakeTracker::new());
    let downloader = Arc::new(FakeDownloader::new());

    let cfg = fetcharr_config::DownloadConfig {
        delete_files,
        ..Default::default()
    };
    let cleanup = CleanupService::new(
        media_repo.clone(),
        nzb_repo.clone(),
        tracker.clone(),
        downloader.clone(),
        cfg,
    );

    Harness { media_repo, nzb_repo, tracker, downloader, cleanup }
}

fn watched_episode(imdb: &str, season: i64, episode: i64) -> WatchedItem {
    WatchedItem {
        imdb: imdb.to_string(),
        kind: MediaKind::Episode,
        season,
        episode,
        watched_at: Utc::now(),
    }
}

fn season_pack(trakt_id: i64, imdb: &str, season: i64, episodes: i64) -> Nzb {
    let mut nzb = Nzb::new(
        trakt_id,
        imdb,
        format!("Show.S{season:02}.1080p.WEB-DL.x264-G"),
        "http://x/pack",
        30_000_000_000,
    );
    nzb.parsed_season = season;
    nzb.parsed_episode = 0;
    nzb.status = NzbStatus::Completed;
    nzb.download_handle = "9".into();
    nzb.episodes = (1..=episodes)
        .map(|n| PackEpisode { number: n, title: format!("Episode {n}"), watched: false, watched_at: None })
        .collect();
    nzb
}

#[tokio::test]
async fn upstream_removal_deletes_media_nzbs_and_cancels_downloads() {
    let h = harness(false);

    let mut removed = Media::movie(600, "tt0000600", "Gone", 2019, ListSource::Watchlist);
    removed.in_tracker = false;
    removed.download_id = 11;
    h.media_repo.insert(removed);

    let mut nzb = Nzb::new(600, "tt0000600", "Gone.2019.1080p", "http://x/gone", 1_000);
    nzb.status = NzbStatus::Downloading;
    nzb.download_handle = "11".into();
    h.nzb_repo.create(&nzb).await.expect("seed nzb");

    let kept = Media::movie(601, "tt0000601", "Kept", 2020, ListSource::Watchlist);
    h.media_repo.insert(kept);

    let cleaned = h.cleanup.cleanup_removed().await.expect("cleanup");
    assert_eq!(cleaned, 1);

    assert!(h.media_repo.get(600).is_none());
    assert!(h.media_repo.get(601).is_some());
    assert!(h.nzb_repo.all().is_empty());
    assert_eq!(h.downloader.cancelled.lock().unwrap().as_slice(), ["11".to_string()]);
}

#[tokio::test]
async fn watched_movie_is_deleted_only_when_still_in_tracker() {
    let h = harness(false);

    let watched = Media::movie(700, "tt0000700", "Seen", 2021, ListSource::Watchlist);
    h.media_repo.insert(watched);

    let mut stale = Media::movie(701, "tt0000701", "Stale", 2021, ListSource::Watchlist);
    stale.in_tracker = false;
    h.media_repo.insert(stale);

    *h.tracker.history.lock().unwrap() = vec![
        WatchedItem {
            imdb: "tt0000700".into(),
            kind: MediaKind::Movie,
            season: 0,
            episode: 0,
            watched_at: Utc::now(),
        },
        WatchedItem {
            imdb: "tt0000701".into(),
            kind: MediaKind::Movie,
            season: 0,
            episode: 0,
            watched_at: Utc::now(),
        },
    ];

    let cleaned = h.cleanup.cleanup_watched().await.expect("cleanup");
    assert_eq!(cleaned, 1);
    assert!(h.media_repo.get(700).is_none());
    // not in tracker, so the post-sync pass owns it, not watched cleanup
    assert!(h.media_repo.get(701).is_some());
    assert_eq!(h.tracker.invalidations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn watched_individual_episode_is_deleted() {
    let h = harness(false);

    let episode = Media::episode(710, "tt0944947", "Show", 2, 3, ListSource::Watchlist);
    h.media_repo.insert(episode);

    let mut nzb = Nzb::new(710, "tt0944947", "Show.S02E03.1080p.WEB-DL.x264-G", "http://x/e", 1_000);
    nzb.parsed_season = 2;
    nzb.parsed_episode = 3;
    nzb.status = NzbStatus::Completed;
    h.nzb_repo.create(&nzb).await.expect("seed");

    *h.tracker.history.lock().unwrap() = vec![watched_episode("tt0944947", 2, 3)];

    let cleaned = h.cleanup.cleanup_watched().await.expect("cleanup");
    assert_eq!(cleaned, 1);
    assert!(h.media_repo.get(710).is_none());
    assert!(h.nzb_repo.all().is_empty());
}

#[tokio::test]
async fn season_pack_deletes_only_after_final_episode_watched() {
    let h = harness(true);

    let dir = tempfile::tempdir().expect("temp dir");
    let media_path = dir.path().join("Show.S02");
    std::fs::create_dir_all(&media_path).expect("media dir");
    std::fs::write(media_path.join("episode.mkv"), b"bytes").expect("file");

    let mut media = Media::episode(720, "tt0944947", "Show", 2, 3, ListSource::Favorites);
    media.path = media_path.to_string_lossy().into_owned();
    h.media_repo.insert(media);

    let pack_id = h.nzb_repo.create(&season_pack(720, "tt0944947", 2, 10)).await.expect("seed pack");

    // Episodes 1..9 tick the per-episode flags without deleting anything.
    *h.tracker.history.lock().unwrap() =
        (1..=9).map(|n| watched_episode("tt0944947", 2, n)).collect();
    h.cleanup.cleanup_watched().await.expect("partial cleanup");

    let pack = h.nzb_repo.get(pack_id).expect("pack still present");
    assert_eq!(pack.episodes.iter().filter(|e| e.watched).count(), 9);
    assert!(h.media_repo.get(720).is_some());
    assert_eq!(h.tracker.invalidations.load(Ordering::SeqCst), 0);

    // The final episode takes the pack and its media out.
    *h.tracker.history.lock().unwrap() = vec![watched_episode("tt0944947", 2, 10)];
    let cleaned = h.cleanup.cleanup_watched().await.expect("final cleanup");
    assert_eq!(cleaned, 1);

    assert!(h.media_repo.get(720).is_none());
    assert!(h.nzb_repo.all().is_empty());
    assert!(h.downloader.cancelled.lock().unwrap().contains(&"9".to_string()));
    assert!(!media_path.exists(), "delete_files removes the directory");
    assert_eq!(h.tracker.invalidations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_history_is_a_no_op() {
    let h = harness(false);
    h.media_repo
        .insert(Media::movie(730, "tt0000730", "Stays", 2022, ListSource::Watchlist));

    let cleaned = h.cleanup.cleanup_watched().await.expect("cleanup");
    assert_eq!(cleaned, 0);
    assert_eq!(h.media_repo.len(), 1);
    assert_eq!(h.tracker.invalidations.load(Ordering::SeqCst), 0);
}
