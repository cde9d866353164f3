// SPDX-License-Identifier: GPL-3.0-or-later
mod support;

use std::sync::Arc;

use fetcharr_application::sync::SyncService;
use fetcharr_application::tracker::{TrackerEpisode, TrackerItem};
use fetcharr_domain::{ListSource, Media, MediaKind, MediaStatus};
use support::*;
use tokio_util::sync::CancellationToken;

struct Harness {
    media_repo: Arc<InMemoryMediaRepo>,
    tracker: Arc<FakeTracker>,
    sync: Arc<SyncService>,
}

fn harness() -> Harness {
    let media_repo = Arc::new(InMemoryMediaRepo::new());
    let tracker = Arc::new(FakeTracker::new());
    let sync = Arc::new(SyncService::new(
        media_repo.clone(),
        tracker.clone(),
        &fetcharr_config::TraktConfig::default(),
    ));
    Harness { media_repo, tracker, sync }
}

fn movie_item(trakt_id: i64, imdb: &str, title: &str, year: i64) -> TrackerItem {
    TrackerItem { trakt_id, imdb: imdb.to_string(), title: title.to_string(), year }
}

#[tokio::test]
async fn sync_creates_movies_from_both_lists_with_favorites_precedence() {
    let h = harness();
    *h.tracker.watchlist_movies.lock().unwrap() = vec![
        movie_item(1, "tt0000001", "Only Watchlist", 2020),
        movie_item(2, "tt0000002", "In Both", 2021),
    ];
    *h.tracker.favorites_movies.lock().unwrap() = vec![movie_item(2, "tt0000002", "In Both", 2021)];

    h.sync.begin_cycle().await.expect("begin");
    h.sync.sync_movies().await.expect("sync");

    let one = h.media_repo.get(1).expect("watchlist movie");
    assert_eq!(one.source, ListSource::Watchlist);
    assert_eq!(one.status, MediaStatus::Pending);
    assert!(one.in_tracker);

    let two = h.media_repo.get(2).expect("shared movie");
    assert_eq!(two.source, ListSource::Favorites);
}

#[tokio::test]
async fn movies_without_imdb_are_dropped() {
    let h = harness();
    *h.tracker.watchlist_movies.lock().unwrap() = vec![
        movie_item(1, "", "No Ids", 2020),
        movie_item(2, "tt0000002", "Fine", 2021),
    ];

    h.sync.sync_movies().await.expect("sync");
    assert!(h.media_repo.get(1).is_none());
    assert!(h.media_repo.get(2).is_some());
}

#[tokio::test]
async fn failed_media_reobserved_upstream_becomes_pending_again() {
    let h = harness();

    let mut failed = Media::movie(10, "tt0000010", "Retry Me", 2020, ListSource::Watchlist);
    failed.status = MediaStatus::Failed;
    h.media_repo.insert(failed);

    let mut completed = Media::movie(11, "tt0000011", "Done", 2020, ListSource::Watchlist);
    completed.status = MediaStatus::Completed;
    completed.on_disk = true;
    completed.path = "/data/movies/Done".into();
    h.media_repo.insert(completed);

    *h.tracker.watchlist_movies.lock().unwrap() = vec![
        movie_item(10, "tt0000010", "Retry Me", 2020),
        movie_item(11, "tt0000011", "Done", 2020),
    ];

    h.sync.begin_cycle().await.expect("begin");
    h.sync.sync_movies().await.expect("sync");

    assert_eq!(h.media_repo.get(10).unwrap().status, MediaStatus::Pending);
    // completed is never reset
    assert_eq!(h.media_repo.get(11).unwrap().status, MediaStatus::Completed);
}

#[tokio::test]
async fn rows_absent_upstream_stay_flagged_for_cleanup() {
    let h = harness();
    h.media_repo
        .insert(Media::movie(20, "tt0000020", "Vanished", 2019, ListSource::Watchlist));
    // upstream returns nothing

    h.sync.begin_cycle().await.expect("begin");
    h.sync.sync_movies().await.expect("sync");

    assert!(!h.media_repo.get(20).unwrap().in_tracker);
}

#[tokio::test]
async fn watchlist_shows_fetch_one_episode_favorites_fetch_three() {
    let h = harness();
    *h.tracker.watchlist_shows.lock().unwrap() = vec![movie_item(30, "tt0000030", "WL Show", 2020)];
    *h.tracker.next_episodes.lock().unwrap() = vec![
        TrackerEpisode { trakt_id: 3001, title: "Ep 1".into(), season: 1, number: 1 },
        TrackerEpisode { trakt_id: 3002, title: "Ep 2".into(), season: 1, number: 2 },
        TrackerEpisode { trakt_id: 3003, title: "Ep 3".into(), season: 1, number: 3 },
    ];

    let cancel = CancellationToken::new();
    h.sync.sync_shows(&cancel).await.expect("watchlist sync");

    // watchlist commits to a single upcoming episode
    assert_eq!(h.media_repo.len(), 1);
    let ep = h.media_repo.get(3001).expect("first episode");
    assert_eq!(ep.kind, MediaKind::Episode);
    assert_eq!(ep.source, ListSource::Watchlist);

    // the same show as a favorite pulls three
    *h.tracker.watchlist_shows.lock().unwrap() = Vec::new();
    *h.tracker.favorites_shows.lock().unwrap() = vec![movie_item(30, "tt0000030", "Fav Show", 2020)];
    h.sync.sync_shows(&cancel).await.expect("favorites sync");

    assert_eq!(h.media_repo.len(), 3);
    assert_eq!(h.media_repo.get(3003).unwrap().source, ListSource::Favorites);
}

#[tokio::test]
async fn invalid_episode_records_are_dropped() {
    let h = harness();
    *h.tracker.favorites_shows.lock().unwrap() = vec![movie_item(40, "tt0000040", "Show", 2020)];
    *h.tracker.next_episodes.lock().unwrap() = vec![
        TrackerEpisode { trakt_id: 0, title: "Bad Id".into(), season: 1, number: 1 },
        TrackerEpisode { trakt_id: 4002, title: "Bad Season".into(), season: 0, number: 2 },
        TrackerEpisode { trakt_id: 4003, title: "Good".into(), season: 1, number: 3 },
    ];

    let cancel = CancellationToken::new();
    h.sync.sync_shows(&cancel).await.expect("sync");

    assert_eq!(h.media_repo.len(), 1);
    assert!(h.media_repo.get(4003).is_some());
}
