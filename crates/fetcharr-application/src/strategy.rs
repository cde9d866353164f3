// SPDX-License-Identifier: GPL-3.0-or-later
use fetcharr_domain::{Error, ListSource, Media, Result, Strategy};
use tracing::debug;

use crate::tracker::TrackerClient;

/// Decide what to search for a media item.
///
/// Movies are a single search. Watchlist shows commit to one episode at a
/// time; favorites go for the season pack of the first unwatched episode,
/// with the remaining unwatched episodes of that season as individual
/// fallbacks.
pub async fn resolve_strategy(tracker: &dyn TrackerClient, media: &Media) -> Result<Strategy> {
    if media.is_movie() {
        debug!(target: "strategy", trakt_id = media.trakt_id, title = %media.title, "strategy: single movie");
        return Ok(Strategy::SingleMovie);
    }

    match media.source {
        ListSource::Watchlist => next_episode_strategy(tracker, media).await,
        ListSource::Favorites => favorites_strategy(tracker, media).await,
    }
}

async fn next_episode_strategy(tracker: &dyn TrackerClient, media: &Media) -> Result<Strategy> {
    let progress = tracker.show_progress(&media.imdb).await?;

    let next = progress
        .next_episode
        .ok_or_else(|| Error::NotFound(format!("no unwatched episodes for {}", media.imdb)))?;

    debug!(
        target: "strategy",
        trakt_id = media.trakt_id,
        season = next.season,
        episode = next.number,
        "strategy: single episode"
    );
    Ok(Strategy::SingleEpisode(next))
}

async fn favorites_strategy(tracker: &dyn TrackerClient, media: &Media) -> Result<Strategy> {
    let progress = tracker.show_progress(&media.imdb).await?;

    let first = progress
        .unwatched
        .first()
        .copied()
        .ok_or_else(|| Error::NotFound(format!("no unwatched episodes for {}", media.imdb)))?;

    let episodes: Vec<_> = progress
        .unwatched
        .iter()
        .filter(|ep| ep.season == first.season)
        .copied()
        .collect();

    debug!(
        target: "strategy",
        trakt_id = media.trakt_id,
        season = first.season,
        unwatched_in_season = episodes.len(),
        "strategy: season pack"
    );
    Ok(Strategy::SeasonPack { season: first.season, episodes })
}
