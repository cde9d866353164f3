// SPDX-License-Identifier: GPL-3.0-or-later
use std::sync::Arc;

use async_trait::async_trait;
use fetcharr_domain::{Error, Result};
use quick_xml::de::from_str;
use reqwest::Url;
use serde::Deserialize;
use tokio::time::Duration;
use tracing::debug;

use crate::rate_limit::RateLimiter;

/// One release returned by the indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerItem {
    pub title: String,
    pub link: String,
    pub guid: String,
    /// 0 when the indexer did not report a size.
    pub size: i64,
    pub pub_date: String,
}

/// Search service mapping (IMDB id + optional season/episode) to release
/// candidates. The IMDB convention is asymmetric: movie searches take the
/// id without the "tt" prefix, TV searches keep it.
#[async_trait]
pub trait IndexerClient: Send + Sync {
    async fn search_movie(&self, imdb_no_tt: &str) -> Result<Vec<IndexerItem>>;
    async fn search_episode(&self, imdb: &str, season: i64, episode: i64) -> Result<Vec<IndexerItem>>;
    async fn search_season(&self, imdb: &str, season: i64) -> Result<Vec<IndexerItem>>;
    /// Fetch the artifact behind a release link, bounded by `cap` bytes.
    async fn download_artifact(&self, link: &str, cap: u64) -> Result<Vec<u8>>;
}

pub struct NewznabClient {
    base_url: String,
    api_key: String,
    max_results: usize,
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
}

impl NewznabClient {
    pub fn new(cfg: &fetcharr_config::IndexerConfig, limiter: Arc<RateLimiter>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .expect("reqwest client");

        Self {
            base_url: cfg.url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            max_results: cfg.max_results,
            http,
            limiter,
        }
    }

    async fn search(&self, params: &[(&str, String)]) -> Result<Vec<IndexerItem>> {
        self.limiter.acquire().await;

        let mut url = Url::parse(&format!("{}/api", self.base_url))
            .map_err(|e| Error::InvalidInput(format!("invalid indexer url: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("apikey", &self.api_key);
            pairs.append_pair("o", "xml");
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }

        debug!(target: "indexer", url = %url, "indexer search");

        let response = self.http.get(url).send().await.map_err(map_reqwest)?;
        let status = response.status();
        let body = response.text().await.map_err(map_reqwest)?;
        if !status.is_success() {
            return Err(Error::external("indexer", format!("status {}: {}", status.as_u16(), body)));
        }

        let mut items = parse_search_results(&body)?;
        if self.max_results > 0 && items.len() > self.max_results {
            items.truncate(self.max_results);
        }
        Ok(items)
    }
}

#[async_trait]
impl IndexerClient for NewznabClient {
    async fn search_movie(&self, imdb_no_tt: &str) -> Result<Vec<IndexerItem>> {
        if imdb_no_tt.trim().is_empty() {
            return Err(Error::InvalidInput("empty imdb id".into()));
        }
        self.search(&[("t", "movie".to_string()), ("imdbid", imdb_no_tt.to_string())])
            .await
    }

    async fn search_episode(&self, imdb: &str, season: i64, episode: i64) -> Result<Vec<IndexerItem>> {
        if imdb.trim().is_empty() {
            return Err(Error::InvalidInput("empty imdb id".into()));
        }
        if season < 1 || episode < 1 {
            return Err(Error::InvalidInput(format!("bad episode reference S{season}E{episode}")));
        }
        self.search(&[
            ("t", "tvsearch".to_string()),
            ("imdbid", imdb.to_string()),
            ("season", season.to_string()),
            ("ep", episode.to_string()),
        ])
        .await
    }

    async fn search_season(&self, imdb: &str, season: i64) -> Result<Vec<IndexerItem>> {
        if imdb.trim().is_empty() {
            return Err(Error::InvalidInput("empty imdb id".into()));
        }
        if season < 1 {
            return Err(Error::InvalidInput(format!("bad season {season}")));
        }
        self.search(&[
            ("t", "tvsearch".to_string()),
            ("imdbid", imdb.to_string()),
            ("season", season.to_string()),
        ])
        .await
    }

    async fn download_artifact(&self, link: &str, cap: u64) -> Result<Vec<u8>> {
        self.limiter.acquire().await;

        debug!(target: "indexer", link, cap, "downloading artifact");
        let mut response = self.http.get(link).send().await.map_err(map_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::external("indexer", format!("artifact status {}", status.as_u16())));
        }

        if let Some(length) = response.content_length() {
            if length > cap {
                return Err(Error::ArtifactTooLarge { size: length, cap });
            }
        }

        let mut data = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(map_reqwest)? {
            if (data.len() + chunk.len()) as u64 > cap {
                return Err(Error::ArtifactTooLarge { size: (data.len() + chunk.len()) as u64, cap });
            }
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }
}

fn map_reqwest(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout
    } else {
        Error::external("indexer", err)
    }
}

pub fn parse_search_results(xml: &str) -> Result<Vec<IndexerItem>> {
    let envelope: SearchEnvelope =
        from_str(xml).map_err(|e| Error::external("indexer", format!("bad search xml: {e}")))?;

    Ok(envelope
        .channel
        .items
        .into_iter()
        .map(|item| {
            let mut size = item.enclosure.as_ref().and_then(|e| e.length).unwrap_or(0);
            if size == 0 {
                for attr in &item.attributes {
                    if attr.name == "size" {
                        size = attr.value.parse().unwrap_or(0);
                    }
                }
            }

            // The enclosure URL is the artifact; <link> is the details page.
            let link = item
                .enclosure
                .as_ref()
                .and_then(|e| e.url.clone())
                .or(item.link)
                .unwrap_or_default();

            IndexerItem {
                title: item.title,
                link,
                guid: item.guid.unwrap_or_default(),
                size,
                pub_date: item.pub_date.unwrap_or_default(),
            }
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    channel: SearchChannel,
}

#[derive(Debug, Deserialize)]
struct SearchChannel {
    #[serde(rename = "item", default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    title: String,
    guid: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    enclosure: Option<SearchEnclosure>,
    #[serde(rename = "newznab:attr", alias = "attr", default)]
    attributes: Vec<NewznabAttribute>,
}

#[derive(Debug, Deserialize)]
struct SearchEnclosure {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@length")]
    length: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct NewznabAttribute {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@value")]
    value: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server_uri: String) -> NewznabClient {
        NewznabClient::new(
            &fetcharr_config::IndexerConfig {
                url: server_uri,
                api_key: "secret".into(),
                timeout_secs: 5,
                max_results: 0,
            },
            Arc::new(RateLimiter::disabled()),
        )
    }

    #[test]
    fn parses_items_with_enclosure_and_attributes() {
        let xml = r#"
            <rss>
              <channel>
                <item>
                  <title>Arrival.2016.1080p.BluRay.x264-GROUP</title>
                  <guid>guid-1</guid>
                  <link>https://indexer.example/details/1</link>
                  <pubDate>Wed, 25 Feb 2026 10:00:00 +0000</pubDate>
                  <enclosure url="https://indexer.example/get/1.nzb" length="8000000000" type="application/x-nzb" />
                </item>
              </channel>
            </rss>
        "#;

        let items = parse_search_results(xml).expect("parse");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Arrival.2016.1080p.BluRay.x264-GROUP");
        assert_eq!(items[0].link, "https://indexer.example/get/1.nzb");
        assert_eq!(items[0].size, 8_000_000_000);
    }

    #[test]
    fn missing_size_is_stored_as_zero() {
        let xml = r#"
            <rss><channel><item>
              <title>Show.S01E01.1080p.WEB-DL</title>
              <guid>g</guid>
              <link>https://indexer.example/details/2</link>
            </item></channel></rss>
        "#;
        let items = parse_search_results(xml).expect("parse");
        assert_eq!(items[0].size, 0);
        assert_eq!(items[0].link, "https://indexer.example/details/2");
    }

    #[test]
    fn size_falls_back_to_attribute() {
        let xml = r#"
            <rss><channel><item>
              <title>Show.S01E01.1080p.WEB-DL</title>
              <guid>g</guid>
              <newznab:attr name="size" value="123456" />
            </item></channel></rss>
        "#;
        let items = parse_search_results(xml).expect("parse");
        assert_eq!(items[0].size, 123_456);
    }

    #[test]
    fn errors_on_invalid_xml() {
        assert!(parse_search_results("<rss><broken></rss>").is_err());
    }

    #[tokio::test]
    async fn movie_search_uses_movie_mode_without_tt_prefix() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api"))
            .and(query_param("t", "movie"))
            .and(query_param("imdbid", "1234567"))
            .and(query_param("apikey", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<rss><channel><item><title>Arrival.2016.1080p.BluRay.x264-GROUP</title><guid>1</guid><enclosure url="https://x/1.nzb" length="1" type="application/x-nzb"/></item></channel></rss>"#,
            ))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let items = client.search_movie("1234567").await.expect("search");
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn episode_search_keeps_tt_prefix_and_numbers() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api"))
            .and(query_param("t", "tvsearch"))
            .and(query_param("imdbid", "tt0944947"))
            .and(query_param("season", "2"))
            .and(query_param("ep", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<rss><channel><item><title>Show.S02E03.1080p.WEB-DL.x264-G</title><guid>2</guid></item></channel></rss>"#,
            ))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let items = client.search_episode("tt0944947", 2, 3).await.expect("search");
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn season_search_omits_episode_parameter() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api"))
            .and(query_param("t", "tvsearch"))
            .and(query_param("imdbid", "tt0944947"))
            .and(query_param("season", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<rss><channel><item><title>Show.S02.1080p.WEB-DL.x264-G</title><guid>3</guid></item></channel></rss>"#,
            ))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let items = client.search_season("tt0944947", 2).await.expect("search");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Show.S02.1080p.WEB-DL.x264-G");
    }

    #[tokio::test]
    async fn empty_imdb_is_invalid_input() {
        let server = MockServer::start().await;
        let client = test_client(server.uri());
        let err = client.search_movie("").await.expect_err("should fail");
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn artifact_download_respects_cap() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/get/big.nzb"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 2048]))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let link = format!("{}/get/big.nzb", server.uri());

        let err = client.download_artifact(&link, 1024).await.expect_err("too large");
        assert!(matches!(err, Error::ArtifactTooLarge { .. }));

        let ok = client.download_artifact(&link, 4096).await.expect("fits");
        assert_eq!(ok.len(), 2048);
    }
}
