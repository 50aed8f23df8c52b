use crate::config::FetchConfig;
use crate::sources::{build_client, SourceConnector};
use crate::types::{RawItem, Result, ScoutError, SourceKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::{info, warn};

/// RSS/Atom feed client over a configured set of feed URLs. A single
/// unreachable feed is logged and skipped; the connector only fails as
/// a whole when every feed fails.
pub struct FeedConnector {
    client: Client,
    feed_urls: Vec<String>,
}

impl FeedConnector {
    pub fn new(fetch_config: &FetchConfig, feed_urls: Vec<String>) -> Self {
        Self {
            client: build_client(fetch_config),
            feed_urls,
        }
    }

    async fn fetch_one(&self, url: &str, since: DateTime<Utc>) -> Result<Vec<RawItem>> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ScoutError::SourceUnavailable {
                source_name: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }
        let body = response.text().await?;
        let feed = feed_rs::parser::parse(body.as_bytes())
            .map_err(|e| ScoutError::Parse(format!("feed {}: {}", url, e)))?;

        let mut items = Vec::new();
        for entry in feed.entries {
            let title = match entry.title {
                Some(t) => t.content,
                None => continue,
            };
            let link = match entry.links.first() {
                Some(link) => link.href.clone(),
                None => continue,
            };
            let published = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.with_timezone(&Utc));
            if let Some(p) = published {
                if p < since {
                    continue;
                }
            }
            let guid = if entry.id.is_empty() {
                None
            } else {
                Some(entry.id.clone())
            };

            items.push(RawItem::Feed {
                guid,
                title,
                summary: entry.summary.map(|s| s.content),
                url: link,
                published,
            });
        }
        Ok(items)
    }
}

#[async_trait]
impl SourceConnector for FeedConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::Feed
    }

    fn name(&self) -> String {
        format!("feeds ({} configured)", self.feed_urls.len())
    }

    async fn fetch(&self, since: DateTime<Utc>) -> Result<Vec<RawItem>> {
        let mut items = Vec::new();
        let mut failures = Vec::new();

        for url in &self.feed_urls {
            match self.fetch_one(url, since).await {
                Ok(mut found) => {
                    info!("feed {} returned {} items", url, found.len());
                    items.append(&mut found);
                }
                Err(e) => {
                    warn!("feed {} failed: {}", url, e);
                    failures.push(format!("{}: {}", url, e));
                }
            }
        }

        if items.is_empty() && !failures.is_empty() {
            return Err(ScoutError::SourceUnavailable {
                source_name: self.name(),
                reason: failures.join("; "),
            });
        }
        Ok(items)
    }
}
