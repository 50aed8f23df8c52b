use crate::config::FetchConfig;
use crate::sources::{build_client, SourceConnector};
use crate::types::{RawItem, Result, ScoutError, SourceKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::{debug, info};

const ARXIV_API_URL: &str = "https://export.arxiv.org/api/query";

/// Structured-API client for the arXiv query endpoint. The response is
/// an Atom document; entries carry a stable arXiv identifier used
/// downstream to disambiguate same-titled papers.
pub struct ArxivConnector {
    client: Client,
    categories: Vec<String>,
    max_results: usize,
}

impl ArxivConnector {
    pub fn new(fetch_config: &FetchConfig, categories: Vec<String>, max_results: usize) -> Self {
        Self {
            client: build_client(fetch_config),
            categories,
            max_results,
        }
    }

    fn search_query(&self) -> String {
        self.categories
            .iter()
            .map(|c| format!("cat:{}", c))
            .collect::<Vec<_>>()
            .join("+OR+")
    }
}

#[async_trait]
impl SourceConnector for ArxivConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::Arxiv
    }

    fn name(&self) -> String {
        format!("arxiv ({})", self.categories.join(","))
    }

    async fn fetch(&self, since: DateTime<Utc>) -> Result<Vec<RawItem>> {
        let url = format!(
            "{}?search_query={}&sortBy=submittedDate&sortOrder=descending&max_results={}",
            ARXIV_API_URL,
            self.search_query(),
            self.max_results
        );
        debug!("querying arXiv: {}", url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ScoutError::SourceUnavailable {
                source_name: self.name(),
                reason: format!("HTTP {}", response.status()),
            });
        }
        let body = response.text().await?;

        let feed = feed_rs::parser::parse(body.as_bytes())
            .map_err(|e| ScoutError::Parse(format!("arXiv response: {}", e)))?;

        let mut items = Vec::new();
        for entry in feed.entries {
            let title = match entry.title {
                Some(t) => t.content,
                None => continue,
            };
            let url = match entry.links.first() {
                Some(link) => link.href.clone(),
                None => continue,
            };
            let published = entry.published.map(|dt| dt.with_timezone(&Utc));
            if let Some(p) = published {
                if p < since {
                    continue;
                }
            }

            items.push(RawItem::Api {
                id: arxiv_id_from_entry_id(&entry.id),
                title,
                summary: entry.summary.map(|s| s.content),
                url,
                published,
            });
        }

        info!("arXiv returned {} items since {}", items.len(), since);
        Ok(items)
    }
}

/// Entry ids look like `http://arxiv.org/abs/2401.12345v2`; the bare id
/// without the version suffix is the stable identifier.
fn arxiv_id_from_entry_id(entry_id: &str) -> String {
    let tail = entry_id.rsplit("/abs/").next().unwrap_or(entry_id);
    strip_version(tail).to_string()
}

fn strip_version(id: &str) -> &str {
    if let Some(pos) = id.rfind('v') {
        if pos > 0 && id[pos + 1..].chars().all(|c| c.is_ascii_digit()) && pos + 1 < id.len() {
            return &id[..pos];
        }
    }
    id
}
