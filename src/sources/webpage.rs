use crate::config::FetchConfig;
use crate::normalize::canonical_title;
use crate::sources::{build_client, SourceConnector};
use crate::types::{RawItem, Result, ScoutError, SourceKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::{info, warn};
use url::Url;

/// Candidate selectors tried in order; news index pages usually put
/// headlines in one of these shapes.
const HEADLINE_SELECTORS: &[&str] = &["article h2 a", "article h3 a", "h2 a", "h3 a"];

/// Page-scraping client for sources without a feed or API. Extracted
/// items have no publish date of their own; the scrape time stands in.
pub struct WebpageConnector {
    client: Client,
    page_urls: Vec<String>,
}

impl WebpageConnector {
    pub fn new(fetch_config: &FetchConfig, page_urls: Vec<String>) -> Self {
        Self {
            client: build_client(fetch_config),
            page_urls,
        }
    }
}

#[async_trait]
impl SourceConnector for WebpageConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::Webpage
    }

    fn name(&self) -> String {
        format!("webpages ({} configured)", self.page_urls.len())
    }

    async fn fetch(&self, _since: DateTime<Utc>) -> Result<Vec<RawItem>> {
        let mut items = Vec::new();
        let mut failures = Vec::new();

        for page in &self.page_urls {
            let base = match Url::parse(page) {
                Ok(u) => u,
                Err(e) => {
                    warn!("skipping scrape page {}: {}", page, e);
                    failures.push(format!("{}: {}", page, e));
                    continue;
                }
            };
            match self.client.get(page).send().await {
                Ok(response) if response.status().is_success() => {
                    let body = response.text().await?;
                    let observed_at = Utc::now();
                    let mut found = extract_headlines(&body, &base, observed_at)?;
                    info!("scraped {} headlines from {}", found.len(), page);
                    items.append(&mut found);
                }
                Ok(response) => {
                    warn!("scrape page {} returned HTTP {}", page, response.status());
                    failures.push(format!("{}: HTTP {}", page, response.status()));
                }
                Err(e) => {
                    warn!("scrape page {} failed: {}", page, e);
                    failures.push(format!("{}: {}", page, e));
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

/// Pull headline links out of an HTML document. Synchronous on purpose:
/// the parsed document must not be held across an await point.
fn extract_headlines(
    html: &str,
    base: &Url,
    observed_at: DateTime<Utc>,
) -> Result<Vec<RawItem>> {
    let document = Html::parse_document(html);
    let mut seen_urls = HashSet::new();
    let mut items = Vec::new();

    for selector_str in HEADLINE_SELECTORS {
        let selector = Selector::parse(selector_str)
            .map_err(|e| ScoutError::Parse(format!("invalid selector {}: {}", selector_str, e)))?;
        for element in document.select(&selector) {
            let href = match element.value().attr("href") {
                Some(h) => h,
                None => continue,
            };
            let resolved = match base.join(href) {
                Ok(u) => u.to_string(),
                Err(_) => continue,
            };
            if !seen_urls.insert(resolved.clone()) {
                continue;
            }
            let title = canonical_title(&element.text().collect::<String>());
            if title.is_empty() {
                continue;
            }
            items.push(RawItem::Page {
                title,
                excerpt: None,
                url: resolved,
                observed_at,
            });
        }
        // The most specific selector that matched wins.
        if !items.is_empty() {
            break;
        }
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <article><h2><a href="/news/alpha">  Alpha   Launches </a></h2></article>
          <article><h2><a href="https://other.example.com/beta">Beta Ships</a></h2></article>
          <article><h2><a href="/news/alpha">Alpha Launches</a></h2></article>
        </body></html>
    "#;

    #[test]
    fn extracts_and_resolves_headlines() {
        let base = Url::parse("https://news.example.com/").unwrap();
        let items = extract_headlines(PAGE, &base, Utc::now()).unwrap();
        assert_eq!(items.len(), 2);
        match &items[0] {
            RawItem::Page { title, url, .. } => {
                assert_eq!(title, "Alpha Launches");
                assert_eq!(url, "https://news.example.com/news/alpha");
            }
            other => panic!("unexpected item: {:?}", other),
        }
    }

    #[test]
    fn empty_page_yields_nothing() {
        let base = Url::parse("https://news.example.com/").unwrap();
        let items = extract_headlines("<html><body></body></html>", &base, Utc::now()).unwrap();
        assert!(items.is_empty());
    }
}
