#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use paperscout::enrich::{Enricher, KeywordSummarizer, Summarizer, SummaryResponse};
use paperscout::types::{Article, ArticleDraft, RawItem, Result, ScoutError, SourceKind};
use paperscout::{SourceConnector, Store};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub async fn mem_store() -> Arc<Store> {
    Arc::new(
        Store::connect("sqlite::memory:")
            .await
            .expect("in-memory store"),
    )
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

/// Connector serving a fixed item list, optionally slow or failing.
pub struct StubConnector {
    pub kind: SourceKind,
    pub name: String,
    pub items: Vec<RawItem>,
    pub delay: Option<std::time::Duration>,
    pub fail: bool,
}

impl StubConnector {
    pub fn new(kind: SourceKind, name: &str, items: Vec<RawItem>) -> Self {
        Self {
            kind,
            name: name.to_string(),
            items,
            delay: None,
            fail: false,
        }
    }

    pub fn slow(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl SourceConnector for StubConnector {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    async fn fetch(&self, _since: DateTime<Utc>) -> Result<Vec<RawItem>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(ScoutError::SourceUnavailable {
                source_name: self.name.clone(),
                reason: "stubbed outage".to_string(),
            });
        }
        Ok(self.items.clone())
    }
}

/// Summarizer returning a fixed response; lets tests pin collaborator
/// output (including out-of-range scores).
pub struct FixedSummarizer {
    pub response: SummaryResponse,
}

#[async_trait]
impl Summarizer for FixedSummarizer {
    fn name(&self) -> String {
        "fixed".to_string()
    }

    async fn summarize(&self, _: &str, _: &str, _: usize) -> Result<SummaryResponse> {
        Ok(self.response.clone())
    }
}

pub fn keyword_enricher() -> Enricher {
    Enricher::new(
        Arc::new(KeywordSummarizer::new()),
        std::time::Duration::from_secs(5),
        400,
        Duration::days(7),
    )
}

pub fn fixed_enricher(response: SummaryResponse) -> Enricher {
    Enricher::new(
        Arc::new(FixedSummarizer { response }),
        std::time::Duration::from_secs(5),
        400,
        Duration::days(7),
    )
}

/// Transport that counts sends and can fail a configured number of
/// times first.
pub struct CountingTransport {
    pub sent: Mutex<Vec<String>>,
    pub failures_remaining: AtomicU32,
}

impl CountingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            failures_remaining: AtomicU32::new(0),
        })
    }

    pub fn failing_first(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            failures_remaining: AtomicU32::new(failures),
        })
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("sent lock").len()
    }
}

#[async_trait]
impl paperscout::Transport for CountingTransport {
    fn name(&self) -> String {
        "counting".to_string()
    }

    async fn send(&self, subject: &str, _body: &str, _recipients: &[String]) -> Result<()> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(ScoutError::Mail("stubbed transport outage".to_string()));
        }
        self.sent.lock().expect("sent lock").push(subject.to_string());
        Ok(())
    }
}

pub fn feed_item(title: &str, url: &str, published: DateTime<Utc>) -> RawItem {
    RawItem::Feed {
        guid: None,
        title: title.to_string(),
        summary: Some(format!("{} summary text", title)),
        url: url.to_string(),
        published: Some(published),
    }
}

pub fn article_fixture(title: &str, published: DateTime<Utc>, fetched: DateTime<Utc>) -> Article {
    let draft = ArticleDraft {
        title: title.to_string(),
        abstract_text: Some(format!("{} abstract", title)),
        source_urls: vec![format!("https://example.com/{}", title.replace(' ', "-"))],
        source_kinds: vec![SourceKind::Feed],
        identifier: None,
        published_at: published,
        fetched_at: fetched,
    };
    let fingerprint = paperscout::dedup::fingerprint(&draft);
    Article::from_draft(draft, fingerprint, Duration::days(90))
}
