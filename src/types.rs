use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a raw item came from. Stored on every article so merged
/// coverage keeps the full provenance set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Arxiv,
    Feed,
    Webpage,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Arxiv => "arxiv",
            SourceKind::Feed => "feed",
            SourceKind::Webpage => "webpage",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item as a connector saw it, before normalization. Each variant
/// carries the fields its source kind actually provides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RawItem {
    Api {
        id: String,
        title: String,
        summary: Option<String>,
        url: String,
        published: Option<DateTime<Utc>>,
    },
    Feed {
        guid: Option<String>,
        title: String,
        summary: Option<String>,
        url: String,
        published: Option<DateTime<Utc>>,
    },
    Page {
        title: String,
        excerpt: Option<String>,
        url: String,
        observed_at: DateTime<Utc>,
    },
}

impl RawItem {
    pub fn source_kind(&self) -> SourceKind {
        match self {
            RawItem::Api { .. } => SourceKind::Arxiv,
            RawItem::Feed { .. } => SourceKind::Feed,
            RawItem::Page { .. } => SourceKind::Webpage,
        }
    }
}

/// Fixed category taxonomy. Only the enricher assigns these; connector
/// output never carries a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    ResearchPaper,
    ProductNews,
    Tooling,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::ResearchPaper => "research-paper",
            Category::ProductNews => "product-news",
            Category::Tooling => "tooling",
            Category::Other => "other",
        }
    }

    /// Map a collaborator-provided label into the taxonomy. Unrecognized
    /// labels fall back to `Other`.
    pub fn from_label(label: &str) -> Category {
        match label.trim().to_lowercase().as_str() {
            "research-paper" | "research_paper" | "paper" | "research" => Category::ResearchPaper,
            "product-news" | "product_news" | "product" | "news" => Category::ProductNews,
            "tooling" | "tool" | "tools" | "library" => Category::Tooling,
            _ => Category::Other,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized article candidate produced by the normalizer, merged by
/// the deduplicator, not yet persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleDraft {
    pub title: String,
    pub abstract_text: Option<String>,
    pub source_urls: Vec<String>,
    pub source_kinds: Vec<SourceKind>,
    pub identifier: Option<String>,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
}

/// Canonical persisted record for one piece of content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub fingerprint: String,
    pub title: String,
    pub abstract_text: Option<String>,
    pub source_urls: Vec<String>,
    pub source_kinds: Vec<SourceKind>,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub category: Category,
    pub relevance_score: f64,
    pub summary: Option<String>,
    pub key_takeaways: Vec<String>,
    pub enriched_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl Article {
    /// Build an unenriched article from a deduplicated draft. Enrichment
    /// fields stay empty until the enricher succeeds.
    pub fn from_draft(draft: ArticleDraft, fingerprint: String, retention: Duration) -> Self {
        let expires_at = draft.fetched_at + retention;
        Self {
            fingerprint,
            title: draft.title,
            abstract_text: draft.abstract_text,
            source_urls: draft.source_urls,
            source_kinds: draft.source_kinds,
            published_at: draft.published_at,
            fetched_at: draft.fetched_at,
            last_seen_at: draft.fetched_at,
            category: Category::Other,
            relevance_score: 0.0,
            summary: None,
            key_takeaways: Vec::new(),
            enriched_at: None,
            expires_at,
        }
    }

    pub fn is_enriched(&self) -> bool {
        self.enriched_at.is_some()
    }
}

/// Evidence that a digest already went out for a given slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub digest_key: String,
    pub sent_at: DateTime<Utc>,
    pub article_fingerprints: Vec<String>,
    pub recipients: Vec<String>,
}

/// The schedule kinds driven independently by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScheduleKind {
    Collection,
    DailyDigest,
    WeeklyDigest,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::Collection => "collection",
            ScheduleKind::DailyDigest => "daily-digest",
            ScheduleKind::WeeklyDigest => "weekly-digest",
        }
    }
}

impl std::fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable per-kind completion marker; what makes the scheduler
/// resume-safe across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleState {
    pub kind: ScheduleKind,
    pub last_completed_slot: String,
    pub last_completed_at: DateTime<Utc>,
}

/// One connector's failure note inside a cycle report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}

/// Outcome of one collection cycle. Per-source failures are recorded
/// here instead of aborting the cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub items_fetched: usize,
    pub items_rejected: usize,
    pub drafts_after_dedup: usize,
    pub persisted_new: usize,
    pub persisted_updated: usize,
    pub enriched: usize,
    pub enrichment_failures: usize,
    pub source_failures: Vec<SourceFailure>,
}

impl CycleReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            started_at,
            finished_at: None,
            items_fetched: 0,
            items_rejected: 0,
            drafts_after_dedup: 0,
            persisted_new: 0,
            persisted_updated: 0,
            enriched: 0,
            enrichment_failures: 0,
            source_failures: Vec::new(),
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.source_failures.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScoutError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("source {source_name} unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("enrichment failed: {0}")]
    EnrichmentFailed(String),

    #[error("delivery failed after {attempts} attempts: {reason}")]
    DeliveryFailed { attempts: u32, reason: String },

    #[error("mail error: {0}")]
    Mail(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, ScoutError>;
