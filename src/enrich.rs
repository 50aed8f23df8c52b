use crate::types::{Article, Category, Result, ScoutError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Raw collaborator output. The score arrives unclamped and the
/// category as a free-form label; the enricher sanitizes both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub summary: String,
    #[serde(default)]
    pub key_takeaways: Vec<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub relevance: f64,
}

/// The AI-summarization collaborator boundary: title + abstract in,
/// summary / takeaways / category label / score out.
#[async_trait]
pub trait Summarizer: Send + Sync {
    fn name(&self) -> String;

    async fn summarize(
        &self,
        title: &str,
        abstract_text: &str,
        max_chars: usize,
    ) -> Result<SummaryResponse>;
}

/// HTTP client for a remote summarization provider.
pub struct HttpSummarizer {
    client: Client,
    api_url: String,
    api_key: String,
}

impl fmt::Debug for HttpSummarizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSummarizer")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl HttpSummarizer {
    pub fn new(api_url: String, api_key: String, timeout: std::time::Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            api_url,
            api_key,
        }
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    fn name(&self) -> String {
        format!("http ({})", self.api_url)
    }

    async fn summarize(
        &self,
        title: &str,
        abstract_text: &str,
        max_chars: usize,
    ) -> Result<SummaryResponse> {
        let request = serde_json::json!({
            "title": title,
            "abstract": abstract_text,
            "max_length": max_chars,
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ScoutError::EnrichmentFailed(format!(
                "provider returned HTTP {}",
                response.status()
            )));
        }

        let parsed: SummaryResponse = response.json().await?;
        Ok(parsed)
    }
}

/// Offline extractive summarizer, used when the provider is disabled
/// and throughout the test suite. Deterministic by construction.
pub struct KeywordSummarizer {
    interests: Vec<String>,
}

impl KeywordSummarizer {
    pub fn new() -> Self {
        Self {
            interests: vec![
                "model".to_string(),
                "learning".to_string(),
                "benchmark".to_string(),
                "release".to_string(),
                "open source".to_string(),
            ],
        }
    }

    pub fn with_interests(interests: Vec<String>) -> Self {
        Self { interests }
    }

    fn guess_category(text: &str) -> &'static str {
        let lower = text.to_lowercase();
        if lower.contains("paper")
            || lower.contains("arxiv")
            || lower.contains("we propose")
            || lower.contains("study")
        {
            "research-paper"
        } else if lower.contains("release")
            || lower.contains("launch")
            || lower.contains("announc")
        {
            "product-news"
        } else if lower.contains("library")
            || lower.contains("framework")
            || lower.contains("sdk")
            || lower.contains("cli")
        {
            "tooling"
        } else {
            "other"
        }
    }
}

impl Default for KeywordSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Summarizer for KeywordSummarizer {
    fn name(&self) -> String {
        "keyword".to_string()
    }

    async fn summarize(
        &self,
        title: &str,
        abstract_text: &str,
        max_chars: usize,
    ) -> Result<SummaryResponse> {
        let body = if abstract_text.is_empty() {
            title
        } else {
            abstract_text
        };
        let summary = smart_truncate(body, max_chars);

        let key_takeaways: Vec<String> = body
            .split(['.', '!', '?'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .take(3)
            .map(|s| s.to_string())
            .collect();

        let haystack = format!("{} {}", title, abstract_text).to_lowercase();
        let mut relevance: f64 = 0.3;
        for interest in &self.interests {
            if haystack.contains(&interest.to_lowercase()) {
                relevance += 0.2;
            }
        }

        Ok(SummaryResponse {
            summary,
            key_takeaways,
            category: Self::guess_category(&haystack).to_string(),
            relevance: relevance.min(1.0),
        })
    }
}

/// Enrichment fields ready to be recorded against an article.
#[derive(Debug, Clone)]
pub struct Enrichment {
    pub summary: String,
    pub key_takeaways: Vec<String>,
    pub category: Category,
    pub relevance_score: f64,
    pub enriched_at: DateTime<Utc>,
}

/// Wraps the collaborator with the guarantees the pipeline needs: a
/// bounded timeout, a clamped score, a taxonomy-mapped category, and
/// failure downgraded to "pending enrichment" instead of an error.
pub struct Enricher {
    summarizer: Arc<dyn Summarizer>,
    timeout: std::time::Duration,
    max_summary_chars: usize,
    staleness: Duration,
}

impl Enricher {
    pub fn new(
        summarizer: Arc<dyn Summarizer>,
        timeout: std::time::Duration,
        max_summary_chars: usize,
        staleness: Duration,
    ) -> Self {
        Self {
            summarizer,
            timeout,
            max_summary_chars,
            staleness,
        }
    }

    /// Enrichment runs only for articles still pending or whose
    /// enrichment has gone stale.
    pub fn needs_enrichment(&self, article: &Article, now: DateTime<Utc>) -> bool {
        match article.enriched_at {
            None => true,
            Some(at) => now - at > self.staleness,
        }
    }

    /// Returns `None` on any collaborator failure or timeout; the
    /// article persists unenriched and is retried on a later sighting.
    pub async fn enrich(&self, article: &Article) -> Option<Enrichment> {
        let abstract_text = article.abstract_text.as_deref().unwrap_or("");
        let call = self
            .summarizer
            .summarize(&article.title, abstract_text, self.max_summary_chars);

        let response = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(
                    "enrichment failed for {} via {}: {}",
                    article.fingerprint,
                    self.summarizer.name(),
                    e
                );
                return None;
            }
            Err(_) => {
                warn!(
                    "enrichment timed out for {} via {}",
                    article.fingerprint,
                    self.summarizer.name()
                );
                return None;
            }
        };

        let category = Category::from_label(&response.category);
        let relevance_score = clamp_score(response.relevance);
        debug!(
            "enriched {}: category={} score={:.2}",
            article.fingerprint, category, relevance_score
        );

        Some(Enrichment {
            summary: response.summary,
            key_takeaways: response.key_takeaways,
            category,
            relevance_score,
            enriched_at: Utc::now(),
        })
    }
}

/// Collaborator scores arrive in whatever range the provider fancies;
/// storage only ever sees [0, 1].
pub fn clamp_score(raw: f64) -> f64 {
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Truncate text to a maximum length, preferring sentence boundaries.
pub fn smart_truncate(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let boundary = text
        .char_indices()
        .take_while(|(i, _)| *i < max_chars)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(0);
    let truncated = &text[..boundary];
    if let Some(last_sentence) = truncated.rfind('.') {
        truncated[..last_sentence + 1].to_string()
    } else if let Some(last_space) = truncated.rfind(' ') {
        format!("{}...", &truncated[..last_space])
    } else {
        format!("{}...", truncated)
    }
}
