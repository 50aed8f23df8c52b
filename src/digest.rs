use crate::delivery::DeliveryGateway;
use crate::store::{ArticleFilter, Store};
use crate::types::{Article, Result};
use chrono::{DateTime, Datelike, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// The two digest flavors and the calendar slot math that goes with
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    Daily,
    Weekly,
}

impl DigestKind {
    /// Deterministic key for the calendar slot a delivery covers. One
    /// DeliveryRecord may exist per key, ever.
    pub fn digest_key(&self, slot: DateTime<Utc>) -> String {
        match self {
            DigestKind::Daily => format!("daily-{}", slot.format("%Y-%m-%d")),
            DigestKind::Weekly => {
                let week = slot.iso_week();
                format!("weekly-{}-W{:02}", week.year(), week.week())
            }
        }
    }

    /// Covering window: the trailing day or week ending at the slot
    /// instant.
    pub fn window(&self, slot: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            DigestKind::Daily => (slot - Duration::days(1), slot),
            DigestKind::Weekly => (slot - Duration::days(7), slot),
        }
    }

    pub fn subject(&self, slot: DateTime<Utc>) -> String {
        match self {
            DigestKind::Daily => format!("paperscout daily digest - {}", slot.format("%Y-%m-%d")),
            DigestKind::Weekly => {
                let week = slot.iso_week();
                format!("paperscout weekly digest - {}-W{:02}", week.year(), week.week())
            }
        }
    }
}

impl std::fmt::Display for DigestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DigestKind::Daily => f.write_str("daily"),
            DigestKind::Weekly => f.write_str("weekly"),
        }
    }
}

/// Rendered digest ready for the delivery gateway.
#[derive(Debug, Clone)]
pub struct DigestPayload {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestOutcome {
    /// Sent to the configured recipients; carries the article count.
    Sent(usize),
    /// A DeliveryRecord for this slot already exists; nothing sent.
    AlreadyDelivered,
    /// No articles in the window (or no recipients configured).
    Empty,
}

/// Selects, orders and renders the articles for one digest slot, then
/// hands off to the delivery gateway. The DeliveryRecord check here is
/// the idempotence guard independent of the scheduler's own state.
pub struct DigestService {
    store: Arc<Store>,
    gateway: Arc<DeliveryGateway>,
    recipients: Vec<String>,
    max_items: usize,
}

impl DigestService {
    pub fn new(store: Arc<Store>, gateway: Arc<DeliveryGateway>, recipients: Vec<String>) -> Self {
        Self {
            store,
            gateway,
            recipients,
            max_items: 20,
        }
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub async fn run_slot(&self, kind: DigestKind, slot: DateTime<Utc>) -> Result<DigestOutcome> {
        let digest_key = kind.digest_key(slot);

        if self.store.find_delivery(&digest_key).await?.is_some() {
            info!("digest {} already delivered, skipping", digest_key);
            return Ok(DigestOutcome::AlreadyDelivered);
        }

        if self.recipients.is_empty() {
            warn!("no digest recipients configured, skipping {}", digest_key);
            return Ok(DigestOutcome::Empty);
        }

        let (start, end) = kind.window(slot);
        let filter = ArticleFilter {
            limit: Some(self.max_items as i64),
            ..Default::default()
        };
        let articles = self.store.query_window(start, end, &filter).await?;
        if articles.is_empty() {
            info!("digest {} window is empty, nothing to send", digest_key);
            return Ok(DigestOutcome::Empty);
        }

        let payload = render_digest(kind, slot, &articles);
        let fingerprints: Vec<String> =
            articles.iter().map(|a| a.fingerprint.clone()).collect();

        self.gateway
            .deliver(&digest_key, &payload, fingerprints, &self.recipients)
            .await?;

        Ok(DigestOutcome::Sent(articles.len()))
    }
}

/// Render the ordered article list into a plain-text payload.
pub fn render_digest(kind: DigestKind, slot: DateTime<Utc>, articles: &[Article]) -> DigestPayload {
    let mut body = String::new();
    body.push_str(&format!(
        "{} - {} articles\n\n",
        kind.subject(slot),
        articles.len()
    ));

    for (i, article) in articles.iter().enumerate() {
        body.push_str(&format!("{}. {}\n", i + 1, article.title));
        let blurb = article
            .summary
            .as_deref()
            .or(article.abstract_text.as_deref());
        if let Some(blurb) = blurb {
            body.push_str(&format!("   {}\n", blurb));
        }
        body.push_str(&format!(
            "   [{}] relevance {:.2} - published {}\n",
            article.category,
            article.relevance_score,
            article.published_at.format("%Y-%m-%d")
        ));
        for url in &article.source_urls {
            body.push_str(&format!("   {}\n", url));
        }
        body.push('\n');
    }

    DigestPayload {
        subject: kind.subject(slot),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArticleDraft, SourceKind};
    use chrono::TimeZone;

    fn article(title: &str, score: f64) -> Article {
        let draft = ArticleDraft {
            title: title.to_string(),
            abstract_text: Some(format!("{} abstract", title)),
            source_urls: vec![format!("https://example.com/{}", title)],
            source_kinds: vec![SourceKind::Feed],
            identifier: None,
            published_at: Utc::now(),
            fetched_at: Utc::now(),
        };
        let mut a = Article::from_draft(draft, title.to_string(), Duration::days(90));
        a.relevance_score = score;
        a
    }

    #[test]
    fn digest_keys_are_calendar_slots() {
        let slot = Utc.with_ymd_and_hms(2024, 6, 3, 7, 30, 0).unwrap();
        assert_eq!(DigestKind::Daily.digest_key(slot), "daily-2024-06-03");
        assert_eq!(DigestKind::Weekly.digest_key(slot), "weekly-2024-W23");
    }

    #[test]
    fn windows_cover_trailing_period() {
        let slot = Utc.with_ymd_and_hms(2024, 6, 3, 7, 30, 0).unwrap();
        let (start, end) = DigestKind::Daily.window(slot);
        assert_eq!(end - start, Duration::days(1));
        assert_eq!(end, slot);

        let (start, _) = DigestKind::Weekly.window(slot);
        assert_eq!(slot - start, Duration::days(7));
    }

    #[test]
    fn render_preserves_order_and_lists_urls() {
        let slot = Utc.with_ymd_and_hms(2024, 6, 3, 7, 30, 0).unwrap();
        let articles = vec![article("first", 0.9), article("second", 0.5)];
        let payload = render_digest(DigestKind::Daily, slot, &articles);

        let first_pos = payload.body.find("1. first").unwrap();
        let second_pos = payload.body.find("2. second").unwrap();
        assert!(first_pos < second_pos);
        assert!(payload.body.contains("https://example.com/first"));
        assert!(payload.subject.contains("2024-06-03"));
    }
}
