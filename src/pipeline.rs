use crate::dedup::Deduplicator;
use crate::enrich::Enricher;
use crate::normalize::normalize;
use crate::sources::SourceConnector;
use crate::store::{Store, UpsertOutcome};
use crate::types::{Article, CycleReport, Result, SourceFailure};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct HarvestOptions {
    /// Per-connector fetch budget; a connector over it is recorded as
    /// a partial failure, never an abort.
    pub fetch_timeout: std::time::Duration,
    pub max_in_flight: usize,
    pub retention: chrono::Duration,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: std::time::Duration::from_secs(30),
            max_in_flight: 4,
            retention: chrono::Duration::days(90),
        }
    }
}

/// One collection cycle end to end: connectors fan out concurrently,
/// then normalize, deduplicate, enrich and persist. Also the entry
/// point the HTTP layer uses to force an immediate collection.
pub struct Harvester {
    connectors: Vec<Arc<dyn SourceConnector>>,
    enricher: Enricher,
    store: Arc<Store>,
    options: HarvestOptions,
}

impl Harvester {
    pub fn new(
        connectors: Vec<Arc<dyn SourceConnector>>,
        enricher: Enricher,
        store: Arc<Store>,
        options: HarvestOptions,
    ) -> Self {
        Self {
            connectors,
            enricher,
            store,
            options,
        }
    }

    pub async fn run_cycle(&self, since: DateTime<Utc>) -> Result<CycleReport> {
        let mut report = CycleReport::new(Utc::now());
        info!(
            "collection cycle {} starting with {} connectors (since {})",
            report.cycle_id,
            self.connectors.len(),
            since
        );

        let timeout = self.options.fetch_timeout;
        let fetches = stream::iter(self.connectors.iter().map(|connector| {
            let connector = Arc::clone(connector);
            async move {
                let name = connector.name();
                let result = tokio::time::timeout(timeout, connector.fetch(since)).await;
                (name, result)
            }
        }))
        .buffer_unordered(self.options.max_in_flight.max(1))
        .collect::<Vec<_>>()
        .await;

        let fetched_at = Utc::now();
        let dedup = Deduplicator::new();

        for (source, outcome) in fetches {
            match outcome {
                Ok(Ok(items)) => {
                    report.items_fetched += items.len();
                    for item in items {
                        match normalize(item, fetched_at) {
                            Ok(draft) => {
                                dedup.admit(draft).await;
                            }
                            Err(reason) => {
                                debug!("dropped malformed item from {}: {}", source, reason);
                                report.items_rejected += 1;
                            }
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!("source {} failed, continuing without it: {}", source, e);
                    report.source_failures.push(SourceFailure {
                        source,
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!("source {} timed out after {:?}", source, timeout);
                    report.source_failures.push(SourceFailure {
                        source,
                        reason: format!("timed out after {:?}", timeout),
                    });
                }
            }
        }

        let drafts = dedup.into_drafts().await;
        report.drafts_after_dedup = drafts.len();

        for (fingerprint, draft) in drafts {
            let article = Article::from_draft(draft, fingerprint.clone(), self.options.retention);
            match self.store.upsert(&article).await? {
                UpsertOutcome::Inserted => report.persisted_new += 1,
                UpsertOutcome::Updated => report.persisted_updated += 1,
            }

            // Enrich from the stored record so a re-sighting sees the
            // merged state and existing enrichment.
            let stored = match self.store.get(&fingerprint).await? {
                Some(stored) => stored,
                None => continue,
            };
            if self.enricher.needs_enrichment(&stored, Utc::now()) {
                match self.enricher.enrich(&stored).await {
                    Some(enrichment) => {
                        self.store.record_enrichment(&fingerprint, &enrichment).await?;
                        report.enriched += 1;
                    }
                    None => report.enrichment_failures += 1,
                }
            }
        }

        report.finished_at = Some(Utc::now());
        info!(
            "collection cycle {} finished: {} fetched, {} rejected, {} canonical, {} new, {} updated, {} enriched, {} source failures",
            report.cycle_id,
            report.items_fetched,
            report.items_rejected,
            report.drafts_after_dedup,
            report.persisted_new,
            report.persisted_updated,
            report.enriched,
            report.source_failures.len()
        );
        Ok(report)
    }
}
