use crate::enrich::Enrichment;
use crate::types::{
    Article, Category, DeliveryRecord, Result, ScheduleKind, ScheduleState, SourceKind,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use tracing::{debug, info};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS articles (
        fingerprint TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        abstract_text TEXT,
        source_urls TEXT NOT NULL,
        source_kinds TEXT NOT NULL,
        published_at TEXT NOT NULL,
        fetched_at TEXT NOT NULL,
        last_seen_at TEXT NOT NULL,
        category TEXT NOT NULL,
        relevance_score REAL NOT NULL DEFAULT 0,
        summary TEXT,
        key_takeaways TEXT NOT NULL,
        enriched_at TEXT,
        expires_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_articles_expires ON articles(expires_at)",
    "CREATE INDEX IF NOT EXISTS idx_articles_published ON articles(published_at)",
    r#"
    CREATE TABLE IF NOT EXISTS deliveries (
        digest_key TEXT PRIMARY KEY,
        sent_at TEXT NOT NULL,
        article_fingerprints TEXT NOT NULL,
        recipients TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS schedule_state (
        kind TEXT PRIMARY KEY,
        last_completed_slot TEXT NOT NULL,
        last_completed_at TEXT NOT NULL
    )
    "#,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Optional filters for windowed reads.
#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    pub category: Option<Category>,
    pub min_score: Option<f64>,
    pub limit: Option<i64>,
}

/// Document-store gateway. Owns the pool, the schema, and the expiry
/// policy; everything above it talks fingerprints and articles.
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self> {
        // An in-memory SQLite database exists per connection; the pool
        // must stay at one connection for it to behave like one store.
        let max_connections = if database_url.contains(":memory:") || database_url.contains("mode=memory") {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("schema initialized");
        Ok(())
    }

    /// Idempotent upsert keyed on fingerprint. A re-sighting merges
    /// source sets and moves `last_seen_at` forward; it never touches
    /// the enrichment columns, which belong to `record_enrichment`.
    pub async fn upsert(&self, article: &Article) -> Result<UpsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT * FROM articles WHERE fingerprint = ?")
            .bind(&article.fingerprint)
            .fetch_optional(&mut *tx)
            .await?;

        let outcome = match existing {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO articles
                        (fingerprint, title, abstract_text, source_urls, source_kinds,
                         published_at, fetched_at, last_seen_at, category, relevance_score,
                         summary, key_takeaways, enriched_at, expires_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&article.fingerprint)
                .bind(&article.title)
                .bind(&article.abstract_text)
                .bind(serde_json::to_string(&article.source_urls)?)
                .bind(serde_json::to_string(&article.source_kinds)?)
                .bind(article.published_at)
                .bind(article.fetched_at)
                .bind(article.last_seen_at)
                .bind(article.category.as_str())
                .bind(article.relevance_score)
                .bind(&article.summary)
                .bind(serde_json::to_string(&article.key_takeaways)?)
                .bind(article.enriched_at)
                .bind(article.expires_at)
                .execute(&mut *tx)
                .await?;
                UpsertOutcome::Inserted
            }
            Some(row) => {
                let current = row_to_article(&row)?;

                let mut source_urls = current.source_urls.clone();
                for url in &article.source_urls {
                    if !source_urls.contains(url) {
                        source_urls.push(url.clone());
                    }
                }
                source_urls.sort();

                let mut source_kinds = current.source_kinds.clone();
                crate::dedup::merge_kinds(&mut source_kinds, &article.source_kinds);

                let published_at = current.published_at.min(article.published_at);
                // Monotonic: a stale writer can never move last_seen_at back.
                let last_seen_at = current.last_seen_at.max(article.last_seen_at);
                let abstract_text = longest(current.abstract_text, article.abstract_text.clone());

                sqlx::query(
                    r#"
                    UPDATE articles
                    SET abstract_text = ?, source_urls = ?, source_kinds = ?,
                        published_at = ?, last_seen_at = ?
                    WHERE fingerprint = ?
                    "#,
                )
                .bind(abstract_text)
                .bind(serde_json::to_string(&source_urls)?)
                .bind(serde_json::to_string(&source_kinds)?)
                .bind(published_at)
                .bind(last_seen_at)
                .bind(&article.fingerprint)
                .execute(&mut *tx)
                .await?;
                UpsertOutcome::Updated
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    /// Write enrichment results for an already-persisted article.
    pub async fn record_enrichment(&self, fingerprint: &str, enrichment: &Enrichment) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE articles
            SET summary = ?, key_takeaways = ?, category = ?, relevance_score = ?, enriched_at = ?
            WHERE fingerprint = ?
            "#,
        )
        .bind(&enrichment.summary)
        .bind(serde_json::to_string(&enrichment.key_takeaways)?)
        .bind(enrichment.category.as_str())
        .bind(enrichment.relevance_score)
        .bind(enrichment.enriched_at)
        .bind(fingerprint)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, fingerprint: &str) -> Result<Option<Article>> {
        let row = sqlx::query("SELECT * FROM articles WHERE fingerprint = ?")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_article(&r)).transpose()
    }

    /// Windowed read for digest composition and analytics. The expiry
    /// filter is applied here regardless of whether purging ran.
    pub async fn query_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: &ArticleFilter,
    ) -> Result<Vec<Article>> {
        let mut sql = String::from(
            "SELECT * FROM articles WHERE published_at >= ? AND published_at < ? AND expires_at > ?",
        );
        if filter.category.is_some() {
            sql.push_str(" AND category = ?");
        }
        if filter.min_score.is_some() {
            sql.push_str(" AND relevance_score >= ?");
        }
        sql.push_str(" ORDER BY relevance_score DESC, published_at DESC");
        if filter.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql).bind(start).bind(end).bind(Utc::now());
        if let Some(category) = filter.category {
            query = query.bind(category.as_str());
        }
        if let Some(min_score) = filter.min_score {
            query = query.bind(min_score);
        }
        if let Some(limit) = filter.limit {
            query = query.bind(limit);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_article).collect()
    }

    /// Most recently seen unexpired articles, for the read entry point.
    pub async fn recent(&self, limit: i64) -> Result<Vec<Article>> {
        let rows = sqlx::query(
            "SELECT * FROM articles WHERE expires_at > ? ORDER BY last_seen_at DESC LIMIT ?",
        )
        .bind(Utc::now())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_article).collect()
    }

    /// Advisory housekeeping; queries filter expiry on their own.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM articles WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        let purged = result.rows_affected();
        if purged > 0 {
            info!("purged {} expired articles", purged);
        }
        Ok(purged)
    }

    /// Insert-if-absent; returns false when a record for this digest
    /// key already exists. This is what makes delivery at-most-once.
    pub async fn insert_delivery(&self, record: &DeliveryRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO deliveries (digest_key, sent_at, article_fingerprints, recipients)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(digest_key) DO NOTHING
            "#,
        )
        .bind(&record.digest_key)
        .bind(record.sent_at)
        .bind(serde_json::to_string(&record.article_fingerprints)?)
        .bind(serde_json::to_string(&record.recipients)?)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_delivery(&self, digest_key: &str) -> Result<Option<DeliveryRecord>> {
        let row = sqlx::query("SELECT * FROM deliveries WHERE digest_key = ?")
            .bind(digest_key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            Ok(DeliveryRecord {
                digest_key: r.try_get("digest_key")?,
                sent_at: r.try_get("sent_at")?,
                article_fingerprints: serde_json::from_str(
                    r.try_get::<String, _>("article_fingerprints")?.as_str(),
                )?,
                recipients: serde_json::from_str(r.try_get::<String, _>("recipients")?.as_str())?,
            })
        })
        .transpose()
    }

    pub async fn load_schedule_state(&self, kind: ScheduleKind) -> Result<Option<ScheduleState>> {
        let row = sqlx::query("SELECT * FROM schedule_state WHERE kind = ?")
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            Ok(ScheduleState {
                kind,
                last_completed_slot: r.try_get("last_completed_slot")?,
                last_completed_at: r.try_get("last_completed_at")?,
            })
        })
        .transpose()
    }

    /// Durably record a completed slot. Called only after the cycle's
    /// downstream action has confirmed.
    pub async fn record_completion(
        &self,
        kind: ScheduleKind,
        slot: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schedule_state (kind, last_completed_slot, last_completed_at)
            VALUES (?, ?, ?)
            ON CONFLICT(kind) DO UPDATE SET
                last_completed_slot = excluded.last_completed_slot,
                last_completed_at = excluded.last_completed_at
            "#,
        )
        .bind(kind.as_str())
        .bind(slot)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<HashMap<String, i64>> {
        let mut stats = HashMap::new();

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        stats.insert("total_articles".to_string(), total);

        let enriched: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE enriched_at IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;
        stats.insert("enriched_articles".to_string(), enriched);
        stats.insert("pending_enrichment".to_string(), total - enriched);

        let deliveries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deliveries")
            .fetch_one(&self.pool)
            .await?;
        stats.insert("deliveries".to_string(), deliveries);

        Ok(stats)
    }
}

fn longest(a: Option<String>, b: Option<String>) -> Option<String> {
    let a_len = a.as_deref().map_or(0, str::len);
    let b_len = b.as_deref().map_or(0, str::len);
    if b_len > a_len {
        b
    } else {
        a
    }
}

fn row_to_article(row: &SqliteRow) -> Result<Article> {
    let source_urls: Vec<String> = serde_json::from_str(row.try_get::<String, _>("source_urls")?.as_str())?;
    let source_kinds: Vec<SourceKind> =
        serde_json::from_str(row.try_get::<String, _>("source_kinds")?.as_str())?;
    let key_takeaways: Vec<String> =
        serde_json::from_str(row.try_get::<String, _>("key_takeaways")?.as_str())?;

    Ok(Article {
        fingerprint: row.try_get("fingerprint")?,
        title: row.try_get("title")?,
        abstract_text: row.try_get("abstract_text")?,
        source_urls,
        source_kinds,
        published_at: row.try_get("published_at")?,
        fetched_at: row.try_get("fetched_at")?,
        last_seen_at: row.try_get("last_seen_at")?,
        category: Category::from_label(row.try_get::<String, _>("category")?.as_str()),
        relevance_score: row.try_get("relevance_score")?,
        summary: row.try_get("summary")?,
        key_takeaways,
        enriched_at: row.try_get("enriched_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}
