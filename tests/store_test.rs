mod common;

use chrono::{Duration, Utc};
use common::*;
use paperscout::enrich::Enrichment;
use paperscout::types::{Category, DeliveryRecord, ScheduleKind};
use paperscout::{ArticleFilter, UpsertOutcome};

#[tokio::test]
async fn upsert_merges_resighting_without_touching_enrichment() {
    init_tracing();
    let store = mem_store().await;
    let now = Utc::now();

    let mut article = article_fixture("Merge Me", now - Duration::hours(5), now - Duration::hours(4));
    assert_eq!(store.upsert(&article).await.unwrap(), UpsertOutcome::Inserted);

    let enrichment = Enrichment {
        summary: "an enriched summary".to_string(),
        key_takeaways: vec!["one".to_string(), "two".to_string()],
        category: Category::ResearchPaper,
        relevance_score: 0.8,
        enriched_at: now,
    };
    store
        .record_enrichment(&article.fingerprint, &enrichment)
        .await
        .unwrap();

    // Re-sighting from another source: new URL, later last_seen, no
    // enrichment fields of its own.
    article.source_urls = vec!["https://elsewhere.example.com/merge-me".to_string()];
    article.last_seen_at = now;
    assert_eq!(store.upsert(&article).await.unwrap(), UpsertOutcome::Updated);

    let stored = store.get(&article.fingerprint).await.unwrap().unwrap();
    assert_eq!(stored.source_urls.len(), 2);
    assert_eq!(stored.last_seen_at, now);
    assert_eq!(stored.summary.as_deref(), Some("an enriched summary"));
    assert_eq!(stored.category, Category::ResearchPaper);
    assert_eq!(stored.relevance_score, 0.8);
    assert!(stored.is_enriched());
}

#[tokio::test]
async fn stale_writer_cannot_move_last_seen_backwards() {
    init_tracing();
    let store = mem_store().await;
    let now = Utc::now();

    let mut article = article_fixture("Race Target", now - Duration::hours(2), now);
    store.upsert(&article).await.unwrap();

    article.last_seen_at = now - Duration::hours(6);
    store.upsert(&article).await.unwrap();

    let stored = store.get(&article.fingerprint).await.unwrap().unwrap();
    assert_eq!(stored.last_seen_at, now);
}

#[tokio::test]
async fn window_queries_order_by_relevance_then_recency() {
    init_tracing();
    let store = mem_store().await;
    let now = Utc::now();

    let specs = [
        ("mid score old", 0.5, now - Duration::hours(10)),
        ("top score", 0.9, now - Duration::hours(8)),
        ("mid score new", 0.5, now - Duration::hours(2)),
    ];
    for (title, score, published) in specs {
        let article = article_fixture(title, published, now);
        store.upsert(&article).await.unwrap();
        store
            .record_enrichment(
                &article.fingerprint,
                &Enrichment {
                    summary: format!("{} summary", title),
                    key_takeaways: vec![],
                    category: Category::Other,
                    relevance_score: score,
                    enriched_at: now,
                },
            )
            .await
            .unwrap();
    }

    let window = store
        .query_window(now - Duration::days(1), now, &ArticleFilter::default())
        .await
        .unwrap();
    let titles: Vec<&str> = window.iter().map(|a| a.title.as_str()).collect();
    assert_eq!(titles, vec!["top score", "mid score new", "mid score old"]);
}

#[tokio::test]
async fn window_filters_by_category_and_score() {
    init_tracing();
    let store = mem_store().await;
    let now = Utc::now();

    for (title, category, score) in [
        ("a paper", Category::ResearchPaper, 0.9),
        ("a launch", Category::ProductNews, 0.7),
        ("weak paper", Category::ResearchPaper, 0.1),
    ] {
        let article = article_fixture(title, now - Duration::hours(3), now);
        store.upsert(&article).await.unwrap();
        store
            .record_enrichment(
                &article.fingerprint,
                &Enrichment {
                    summary: String::new(),
                    key_takeaways: vec![],
                    category,
                    relevance_score: score,
                    enriched_at: now,
                },
            )
            .await
            .unwrap();
    }

    let filter = ArticleFilter {
        category: Some(Category::ResearchPaper),
        min_score: Some(0.5),
        limit: None,
    };
    let window = store
        .query_window(now - Duration::days(1), now, &filter)
        .await
        .unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].title, "a paper");
}

#[tokio::test]
async fn purge_removes_only_expired_articles() {
    init_tracing();
    let store = mem_store().await;
    let now = Utc::now();

    store
        .upsert(&article_fixture(
            "Expired",
            now - Duration::days(120),
            now - Duration::days(120),
        ))
        .await
        .unwrap();
    store
        .upsert(&article_fixture("Alive", now - Duration::hours(1), now))
        .await
        .unwrap();

    let purged = store.purge_expired(now).await.unwrap();
    assert_eq!(purged, 1);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats["total_articles"], 1);
}

#[tokio::test]
async fn delivery_records_are_insert_if_absent() {
    init_tracing();
    let store = mem_store().await;

    let record = DeliveryRecord {
        digest_key: "daily-2024-06-03".to_string(),
        sent_at: Utc::now(),
        article_fingerprints: vec!["abc".to_string()],
        recipients: vec!["ops@example.com".to_string()],
    };
    assert!(store.insert_delivery(&record).await.unwrap());
    assert!(!store.insert_delivery(&record).await.unwrap());

    let found = store.find_delivery("daily-2024-06-03").await.unwrap().unwrap();
    assert_eq!(found.article_fingerprints, vec!["abc".to_string()]);
    assert!(store.find_delivery("daily-2024-06-04").await.unwrap().is_none());
}

#[tokio::test]
async fn schedule_state_round_trips_and_updates() {
    init_tracing();
    let store = mem_store().await;
    let now = Utc::now();

    assert!(store
        .load_schedule_state(ScheduleKind::DailyDigest)
        .await
        .unwrap()
        .is_none());

    store
        .record_completion(ScheduleKind::DailyDigest, "2024-06-02", now - Duration::days(1))
        .await
        .unwrap();
    store
        .record_completion(ScheduleKind::DailyDigest, "2024-06-03", now)
        .await
        .unwrap();

    let state = store
        .load_schedule_state(ScheduleKind::DailyDigest)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.last_completed_slot, "2024-06-03");

    // Kinds are independent rows.
    assert!(store
        .load_schedule_state(ScheduleKind::Collection)
        .await
        .unwrap()
        .is_none());
}
