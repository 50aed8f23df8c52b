mod common;

use chrono::{DateTime, Duration, TimeZone, Utc};
use common::*;
use paperscout::config::{RetryPolicy, ScheduleConfig};
use paperscout::types::{ScheduleKind, ScoutError};
use paperscout::{
    DeliveryGateway, DigestKind, DigestOutcome, DigestService, Harvester, HarvestOptions,
    Scheduler, Store, TickOutcome, Transport,
};
use std::sync::Arc;

const RECIPIENT: &str = "ops@example.com";

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        base_delay: std::time::Duration::from_millis(10),
        multiplier: 2.0,
    }
}

fn digest_service(store: &Arc<Store>, transport: Arc<dyn Transport>) -> Arc<DigestService> {
    let gateway = Arc::new(DeliveryGateway::new(
        transport,
        Arc::clone(store),
        fast_retry(),
    ));
    Arc::new(DigestService::new(
        Arc::clone(store),
        gateway,
        vec![RECIPIENT.to_string()],
    ))
}

fn scheduler(store: &Arc<Store>, digests: Arc<DigestService>, give_up_after: u32) -> Scheduler {
    let harvester = Arc::new(Harvester::new(
        Vec::new(),
        keyword_enricher(),
        Arc::clone(store),
        HarvestOptions::default(),
    ));
    Scheduler::new(
        Arc::clone(store),
        harvester,
        digests,
        &ScheduleConfig::default(),
        give_up_after,
    )
}

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

#[tokio::test]
async fn restart_after_send_but_before_state_update_sends_once() {
    init_tracing();
    let store = mem_store().await;
    let transport = CountingTransport::new();
    let digests = digest_service(&store, transport.clone());

    // Daily slot at 07:30; one article inside the covering day.
    let slot = at(2030, 5, 6, 7, 30);
    store
        .upsert(&article_fixture("In The Window", slot - Duration::hours(2), Utc::now()))
        .await
        .unwrap();

    // First delivery succeeds, then the process dies before
    // ScheduleState is written.
    assert_eq!(
        digests.run_slot(DigestKind::Daily, slot).await.unwrap(),
        DigestOutcome::Sent(1)
    );
    assert_eq!(transport.sent_count(), 1);

    // Restarted scheduler sees no completion for the slot and re-runs
    // it; the DeliveryRecord guard suppresses the second send.
    let restarted = scheduler(&store, digest_service(&store, transport.clone()), 3);
    let outcome = restarted
        .tick_kind(ScheduleKind::DailyDigest, slot + Duration::minutes(90))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        TickOutcome::Completed {
            slot: "2030-05-06".to_string()
        }
    );
    assert_eq!(transport.sent_count(), 1, "at most one send per digest key");

    // And with state recorded, the slot is simply not due anymore.
    let outcome = restarted
        .tick_kind(ScheduleKind::DailyDigest, slot + Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(outcome, TickOutcome::NotDue);
}

#[tokio::test]
async fn downtime_over_fire_time_yields_exactly_one_digest() {
    init_tracing();
    let store = mem_store().await;
    let transport = CountingTransport::new();
    let digests = digest_service(&store, transport.clone());
    let sched = scheduler(&store, digests, 3);

    // Yesterday's 07:30 digest completed normally; the process was
    // down 07:00-09:00 today.
    store
        .record_completion(ScheduleKind::DailyDigest, "2030-05-05", at(2030, 5, 5, 7, 31))
        .await
        .unwrap();
    store
        .upsert(&article_fixture("Morning Story", at(2030, 5, 6, 7, 0), Utc::now()))
        .await
        .unwrap();

    // Restart at 09:00: today's slot fired during downtime.
    let outcome = sched
        .tick_kind(ScheduleKind::DailyDigest, at(2030, 5, 6, 9, 0))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        TickOutcome::Completed {
            slot: "2030-05-06".to_string()
        }
    );
    assert_eq!(transport.sent_count(), 1, "not zero, not two");

    let record = store.find_delivery("daily-2030-05-06").await.unwrap();
    assert!(record.is_some());

    assert_eq!(
        sched
            .tick_kind(ScheduleKind::DailyDigest, at(2030, 5, 6, 9, 5))
            .await
            .unwrap(),
        TickOutcome::NotDue
    );
}

#[tokio::test]
async fn multiple_missed_slots_catch_up_to_latest_only() {
    init_tracing();
    let store = mem_store().await;
    let transport = CountingTransport::new();
    let digests = digest_service(&store, transport.clone());
    let sched = scheduler(&store, digests, 3);

    store
        .record_completion(ScheduleKind::DailyDigest, "2030-05-03", at(2030, 5, 3, 7, 31))
        .await
        .unwrap();
    store
        .upsert(&article_fixture("Latest Story", at(2030, 5, 6, 7, 0), Utc::now()))
        .await
        .unwrap();

    let outcome = sched
        .tick_kind(ScheduleKind::DailyDigest, at(2030, 5, 6, 9, 0))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        TickOutcome::Completed {
            slot: "2030-05-06".to_string()
        }
    );
    assert_eq!(transport.sent_count(), 1);

    // The swallowed slots were not replayed.
    assert!(store.find_delivery("daily-2030-05-04").await.unwrap().is_none());
    assert!(store.find_delivery("daily-2030-05-05").await.unwrap().is_none());
    assert!(store.find_delivery("daily-2030-05-06").await.unwrap().is_some());
}

#[tokio::test]
async fn empty_window_consumes_slot_without_delivery() {
    init_tracing();
    let store = mem_store().await;
    let transport = CountingTransport::new();
    let digests = digest_service(&store, transport.clone());
    let sched = scheduler(&store, digests, 3);

    let outcome = sched
        .tick_kind(ScheduleKind::DailyDigest, at(2030, 5, 6, 9, 0))
        .await
        .unwrap();
    assert!(matches!(outcome, TickOutcome::Completed { .. }));
    assert_eq!(transport.sent_count(), 0);
    assert!(store.find_delivery("daily-2030-05-06").await.unwrap().is_none());
}

#[tokio::test]
async fn transport_failure_is_retried_on_next_tick() {
    init_tracing();
    let store = mem_store().await;
    // Two failures exhaust the in-cycle retry budget of the first
    // tick, then the transport recovers.
    let transport = CountingTransport::failing_first(2);
    let digests = digest_service(&store, transport.clone());
    let sched = scheduler(&store, digests, 3);

    store
        .upsert(&article_fixture("Flaky Story", at(2030, 5, 6, 7, 0), Utc::now()))
        .await
        .unwrap();

    let now = at(2030, 5, 6, 9, 0);
    let err = sched.tick_kind(ScheduleKind::DailyDigest, now).await;
    assert!(matches!(err, Err(ScoutError::DeliveryFailed { attempts: 2, .. })));
    assert!(store.find_delivery("daily-2030-05-06").await.unwrap().is_none());

    let outcome = sched
        .tick_kind(ScheduleKind::DailyDigest, now + Duration::minutes(1))
        .await
        .unwrap();
    assert!(matches!(outcome, TickOutcome::Completed { .. }));
    assert_eq!(transport.sent_count(), 1);
}

#[tokio::test]
async fn persistent_transport_failure_gives_up_and_reports() {
    init_tracing();
    let store = mem_store().await;
    let transport = CountingTransport::failing_first(100);
    let digests = digest_service(&store, transport.clone());
    let sched = scheduler(&store, digests, 2);

    store
        .upsert(&article_fixture("Unlucky Story", at(2030, 5, 6, 7, 0), Utc::now()))
        .await
        .unwrap();

    let now = at(2030, 5, 6, 9, 0);
    assert!(sched.tick_kind(ScheduleKind::DailyDigest, now).await.is_err());

    let outcome = sched
        .tick_kind(ScheduleKind::DailyDigest, now + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        TickOutcome::GaveUp {
            slot: "2030-05-06".to_string()
        }
    );
    assert_eq!(transport.sent_count(), 0);
    assert!(store.find_delivery("daily-2030-05-06").await.unwrap().is_none());

    // The consumed slot does not go stale and replay forever.
    assert_eq!(
        sched
            .tick_kind(ScheduleKind::DailyDigest, now + Duration::minutes(2))
            .await
            .unwrap(),
        TickOutcome::NotDue
    );
}

#[tokio::test]
async fn weekly_digest_covers_trailing_week() {
    init_tracing();
    let store = mem_store().await;
    let transport = CountingTransport::new();
    let digests = digest_service(&store, transport.clone());
    let sched = scheduler(&store, digests, 3);

    // 2030-05-06 is a Monday; the weekly slot fires at 08:00.
    store
        .upsert(&article_fixture("Midweek Story", at(2030, 5, 2, 12, 0), Utc::now()))
        .await
        .unwrap();

    let outcome = sched
        .tick_kind(ScheduleKind::WeeklyDigest, at(2030, 5, 6, 9, 0))
        .await
        .unwrap();
    let expected_key = DigestKind::Weekly.digest_key(at(2030, 5, 6, 8, 0));
    assert!(matches!(outcome, TickOutcome::Completed { .. }));
    assert_eq!(transport.sent_count(), 1);
    assert!(store.find_delivery(&expected_key).await.unwrap().is_some());
}
