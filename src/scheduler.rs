use crate::config::ScheduleConfig;
use crate::digest::{DigestKind, DigestService};
use crate::pipeline::Harvester;
use crate::store::Store;
use crate::types::{CycleReport, Result, ScheduleKind, ScheduleState};
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// How often a schedule kind fires.
#[derive(Debug, Clone, Copy)]
pub enum Cadence {
    /// Fixed interval, anchored to the Unix epoch so slots are stable
    /// across restarts.
    Every(Duration),
    /// Fixed time of day, UTC.
    DailyAt(NaiveTime),
    /// Fixed weekday and time of day, UTC.
    WeeklyAt(Weekday, NaiveTime),
}

impl Cadence {
    pub fn period(&self) -> Duration {
        match self {
            Cadence::Every(d) => *d,
            Cadence::DailyAt(_) => Duration::days(1),
            Cadence::WeeklyAt(_, _) => Duration::days(7),
        }
    }

    /// The most recent trigger instant at or before `now`.
    pub fn latest_trigger(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Cadence::Every(d) => {
                let secs = d.num_seconds().max(1);
                let aligned = now.timestamp() - now.timestamp().rem_euclid(secs);
                DateTime::from_timestamp(aligned, 0).unwrap_or(now)
            }
            Cadence::DailyAt(time) => {
                let candidate = now.date_naive().and_time(*time).and_utc();
                if candidate > now {
                    candidate - Duration::days(1)
                } else {
                    candidate
                }
            }
            Cadence::WeeklyAt(weekday, time) => {
                let days_back = (now.weekday().num_days_from_monday() as i64
                    - weekday.num_days_from_monday() as i64)
                    .rem_euclid(7);
                let candidate = (now.date_naive() - Duration::days(days_back))
                    .and_time(*time)
                    .and_utc();
                if candidate > now {
                    candidate - Duration::days(7)
                } else {
                    candidate
                }
            }
        }
    }

    /// Deterministic key for the slot a trigger instant belongs to.
    pub fn slot_key(&self, trigger: DateTime<Utc>) -> String {
        match self {
            Cadence::Every(_) => trigger.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            Cadence::DailyAt(_) => trigger.format("%Y-%m-%d").to_string(),
            Cadence::WeeklyAt(_, _) => {
                let week = trigger.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
        }
    }

    /// Count trigger instants after `after` up to `now`. Bounded, so a
    /// very long outage cannot spin this forever.
    pub fn triggers_since(&self, after: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
        let mut trigger = self.latest_trigger(now);
        let mut count = 0;
        while trigger > after && count < 1000 {
            count += 1;
            trigger -= self.period();
        }
        count
    }
}

/// A slot that should run now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueSlot {
    pub trigger: DateTime<Utc>,
    pub key: String,
    /// Trigger instants elapsed since the last completion; more than
    /// one means downtime swallowed slots and only the latest runs.
    pub missed: u32,
}

/// Decide whether a kind is due, from its durable state and the clock
/// alone.
pub fn due_slot(cadence: &Cadence, state: Option<&ScheduleState>, now: DateTime<Utc>) -> Option<DueSlot> {
    let trigger = cadence.latest_trigger(now);
    let key = cadence.slot_key(trigger);
    match state {
        Some(state) if state.last_completed_slot == key => None,
        Some(state) => {
            let missed = cadence.triggers_since(state.last_completed_at, now).max(1);
            Some(DueSlot { trigger, key, missed })
        }
        None => Some(DueSlot {
            trigger,
            key,
            missed: 1,
        }),
    }
}

/// Per-kind state machine: Idle -> Due -> Running -> Idle, or
/// Running -> Failed and retried on the next tick. `Running` doubles
/// as the overlap guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Due,
    Running,
    Failed,
}

struct ScheduleDriver {
    kind: ScheduleKind,
    cadence: Cadence,
    state: Mutex<CycleState>,
    consecutive_failures: AtomicU32,
}

impl ScheduleDriver {
    fn new(kind: ScheduleKind, cadence: Cadence) -> Self {
        Self {
            kind,
            cadence,
            state: Mutex::new(CycleState::Idle),
            consecutive_failures: AtomicU32::new(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    NotDue,
    AlreadyRunning,
    Completed { slot: String },
    /// The slot failed repeatedly and was consumed so it cannot go
    /// stale; reported for the operator.
    GaveUp { slot: String },
}

/// Drives collection and digest cycles off wall-clock time, durably
/// recording completions so restarts catch up to the latest missed
/// slot instead of replaying history.
pub struct Scheduler {
    store: Arc<Store>,
    harvester: Arc<Harvester>,
    digests: Arc<DigestService>,
    collection: ScheduleDriver,
    daily: ScheduleDriver,
    weekly: ScheduleDriver,
    tick_interval: std::time::Duration,
    run_on_startup: bool,
    give_up_after: u32,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        harvester: Arc<Harvester>,
        digests: Arc<DigestService>,
        config: &ScheduleConfig,
        give_up_after: u32,
    ) -> Self {
        Self {
            store,
            harvester,
            digests,
            collection: ScheduleDriver::new(
                ScheduleKind::Collection,
                Cadence::Every(Duration::minutes(config.collect_interval_minutes as i64)),
            ),
            daily: ScheduleDriver::new(
                ScheduleKind::DailyDigest,
                Cadence::DailyAt(config.daily_digest_time),
            ),
            weekly: ScheduleDriver::new(
                ScheduleKind::WeeklyDigest,
                Cadence::WeeklyAt(config.weekly_digest_day, config.weekly_digest_time),
            ),
            tick_interval: std::time::Duration::from_secs(30),
            run_on_startup: config.run_on_startup,
            give_up_after: give_up_after.max(1),
        }
    }

    pub fn with_tick_interval(mut self, interval: std::time::Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    fn driver(&self, kind: ScheduleKind) -> &ScheduleDriver {
        match kind {
            ScheduleKind::Collection => &self.collection,
            ScheduleKind::DailyDigest => &self.daily,
            ScheduleKind::WeeklyDigest => &self.weekly,
        }
    }

    /// Evaluate one schedule kind at the given instant, running its
    /// cycle when due. `now` is injected so downtime scenarios are
    /// testable without a clock.
    pub async fn tick_kind(&self, kind: ScheduleKind, now: DateTime<Utc>) -> Result<TickOutcome> {
        let driver = self.driver(kind);

        let due = {
            let mut state = driver.state.lock().await;
            if *state == CycleState::Running {
                return Ok(TickOutcome::AlreadyRunning);
            }
            let persisted = self.store.load_schedule_state(kind).await?;
            let due = match due_slot(&driver.cadence, persisted.as_ref(), now) {
                Some(due) => due,
                None => {
                    *state = CycleState::Idle;
                    return Ok(TickOutcome::NotDue);
                }
            };
            if due.missed > 1 {
                warn!(
                    "schedule catch-up ambiguity for {}: {} slots missed during downtime, running only the latest ({})",
                    kind, due.missed, due.key
                );
            }
            // Due -> Running while the lock is held, so a concurrent
            // tick can never start a second overlapping cycle.
            *state = CycleState::Running;
            due
        };

        info!("{} slot {} is due, running", kind, due.key);
        let result = self.execute(kind, due.trigger).await;

        let mut state = driver.state.lock().await;
        match result {
            Ok(()) => {
                // Completion is recorded only after the downstream
                // action confirmed.
                self.store
                    .record_completion(kind, &due.key, Utc::now())
                    .await?;
                driver.consecutive_failures.store(0, Ordering::Relaxed);
                *state = CycleState::Idle;
                info!("{} slot {} completed", kind, due.key);
                Ok(TickOutcome::Completed { slot: due.key })
            }
            Err(e) => {
                *state = CycleState::Failed;
                let failures = driver.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.give_up_after {
                    error!(
                        "{} slot {} failed {} consecutive times, giving up on this slot; operator attention required: {}",
                        kind, due.key, failures, e
                    );
                    self.store
                        .record_completion(kind, &due.key, Utc::now())
                        .await?;
                    driver.consecutive_failures.store(0, Ordering::Relaxed);
                    *state = CycleState::Idle;
                    return Ok(TickOutcome::GaveUp { slot: due.key });
                }
                error!("{} slot {} failed (attempt {}): {}", kind, due.key, failures, e);
                Err(e)
            }
        }
    }

    async fn execute(&self, kind: ScheduleKind, trigger: DateTime<Utc>) -> Result<()> {
        match kind {
            ScheduleKind::Collection => {
                let since = self.collect_since(trigger).await?;
                let report = self.harvester.run_cycle(since).await?;
                if report.is_partial() {
                    warn!(
                        "collection cycle {} completed with {} source failures",
                        report.cycle_id,
                        report.source_failures.len()
                    );
                }
                if let Err(e) = self.store.purge_expired(Utc::now()).await {
                    warn!("expiry purge failed: {}", e);
                }
                Ok(())
            }
            ScheduleKind::DailyDigest => self
                .digests
                .run_slot(DigestKind::Daily, trigger)
                .await
                .map(|_| ()),
            ScheduleKind::WeeklyDigest => self
                .digests
                .run_slot(DigestKind::Weekly, trigger)
                .await
                .map(|_| ()),
        }
    }

    async fn collect_since(&self, trigger: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let state = self.store.load_schedule_state(ScheduleKind::Collection).await?;
        Ok(state
            .map(|s| s.last_completed_at)
            .unwrap_or(trigger - self.collection.cadence.period()))
    }

    pub async fn tick_all(&self, now: DateTime<Utc>) {
        for kind in [
            ScheduleKind::Collection,
            ScheduleKind::DailyDigest,
            ScheduleKind::WeeklyDigest,
        ] {
            if let Err(e) = self.tick_kind(kind, now).await {
                error!("{} tick failed: {}", kind, e);
            }
        }
    }

    /// Force an immediate collection cycle, outside the cadence. The
    /// entry point the HTTP layer calls for manual triggers.
    pub async fn force_collection(&self) -> Result<CycleReport> {
        let now = Utc::now();
        let since = self.collect_since(now).await?;
        let report = self.harvester.run_cycle(since).await?;
        let trigger = self.collection.cadence.latest_trigger(now);
        let key = self.collection.cadence.slot_key(trigger);
        self.store
            .record_completion(ScheduleKind::Collection, &key, Utc::now())
            .await?;
        Ok(report)
    }

    /// Force a digest for the current slot of the given kind.
    pub async fn force_digest(&self, kind: DigestKind) -> Result<crate::digest::DigestOutcome> {
        let (schedule_kind, driver) = match kind {
            DigestKind::Daily => (ScheduleKind::DailyDigest, &self.daily),
            DigestKind::Weekly => (ScheduleKind::WeeklyDigest, &self.weekly),
        };
        let now = Utc::now();
        let trigger = driver.cadence.latest_trigger(now);
        let outcome = self.digests.run_slot(kind, trigger).await?;
        self.store
            .record_completion(schedule_kind, &driver.cadence.slot_key(trigger), Utc::now())
            .await?;
        Ok(outcome)
    }

    /// Scheduler loop; ticks until the surrounding task is dropped.
    pub async fn run(&self) {
        if self.run_on_startup {
            match self.force_collection().await {
                Ok(report) => info!(
                    "startup collection finished: {} new, {} updated",
                    report.persisted_new, report.persisted_updated
                ),
                Err(e) => error!("startup collection failed: {}", e),
            }
        }

        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            interval.tick().await;
            self.tick_all(Utc::now()).await;
        }
    }
}
