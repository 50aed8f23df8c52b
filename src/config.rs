use crate::types::{Result, ScoutError};
use backoff::exponential::ExponentialBackoff;
use chrono::{NaiveTime, Weekday};
use std::env;
use std::time::Duration;

/// Bounded-attempt retry policy threaded into delivery and enrichment
/// call sites.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> ExponentialBackoff<backoff::SystemClock> {
        ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            max_interval: self.base_delay * 32,
            multiplier: self.multiplier,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_concurrent_fetches: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "paperscout/0.1".to_string(),
            timeout: Duration::from_secs(30),
            max_concurrent_fetches: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourcesConfig {
    pub arxiv_enabled: bool,
    pub arxiv_categories: Vec<String>,
    pub arxiv_max_results: usize,
    pub feed_enabled: bool,
    pub feed_urls: Vec<String>,
    pub scrape_enabled: bool,
    pub scrape_pages: Vec<String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            arxiv_enabled: true,
            arxiv_categories: vec!["cs.CL".to_string(), "cs.LG".to_string()],
            arxiv_max_results: 50,
            feed_enabled: true,
            feed_urls: Vec::new(),
            scrape_enabled: false,
            scrape_pages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_summary_chars: usize,
    /// Enrichment older than this is considered stale and re-run on the
    /// next re-sighting.
    pub staleness: chrono::Duration,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: None,
            api_key: None,
            timeout: Duration::from_secs(20),
            max_summary_chars: 400,
            staleness: chrono::Duration::days(7),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub collect_interval_minutes: u32,
    pub daily_digest_time: NaiveTime,
    pub weekly_digest_day: Weekday,
    pub weekly_digest_time: NaiveTime,
    pub run_on_startup: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            collect_interval_minutes: 30,
            daily_digest_time: NaiveTime::from_hms_opt(7, 30, 0).unwrap_or_default(),
            weekly_digest_day: Weekday::Mon,
            weekly_digest_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
            run_on_startup: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeliveryConfig {
    pub recipients: Vec<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub fetch: FetchConfig,
    pub sources: SourcesConfig,
    pub enrichment: EnrichmentConfig,
    pub schedule: ScheduleConfig,
    pub delivery: DeliveryConfig,
    pub retention_days: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://paperscout.db?mode=rwc".to_string(),
            fetch: FetchConfig::default(),
            sources: SourcesConfig::default(),
            enrichment: EnrichmentConfig::default(),
            schedule: ScheduleConfig::default(),
            delivery: DeliveryConfig::default(),
            retention_days: 90,
        }
    }
}

impl AppConfig {
    /// Read the whole configuration surface from the environment,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = AppConfig::default();

        let fetch = FetchConfig {
            user_agent: env_or("FETCH_USER_AGENT", &defaults.fetch.user_agent),
            timeout: Duration::from_secs(env_parse("FETCH_TIMEOUT_SECONDS", 30)?),
            max_concurrent_fetches: env_parse("MAX_CONCURRENT_FETCHES", 4)?,
        };

        let sources = SourcesConfig {
            arxiv_enabled: env_flag("ARXIV_ENABLED", true),
            arxiv_categories: env_list("ARXIV_CATEGORIES", &defaults.sources.arxiv_categories),
            arxiv_max_results: env_parse("ARXIV_MAX_RESULTS", 50)?,
            feed_enabled: env_flag("FEED_ENABLED", true),
            feed_urls: env_list("FEED_URLS", &[]),
            scrape_enabled: env_flag("SCRAPE_ENABLED", false),
            scrape_pages: env_list("SCRAPE_PAGES", &[]),
        };

        let enrichment = EnrichmentConfig {
            enabled: env_flag("ENRICHMENT_ENABLED", false),
            api_url: env::var("ENRICHMENT_API_URL").ok(),
            api_key: env::var("ENRICHMENT_API_KEY").ok(),
            timeout: Duration::from_secs(env_parse("ENRICH_TIMEOUT_SECONDS", 20)?),
            max_summary_chars: env_parse("ENRICH_MAX_SUMMARY_CHARS", 400)?,
            staleness: chrono::Duration::days(env_parse("ENRICH_STALENESS_DAYS", 7)?),
        };

        let schedule = ScheduleConfig {
            collect_interval_minutes: env_parse("COLLECT_INTERVAL_MINUTES", 30)?,
            daily_digest_time: parse_time(&env_or("DAILY_DIGEST_TIME", "07:30"))?,
            weekly_digest_day: parse_weekday(&env_or("WEEKLY_DIGEST_DAY", "mon"))?,
            weekly_digest_time: parse_time(&env_or("WEEKLY_DIGEST_TIME", "08:00"))?,
            run_on_startup: env_flag("RUN_ON_STARTUP", false),
        };

        let delivery = DeliveryConfig {
            recipients: env_list("DIGEST_RECIPIENTS", &[]),
            smtp_host: env::var("SMTP_HOST").ok(),
            smtp_port: env_parse("SMTP_PORT", 587)?,
            smtp_username: env::var("SMTP_USERNAME").ok(),
            smtp_password: env::var("SMTP_PASSWORD").ok(),
            smtp_from: env::var("SMTP_FROM").ok(),
            retry: RetryPolicy {
                max_attempts: env_parse("DELIVERY_MAX_ATTEMPTS", 3)?,
                base_delay: Duration::from_secs(env_parse("DELIVERY_RETRY_BASE_SECONDS", 5)?),
                multiplier: 2.0,
            },
        };

        Ok(AppConfig {
            database_url: env_or("DATABASE_URL", &defaults.database_url),
            fetch,
            sources,
            enrichment,
            schedule,
            delivery,
            retention_days: env_parse("RETENTION_DAYS", 90)?,
        })
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_list(key: &str, default: &[String]) -> Vec<String> {
    match env::var(key) {
        Ok(v) => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.to_vec(),
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| ScoutError::Config(format!("invalid value for {}: {}", key, v))),
        Err(_) => Ok(default),
    }
}

pub fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| ScoutError::Config(format!("invalid time of day: {}", s)))
}

pub fn parse_weekday(s: &str) -> Result<Weekday> {
    match s.trim().to_lowercase().as_str() {
        "mon" | "monday" => Ok(Weekday::Mon),
        "tue" | "tuesday" => Ok(Weekday::Tue),
        "wed" | "wednesday" => Ok(Weekday::Wed),
        "thu" | "thursday" => Ok(Weekday::Thu),
        "fri" | "friday" => Ok(Weekday::Fri),
        "sat" | "saturday" => Ok(Weekday::Sat),
        "sun" | "sunday" => Ok(Weekday::Sun),
        _ => Err(ScoutError::Config(format!("invalid weekday: {}", s))),
    }
}
