use anyhow::Context;
use clap::{Parser, Subcommand};
use paperscout::{
    sources, AppConfig, DeliveryGateway, DigestKind, DigestService, Enricher, Harvester,
    HarvestOptions, HttpSummarizer, KeywordSummarizer, LogTransport, Scheduler, SmtpMailer, Store,
    Summarizer, Transport,
};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "paperscout", about = "Research-paper and news digest pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler loop (collection + digests)
    Run,
    /// Force one collection cycle now
    Collect,
    /// Force a digest for the current slot
    Digest {
        /// "daily" or "weekly"
        kind: String,
    },
    /// Remove articles past their retention window
    Purge,
    /// Show recently seen articles
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("loading configuration")?;

    let store = Arc::new(
        Store::connect(&config.database_url)
            .await
            .with_context(|| format!("connecting to {}", config.database_url))?,
    );

    let summarizer: Arc<dyn Summarizer> = match (
        config.enrichment.enabled,
        &config.enrichment.api_url,
        &config.enrichment.api_key,
    ) {
        (true, Some(url), Some(key)) => Arc::new(HttpSummarizer::new(
            url.clone(),
            key.clone(),
            config.enrichment.timeout,
        )),
        (true, _, _) => {
            warn!("enrichment enabled but ENRICHMENT_API_URL/KEY missing, using offline summarizer");
            Arc::new(KeywordSummarizer::new())
        }
        _ => Arc::new(KeywordSummarizer::new()),
    };
    let enricher = Enricher::new(
        summarizer,
        config.enrichment.timeout,
        config.enrichment.max_summary_chars,
        config.enrichment.staleness,
    );

    let harvester = Arc::new(Harvester::new(
        sources::enabled_connectors(&config),
        enricher,
        Arc::clone(&store),
        HarvestOptions {
            fetch_timeout: config.fetch.timeout,
            max_in_flight: config.fetch.max_concurrent_fetches,
            retention: config.retention(),
        },
    ));

    let transport: Arc<dyn Transport> = if config.delivery.smtp_host.is_some() {
        Arc::new(SmtpMailer::from_config(&config.delivery)?)
    } else {
        warn!("no SMTP_HOST configured, digests will be logged instead of sent");
        Arc::new(LogTransport)
    };
    let gateway = Arc::new(DeliveryGateway::new(
        transport,
        Arc::clone(&store),
        config.delivery.retry.clone(),
    ));
    let digests = Arc::new(DigestService::new(
        Arc::clone(&store),
        gateway,
        config.delivery.recipients.clone(),
    ));

    let scheduler = Scheduler::new(
        Arc::clone(&store),
        harvester,
        digests,
        &config.schedule,
        config.delivery.retry.max_attempts,
    );

    match cli.command {
        Command::Run => {
            info!("paperscout starting");
            tokio::select! {
                _ = scheduler.run() => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested, in-flight work is already committed");
                }
            }
        }
        Command::Collect => {
            let report = scheduler.force_collection().await?;
            info!(
                "collection finished: {} fetched, {} canonical, {} new, {} updated, {} source failures",
                report.items_fetched,
                report.drafts_after_dedup,
                report.persisted_new,
                report.persisted_updated,
                report.source_failures.len()
            );
            for stat in store.stats().await? {
                info!("  {} = {}", stat.0, stat.1);
            }
        }
        Command::Digest { kind } => {
            let kind = match kind.as_str() {
                "daily" => DigestKind::Daily,
                "weekly" => DigestKind::Weekly,
                other => anyhow::bail!("unknown digest kind: {}", other),
            };
            let outcome = scheduler.force_digest(kind).await?;
            info!("digest outcome: {:?}", outcome);
        }
        Command::Purge => {
            let purged = store.purge_expired(chrono::Utc::now()).await?;
            info!("purged {} expired articles", purged);
        }
        Command::Recent { limit } => {
            for article in store.recent(limit).await? {
                println!(
                    "{}  [{}] {:.2}  {}",
                    article.last_seen_at.format("%Y-%m-%d %H:%M"),
                    article.category,
                    article.relevance_score,
                    article.title
                );
            }
        }
    }

    Ok(())
}
