pub mod config;
pub mod dedup;
pub mod delivery;
pub mod digest;
pub mod enrich;
pub mod normalize;
pub mod pipeline;
pub mod scheduler;
pub mod sources;
pub mod store;
pub mod types;

pub use config::{AppConfig, RetryPolicy};
pub use delivery::{DeliveryGateway, LogTransport, SmtpMailer, Transport};
pub use digest::{DigestKind, DigestOutcome, DigestService};
pub use enrich::{Enricher, HttpSummarizer, KeywordSummarizer, Summarizer};
pub use pipeline::{Harvester, HarvestOptions};
pub use scheduler::{Scheduler, TickOutcome};
pub use sources::{ArxivConnector, FeedConnector, SourceConnector, WebpageConnector};
pub use store::{ArticleFilter, Store, UpsertOutcome};
pub use types::*;
