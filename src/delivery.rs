use crate::config::{DeliveryConfig, RetryPolicy};
use crate::digest::DigestPayload;
use crate::store::Store;
use crate::types::{DeliveryRecord, Result, ScoutError};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use chrono::Utc;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::Transport as _;
use lettre::{Message, SmtpTransport};
use std::sync::Arc;
use tracing::{info, warn};

/// Outbound transport boundary. SMTP in production, an in-memory
/// implementation in tests, a logging one for local runs.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> String;

    async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<()>;
}

/// SMTP transport over lettre. lettre's SMTP client is blocking, so
/// sends run on the blocking pool.
pub struct SmtpMailer {
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    from: String,
}

impl SmtpMailer {
    pub fn from_config(config: &DeliveryConfig) -> Result<Self> {
        let host = config
            .smtp_host
            .clone()
            .ok_or_else(|| ScoutError::Config("SMTP_HOST is required for SMTP delivery".to_string()))?;
        let from = config
            .smtp_from
            .clone()
            .ok_or_else(|| ScoutError::Config("SMTP_FROM is required for SMTP delivery".to_string()))?;
        Ok(Self {
            host,
            port: config.smtp_port,
            username: config.smtp_username.clone(),
            password: config.smtp_password.clone(),
            from,
        })
    }
}

#[async_trait]
impl Transport for SmtpMailer {
    fn name(&self) -> String {
        format!("smtp ({})", self.host)
    }

    async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<()> {
        let host = self.host.clone();
        let port = self.port;
        let username = self.username.clone();
        let password = self.password.clone();
        let from = self.from.clone();
        let subject = subject.to_string();
        let body = body.to_string();
        let recipients = recipients.to_vec();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let from_mailbox: Mailbox = from
                .parse()
                .map_err(|e| ScoutError::Mail(format!("invalid sender {}: {}", from, e)))?;

            let mut builder = SmtpTransport::relay(&host)
                .map_err(|e| ScoutError::Mail(e.to_string()))?
                .port(port);
            if let (Some(user), Some(pass)) = (username, password) {
                builder = builder.credentials(Credentials::new(user, pass));
            }
            let transport = builder.build();

            for recipient in &recipients {
                let to: Mailbox = recipient
                    .parse()
                    .map_err(|e| ScoutError::Mail(format!("invalid recipient {}: {}", recipient, e)))?;
                let message = Message::builder()
                    .from(from_mailbox.clone())
                    .to(to)
                    .subject(subject.clone())
                    .body(body.clone())
                    .map_err(|e| ScoutError::Mail(e.to_string()))?;
                transport
                    .send(&message)
                    .map_err(|e| ScoutError::Mail(e.to_string()))?;
            }
            Ok(())
        })
        .await
        .map_err(|e| ScoutError::Mail(format!("mail task failed: {}", e)))?
    }
}

/// Logs the digest instead of sending it. Used when no SMTP host is
/// configured.
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    fn name(&self) -> String {
        "log".to_string()
    }

    async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<()> {
        info!(
            "digest \"{}\" for {} recipients:\n{}",
            subject,
            recipients.len(),
            body
        );
        Ok(())
    }
}

/// Sends composed digests and records the delivery so repeats are
/// suppressed. Retries are bounded by the configured policy; a crash
/// after the transport accepts but before the record lands is the
/// documented accepted risk (re-delivery over silent loss).
pub struct DeliveryGateway {
    transport: Arc<dyn Transport>,
    store: Arc<Store>,
    policy: RetryPolicy,
}

impl DeliveryGateway {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<Store>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            store,
            policy,
        }
    }

    pub async fn deliver(
        &self,
        digest_key: &str,
        payload: &DigestPayload,
        article_fingerprints: Vec<String>,
        recipients: &[String],
    ) -> Result<()> {
        let mut backoff = self.policy.backoff();
        let mut last_error: Option<ScoutError> = None;

        for attempt in 1..=self.policy.max_attempts {
            match self
                .transport
                .send(&payload.subject, &payload.body, recipients)
                .await
            {
                Ok(()) => {
                    let record = DeliveryRecord {
                        digest_key: digest_key.to_string(),
                        sent_at: Utc::now(),
                        article_fingerprints,
                        recipients: recipients.to_vec(),
                    };
                    if !self.store.insert_delivery(&record).await? {
                        warn!("delivery record for {} already existed", digest_key);
                    }
                    info!(
                        "delivered digest {} to {} recipients via {} (attempt {})",
                        digest_key,
                        recipients.len(),
                        self.transport.name(),
                        attempt
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "delivery attempt {}/{} for {} failed: {}",
                        attempt, self.policy.max_attempts, digest_key, e
                    );
                    last_error = Some(e);
                    if attempt < self.policy.max_attempts {
                        if let Some(delay) = backoff.next_backoff() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        Err(ScoutError::DeliveryFailed {
            attempts: self.policy.max_attempts,
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown transport error".to_string()),
        })
    }
}
