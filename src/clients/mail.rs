use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use crate::{config::Config, models::email::EmailMessage};

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Outbound mail capability. Any error is treated as transient by the handlers.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, email: &EmailMessage, correlation_id: &str) -> Result<(), Error>;
}

/// Hands emails to an HTTP mail relay as JSON.
pub struct HttpMailSender {
    http_client: Client,
    endpoint: String,
}

impl HttpMailSender {
    pub fn new(config: &Config) -> Result<Self, Error> {
        Self::with_timeout(
            &config.mail_relay_url,
            Duration::from_secs(config.mail_timeout_seconds),
        )
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        let endpoint = format!("{}/api/v1/emails", base_url.trim_end_matches('/'));

        info!(endpoint = %endpoint, "Mail relay client initialized");

        Ok(Self {
            http_client,
            endpoint,
        })
    }
}

#[async_trait]
impl MailSender for HttpMailSender {
    async fn send(&self, email: &EmailMessage, correlation_id: &str) -> Result<(), Error> {
        debug!(
            to = %email.to_email,
            correlation_id,
            "Sending email through mail relay"
        );

        let response = self
            .http_client
            .post(&self.endpoint)
            .header(CORRELATION_ID_HEADER, correlation_id)
            .json(email)
            .send()
            .await
            .map_err(|e| anyhow!("Mail relay request failed: {}", e))?;

        let status = response.status();

        if status.is_success() {
            info!(to = %email.to_email, correlation_id, "Email accepted by mail relay");
            Ok(())
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Err(anyhow!(
                "Mail relay returned status {}: {}",
                status,
                error_text
            ))
        }
    }
}
