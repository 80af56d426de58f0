use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::retry::{BackoffConfig, RetryPolicy};

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_rabbitmq_host")]
    pub rabbitmq_host: String,
    #[serde(default = "default_rabbitmq_port")]
    pub rabbitmq_port: u16,
    #[serde(default = "default_guest")]
    pub rabbitmq_username: String,
    #[serde(default = "default_guest")]
    pub rabbitmq_password: String,
    #[serde(default = "default_vhost")]
    pub rabbitmq_vhost: String,

    #[serde(default = "default_booking_queue")]
    pub booking_queue: String,
    #[serde(default = "default_admin_queue")]
    pub admin_queue: String,
    #[serde(default = "default_reschedule_queue")]
    pub reschedule_queue: String,
    #[serde(default = "default_dead_letter_exchange")]
    pub dead_letter_exchange: String,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,

    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub reconnect_initial_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    #[serde(default = "default_reconnect_backoff_multiplier")]
    pub reconnect_backoff_multiplier: u64,

    pub database_url: String,

    pub mail_relay_url: String,
    #[serde(default = "default_mail_timeout_seconds")]
    pub mail_timeout_seconds: u64,

    #[serde(default = "default_server_port")]
    pub server_port: u16,

    #[serde(default)]
    pub log_format: LogFormat,
}

/// Queue names for the three notification categories.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueNames {
    pub booking: String,
    pub admin: String,
    pub reschedule: String,
}

impl QueueNames {
    pub fn all(&self) -> Vec<String> {
        vec![
            self.booking.clone(),
            self.admin.clone(),
            self.reschedule.clone(),
        ]
    }
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        Ok(config)
    }

    /// Builds a config from explicit `(NAME, value)` pairs instead of the process environment.
    pub fn from_vars<I>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter::<_, Self>(vars)
            .map_err(|e| anyhow!("Invalid or missing configuration value: {}", e))
    }

    pub fn amqp_uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.rabbitmq_username,
            self.rabbitmq_password,
            self.rabbitmq_host,
            self.rabbitmq_port,
            self.rabbitmq_vhost.replace('/', "%2f")
        )
    }

    /// `host:port` without credentials, for logs and errors.
    pub fn broker_endpoint(&self) -> String {
        format!("{}:{}", self.rabbitmq_host, self.rabbitmq_port)
    }

    pub fn queue_names(&self) -> QueueNames {
        QueueNames {
            booking: self.booking_queue.clone(),
            admin: self.admin_queue.clone(),
            reschedule: self.reschedule_queue.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay_seconds),
        }
    }

    pub fn reconnect_backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay_ms: self.reconnect_initial_delay_ms,
            max_delay_ms: self.reconnect_max_delay_ms,
            backoff_multiplier: self.reconnect_backoff_multiplier,
        }
    }
}

fn default_rabbitmq_host() -> String {
    "localhost".to_string()
}

fn default_rabbitmq_port() -> u16 {
    5672
}

fn default_guest() -> String {
    "guest".to_string()
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_booking_queue() -> String {
    "travel.bookings".to_string()
}

fn default_admin_queue() -> String {
    "travel.admin".to_string()
}

fn default_reschedule_queue() -> String {
    "travel.reschedule".to_string()
}

fn default_dead_letter_exchange() -> String {
    "travel.dlx".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_seconds() -> u64 {
    5
}

fn default_reconnect_initial_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_reconnect_backoff_multiplier() -> u64 {
    2
}

fn default_mail_timeout_seconds() -> u64 {
    30
}

fn default_server_port() -> u16 {
    8080
}
