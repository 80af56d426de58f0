use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::status::ConsumerState;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub checks: BTreeMap<String, ServiceHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer_state: Option<ConsumerState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_letter_depth: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceHealth {
    pub fn healthy(response_time_ms: u64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            response_time_ms: Some(response_time_ms),
            consumer_state: None,
            queue_depth: None,
            dead_letter_depth: None,
            error: None,
        }
    }

    pub fn unhealthy(error: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: None,
            consumer_state: None,
            queue_depth: None,
            dead_letter_depth: None,
            error: Some(error),
        }
    }

    /// A consumer is healthy only while consuming; reconnecting or subscribing is degraded.
    pub fn from_consumer_state(state: ConsumerState) -> Self {
        let status = match state {
            ConsumerState::Consuming => HealthStatus::Healthy,
            ConsumerState::Subscribing | ConsumerState::Reconnecting => HealthStatus::Degraded,
            ConsumerState::Stopped => HealthStatus::Unhealthy,
        };

        Self {
            status,
            response_time_ms: None,
            consumer_state: Some(state),
            queue_depth: None,
            dead_letter_depth: None,
            error: None,
        }
    }

    pub fn with_depths(mut self, queue_depth: u32, dead_letter_depth: u32) -> Self {
        self.queue_depth = Some(queue_depth);
        self.dead_letter_depth = Some(dead_letter_depth);
        self
    }
}

impl HealthCheckResponse {
    pub fn from_checks(checks: BTreeMap<String, ServiceHealth>) -> Self {
        let status = if checks
            .values()
            .any(|health| health.status == HealthStatus::Unhealthy)
        {
            HealthStatus::Unhealthy
        } else if checks
            .values()
            .any(|health| health.status == HealthStatus::Degraded)
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            timestamp: Utc::now(),
            checks,
        }
    }
}
