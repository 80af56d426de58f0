use std::fmt::{Display, Formatter, Result};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerState {
    Stopped,
    Subscribing,
    Consuming,
    Reconnecting,
}

/// Terminal outcome of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handler succeeded, delivery acked.
    Acknowledged,
    /// Republished to the same queue with `retry-count` set to `retry_count`, original acked.
    Retried { retry_count: u32 },
    /// Forwarded to `<queue>.dlq`, original acked.
    DeadLettered,
    /// Negatively acknowledged with requeue; the broker redelivers it.
    Requeued,
    /// Undecodable payload, acked and dropped.
    Discarded,
    /// The settle call itself failed; the broker redelivers once the channel closes.
    Unsettled,
}

impl Display for ConsumerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            ConsumerState::Stopped => write!(f, "stopped"),
            ConsumerState::Subscribing => write!(f, "subscribing"),
            ConsumerState::Consuming => write!(f, "consuming"),
            ConsumerState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

impl Display for Disposition {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Disposition::Acknowledged => write!(f, "acknowledged"),
            Disposition::Retried { retry_count } => write!(f, "retried({})", retry_count),
            Disposition::DeadLettered => write!(f, "dead_lettered"),
            Disposition::Requeued => write!(f, "requeued"),
            Disposition::Discarded => write!(f, "discarded"),
            Disposition::Unsettled => write!(f, "unsettled"),
        }
    }
}
