use thiserror::Error;

/// Failures surfaced by the broker connection manager and the reliable consumer.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Connect-time failure. Never retried internally; the owning loop backs off and retries.
    #[error("broker unreachable at {endpoint}: {source}")]
    BrokerUnreachable {
        endpoint: String,
        #[source]
        source: lapin::Error,
    },

    #[error("topology declaration failed for '{name}': {source}")]
    Topology {
        name: String,
        #[source]
        source: lapin::Error,
    },

    #[error("publish to '{queue}' failed: {reason}")]
    PublishFailed { queue: String, reason: String },

    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error(transparent)]
    HandlerFailure(#[from] HandlerError),

    #[error("no open broker connection")]
    NotConnected,

    #[error("operation cancelled by shutdown")]
    Cancelled,

    #[error("channel operation failed: {0}")]
    Channel(#[from] lapin::Error),
}

/// Outcome of a failed delivery handler invocation.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Worth retrying: downstream outage, timeout, transport error.
    #[error("transient delivery failure: {0:#}")]
    Transient(anyhow::Error),

    /// Retrying cannot help: missing booking, invalid payload, misrouted message.
    #[error("permanent delivery failure: {0:#}")]
    Permanent(anyhow::Error),
}

impl HandlerError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, HandlerError::Permanent(_))
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(error: anyhow::Error) -> Self {
        HandlerError::Transient(error)
    }
}
