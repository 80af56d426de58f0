use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::{config::LogFormat, models::retry::BackoffConfig};

/// Delay before reconnect attempt `attempt` (0-based): exponential, ±10% jitter,
/// never above `max_delay_ms`.
pub fn backoff_delay(config: &BackoffConfig, attempt: u32) -> Duration {
    let delay_ms = config
        .initial_delay_ms
        .saturating_mul(config.backoff_multiplier.max(1).saturating_pow(attempt))
        .min(config.max_delay_ms);

    let jitter = rand::random_range(-0.1..=0.1);

    let jittered_delay = (delay_ms as f64 * (1.0 + jitter)) as u64;

    Duration::from_millis(jittered_delay.min(config.max_delay_ms))
}

pub fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(false))
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .init(),
    }
}
