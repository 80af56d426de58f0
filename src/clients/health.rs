use std::{collections::BTreeMap, sync::Arc, time::Instant};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{
    clients::{database::BookingStore, rbmq::ConnectionManager},
    models::{
        health::{HealthCheckResponse, ServiceHealth},
        status::ConsumerState,
    },
    wire::dead_letter_queue,
};

struct ConsumerProbe {
    queue: String,
    state: watch::Receiver<ConsumerState>,
}

pub struct HealthChecker {
    manager: ConnectionManager,
    store: Arc<dyn BookingStore>,
    consumers: Vec<ConsumerProbe>,
}

impl HealthChecker {
    pub fn new(manager: ConnectionManager, store: Arc<dyn BookingStore>) -> Self {
        Self {
            manager,
            store,
            consumers: Vec::new(),
        }
    }

    pub fn with_consumer(mut self, queue: &str, state: watch::Receiver<ConsumerState>) -> Self {
        self.consumers.push(ConsumerProbe {
            queue: queue.to_string(),
            state,
        });
        self
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = BTreeMap::new();

        let broker_health = self.check_broker().await;
        let broker_up = broker_health.error.is_none();
        checks.insert("message_broker".to_string(), broker_health);

        checks.insert("database".to_string(), self.check_database().await);

        for consumer in &self.consumers {
            let health = self.check_consumer(consumer, broker_up).await;
            checks.insert(format!("consumer:{}", consumer.queue), health);
        }

        HealthCheckResponse::from_checks(checks)
    }

    async fn check_broker(&self) -> ServiceHealth {
        let start = Instant::now();

        if self.manager.is_connected().await {
            let elapsed = start.elapsed().as_millis() as u64;
            debug!(response_time_ms = elapsed, "RabbitMQ health check passed");
            ServiceHealth::healthy(elapsed)
        } else {
            warn!("RabbitMQ connection is not open");
            ServiceHealth::unhealthy("Connection is not open".to_string())
        }
    }

    async fn check_database(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.store.health_check().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Database health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Database health check failed");
                ServiceHealth::unhealthy(format!("Health check query failed: {}", e))
            }
        }
    }

    async fn check_consumer(&self, consumer: &ConsumerProbe, broker_up: bool) -> ServiceHealth {
        let state = *consumer.state.borrow();
        let health = ServiceHealth::from_consumer_state(state);

        if !broker_up {
            return health;
        }

        let depths = async {
            let queue_depth = self.manager.queue_depth(&consumer.queue).await?;
            let dead_letter_depth = self
                .manager
                .queue_depth(&dead_letter_queue(&consumer.queue))
                .await?;
            Ok::<_, crate::error::PipelineError>((queue_depth, dead_letter_depth))
        };

        match depths.await {
            Ok((queue_depth, dead_letter_depth)) => health.with_depths(queue_depth, dead_letter_depth),
            Err(e) => {
                warn!(queue = %consumer.queue, error = %e, "Failed to read queue depth");
                health
            }
        }
    }
}
