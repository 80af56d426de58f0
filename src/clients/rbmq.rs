use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use chrono::Utc;
use lapin::{
    Channel, Connection, ConnectionProperties, ExchangeKind,
    options::{
        BasicGetOptions, BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
};
use tokio::{
    runtime::Handle,
    sync::{Mutex, RwLock},
};
use tracing::{debug, error, info, warn};

use crate::{
    clients::channel::DeliveryChannel,
    config::{Config, QueueNames},
    error::PipelineError,
    models::message::{
        AdminNotificationMessage, BookingMessage, Envelope, Payload, RescheduleMessage,
    },
    wire::{self, dead_letter_queue},
};

const PREFETCH_COUNT: u16 = 1;
const REPLY_SUCCESS: u16 = 200;

struct BrokerHandles {
    connection: Connection,
    publisher: Channel,
}

impl BrokerHandles {
    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.publisher.status().connected()
    }
}

struct Inner {
    uri: String,
    endpoint: String,
    dead_letter_exchange: String,
    queues: QueueNames,
    handles: RwLock<Option<BrokerHandles>>,
    reconnect_lock: Mutex<()>,
    publish_lock: Mutex<()>,
    disposed: AtomicBool,
}

/// Owns the single broker connection and the shared publisher channel.
///
/// Cheap to clone; all clones share the same connection. The connection is opened
/// lazily by the first publish or consumer-channel request and re-opened whenever
/// the broker drops it.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(config: &Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                uri: config.amqp_uri(),
                endpoint: config.broker_endpoint(),
                dead_letter_exchange: config.dead_letter_exchange.clone(),
                queues: config.queue_names(),
                handles: RwLock::new(None),
                reconnect_lock: Mutex::new(()),
                publish_lock: Mutex::new(()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn queue_names(&self) -> &QueueNames {
        &self.inner.queues
    }

    pub fn dead_letter_exchange(&self) -> &str {
        &self.inner.dead_letter_exchange
    }

    pub async fn is_connected(&self) -> bool {
        self.inner
            .handles
            .read()
            .await
            .as_ref()
            .is_some_and(BrokerHandles::is_open)
    }

    /// Makes sure an open connection, publisher channel and topology exist.
    ///
    /// Concurrent callers collapse into a single reconnect attempt. Connect failures
    /// are returned as [`PipelineError::BrokerUnreachable`] and not retried here.
    pub async fn ensure_infrastructure(&self) -> Result<(), PipelineError> {
        if self.is_connected().await {
            return Ok(());
        }

        let _guard = self.inner.reconnect_lock.lock().await;

        if self.is_connected().await {
            return Ok(());
        }

        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(PipelineError::Cancelled);
        }

        self.dispose_handles().await;

        let connection = Connection::connect(&self.inner.uri, ConnectionProperties::default())
            .await
            .map_err(|source| {
                error!(endpoint = %self.inner.endpoint, error = %source, "Unable to reach RabbitMQ");
                PipelineError::BrokerUnreachable {
                    endpoint: self.inner.endpoint.clone(),
                    source,
                }
            })?;

        let publisher = match self.prepare(&connection).await {
            Ok(publisher) => publisher,
            Err(e) => {
                warn!(endpoint = %self.inner.endpoint, error = %e, "RabbitMQ setup failed, closing connection");
                if let Err(close_error) =
                    connection.close(REPLY_SUCCESS, "setup failed".into()).await
                {
                    debug!(error = %close_error, "Error closing half-open connection");
                }
                return Err(e);
            }
        };

        self.register_shutdown_callback(&connection);

        *self.inner.handles.write().await = Some(BrokerHandles {
            connection,
            publisher,
        });

        info!(endpoint = %self.inner.endpoint, "RabbitMQ connection established");

        Ok(())
    }

    /// Re-runs topology declaration against the current connection. Idempotent.
    pub async fn declare_topology(&self) -> Result<(), PipelineError> {
        self.ensure_infrastructure().await?;

        let guard = self.inner.handles.read().await;
        let handles = guard.as_ref().ok_or(PipelineError::NotConnected)?;

        declare_topology(
            &handles.connection,
            &handles.publisher,
            &self.inner.dead_letter_exchange,
            &self.inner.queues.all(),
        )
        .await
    }

    /// Publishes `envelope` to `queue` as a persistent JSON message.
    ///
    /// The publisher channel is not safe for concurrent publishes, so the call holds
    /// the publish lock for its whole duration. No automatic retry.
    pub async fn publish<T: Payload>(
        &self,
        queue: &str,
        envelope: &Envelope<T>,
    ) -> Result<(), PipelineError> {
        self.ensure_infrastructure().await?;

        let (body, properties) = wire::encode(envelope)?;

        let publisher = self
            .publisher_channel()
            .await
            .ok_or_else(|| PipelineError::PublishFailed {
                queue: queue.to_string(),
                reason: "publisher channel is not available".to_string(),
            })?;

        let _guard = self.inner.publish_lock.lock().await;

        publisher
            .publish("", queue, &body, properties)
            .await
            .map_err(|e| PipelineError::PublishFailed {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        info!(
            message_id = %envelope.message_id,
            message_type = %envelope.message_type,
            queue,
            "Published message"
        );

        Ok(())
    }

    pub async fn publish_booking_confirmation(
        &self,
        envelope: &Envelope<BookingMessage>,
    ) -> Result<(), PipelineError> {
        self.publish(&self.inner.queues.booking, envelope).await
    }

    pub async fn publish_admin_notification(
        &self,
        envelope: &Envelope<AdminNotificationMessage>,
    ) -> Result<(), PipelineError> {
        self.publish(&self.inner.queues.admin, envelope).await
    }

    pub async fn publish_reschedule_confirmation(
        &self,
        envelope: &Envelope<RescheduleMessage>,
    ) -> Result<(), PipelineError> {
        self.publish(&self.inner.queues.reschedule, envelope).await
    }

    /// Opens a new, independent channel with prefetch 1 for a single consumer.
    pub async fn create_consumer_channel(&self) -> Result<Channel, PipelineError> {
        self.ensure_infrastructure().await?;

        let guard = self.inner.handles.read().await;
        let handles = guard.as_ref().ok_or(PipelineError::NotConnected)?;

        let channel = handles.connection.create_channel().await?;
        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await?;

        debug!(channel_id = channel.id(), "Consumer channel opened");

        Ok(channel)
    }

    /// Number of ready messages in `queue`.
    pub async fn queue_depth(&self, queue: &str) -> Result<u32, PipelineError> {
        self.ensure_infrastructure().await?;

        let guard = self.inner.handles.read().await;
        let handles = guard.as_ref().ok_or(PipelineError::NotConnected)?;

        let depth = passive_queue_declare(&handles.connection, queue).await?;
        Ok(depth)
    }

    /// Moves up to `max_messages` dead letters from `<queue>.dlq` back onto `queue`.
    ///
    /// Body and headers are preserved; `x-requeued` and `x-requeued-from` are stamped.
    pub async fn requeue_dead_letters(
        &self,
        queue: &str,
        max_messages: usize,
    ) -> Result<usize, PipelineError> {
        let dlq = dead_letter_queue(queue);
        let channel = self.create_consumer_channel().await?;

        info!(dlq = %dlq, target = queue, max_messages, "Starting dead-letter requeue");

        let mut requeued = 0;

        while requeued < max_messages {
            let Some(message) = channel
                .basic_get(dlq.as_str().into(), BasicGetOptions { no_ack: false })
                .await?
            else {
                info!(dlq = %dlq, "Dead-letter queue drained");
                break;
            };

            let delivery = message.delivery;
            let properties = wire::requeued_properties(&delivery.properties, &dlq, Utc::now());

            if let Err(e) = channel
                .publish("", queue, &delivery.data, properties)
                .await
            {
                error!(dlq = %dlq, error = %e, "Failed to requeue dead letter, returning it to the DLQ");
                channel.nack(delivery.delivery_tag, true).await?;
                return Err(PipelineError::PublishFailed {
                    queue: queue.to_string(),
                    reason: e.to_string(),
                });
            }

            channel.ack(delivery.delivery_tag).await?;
            requeued += 1;

            info!(
                message_id = wire::message_id(&delivery.properties).as_deref().unwrap_or("unknown"),
                requeued,
                max_messages,
                "Dead letter requeued"
            );
        }

        if let Err(e) = channel.close(REPLY_SUCCESS, "requeue complete".into()).await {
            warn!(error = %e, "Error closing requeue channel");
        }

        info!(dlq = %dlq, requeued, "Dead-letter requeue complete");

        Ok(requeued)
    }

    /// Closes the publisher channel and connection. Later calls fail with `Cancelled`.
    pub async fn shutdown(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);

        let _guard = self.inner.reconnect_lock.lock().await;
        self.dispose_handles().await;

        info!("RabbitMQ connection manager shut down");
    }

    /// Opens the publisher channel and declares topology on a fresh connection.
    async fn prepare(&self, connection: &Connection) -> Result<Channel, PipelineError> {
        let publisher = connection
            .create_channel()
            .await
            .map_err(|source| PipelineError::BrokerUnreachable {
                endpoint: self.inner.endpoint.clone(),
                source,
            })?;

        publisher
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await?;

        declare_topology(
            connection,
            &publisher,
            &self.inner.dead_letter_exchange,
            &self.inner.queues.all(),
        )
        .await?;

        Ok(publisher)
    }

    async fn publisher_channel(&self) -> Option<Channel> {
        self.inner
            .handles
            .read()
            .await
            .as_ref()
            .filter(|handles| handles.publisher.status().connected())
            .map(|handles| handles.publisher.clone())
    }

    fn register_shutdown_callback(&self, connection: &Connection) {
        let inner = Arc::downgrade(&self.inner);
        let runtime = Handle::current();

        connection.on_error(move |err| {
            let Some(inner) = inner.upgrade() else {
                return;
            };

            if inner.disposed.load(Ordering::SeqCst) {
                return;
            }

            warn!(error = %err, "RabbitMQ connection shutdown detected, reconnecting");

            let manager = ConnectionManager { inner };
            runtime.spawn(async move {
                if let Err(e) = manager.ensure_infrastructure().await {
                    error!(error = %e, "Reconnect after connection shutdown failed");
                }
            });
        });
    }

    async fn dispose_handles(&self) {
        let Some(stale) = self.inner.handles.write().await.take() else {
            return;
        };

        if stale.publisher.status().connected()
            && let Err(e) = stale.publisher.close(REPLY_SUCCESS, "disposing".into()).await
        {
            warn!(error = %e, "Error disposing publisher channel");
        }

        if stale.connection.status().connected()
            && let Err(e) = stale.connection.close(REPLY_SUCCESS, "disposing".into()).await
        {
            warn!(error = %e, "Error disposing connection");
        }
    }
}

/// Passive declare on a throwaway channel; the broker closes the channel if the queue is absent.
async fn passive_queue_declare(connection: &Connection, queue: &str) -> Result<u32, lapin::Error> {
    let probe = connection.create_channel().await?;

    let declared = probe
        .queue_declare(
            queue.into(),
            QueueDeclareOptions {
                passive: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    if let Err(e) = probe.close(REPLY_SUCCESS, "probe complete".into()).await {
        debug!(error = %e, "Error closing probe channel");
    }

    Ok(declared.message_count())
}

async fn exchange_exists(connection: &Connection, exchange: &str) -> bool {
    let Ok(probe) = connection.create_channel().await else {
        return false;
    };

    let declared = probe
        .exchange_declare(
            exchange.into(),
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                passive: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await;

    if declared.is_ok() {
        let _ = probe.close(REPLY_SUCCESS, "probe complete".into()).await;
    }

    declared.is_ok()
}

async fn declare_topology(
    connection: &Connection,
    channel: &Channel,
    dead_letter_exchange: &str,
    queues: &[String],
) -> Result<(), PipelineError> {
    if exchange_exists(connection, dead_letter_exchange).await {
        debug!(exchange = dead_letter_exchange, "Dead-letter exchange already exists");
    } else {
        channel
            .exchange_declare(
                dead_letter_exchange.into(),
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|source| PipelineError::Topology {
                name: dead_letter_exchange.to_string(),
                source,
            })?;

        info!(exchange = dead_letter_exchange, "Dead-letter exchange declared");
    }

    for queue in queues {
        declare_queue_pair(connection, channel, dead_letter_exchange, queue).await?;
    }

    info!("RabbitMQ topology configured");

    Ok(())
}

/// Declares `<queue>.dlq` bound to the dead-letter exchange, then `queue` dead-lettering into it.
async fn declare_queue_pair(
    connection: &Connection,
    channel: &Channel,
    dead_letter_exchange: &str,
    queue: &str,
) -> Result<(), PipelineError> {
    let dlq = dead_letter_queue(queue);
    let durable = || QueueDeclareOptions {
        durable: true,
        ..Default::default()
    };

    if passive_queue_declare(connection, &dlq).await.is_ok() {
        debug!(queue = %dlq, "Dead-letter queue already exists");
    } else {
        channel
            .queue_declare(dlq.as_str().into(), durable(), FieldTable::default())
            .await
            .map_err(|source| PipelineError::Topology {
                name: dlq.clone(),
                source,
            })?;

        channel
            .queue_bind(
                dlq.as_str().into(),
                dead_letter_exchange.into(),
                dlq.as_str().into(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| PipelineError::Topology {
                name: dlq.clone(),
                source,
            })?;

        info!(queue = %dlq, "Dead-letter queue declared");
    }

    if passive_queue_declare(connection, queue).await.is_ok() {
        debug!(queue, "Queue already exists");
        return Ok(());
    }

    let mut arguments = FieldTable::default();
    arguments.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(dead_letter_exchange.into()),
    );
    arguments.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(dlq.as_str().into()),
    );

    channel
        .queue_declare(queue.into(), durable(), arguments)
        .await
        .map_err(|source| PipelineError::Topology {
            name: queue.to_string(),
            source,
        })?;

    info!(queue, dead_letter_exchange, "Queue declared");

    Ok(())
}
