//! Generic subscribe / process / retry / dead-letter loop, one instance per message category.

pub mod process;

use std::sync::Arc;

use futures_util::StreamExt;
use lapin::{
    Channel, Consumer,
    options::{BasicCancelOptions, BasicConsumeOptions},
    types::FieldTable,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    clients::rbmq::ConnectionManager,
    config::Config,
    error::PipelineError,
    handlers::DeliveryHandler,
    models::{
        retry::{BackoffConfig, RetryPolicy},
        status::ConsumerState,
    },
    shutdown::Shutdown,
    utils::backoff_delay,
};

pub use process::{IncomingDelivery, process_delivery};

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub queue: String,
    pub dead_letter_exchange: String,
    pub policy: RetryPolicy,
    pub consumer_tag: String,
    pub resubscribe_backoff: BackoffConfig,
}

impl ConsumerSettings {
    pub fn new(queue: &str, config: &Config) -> Self {
        Self {
            queue: queue.to_string(),
            dead_letter_exchange: config.dead_letter_exchange.clone(),
            policy: config.retry_policy(),
            consumer_tag: consumer_tag(queue),
            resubscribe_backoff: config.reconnect_backoff(),
        }
    }
}

fn consumer_tag(queue: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", queue, &suffix[..8])
}

/// An open subscription: the owned channel, its delivery stream and a
/// notice fed by the channel's error callback.
struct Session {
    channel: Channel,
    deliveries: Consumer,
    channel_lost: mpsc::UnboundedReceiver<String>,
}

enum SessionEnd {
    Stopped,
    ChannelLost(String),
}

pub struct ReliableConsumer<H: DeliveryHandler> {
    manager: ConnectionManager,
    handler: Arc<H>,
    settings: ConsumerSettings,
    state: watch::Sender<ConsumerState>,
    stop: Shutdown,
}

impl<H: DeliveryHandler> ReliableConsumer<H> {
    pub fn new(manager: ConnectionManager, handler: Arc<H>, settings: ConsumerSettings) -> Self {
        let (state, _) = watch::channel(ConsumerState::Stopped);

        Self {
            manager,
            handler,
            settings,
            state,
            stop: Shutdown::new(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.settings.queue
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Asks the run loop to cancel its subscription and close its channel.
    ///
    /// Idempotent and non-blocking; any in-flight delivery is requeued.
    pub fn stop(&self) {
        self.stop.trigger();
    }

    /// Subscribes and processes deliveries until `shutdown` fires or [`stop`](Self::stop) is called.
    ///
    /// Subscribe failures and channel losses are retried forever with exponential backoff.
    pub async fn run(&self, shutdown: Shutdown) {
        let forward = {
            let stop = self.stop.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.wait() => stop.trigger(),
                    _ = stop.wait() => {}
                }
            })
        };

        let mut failures: u32 = 0;
        let mut next_state = ConsumerState::Subscribing;

        while !self.stop.is_triggered() {
            self.set_state(next_state);

            match self.subscribe().await {
                Ok(session) => {
                    failures = 0;
                    self.set_state(ConsumerState::Consuming);

                    match self.consume(session).await {
                        SessionEnd::Stopped => break,
                        SessionEnd::ChannelLost(reason) => {
                            warn!(queue = %self.settings.queue, reason = %reason, "Consumer channel shutdown, resubscribing");
                            next_state = ConsumerState::Reconnecting;
                        }
                    }
                }
                Err(e) => {
                    let delay = backoff_delay(&self.settings.resubscribe_backoff, failures);
                    failures = failures.saturating_add(1);
                    next_state = ConsumerState::Reconnecting;

                    error!(
                        queue = %self.settings.queue,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Failed to subscribe, backing off"
                    );

                    if !self.stop.sleep(delay).await {
                        break;
                    }
                }
            }
        }

        forward.abort();
        self.set_state(ConsumerState::Stopped);
        info!(queue = %self.settings.queue, "Consumer stopped");
    }

    fn set_state(&self, state: ConsumerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(queue = %self.settings.queue, from = %previous, to = %state, "Consumer state changed");
        }
    }

    async fn subscribe(&self) -> Result<Session, PipelineError> {
        let channel = self.manager.create_consumer_channel().await?;

        let (lost_tx, channel_lost) = mpsc::unbounded_channel();
        channel.on_error(move |err| {
            let _ = lost_tx.send(err.to_string());
        });

        let deliveries = match channel
            .basic_consume(
                self.settings.queue.as_str().into(),
                self.settings.consumer_tag.as_str().into(),
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
        {
            Ok(deliveries) => deliveries,
            Err(e) => {
                close_channel(&channel).await;
                return Err(e.into());
            }
        };

        info!(
            queue = %self.settings.queue,
            consumer_tag = %self.settings.consumer_tag,
            "Consumer subscribed"
        );

        Ok(Session {
            channel,
            deliveries,
            channel_lost,
        })
    }

    async fn consume(&self, mut session: Session) -> SessionEnd {
        loop {
            tokio::select! {
                biased;

                _ = self.stop.wait() => {
                    self.close_session(&session).await;
                    return SessionEnd::Stopped;
                }

                Some(reason) = session.channel_lost.recv() => {
                    return SessionEnd::ChannelLost(reason);
                }

                next = session.deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        let disposition = process_delivery(
                            &session.channel,
                            self.handler.as_ref(),
                            &self.settings,
                            IncomingDelivery::from(delivery),
                            &self.stop,
                        )
                        .await;

                        debug!(queue = %self.settings.queue, disposition = %disposition, "Delivery settled");
                    }
                    Some(Err(e)) => {
                        close_channel(&session.channel).await;
                        return SessionEnd::ChannelLost(e.to_string());
                    }
                    None => {
                        close_channel(&session.channel).await;
                        return SessionEnd::ChannelLost("delivery stream ended".to_string());
                    }
                }
            }
        }
    }

    async fn close_session(&self, session: &Session) {
        if session.channel.status().connected()
            && let Err(e) = session
                .channel
                .basic_cancel(
                    self.settings.consumer_tag.as_str().into(),
                    BasicCancelOptions::default(),
                )
                .await
        {
            warn!(queue = %self.settings.queue, error = %e, "Error cancelling subscription");
        }

        close_channel(&session.channel).await;
    }
}

async fn close_channel(channel: &Channel) {
    if !channel.status().connected() {
        return;
    }

    if let Err(e) = channel.close(200, "consumer closing".into()).await {
        warn!(error = %e, "Error closing consumer channel");
    }
}
