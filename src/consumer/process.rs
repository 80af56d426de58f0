use lapin::{BasicProperties, message::Delivery};
use tracing::{debug, error, info, warn};

use crate::{
    clients::channel::DeliveryChannel,
    consumer::ConsumerSettings,
    error::HandlerError,
    handlers::DeliveryHandler,
    models::status::Disposition,
    shutdown::Shutdown,
    wire,
};

/// The parts of a broker delivery the retry state machine needs.
#[derive(Debug, Clone)]
pub struct IncomingDelivery {
    pub delivery_tag: u64,
    pub data: Vec<u8>,
    pub properties: BasicProperties,
}

impl From<Delivery> for IncomingDelivery {
    fn from(delivery: Delivery) -> Self {
        Self {
            delivery_tag: delivery.delivery_tag,
            data: delivery.data,
            properties: delivery.properties,
        }
    }
}

/// Runs one delivery to a terminal disposition.
///
/// Every path settles the delivery exactly once: ack after success, retry or
/// dead-letter, ack-and-drop for undecodable bodies, or nack with requeue when
/// `cancel` fires or a republish fails.
pub async fn process_delivery<C, H>(
    channel: &C,
    handler: &H,
    settings: &ConsumerSettings,
    delivery: IncomingDelivery,
    cancel: &Shutdown,
) -> Disposition
where
    C: DeliveryChannel + ?Sized,
    H: DeliveryHandler + ?Sized,
{
    let retry_count = wire::read_retry_count(&delivery.properties);

    let envelope = match wire::decode::<H::Message>(&delivery.data) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(
                queue = %settings.queue,
                message_id = wire::message_id(&delivery.properties).as_deref().unwrap_or("unknown"),
                error = %e,
                "Invalid payload, acknowledging and discarding"
            );
            return acknowledge(channel, &delivery, Disposition::Discarded).await;
        }
    };

    let message_id =
        wire::message_id(&delivery.properties).unwrap_or_else(|| envelope.message_id.clone());

    debug!(
        queue = %settings.queue,
        message_id = %message_id,
        retry_count,
        "Processing delivery"
    );

    let outcome = tokio::select! {
        result = handler.handle(&envelope, &message_id) => Some(result),
        _ = cancel.wait() => None,
    };

    match outcome {
        Some(Ok(())) => {
            info!(queue = %settings.queue, message_id = %message_id, "Message processed");
            acknowledge(channel, &delivery, Disposition::Acknowledged).await
        }
        Some(Err(e)) => {
            handle_failure(channel, settings, &delivery, &message_id, retry_count, e, cancel).await
        }
        None => {
            info!(
                queue = %settings.queue,
                message_id = %message_id,
                "Cancelled while handling, returning message to the queue"
            );
            requeue(channel, &delivery, &message_id).await
        }
    }
}

async fn handle_failure<C>(
    channel: &C,
    settings: &ConsumerSettings,
    delivery: &IncomingDelivery,
    message_id: &str,
    retry_count: u32,
    failure: HandlerError,
    cancel: &Shutdown,
) -> Disposition
where
    C: DeliveryChannel + ?Sized,
{
    let max_retries = settings.policy.max_retries;
    let next_retry = retry_count.saturating_add(1);

    if failure.is_permanent() || next_retry >= max_retries {
        error!(
            queue = %settings.queue,
            message_id,
            retry_count = next_retry,
            max_retries,
            permanent = failure.is_permanent(),
            error = %failure,
            "Message failed permanently, dead-lettering"
        );
        return dead_letter(channel, settings, delivery, message_id).await;
    }

    warn!(
        queue = %settings.queue,
        message_id,
        retry_count = next_retry,
        max_retries,
        error = %failure,
        "Message failed, scheduling retry"
    );

    if !cancel.sleep(settings.policy.retry_delay).await {
        info!(
            queue = %settings.queue,
            message_id,
            "Cancelled during retry delay, returning message to the queue"
        );
        return requeue(channel, delivery, message_id).await;
    }

    let properties = wire::with_retry_count(&delivery.properties, next_retry);

    if let Err(e) = channel
        .publish("", &settings.queue, &delivery.data, properties)
        .await
    {
        error!(
            queue = %settings.queue,
            message_id,
            error = %e,
            "Retry republish failed, returning message to the queue"
        );
        return requeue(channel, delivery, message_id).await;
    }

    acknowledge(
        channel,
        delivery,
        Disposition::Retried {
            retry_count: next_retry,
        },
    )
    .await
}

async fn dead_letter<C>(
    channel: &C,
    settings: &ConsumerSettings,
    delivery: &IncomingDelivery,
    message_id: &str,
) -> Disposition
where
    C: DeliveryChannel + ?Sized,
{
    let dead_letter_queue = wire::dead_letter_queue(&settings.queue);
    let properties =
        wire::dead_letter_properties(&delivery.properties, message_id, settings.policy.max_retries);

    if let Err(e) = channel
        .publish(
            &settings.dead_letter_exchange,
            &dead_letter_queue,
            &delivery.data,
            properties,
        )
        .await
    {
        error!(
            queue = %settings.queue,
            message_id,
            error = %e,
            "Dead-letter publish failed, returning message to the queue"
        );
        return requeue(channel, delivery, message_id).await;
    }

    acknowledge(channel, delivery, Disposition::DeadLettered).await
}

async fn acknowledge<C>(
    channel: &C,
    delivery: &IncomingDelivery,
    disposition: Disposition,
) -> Disposition
where
    C: DeliveryChannel + ?Sized,
{
    match channel.ack(delivery.delivery_tag).await {
        Ok(()) => disposition,
        Err(e) => {
            error!(
                delivery_tag = delivery.delivery_tag,
                intended = %disposition,
                error = %e,
                "Failed to acknowledge delivery"
            );
            Disposition::Unsettled
        }
    }
}

async fn requeue<C>(channel: &C, delivery: &IncomingDelivery, message_id: &str) -> Disposition
where
    C: DeliveryChannel + ?Sized,
{
    match channel.nack(delivery.delivery_tag, true).await {
        Ok(()) => Disposition::Requeued,
        Err(e) => {
            warn!(message_id, error = %e, "Failed to negatively acknowledge delivery");
            Disposition::Unsettled
        }
    }
}
