use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{FieldTable, LongString};
use lapin::{BasicProperties, Channel, ExchangeKind};

use crate::domain::Channel as NotificationChannel;

/// Shared durable direct exchange every channel queue and the dead-letter
/// queue hang off of.
pub const EXCHANGE: &str = "notifications.direct";
pub const FAILED_QUEUE: &str = "failed.queue";
pub const FAILED_ROUTING_KEY: &str = "failed";

const MESSAGE_TTL_MS: i64 = 86_400_000;

/// Declares `notifications.direct`, this worker's channel queue (with
/// dead-letter routing back through the same exchange to `failed`), binds
/// it to its routing key, and declares/binds `failed.queue`. All
/// declarations are idempotent, so every worker calls this on every
/// (re)connect rather than relying on out-of-band provisioning.
pub async fn declare(channel: &Channel, notification_channel: NotificationChannel) -> Result<(), lapin::Error> {
    channel
        .exchange_declare(
            EXCHANGE,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    let mut queue_args = FieldTable::default();
    queue_args.insert(
        "x-dead-letter-exchange".into(),
        LongString::from(EXCHANGE).into(),
    );
    queue_args.insert(
        "x-dead-letter-routing-key".into(),
        LongString::from(FAILED_ROUTING_KEY).into(),
    );
    queue_args.insert("x-message-ttl".into(), MESSAGE_TTL_MS.into());

    channel
        .queue_declare(
            notification_channel.queue_name(),
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            queue_args,
        )
        .await?;

    channel
        .queue_bind(
            notification_channel.queue_name(),
            EXCHANGE,
            notification_channel.routing_key(),
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    channel
        .queue_declare(
            FAILED_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    channel
        .queue_bind(
            FAILED_QUEUE,
            EXCHANGE,
            FAILED_ROUTING_KEY,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    Ok(())
}

/// Publish a persistent-mode message to `notifications.direct` on the given
/// routing key. Used for both same-channel outer-retry republishes and
/// dead-letter publishes.
pub async fn publish(channel: &Channel, routing_key: &str, payload: &[u8]) -> Result<(), lapin::Error> {
    channel
        .basic_publish(
            EXCHANGE,
            routing_key,
            BasicPublishOptions::default(),
            payload,
            BasicProperties::default().with_delivery_mode(2),
        )
        .await?
        .await?;
    Ok(())
}
