use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicQosOptions, BasicRejectOptions};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, warn, Instrument};

use crate::delivery_engine::DeliveryEngine;
use crate::domain::{Channel as NotificationChannel, DeadLetterRecord, Job, NotificationStatus};
use crate::status_store::StatusStore;

use super::topology;

/// One of these runs per worker binary, pulling from either `email.queue`
/// or `push.queue`. Owns no broker connection between reconnect attempts;
/// `run` re-declares topology and re-subscribes every time `run_inner`
/// returns an error.
pub struct Consumer {
    broker_url: String,
    channel_kind: NotificationChannel,
    prefetch: u16,
    status_store: Arc<StatusStore>,
    engine: Arc<DeliveryEngine>,
    max_retry_attempts: u32,
}

impl Consumer {
    pub fn new(
        broker_url: impl Into<String>,
        channel_kind: NotificationChannel,
        prefetch: u16,
        status_store: Arc<StatusStore>,
        engine: Arc<DeliveryEngine>,
        max_retry_attempts: u32,
    ) -> Self {
        Self {
            broker_url: broker_url.into(),
            channel_kind,
            prefetch,
            status_store,
            engine,
            max_retry_attempts,
        }
    }

    /// Runs until `shutdown` fires, reconnecting on any broker-channel
    /// error with a fixed backoff. A fatal error that coincides with a
    /// pending shutdown ends the loop cleanly instead of reconnecting.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        loop {
            let mut shutdown_clone = shutdown.resubscribe();
            match self.run_inner(&mut shutdown_clone).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if shutdown.try_recv().is_ok() {
                        return Ok(());
                    }
                    error!(
                        channel = self.channel_kind.as_str(),
                        error = %e,
                        "consumer error, reconnecting in 5s"
                    );
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    async fn run_inner(&self, shutdown: &mut broadcast::Receiver<()>) -> anyhow::Result<()> {
        let conn = Connection::connect(&self.broker_url, ConnectionProperties::default()).await?;
        let channel = conn.create_channel().await?;
        topology::declare(&channel, self.channel_kind).await?;
        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await?;

        let consumer_tag = format!("{}-worker", self.channel_kind.as_str());
        let mut consumer = channel
            .basic_consume(
                self.channel_kind.queue_name(),
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            channel = self.channel_kind.as_str(),
            prefetch = self.prefetch,
            "consumer started"
        );

        let mut tasks = JoinSet::new();
        let max_concurrent = self.prefetch.max(1) as usize;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(channel = self.channel_kind.as_str(), "consumer shutting down, draining in-flight handlers");
                    break;
                }
                Some(res) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = res {
                        error!(error = %e, "delivery handler task panicked");
                    }
                }
                delivery = consumer.next(), if tasks.len() < max_concurrent => {
                    match delivery {
                        Some(Ok(delivery)) => {
                            let channel = channel.clone();
                            let engine = self.engine.clone();
                            let status_store = self.status_store.clone();
                            let channel_kind = self.channel_kind;
                            let max_retry_attempts = self.max_retry_attempts;
                            tasks.spawn(async move {
                                handle_delivery(delivery, channel, engine, status_store, channel_kind, max_retry_attempts).await;
                            });
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => break,
                    }
                }
            }
        }

        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "delivery handler task panicked during drain");
            }
        }

        Ok(())
    }
}

async fn handle_delivery(
    delivery: lapin::message::Delivery,
    channel: lapin::Channel,
    engine: Arc<DeliveryEngine>,
    status_store: Arc<StatusStore>,
    channel_kind: NotificationChannel,
    max_retry_attempts: u32,
) {
    let job: Job = match serde_json::from_slice(&delivery.data) {
        Ok(job) => job,
        Err(e) => {
            warn!(error = %e, "malformed job body, rejecting without requeue");
            if let Err(e) = delivery.reject(BasicRejectOptions { requeue: false }).await {
                error!(error = %e, "failed to reject malformed delivery");
            }
            return;
        }
    };

    let span = tracing::info_span!(
        "delivery",
        correlation_id = %job.correlation_id(),
        notification_id = %job.notification_id,
        channel = channel_kind.as_str(),
    );

    process_job(job, delivery, channel, engine, status_store, channel_kind, max_retry_attempts)
        .instrument(span)
        .await;
}

/// Runs the full per-message pipeline: status=pending, delivery engine,
/// status=delivered|failed, requeue or dead-letter, then ack the original
/// — in that order, so a crash after ack never loses status visibility.
async fn process_job(
    job: Job,
    delivery: lapin::message::Delivery,
    channel: lapin::Channel,
    engine: Arc<DeliveryEngine>,
    status_store: Arc<StatusStore>,
    channel_kind: NotificationChannel,
    max_retry_attempts: u32,
) {
    let recipient = match job.recipient(channel_kind) {
        Some(r) => r.to_string(),
        None => {
            warn!("job has no recipient for this channel, rejecting without requeue");
            if let Err(e) = delivery.reject(BasicRejectOptions { requeue: false }).await {
                error!(error = %e, "failed to reject recipient-less delivery");
            }
            return;
        }
    };

    status_store
        .set_status(
            &job.notification_id,
            channel_kind.as_str(),
            NotificationStatus::Pending,
            None,
            job.retry_count,
        )
        .await;

    let (ok, err) = engine.deliver(&job, &recipient).await;

    if ok {
        status_store
            .set_status(
                &job.notification_id,
                channel_kind.as_str(),
                NotificationStatus::Delivered,
                None,
                job.retry_count,
            )
            .await;
        info!("delivery succeeded");
    } else {
        status_store
            .set_status(
                &job.notification_id,
                channel_kind.as_str(),
                NotificationStatus::Failed,
                err.clone(),
                job.retry_count,
            )
            .await;

        if job.retry_count < max_retry_attempts {
            let next = job.with_incremented_retry();
            match serde_json::to_vec(&next) {
                Ok(payload) => {
                    if let Err(e) =
                        topology::publish(&channel, channel_kind.routing_key(), &payload).await
                    {
                        error!(error = %e, "failed to republish job for outer retry");
                    }
                }
                Err(e) => error!(error = %e, "failed to serialize job for outer retry"),
            }
        } else {
            let dead_letter = DeadLetterRecord {
                job,
                final_error: err.unwrap_or_else(|| "unknown error".to_string()),
                failed_at: Utc::now(),
            };
            match serde_json::to_vec(&dead_letter) {
                Ok(payload) => {
                    if let Err(e) =
                        topology::publish(&channel, topology::FAILED_ROUTING_KEY, &payload).await
                    {
                        error!(error = %e, "failed to publish dead-letter record");
                    }
                }
                Err(e) => error!(error = %e, "failed to serialize dead-letter record"),
            }
        }
    }

    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
        error!(error = %e, "failed to ack delivery");
    }
}
