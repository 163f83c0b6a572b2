//! Bounded in-process delivery queue.
//!
//! The detection cycle must not block on outbound SMTP/HTTP calls, so it
//! enqueues [`DeliveryJob`]s and moves on. A single background worker drains
//! the queue, performs the sends, and writes terminal statuses back through
//! the injected [`DeliverySink`]. A full queue rejects the job immediately;
//! the caller records the row as failed instead of waiting.

use crate::error::{NotifyError, Result};
use crate::plugin::ChannelRegistry;
use crate::{RenderedMessage, SendResponse};
use async_trait::async_trait;
use llmscope_common::types::AlertEvent;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// One pending delivery: an alert bound to a concrete channel instance.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    /// The pending notifications row this job reports back to.
    pub notification_id: String,
    pub channel_id: String,
    pub channel_type: String,
    /// Parsed channel `config_json`.
    pub config: Value,
    pub alert: AlertEvent,
    pub title: String,
    pub body: String,
}

/// Write-back target for delivery outcomes. Implemented by the server over
/// the control store so this crate stays storage-agnostic.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn mark_sent(
        &self,
        notification_id: &str,
        retry_count: i32,
        response_body: Option<&str>,
    ) -> Result<()>;

    async fn mark_failed(
        &self,
        notification_id: &str,
        error: &str,
        retry_count: i32,
        response_body: Option<&str>,
    ) -> Result<()>;
}

/// Submission handle for the delivery queue. Cloneable; dropping every handle
/// closes the queue and lets the worker drain and exit.
#[derive(Clone)]
pub struct DeliveryQueue {
    tx: mpsc::Sender<DeliveryJob>,
}

impl DeliveryQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DeliveryJob>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Enqueues a job without waiting.
    ///
    /// # Errors
    ///
    /// [`NotifyError::QueueFull`] when the queue is at capacity and
    /// [`NotifyError::QueueClosed`] when the worker has shut down. In both
    /// cases the job was not accepted and its notification row should be
    /// marked failed.
    pub fn submit(&self, job: DeliveryJob) -> Result<()> {
        self.tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => NotifyError::QueueFull,
            TrySendError::Closed(_) => NotifyError::QueueClosed,
        })
    }
}

/// Spawns the delivery worker. Runs until the queue closes.
pub fn spawn_delivery_worker(
    mut rx: mpsc::Receiver<DeliveryJob>,
    registry: Arc<ChannelRegistry>,
    sink: Arc<dyn DeliverySink>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Delivery worker started");
        while let Some(job) = rx.recv().await {
            deliver(&registry, sink.as_ref(), job).await;
        }
        tracing::info!("Delivery queue closed, worker exiting");
    })
}

async fn deliver(registry: &ChannelRegistry, sink: &dyn DeliverySink, job: DeliveryJob) {
    let started = std::time::Instant::now();
    let notification_id = job.notification_id.clone();

    let channel = match registry.create_channel(&job.channel_type, &job.channel_id, &job.config) {
        Ok(channel) => channel,
        Err(e) => {
            tracing::error!(
                notification_id = %notification_id,
                channel_type = %job.channel_type,
                error = %e,
                "Cannot build notification channel"
            );
            write_back(
                sink,
                &notification_id,
                Err(&e.to_string()),
                0,
                None,
            )
            .await;
            return;
        }
    };

    let rendered = RenderedMessage {
        title: job.title,
        body: job.body,
    };
    match channel.send(&job.alert, &rendered).await {
        Ok(SendResponse {
            retry_count,
            response_body,
            error,
            ..
        }) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            match &error {
                None => {
                    tracing::info!(
                        notification_id = %notification_id,
                        channel_type = %job.channel_type,
                        retry_count,
                        duration_ms,
                        "Notification delivered"
                    );
                    write_back(
                        sink,
                        &notification_id,
                        Ok(()),
                        retry_count as i32,
                        response_body.as_deref(),
                    )
                    .await;
                }
                Some(err) => {
                    tracing::error!(
                        notification_id = %notification_id,
                        channel_type = %job.channel_type,
                        retry_count,
                        duration_ms,
                        error = %err,
                        "Notification delivery failed"
                    );
                    write_back(
                        sink,
                        &notification_id,
                        Err(err),
                        retry_count as i32,
                        response_body.as_deref(),
                    )
                    .await;
                }
            }
        }
        Err(e) => {
            tracing::error!(
                notification_id = %notification_id,
                channel_type = %job.channel_type,
                error = %e,
                "Notification channel refused the job"
            );
            write_back(sink, &notification_id, Err(&e.to_string()), 0, None).await;
        }
    }
}

async fn write_back(
    sink: &dyn DeliverySink,
    notification_id: &str,
    outcome: std::result::Result<(), &str>,
    retry_count: i32,
    response_body: Option<&str>,
) {
    let result = match outcome {
        Ok(()) => sink.mark_sent(notification_id, retry_count, response_body).await,
        Err(error) => {
            sink.mark_failed(notification_id, error, retry_count, response_body)
                .await
        }
    };
    if let Err(e) = result {
        tracing::error!(
            notification_id = %notification_id,
            error = %e,
            "Failed to write back notification status"
        );
    }
}
