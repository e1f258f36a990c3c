//! Queue intake: pulls push records from JetStream and acknowledges them by
//! dispatch outcome.
//!
//! A record is acked only after `dispatch` returns without error; a failed
//! dispatch naks it so the queue redelivers, and a record that does not even
//! deserialize is terminated so the queue can dead-letter it. The effective
//! delivery guarantee is therefore at-least-once.

use std::sync::Arc;

use async_nats::jetstream::{self, consumer::PullConsumer, AckKind};
use futures_util::StreamExt;
use tokio::sync::watch;

use crate::config::Config;
use crate::dispatch::{Dispatcher, PushMessage};

/// Consume until shutdown is signalled or the message stream closes.
pub async fn run(
    config: &Config,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), async_nats::Error> {
    let client = async_nats::connect(&config.nats_url).await?;
    let jetstream = jetstream::new(client);

    let stream = jetstream
        .get_or_create_stream(jetstream::stream::Config {
            name: config.queue_stream.clone(),
            subjects: vec![config.queue_subject.clone()],
            ..Default::default()
        })
        .await?;
    let consumer: PullConsumer = stream
        .get_or_create_consumer(
            &config.queue_consumer,
            jetstream::consumer::pull::Config {
                durable_name: Some(config.queue_consumer.clone()),
                ..Default::default()
            },
        )
        .await?;

    tracing::info!(
        stream = %config.queue_stream,
        subject = %config.queue_subject,
        consumer = %config.queue_consumer,
        "queue intake started"
    );

    let mut messages = consumer.messages().await?;
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("queue intake stopping");
                return Ok(());
            }
            next = messages.next() => {
                match next {
                    Some(Ok(record)) => handle_record(&dispatcher, record).await,
                    Some(Err(e)) => tracing::warn!(?e, "queue receive error"),
                    None => {
                        tracing::info!("queue message stream closed");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn handle_record(dispatcher: &Dispatcher, record: jetstream::Message) {
    let msg: PushMessage = match serde_json::from_slice(&record.payload) {
        Ok(msg) => msg,
        Err(e) => {
            // Never dispatched; terminate redelivery so the queue can
            // dead-letter the record.
            tracing::warn!(?e, "malformed queue record");
            if let Err(e) = record.ack_with(AckKind::Term).await {
                tracing::warn!(?e, "failed to terminate malformed record");
            }
            return;
        }
    };

    match dispatcher.dispatch(&msg).await {
        Ok(()) => {
            if let Err(e) = record.ack().await {
                tracing::warn!(?e, "failed to ack dispatched record");
            }
        }
        Err(e) => {
            // Leave redelivery to the queue's retry policy.
            tracing::error!(kind = %msg.kind, ?e, "dispatch failed, requesting redelivery");
            if let Err(e) = record.ack_with(AckKind::Nak(None)).await {
                tracing::warn!(?e, "failed to nak record");
            }
        }
    }
}
