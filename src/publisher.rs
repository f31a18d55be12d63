// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Event Publisher
//!
//! Publishes event envelopes onto the backbone. The publisher computes the
//! shard from the envelope's partition key, routes to the `events` exchange
//! under `shard.<n>`, and stamps the idempotency and partition keys as
//! message headers so consumers can recover them before parsing the body.
//! OpenTelemetry context is propagated in the same headers.
//!
//! A successful publish means the broker-level send was accepted, not that
//! the message was delivered end to end; durability relies on queue
//! durability plus consumer acknowledgment.

use crate::{
    envelope::EventEnvelope,
    errors::BackboneError,
    otel,
    partitioner::shard_for,
    topology::{shard_queue, EVENTS_EXCHANGE},
};
use async_trait::async_trait;
use lapin::{
    options::BasicPublishOptions,
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel,
};
use opentelemetry::Context;
use std::{collections::BTreeMap, sync::Arc};
use tracing::error;
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Header carrying the idempotency key alongside the body field
pub const IDEMPOTENCY_KEY_HEADER: &str = "x-idempotency-key";
/// Header carrying the partition key alongside the body field
pub const PARTITION_KEY_HEADER: &str = "x-partition-key";

/// Acknowledgment returned to producers: the assigned event id and the
/// computed shard, never the outcome of downstream processing.
#[derive(Debug, Clone, Copy)]
pub struct PublishReceipt {
    pub event_id: Uuid,
    pub shard: u32,
}

/// Publishing seam shared by the credit transformer and the administrative
/// HTTP surface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        ctx: &Context,
        envelope: &EventEnvelope,
    ) -> Result<PublishReceipt, BackboneError>;
}

/// AMQP implementation of the publishing seam.
///
/// The publisher holds no state about outcomes; it shares one channel with
/// every shard consumer of the process.
pub struct AmqpEventPublisher {
    channel: Arc<Channel>,
    shard_count: u32,
}

impl AmqpEventPublisher {
    pub fn new(channel: Arc<Channel>, shard_count: u32) -> Arc<AmqpEventPublisher> {
        Arc::new(AmqpEventPublisher {
            channel,
            shard_count,
        })
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish(
        &self,
        ctx: &Context,
        envelope: &EventEnvelope,
    ) -> Result<PublishReceipt, BackboneError> {
        let shard = shard_for(&envelope.partition_key, self.shard_count);

        let mut headers = BTreeMap::<ShortString, AMQPValue>::default();
        otel::inject_context(ctx, &mut headers);

        if let Some(key) = &envelope.idempotency_key {
            headers.insert(
                ShortString::from(IDEMPOTENCY_KEY_HEADER),
                AMQPValue::LongString(LongString::from(key.clone())),
            );
        }
        headers.insert(
            ShortString::from(PARTITION_KEY_HEADER),
            AMQPValue::LongString(LongString::from(envelope.partition_key.clone())),
        );

        let body = envelope.to_bytes()?;

        match self
            .channel
            .basic_publish(
                EVENTS_EXCHANGE,
                &shard_queue(shard),
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &body,
                BasicProperties::default()
                    .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
                    .with_type(ShortString::from(envelope.event_type.clone()))
                    .with_message_id(ShortString::from(envelope.event_id.to_string()))
                    .with_headers(FieldTable::from(headers)),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    event_type = envelope.event_type,
                    shard,
                    "error publishing message"
                );
                Err(BackboneError::PublishingError)
            }
            _ => Ok(PublishReceipt {
                event_id: envelope.event_id,
                shard,
            }),
        }
    }
}
