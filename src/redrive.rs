// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Dead-letter Redrive
//!
//! Operator-triggered move of dead-lettered messages back onto their live
//! queues. Redrive is a blind move: the raw body and original properties
//! are republished unchanged onto the shard's live routing key, content is
//! never inspected, and the idempotency window is not reset. A message that
//! failed deterministically will fail identically and return to the dead
//! queue; operators fix root cause first or bound the move with the count
//! parameter.

use crate::{
    errors::BackboneError,
    topology::{shard_dead_queue, shard_queue, EVENTS_EXCHANGE},
};
use async_trait::async_trait;
use lapin::{
    options::{BasicAckOptions, BasicGetOptions, BasicPublishOptions},
    BasicProperties, Channel,
};
use std::sync::Arc;
use tracing::{debug, info};

/// One message pulled from a dead queue, pending requeue and commit.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub shard: u32,
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    pub properties: BasicProperties,
}

/// The broker surface redrive needs: non-blocking fetch from a dead queue,
/// republish onto the live routing key, and acknowledgment of the original
/// dead-queue delivery.
#[async_trait]
pub trait DeadLetterSource: Send + Sync {
    /// Fetches the next dead message for `shard`, or `None` when the queue
    /// has nothing immediately available.
    async fn fetch(&self, shard: u32) -> Result<Option<DeadLetter>, BackboneError>;

    /// Republishes the letter unchanged onto the shard's live routing key.
    async fn requeue(&self, letter: &DeadLetter) -> Result<(), BackboneError>;

    /// Acknowledges the original dead-queue delivery, removing it.
    async fn commit(&self, letter: DeadLetter) -> Result<(), BackboneError>;
}

/// AMQP implementation over the shared channel.
pub struct AmqpDeadLetterSource {
    channel: Arc<Channel>,
}

impl AmqpDeadLetterSource {
    pub fn new(channel: Arc<Channel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl DeadLetterSource for AmqpDeadLetterSource {
    async fn fetch(&self, shard: u32) -> Result<Option<DeadLetter>, BackboneError> {
        let queue = shard_dead_queue(shard);

        let message = self
            .channel
            .basic_get(&queue, BasicGetOptions { no_ack: false })
            .await
            .map_err(|_| BackboneError::DeadQueueFetchError(queue))?;

        Ok(message.map(|message| DeadLetter {
            shard,
            delivery_tag: message.delivery.delivery_tag,
            body: message.delivery.data.clone(),
            properties: message.delivery.properties.clone(),
        }))
    }

    async fn requeue(&self, letter: &DeadLetter) -> Result<(), BackboneError> {
        self.channel
            .basic_publish(
                EVENTS_EXCHANGE,
                &shard_queue(letter.shard),
                BasicPublishOptions::default(),
                &letter.body,
                letter.properties.clone(),
            )
            .await
            .map_err(|_| BackboneError::PublishingError)?;

        Ok(())
    }

    async fn commit(&self, letter: DeadLetter) -> Result<(), BackboneError> {
        self.channel
            .basic_ack(letter.delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|_| BackboneError::AckMessageError)
    }
}

/// Moves dead messages back onto their live queues, walking every shard's
/// dead queue until it is momentarily empty or `max` messages have moved.
/// Returns the count actually moved.
pub async fn redrive(
    source: &dyn DeadLetterSource,
    shard_count: u32,
    max: Option<u64>,
) -> Result<u64, BackboneError> {
    let mut moved = 0u64;

    'shards: for shard in 0..shard_count {
        loop {
            if max.is_some_and(|limit| moved >= limit) {
                break 'shards;
            }

            let Some(letter) = source.fetch(shard).await? else {
                break;
            };

            source.requeue(&letter).await?;
            source.commit(letter).await?;
            moved += 1;
            debug!(shard, moved, "dead message requeued");
        }
    }

    info!(moved, "redrive finished");
    Ok(moved)
}
