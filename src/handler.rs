// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Handlers
//!
//! The handler seam between the shard worker pool and business logic. A
//! handler receives a fully parsed envelope with its shard assignment and
//! performs the side effect for one event type; the worker owns parsing,
//! the idempotency gate, and the ack/reject decision.

use crate::{envelope::EventEnvelope, errors::BackboneError};
use async_trait::async_trait;
use opentelemetry::Context;
use thiserror::Error;

/// Errors a handler can surface. Any of them dead-letters the message; the
/// worker never retries in place.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Required business fields are missing or have the wrong type
    #[error("malformed event payload: {0}")]
    MalformedPayload(String),

    /// A downstream publish failed while emitting derived events
    #[error("downstream publish failed")]
    PublishFailed(#[from] BackboneError),

    /// Any other side-effect failure
    #[error("handler failure: {0}")]
    Failed(String),
}

/// A message handed to a handler: the shard it arrived on and the parsed
/// envelope.
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub shard: u32,
    pub envelope: EventEnvelope,
}

/// Side-effect executor for one or more event types.
///
/// Implementations must be idempotent-friendly: the worker's idempotency
/// gate suppresses duplicates, but a crash between a handler's own publish
/// and the ack can still replay the message (see the derived idempotency
/// keys in the credit transformer).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    async fn handle(&self, ctx: &Context, msg: &ConsumerMessage) -> Result<(), HandlerError>;
}
