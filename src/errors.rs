// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Event Backbone
//!
//! This module provides the error taxonomy shared by every backbone component.
//! The `BackboneError` enum covers broker connectivity, topology declaration,
//! publishing, consuming, the idempotency store, and the management API.

use thiserror::Error;

/// Represents errors that can occur during backbone operations.
///
/// Connectivity errors are retried with backoff at startup; mid-operation
/// failures surface to synchronous callers, and failures inside a shard
/// worker are converted to a reject at the message-handling boundary.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum BackboneError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing a connection to the broker
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{1}` to exchange `{0}`")]
    BindingQueueError(String, String),

    /// Error configuring the per-shard prefetch window
    #[error("failure to configure qos for shard {0}")]
    QoSDeclarationError(u32),

    /// Error declaring a consumer on a shard queue
    #[error("failure to declare consumer on `{0}`")]
    ConsumerDeclarationError(String),

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,

    /// Error parsing a message payload
    #[error("failure to parse payload")]
    ParsePayloadError,

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error fetching from a dead-letter queue during redrive
    #[error("failure to fetch from dead queue `{0}`")]
    DeadQueueFetchError(String),

    /// Idempotency store failure
    #[error("idempotency store failure: {0}")]
    StoreError(String),

    /// Broker management API failure
    #[error("management api failure: {0}")]
    ManagementError(String),
}
