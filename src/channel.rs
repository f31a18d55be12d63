// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module handles the creation of the AMQP connection and channel shared
//! by the backbone. Startup has no useful degraded mode without a broker, so
//! `connect_with_backoff` blocks until the broker is reachable, retrying with
//! bounded linear backoff and unlimited attempts.

use crate::{config::Config, errors::BackboneError};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Creates a new AMQP connection and channel.
///
/// The connection URI is assembled from the broker parameters in `cfg`, and
/// both the connection and the channel are wrapped in `Arc` for sharing
/// between the publisher, the shard workers, and the redrive tooling.
pub async fn new_amqp_channel(
    cfg: &Config,
) -> Result<(Arc<Connection>, Arc<Channel>), BackboneError> {
    debug!("creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(cfg.app_name.clone()));

    let uri = format!(
        "amqp://{}:{}@{}:{}/{}",
        cfg.rabbitmq.user,
        cfg.rabbitmq.password,
        cfg.rabbitmq.host,
        cfg.rabbitmq.port,
        cfg.rabbitmq.vhost
    );

    let conn = match Connection::connect(&uri, options).await {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(BackboneError::ConnectionError {})
        }
    }?;
    debug!("amqp connected");

    debug!("creating amqp channel...");
    match conn.create_channel().await {
        Ok(c) => {
            debug!("channel created");
            Ok((Arc::new(conn), Arc::new(c)))
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            Err(BackboneError::ChannelError {})
        }
    }
}

/// Connects to the broker, retrying until it is reachable.
///
/// The delay grows linearly per attempt (`base * attempt`) and is capped at
/// `connect_backoff_cap`. There is no attempt limit: topology installation
/// is expected to block on a slow-starting broker rather than fail fast.
pub async fn connect_with_backoff(cfg: &Config) -> (Arc<Connection>, Arc<Channel>) {
    let mut attempt: u32 = 0;

    loop {
        match new_amqp_channel(cfg).await {
            Ok(pair) => return pair,
            Err(err) => {
                attempt += 1;
                let delay = std::cmp::min(
                    cfg.connect_backoff_base.saturating_mul(attempt),
                    cfg.connect_backoff_cap,
                );
                warn!(
                    error = err.to_string(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "broker unavailable, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
