// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Backbone Topology Management
//!
//! Declares the sharded topology on the broker: a direct `events` exchange,
//! a direct `dlx` exchange, and for every shard `n` a durable live queue
//! `shard.<n>` (dead-lettering to `dlx` under `shard.<n>.dead`) plus a
//! durable dead queue `shard.<n>.dead`.
//!
//! All declarations are idempotent, so `install` is safe to run on every
//! process start and from multiple processes concurrently.

use crate::{
    errors::BackboneError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Name of the direct exchange carrying live traffic.
pub const EVENTS_EXCHANGE: &str = "events";
/// Name of the direct exchange carrying dead-lettered traffic.
pub const DLX_EXCHANGE: &str = "dlx";

/// Live queue name (and routing key) for a shard.
pub fn shard_queue(shard: u32) -> String {
    format!("shard.{shard}")
}

/// Dead queue name (and routing key) for a shard.
pub fn shard_dead_queue(shard: u32) -> String {
    format!("shard.{shard}.dead")
}

/// Declarative topology installed against a broker channel.
///
/// The backbone composes its fixed shape through `for_shards`; the builder
/// methods stay available for embedding callers that extend the topology.
pub struct BackboneTopology {
    channel: Arc<Channel>,
    pub(crate) exchanges: Vec<ExchangeDefinition>,
    pub(crate) queues: Vec<QueueDefinition>,
    pub(crate) bindings: Vec<QueueBinding>,
}

impl BackboneTopology {
    pub fn new(channel: Arc<Channel>) -> Self {
        Self {
            channel,
            exchanges: vec![],
            queues: vec![],
            bindings: vec![],
        }
    }

    /// Composes the full sharded topology for `shard_count` shards.
    pub fn for_shards(channel: Arc<Channel>, shard_count: u32) -> Self {
        let mut topology = Self::new(channel)
            .exchange(ExchangeDefinition::new(EVENTS_EXCHANGE).durable())
            .exchange(ExchangeDefinition::new(DLX_EXCHANGE).durable());

        for shard in 0..shard_count {
            let live = shard_queue(shard);
            let dead = shard_dead_queue(shard);

            topology = topology
                .queue(
                    QueueDefinition::new(&live)
                        .durable()
                        .dead_letter(DLX_EXCHANGE, &dead),
                )
                .queue(QueueDefinition::new(&dead).durable())
                .queue_binding(
                    QueueBinding::new(&live)
                        .exchange(EVENTS_EXCHANGE)
                        .routing_key(&live),
                )
                .queue_binding(
                    QueueBinding::new(&dead)
                        .exchange(DLX_EXCHANGE)
                        .routing_key(&dead),
                );
        }

        topology
    }

    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    pub fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    pub fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Installs the topology: exchanges first, then queues, then bindings.
    pub async fn install(&self) -> Result<(), BackboneError> {
        self.install_exchanges().await?;
        self.install_queues().await?;
        self.install_bindings().await
    }

    async fn install_exchanges(&self) -> Result<(), BackboneError> {
        for exch in &self.exchanges {
            debug!("declaring exchange: {}", exch.name);

            match self
                .channel
                .exchange_declare(
                    &exch.name,
                    exch.kind.into(),
                    ExchangeDeclareOptions {
                        passive: false,
                        durable: exch.durable,
                        auto_delete: exch.auto_delete,
                        internal: exch.internal,
                        nowait: false,
                    },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        name = exch.name,
                        "error to declare the exchange"
                    );
                    Err(BackboneError::DeclareExchangeError(exch.name.clone()))
                }
                _ => Ok(()),
            }?;
        }

        Ok(())
    }

    async fn install_queues(&self) -> Result<(), BackboneError> {
        for def in &self.queues {
            debug!("declaring queue: {}", def.name);

            match self
                .channel
                .queue_declare(
                    &def.name,
                    QueueDeclareOptions {
                        passive: false,
                        durable: def.durable,
                        exclusive: def.exclusive,
                        auto_delete: def.auto_delete,
                        nowait: false,
                    },
                    def.arguments(),
                )
                .await
            {
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        name = def.name,
                        "error to declare the queue"
                    );
                    Err(BackboneError::DeclareQueueError(def.name.clone()))
                }
                _ => Ok(()),
            }?;
        }

        Ok(())
    }

    async fn install_bindings(&self) -> Result<(), BackboneError> {
        for binding in &self.bindings {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange_name, binding.routing_key
            );

            match self
                .channel
                .queue_bind(
                    &binding.queue_name,
                    &binding.exchange_name,
                    &binding.routing_key,
                    QueueBindOptions { nowait: false },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(error = err.to_string(), "error to bind queue to exchange");

                    Err(BackboneError::BindingQueueError(
                        binding.exchange_name.clone(),
                        binding.queue_name.clone(),
                    ))
                }
                _ => Ok(()),
            }?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_names_follow_the_shard_scheme() {
        assert_eq!(shard_queue(0), "shard.0");
        assert_eq!(shard_queue(7), "shard.7");
        assert_eq!(shard_dead_queue(0), "shard.0.dead");
        assert_eq!(shard_dead_queue(7), "shard.7.dead");
    }
}
