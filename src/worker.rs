// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Shard Worker Pool
//!
//! One long-lived consumer per shard queue, each with a prefetch window of
//! exactly one unacknowledged message. The consume loop awaits the full
//! handling of a delivery before pulling the next, so processing within a
//! shard is strictly sequential and events sharing a partition key are
//! handled in delivery order. Cross-entity parallelism comes from the shard
//! count, never from per-shard concurrency.
//!
//! Per-message protocol: parse the envelope and extract the idempotency key
//! (body field first, header second) — absence is poison; atomically
//! reserve the idempotency record — an existing record is a duplicate,
//! acknowledged without repeating the side effect; otherwise run the
//! handler registered for the event type. Success acks; any failure rejects
//! without requeue, dead-lettering the message while the idempotency record
//! stays in place. Terminal states are `acked` and `dead`; retry happens
//! only via external redrive.

use crate::{
    envelope::EventEnvelope,
    errors::BackboneError,
    handler::{ConsumerHandler, ConsumerMessage},
    idempotency::IdempotencyStore,
    metrics::Metrics,
    otel,
    publisher::IDEMPOTENCY_KEY_HEADER,
    topology::shard_queue,
};
use chrono::Utc;
use futures_util::{future::join_all, StreamExt};
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions},
    protocol::basic::AMQPProperties,
    types::{AMQPValue, FieldTable},
    Channel,
};
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span, Status},
    Context,
};
use std::{borrow::Cow, collections::HashMap, sync::Arc, time::Duration};
use tracing::{debug, error, warn};

/// Terminal classification of one delivery.
///
/// `Poison` and `Failed` both dead-letter the message; poison is flagged
/// separately so operators can tell malformed input from side-effect
/// failures when inspecting dead queues.
#[derive(Debug, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Side effect performed, message acknowledged
    Completed { event_type: String },
    /// Idempotency record already existed, acknowledged without side effect
    Duplicate { event_type: String },
    /// No handler registered for the event type, acknowledged and dropped
    Unrouted { event_type: String },
    /// Unparseable envelope or missing idempotency key
    Poison { reason: &'static str },
    /// Side-effect failure (genuine or injected), or store failure
    Failed { event_type: String, error: String },
}

impl MessageOutcome {
    /// Whether this outcome acknowledges the delivery; everything else is
    /// rejected without requeue and dead-letters.
    pub fn is_ack(&self) -> bool {
        matches!(
            self,
            MessageOutcome::Completed { .. }
                | MessageOutcome::Duplicate { .. }
                | MessageOutcome::Unrouted { .. }
        )
    }
}

/// The broker-independent part of the worker: handler registry, idempotency
/// gate, failure injection, and metrics recording.
struct MessageProcessor {
    handlers: HashMap<String, Arc<dyn ConsumerHandler>>,
    store: Arc<dyn IdempotencyStore>,
    metrics: Arc<Metrics>,
    idempotency_ttl: Duration,
    inject_failure_types: Vec<String>,
}

impl MessageProcessor {
    async fn process(
        &self,
        shard: u32,
        ctx: &Context,
        body: &[u8],
        header_key: Option<String>,
    ) -> MessageOutcome {
        let envelope = match EventEnvelope::from_bytes(body) {
            Ok(envelope) => envelope,
            Err(_) => {
                return MessageOutcome::Poison {
                    reason: "unparseable envelope",
                }
            }
        };

        let Some(key) = envelope.idempotency_key.clone().or(header_key) else {
            return MessageOutcome::Poison {
                reason: "missing idempotency key",
            };
        };

        let Some(handler) = self.handlers.get(&envelope.event_type) else {
            return MessageOutcome::Unrouted {
                event_type: envelope.event_type,
            };
        };

        match self.store.create_if_absent(&key, self.idempotency_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                return MessageOutcome::Duplicate {
                    event_type: envelope.event_type,
                }
            }
            Err(err) => {
                return MessageOutcome::Failed {
                    event_type: envelope.event_type,
                    error: err.to_string(),
                }
            }
        }

        if self
            .inject_failure_types
            .iter()
            .any(|t| t == &envelope.event_type)
        {
            return MessageOutcome::Failed {
                event_type: envelope.event_type,
                error: "injected failure".to_owned(),
            };
        }

        let occurred_at = envelope.occurred_at;
        let event_type = envelope.event_type.clone();
        let msg = ConsumerMessage { shard, envelope };

        match handler.handle(ctx, &msg).await {
            Ok(()) => {
                let latency_ms = (Utc::now() - occurred_at).num_milliseconds().max(0) as f64;
                self.metrics.record_completed(&event_type, latency_ms);
                MessageOutcome::Completed { event_type }
            }
            Err(err) => MessageOutcome::Failed {
                event_type,
                error: err.to_string(),
            },
        }
    }
}

/// One worker task per shard, all sharing the process-wide channel.
pub struct ShardWorkerPool {
    channel: Arc<Channel>,
    shard_count: u32,
    processor: MessageProcessor,
}

impl ShardWorkerPool {
    pub fn new(
        channel: Arc<Channel>,
        shard_count: u32,
        store: Arc<dyn IdempotencyStore>,
        metrics: Arc<Metrics>,
        idempotency_ttl: Duration,
    ) -> Self {
        Self {
            channel,
            shard_count,
            processor: MessageProcessor {
                handlers: HashMap::default(),
                store,
                metrics,
                idempotency_ttl,
                inject_failure_types: vec![],
            },
        }
    }

    /// Registers a handler for an event type.
    pub fn register(mut self, event_type: &str, handler: Arc<dyn ConsumerHandler>) -> Self {
        self.processor
            .handlers
            .insert(event_type.to_owned(), handler);
        self
    }

    /// Forces side-effect failure for the listed event types, exercising
    /// the dead-letter path without touching handler code.
    pub fn inject_failures(mut self, event_types: Vec<String>) -> Self {
        self.processor.inject_failure_types = event_types;
        self
    }

    /// Runs one consumer task per shard until process shutdown. In-flight
    /// messages at shutdown stay unacknowledged and are redelivered by the
    /// broker on reconnect.
    pub async fn run(self: Arc<Self>) {
        let mut tasks = Vec::with_capacity(self.shard_count as usize);

        for shard in 0..self.shard_count {
            let pool = Arc::clone(&self);
            tasks.push(tokio::spawn(async move {
                if let Err(err) = pool.consume_shard(shard).await {
                    error!(shard, error = err.to_string(), "shard worker terminated");
                }
            }));
        }

        join_all(tasks).await;
    }

    async fn consume_shard(&self, shard: u32) -> Result<(), BackboneError> {
        let queue = shard_queue(shard);

        // prefetch = 1 is what turns per-queue FIFO into strict in-order
        // processing within the shard.
        if let Err(err) = self.channel.basic_qos(1, BasicQosOptions::default()).await {
            error!(error = err.to_string(), shard, "failure to configure qos");
            return Err(BackboneError::QoSDeclarationError(shard));
        }

        let mut consumer = match self
            .channel
            .basic_consume(
                &queue,
                &format!("worker-{queue}"),
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Ok(consumer) => consumer,
            Err(err) => {
                error!(error = err.to_string(), shard, "error to create the consumer");
                return Err(BackboneError::ConsumerDeclarationError(queue));
            }
        };

        let tracer = global::tracer("shard-worker");
        debug!(shard, queue, "shard worker consuming");

        // The next delivery is not pulled until the current one reaches a
        // terminal state.
        while let Some(result) = consumer.next().await {
            match result {
                Ok(delivery) => {
                    if let Err(err) = self.handle_delivery(shard, &tracer, delivery).await {
                        error!(shard, error = err.to_string(), "error finalizing delivery");
                    }
                }
                Err(err) => error!(shard, error = err.to_string(), "error receiving delivery"),
            }
        }

        Ok(())
    }

    async fn handle_delivery(
        &self,
        shard: u32,
        tracer: &BoxedTracer,
        delivery: Delivery,
    ) -> Result<(), BackboneError> {
        let kind = message_kind(&delivery.properties);
        let (ctx, mut span) = otel::consumer_span(&delivery.properties, tracer, &kind);
        let header_key = header_idempotency_key(&delivery.properties);

        let outcome = self
            .processor
            .process(shard, &ctx, &delivery.data, header_key)
            .await;

        match &outcome {
            MessageOutcome::Completed { event_type } => {
                debug!(shard, event_type = %event_type, "message processed")
            }
            MessageOutcome::Duplicate { event_type } => {
                debug!(shard, event_type = %event_type, "duplicate acknowledged without side effect")
            }
            MessageOutcome::Unrouted { event_type } => {
                debug!(shard, event_type = %event_type, "no handler registered, dropping")
            }
            MessageOutcome::Poison { reason } => {
                warn!(shard, reason, poison = true, "poison message dead-lettered")
            }
            MessageOutcome::Failed { event_type, error } => {
                error!(shard, event_type = %event_type, error = %error, "processing failed, dead-lettering")
            }
        }

        if outcome.is_ack() {
            if let Err(err) = delivery.ack(BasicAckOptions { multiple: false }).await {
                error!(shard, error = err.to_string(), "error whiling ack msg");
                span.set_status(Status::Error {
                    description: Cow::from("error to ack msg"),
                });
                return Err(BackboneError::AckMessageError);
            }
            span.set_status(Status::Ok);
        } else {
            if let Err(err) = delivery
                .nack(BasicNackOptions {
                    multiple: false,
                    requeue: false,
                })
                .await
            {
                error!(shard, error = err.to_string(), "error whiling nack msg");
                span.set_status(Status::Error {
                    description: Cow::from("error to nack msg"),
                });
                return Err(BackboneError::NackMessageError);
            }
            span.set_status(Status::Error {
                description: Cow::from("message dead-lettered"),
            });
        }

        Ok(())
    }
}

/// Message kind from the `type` property, used to name the consumer span.
fn message_kind(props: &AMQPProperties) -> String {
    match props.kind() {
        Some(value) => value.to_string(),
        _ => "unknown".to_owned(),
    }
}

/// Idempotency key recovered from transport headers, the fallback when the
/// body field is absent.
fn header_idempotency_key(props: &AMQPProperties) -> Option<String> {
    let headers = props.headers().clone().unwrap_or_default();
    match headers.inner().get(IDEMPOTENCY_KEY_HEADER) {
        Some(AMQPValue::LongString(value)) => std::str::from_utf8(value.as_bytes())
            .ok()
            .map(str::to_owned),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerError, MockConsumerHandler};
    use crate::idempotency::{InMemoryIdempotencyStore, MockIdempotencyStore};
    use serde_json::json;

    const ORDER_CONFIRMED: &str = "sales.order.confirmed";

    fn processor(handler: MockConsumerHandler) -> MessageProcessor {
        processor_with_store(handler, Arc::new(InMemoryIdempotencyStore::new()))
    }

    fn processor_with_store(
        handler: MockConsumerHandler,
        store: Arc<dyn IdempotencyStore>,
    ) -> MessageProcessor {
        let mut handlers: HashMap<String, Arc<dyn ConsumerHandler>> = HashMap::new();
        handlers.insert(ORDER_CONFIRMED.to_owned(), Arc::new(handler));
        MessageProcessor {
            handlers,
            store,
            metrics: Arc::new(Metrics::new()),
            idempotency_ttl: Duration::from_secs(3600),
            inject_failure_types: vec![],
        }
    }

    fn order_body(idempotency_key: Option<&str>) -> Vec<u8> {
        let mut envelope = EventEnvelope::new(
            ORDER_CONFIRMED,
            "ORD-1",
            json!({"amount": 1000}),
            idempotency_key.unwrap_or_default(),
        );
        envelope.idempotency_key = idempotency_key.map(str::to_owned);
        envelope.to_bytes().unwrap()
    }

    #[tokio::test]
    async fn successful_side_effect_is_acked_and_counted() {
        let mut handler = MockConsumerHandler::new();
        handler.expect_handle().times(1).returning(|_, _| Ok(()));

        let processor = processor(handler);
        let outcome = processor
            .process(2, &Context::current(), &order_body(Some("k1")), None)
            .await;

        assert_eq!(
            outcome,
            MessageOutcome::Completed {
                event_type: ORDER_CONFIRMED.to_owned()
            }
        );
        assert!(outcome.is_ack());
        assert_eq!(processor.metrics.top_event_types(1)[0].count, 1);
    }

    #[tokio::test]
    async fn duplicate_key_runs_side_effect_exactly_once() {
        let mut handler = MockConsumerHandler::new();
        handler.expect_handle().times(1).returning(|_, _| Ok(()));

        let processor = processor(handler);
        let body = order_body(Some("dup-1"));

        let first = processor.process(0, &Context::current(), &body, None).await;
        // Different event id, same logical operation.
        let second = processor
            .process(0, &Context::current(), &order_body(Some("dup-1")), None)
            .await;

        assert_eq!(
            first,
            MessageOutcome::Completed {
                event_type: ORDER_CONFIRMED.to_owned()
            }
        );
        assert_eq!(
            second,
            MessageOutcome::Duplicate {
                event_type: ORDER_CONFIRMED.to_owned()
            }
        );
        assert!(second.is_ack());
    }

    #[tokio::test]
    async fn missing_idempotency_key_is_poison() {
        let mut handler = MockConsumerHandler::new();
        handler.expect_handle().never();

        let processor = processor(handler);
        let outcome = processor
            .process(0, &Context::current(), &order_body(None), None)
            .await;

        assert_eq!(
            outcome,
            MessageOutcome::Poison {
                reason: "missing idempotency key"
            }
        );
        assert!(!outcome.is_ack());
    }

    #[tokio::test]
    async fn header_key_backfills_a_missing_body_field() {
        let mut handler = MockConsumerHandler::new();
        handler.expect_handle().times(1).returning(|_, _| Ok(()));

        let processor = processor(handler);
        let outcome = processor
            .process(
                0,
                &Context::current(),
                &order_body(None),
                Some("header-key".to_owned()),
            )
            .await;

        assert_eq!(
            outcome,
            MessageOutcome::Completed {
                event_type: ORDER_CONFIRMED.to_owned()
            }
        );
    }

    #[tokio::test]
    async fn unparseable_body_is_poison() {
        let mut handler = MockConsumerHandler::new();
        handler.expect_handle().never();

        let processor = processor(handler);
        let outcome = processor
            .process(0, &Context::current(), b"{broken", None)
            .await;

        assert_eq!(
            outcome,
            MessageOutcome::Poison {
                reason: "unparseable envelope"
            }
        );
    }

    #[tokio::test]
    async fn handler_failure_dead_letters_and_keeps_the_record() {
        let mut handler = MockConsumerHandler::new();
        handler
            .expect_handle()
            .times(1)
            .returning(|_, _| Err(HandlerError::Failed("simulated".to_owned())));

        let processor = processor(handler);
        let body = order_body(Some("k-fail"));

        let first = processor.process(0, &Context::current(), &body, None).await;
        assert!(matches!(first, MessageOutcome::Failed { .. }));
        assert!(!first.is_ack());

        // A redrive of the same message within the window is a duplicate:
        // the record written before the failed side effect is retained.
        let second = processor.process(0, &Context::current(), &body, None).await;
        assert_eq!(
            second,
            MessageOutcome::Duplicate {
                event_type: ORDER_CONFIRMED.to_owned()
            }
        );
    }

    #[tokio::test]
    async fn injected_failure_skips_the_handler() {
        let mut handler = MockConsumerHandler::new();
        handler.expect_handle().never();

        let mut processor = processor(handler);
        processor.inject_failure_types = vec![ORDER_CONFIRMED.to_owned()];

        let outcome = processor
            .process(0, &Context::current(), &order_body(Some("k1")), None)
            .await;

        assert_eq!(
            outcome,
            MessageOutcome::Failed {
                event_type: ORDER_CONFIRMED.to_owned(),
                error: "injected failure".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn unrouted_event_type_is_acked_and_dropped() {
        let processor = processor(MockConsumerHandler::new());

        let envelope = EventEnvelope::new("sales.credit.approved", "ORD-1", json!({}), "k1");
        let outcome = processor
            .process(0, &Context::current(), &envelope.to_bytes().unwrap(), None)
            .await;

        assert_eq!(
            outcome,
            MessageOutcome::Unrouted {
                event_type: "sales.credit.approved".to_owned()
            }
        );
        assert!(outcome.is_ack());
    }

    #[tokio::test]
    async fn store_failure_dead_letters_the_message() {
        let mut handler = MockConsumerHandler::new();
        handler.expect_handle().never();

        let mut store = MockIdempotencyStore::new();
        store
            .expect_create_if_absent()
            .returning(|_, _| Err(BackboneError::StoreError("unreachable".to_owned())));

        let processor = processor_with_store(handler, Arc::new(store));
        let outcome = processor
            .process(0, &Context::current(), &order_body(Some("k1")), None)
            .await;

        assert!(matches!(outcome, MessageOutcome::Failed { .. }));
    }
}
