// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Credit Decision Transformer
//!
//! Stateless event-in/event-out policy service chained on the backbone: it
//! consumes order confirmations and credit requests, applies the configured
//! credit limit, and emits decision events back onto the *same* shard as
//! the triggering order so ordering with subsequent events for that order
//! is preserved.
//!
//! Administrative actions never mutate prior events; they synthesize new
//! envelopes injected onto the affected order's shard, keeping the event
//! log append-only.

use crate::{
    envelope::EventEnvelope,
    handler::{ConsumerHandler, ConsumerMessage, HandlerError},
    publisher::EventPublisher,
};
use async_trait::async_trait;
use opentelemetry::Context;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub const ORDER_CONFIRMED: &str = "sales.order.confirmed";
pub const CREDIT_REQUESTED: &str = "sales.credit.requested";
pub const CREDIT_APPROVED: &str = "sales.credit.approved";
pub const CREDIT_REJECTED: &str = "sales.credit.rejected";
pub const CREDIT_ONHOLD: &str = "sales.credit.onhold";
pub const CREDIT_REVOKED: &str = "sales.credit.revoked";

/// Credit policy: a single configured limit in integer currency units.
#[derive(Debug, Clone, Copy)]
pub struct CreditPolicy {
    pub limit: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditDecision {
    Approved,
    Rejected,
}

impl CreditPolicy {
    pub fn decide(&self, amount: i64) -> CreditDecision {
        if amount <= self.limit {
            CreditDecision::Approved
        } else {
            CreditDecision::Rejected
        }
    }
}

/// Consumer side of the transformer.
///
/// On approval emits `sales.credit.approved`; on rejection emits
/// `sales.credit.rejected` and then `sales.credit.onhold`, in that order.
/// Decision events derive their idempotency keys from the triggering
/// message's key, so a crash between publish and ack dedupes downstream.
pub struct CreditDecisionHandler {
    policy: CreditPolicy,
    publisher: Arc<dyn EventPublisher>,
}

impl CreditDecisionHandler {
    pub fn new(policy: CreditPolicy, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { policy, publisher }
    }

    fn decision_event(
        trigger: &EventEnvelope,
        event_type: &str,
        suffix: &str,
        payload: Value,
    ) -> EventEnvelope {
        let base_key = trigger
            .idempotency_key
            .clone()
            .unwrap_or_else(|| trigger.event_id.to_string());

        let mut event = EventEnvelope::new(
            event_type,
            trigger.partition_key.clone(),
            payload,
            format!("{base_key}:{suffix}"),
        );
        event.tenant_id = trigger.tenant_id.clone();
        event
    }
}

#[async_trait]
impl ConsumerHandler for CreditDecisionHandler {
    async fn handle(&self, ctx: &Context, msg: &ConsumerMessage) -> Result<(), HandlerError> {
        let trigger = &msg.envelope;
        let order_id = trigger.partition_key.clone();
        let amount = extract_amount(&trigger.payload).ok_or_else(|| {
            HandlerError::MalformedPayload("missing or non-numeric amount".to_owned())
        })?;

        match self.policy.decide(amount) {
            CreditDecision::Approved => {
                let approved = Self::decision_event(
                    trigger,
                    CREDIT_APPROVED,
                    "approved",
                    json!({"orderId": order_id, "amount": amount, "decision": "approved"}),
                );
                self.publisher.publish(ctx, &approved).await?;
                info!(order_id = %order_id, amount, "credit approved");
            }
            CreditDecision::Rejected => {
                let rejected = Self::decision_event(
                    trigger,
                    CREDIT_REJECTED,
                    "rejected",
                    json!({"orderId": order_id, "amount": amount, "decision": "rejected"}),
                );
                self.publisher.publish(ctx, &rejected).await?;

                // Secondary fact for downstream workflow tooling; must
                // follow the rejection on the same shard.
                let onhold = Self::decision_event(
                    trigger,
                    CREDIT_ONHOLD,
                    "onhold",
                    json!({"orderId": order_id, "amount": amount, "reason": "credit_rejected"}),
                );
                self.publisher.publish(ctx, &onhold).await?;
                info!(order_id = %order_id, amount, "credit rejected, order on hold");
            }
        }

        Ok(())
    }
}

/// Amount in integer currency units; numbers and numeric strings accepted.
fn extract_amount(payload: &Value) -> Option<i64> {
    match payload.get("amount")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Submit a credit request for an order.
pub fn request_envelope(order_id: &str, amount: i64) -> EventEnvelope {
    let action_id = Uuid::new_v4();
    EventEnvelope::new(
        CREDIT_REQUESTED,
        order_id,
        json!({"orderId": order_id, "amount": amount}),
        format!("request:{order_id}:{action_id}"),
    )
}

/// Force-approve, bypassing the limit check entirely.
pub fn override_envelope(order_id: &str, reason: Option<String>) -> EventEnvelope {
    let action_id = Uuid::new_v4();
    EventEnvelope::new(
        CREDIT_APPROVED,
        order_id,
        json!({
            "orderId": order_id,
            "decision": "approved",
            "overridden": true,
            "reason": reason,
        }),
        format!("override:{order_id}:{action_id}"),
    )
}

/// Re-submit a credit request, re-entering the normal policy path.
pub fn reapply_envelope(order_id: &str, amount: i64) -> EventEnvelope {
    let action_id = Uuid::new_v4();
    EventEnvelope::new(
        CREDIT_REQUESTED,
        order_id,
        json!({"orderId": order_id, "amount": amount, "reapplied": true}),
        format!("reapply:{order_id}:{action_id}"),
    )
}

/// Retract a prior approval.
pub fn revoke_envelope(order_id: &str, reason: Option<String>) -> EventEnvelope {
    let action_id = Uuid::new_v4();
    EventEnvelope::new(
        CREDIT_REVOKED,
        order_id,
        json!({"orderId": order_id, "reason": reason}),
        format!("revoke:{order_id}:{action_id}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BackboneError;
    use crate::partitioner::shard_for;
    use crate::publisher::{MockEventPublisher, PublishReceipt};
    use std::sync::Mutex;

    fn recording_publisher() -> (Arc<Mutex<Vec<EventEnvelope>>>, MockEventPublisher) {
        let published: Arc<Mutex<Vec<EventEnvelope>>> = Arc::new(Mutex::new(vec![]));
        let sink = Arc::clone(&published);

        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().returning(move |_, envelope| {
            sink.lock().unwrap().push(envelope.clone());
            Ok(PublishReceipt {
                event_id: envelope.event_id,
                shard: shard_for(&envelope.partition_key, 4),
            })
        });

        (published, publisher)
    }

    fn order_confirmed(order_id: &str, amount: Value, key: &str) -> ConsumerMessage {
        let envelope =
            EventEnvelope::new(ORDER_CONFIRMED, order_id, json!({"amount": amount}), key);
        ConsumerMessage {
            shard: shard_for(order_id, 4),
            envelope,
        }
    }

    #[test]
    fn amount_at_the_limit_is_approved() {
        let policy = CreditPolicy { limit: 1_000_000 };
        assert_eq!(policy.decide(1_000_000), CreditDecision::Approved);
        assert_eq!(policy.decide(1_000_001), CreditDecision::Rejected);
        assert_eq!(policy.decide(0), CreditDecision::Approved);
    }

    #[tokio::test]
    async fn approval_emits_one_decision_on_the_order_shard() {
        let (published, publisher) = recording_publisher();
        let handler = CreditDecisionHandler::new(
            CreditPolicy { limit: 1_000_000 },
            Arc::new(publisher),
        );

        let msg = order_confirmed("ORD-1", json!(1_000_000), "k1");
        handler.handle(&Context::current(), &msg).await.unwrap();

        let events = published.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, CREDIT_APPROVED);
        assert_eq!(events[0].partition_key, "ORD-1");
        assert_eq!(events[0].idempotency_key.as_deref(), Some("k1:approved"));
        assert!(!events.iter().any(|e| e.event_type == CREDIT_ONHOLD));
    }

    #[tokio::test]
    async fn rejection_emits_rejected_then_onhold_in_order() {
        let (published, publisher) = recording_publisher();
        let handler = CreditDecisionHandler::new(
            CreditPolicy { limit: 1_000_000 },
            Arc::new(publisher),
        );

        let msg = order_confirmed("ORD-2", json!(1_000_001), "k2");
        handler.handle(&Context::current(), &msg).await.unwrap();

        let events = published.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, CREDIT_REJECTED);
        assert_eq!(events[1].event_type, CREDIT_ONHOLD);
        assert_eq!(events[0].partition_key, "ORD-2");
        assert_eq!(events[1].partition_key, "ORD-2");
        assert_eq!(events[1].idempotency_key.as_deref(), Some("k2:onhold"));
    }

    #[tokio::test]
    async fn credit_requests_follow_the_same_policy_path() {
        let (published, publisher) = recording_publisher();
        let handler =
            CreditDecisionHandler::new(CreditPolicy { limit: 500 }, Arc::new(publisher));

        let envelope =
            EventEnvelope::new(CREDIT_REQUESTED, "ORD-3", json!({"amount": 400}), "k3");
        let msg = ConsumerMessage {
            shard: shard_for("ORD-3", 4),
            envelope,
        };
        handler.handle(&Context::current(), &msg).await.unwrap();

        let events = published.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, CREDIT_APPROVED);
    }

    #[tokio::test]
    async fn numeric_string_amounts_are_accepted() {
        let (published, publisher) = recording_publisher();
        let handler =
            CreditDecisionHandler::new(CreditPolicy { limit: 100 }, Arc::new(publisher));

        let msg = order_confirmed("ORD-4", json!("250"), "k4");
        handler.handle(&Context::current(), &msg).await.unwrap();

        let events = published.lock().unwrap();
        assert_eq!(events[0].event_type, CREDIT_REJECTED);
    }

    #[tokio::test]
    async fn missing_amount_is_a_malformed_payload() {
        let (published, publisher) = recording_publisher();
        let handler =
            CreditDecisionHandler::new(CreditPolicy { limit: 100 }, Arc::new(publisher));

        let envelope = EventEnvelope::new(ORDER_CONFIRMED, "ORD-5", json!({}), "k5");
        let msg = ConsumerMessage { shard: 0, envelope };

        let err = handler.handle(&Context::current(), &msg).await.unwrap_err();
        assert!(matches!(err, HandlerError::MalformedPayload(_)));
        assert!(published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_failure_surfaces_to_the_worker() {
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .returning(|_, _| Err(BackboneError::PublishingError));

        let handler =
            CreditDecisionHandler::new(CreditPolicy { limit: 100 }, Arc::new(publisher));
        let msg = order_confirmed("ORD-6", json!(50), "k6");

        let err = handler.handle(&Context::current(), &msg).await.unwrap_err();
        assert!(matches!(err, HandlerError::PublishFailed(_)));
    }

    #[test]
    fn administrative_actions_land_on_the_order_shard() {
        let order_id = "ORD-42";

        let overridden = override_envelope(order_id, Some("manual review".to_owned()));
        assert_eq!(overridden.event_type, CREDIT_APPROVED);
        assert_eq!(overridden.partition_key, order_id);
        assert_eq!(overridden.payload["overridden"], true);

        let reapplied = reapply_envelope(order_id, 750);
        assert_eq!(reapplied.event_type, CREDIT_REQUESTED);
        assert_eq!(reapplied.payload["amount"], 750);

        let revoked = revoke_envelope(order_id, None);
        assert_eq!(revoked.event_type, CREDIT_REVOKED);

        // All three compute the same shard as the original order events.
        for envelope in [&overridden, &reapplied, &revoked] {
            assert_eq!(
                shard_for(&envelope.partition_key, 16),
                shard_for(order_id, 16)
            );
        }
    }

    #[test]
    fn administrative_actions_use_fresh_idempotency_keys() {
        let a = reapply_envelope("ORD-7", 10);
        let b = reapply_envelope("ORD-7", 10);
        assert_ne!(a.idempotency_key, b.idempotency_key);
    }
}
