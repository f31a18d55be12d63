// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Event Envelope
//!
//! The unit of transport for the backbone. The wire shape is camelCase JSON:
//! `{eventId, occurredAt, eventType, tenantId?, idempotencyKey,
//! partitionKey, payload}`. The idempotency key is additionally stamped as a
//! message header by the publisher so consumers can recover it without
//! parsing the body.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::BackboneError;

/// Event envelope wrapping every message on the backbone.
///
/// `occurred_at` is the business occurrence time, not transport time.
/// `idempotency_key` identifies the logical operation and may be shared by
/// several envelopes when retries reuse it; it is required for any event
/// with side effects, and consumers treat its absence as poison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub partition_key: String,
    #[serde(default)]
    pub payload: Value,
}

impl EventEnvelope {
    /// Creates a new envelope with a fresh event id and the current time.
    pub fn new(
        event_type: impl Into<String>,
        partition_key: impl Into<String>,
        payload: Value,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            event_type: event_type.into(),
            tenant_id: None,
            idempotency_key: Some(idempotency_key.into()),
            partition_key: partition_key.into(),
            payload,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Parses an envelope from a raw message body.
    pub fn from_bytes(data: &[u8]) -> Result<Self, BackboneError> {
        serde_json::from_slice(data).map_err(|_| BackboneError::ParsePayloadError)
    }

    /// Serializes the envelope to its JSON wire shape.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BackboneError> {
        serde_json::to_vec(self).map_err(|_| BackboneError::ParsePayloadError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_is_camel_case() {
        let envelope = EventEnvelope::new(
            "sales.order.confirmed",
            "ORD-1",
            json!({"amount": 1500}),
            "k1",
        );

        let value: Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();
        assert!(value.get("eventId").is_some());
        assert!(value.get("occurredAt").is_some());
        assert_eq!(value["eventType"], "sales.order.confirmed");
        assert_eq!(value["idempotencyKey"], "k1");
        assert_eq!(value["partitionKey"], "ORD-1");
        assert_eq!(value["payload"]["amount"], 1500);
        // tenantId is omitted entirely when unset
        assert!(value.get("tenantId").is_none());
    }

    #[test]
    fn tenant_id_round_trips_when_set() {
        let envelope = EventEnvelope::new("sales.order.confirmed", "ORD-1", Value::Null, "k1")
            .with_tenant("tenant-9");

        let parsed = EventEnvelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.tenant_id.as_deref(), Some("tenant-9"));
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn missing_idempotency_key_parses_as_none() {
        let body = json!({
            "eventId": "550e8400-e29b-41d4-a716-446655440000",
            "occurredAt": "2026-01-01T00:00:00Z",
            "eventType": "sales.order.confirmed",
            "partitionKey": "ORD-1",
            "payload": {"amount": 10}
        });

        let parsed = EventEnvelope::from_bytes(body.to_string().as_bytes()).unwrap();
        assert!(parsed.idempotency_key.is_none());
    }

    #[test]
    fn garbage_body_is_a_parse_error() {
        assert_eq!(
            EventEnvelope::from_bytes(b"not json at all"),
            Err(BackboneError::ParsePayloadError)
        );
    }
}
