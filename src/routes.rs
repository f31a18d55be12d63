// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Administrative HTTP Surface
//!
//! Thin producer-side API for operators and other services: generic event
//! publishing, credit actions, contract actions, dead-letter redrive, and
//! the metrics summary. Every accepted action returns the generated event
//! id and computed shard, never the outcome of downstream processing —
//! that is asynchronous and only observable through the dead queues and
//! the metrics summary.

use crate::{
    context::AppContext,
    credit,
    envelope::EventEnvelope,
    metrics::{collect_summary, MetricsSummary},
    redrive::{redrive, AmqpDeadLetterSource},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use opentelemetry::Context;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

pub const CONTRACT_CREATED: &str = "sales.contract.created";
pub const CONTRACT_RENEWED: &str = "sales.contract.renewed";
pub const CONTRACT_REMINDER: &str = "sales.contract.reminder";

/// Acknowledgment for accepted producer-side actions.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedResponse {
    pub accepted: bool,
    pub event_id: Uuid,
    pub shard: u32,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/events", post(publish_event))
        .route("/api/credit/requests", post(credit_request))
        .route("/api/credit/override", post(credit_override))
        .route("/api/credit/reapply", post(credit_reapply))
        .route("/api/credit/revoke", post(credit_revoke))
        .route("/api/contracts", post(contract_create))
        .route("/api/contracts/{id}/renew", post(contract_renew))
        .route("/api/contracts/{id}/reminders", post(contract_reminders))
        .route("/api/redrive", post(trigger_redrive))
        .route("/api/metrics/summary", get(metrics_summary))
        .with_state(ctx)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy", "service": "event-backbone"}))
}

/// Generic producer endpoint; the body mirrors the envelope wire shape.
async fn publish_event(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<Value>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let event_type = require_str(&body, "eventType", "missing_event_type")?;
    let partition_key = require_str(&body, "partitionKey", "missing_partition_key")?;
    let idempotency_key = require_str(&body, "idempotencyKey", "missing_idempotency_key")?;
    let payload = body.get("payload").cloned().unwrap_or(Value::Null);

    let mut envelope = EventEnvelope::new(event_type, partition_key, payload, idempotency_key);
    if let Some(tenant_id) = body.get("tenantId").and_then(Value::as_str) {
        envelope = envelope.with_tenant(tenant_id);
    }

    accept(&ctx, envelope).await
}

async fn credit_request(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<Value>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let order_id = require_str(&body, "orderId", "missing_order_id")?;
    let amount = parse_amount(&body)?;

    accept(&ctx, credit::request_envelope(&order_id, amount)).await
}

async fn credit_override(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<Value>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let order_id = require_str(&body, "orderId", "missing_order_id")?;
    let reason = optional_str(&body, "reason");

    accept(&ctx, credit::override_envelope(&order_id, reason)).await
}

async fn credit_reapply(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<Value>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let order_id = require_str(&body, "orderId", "missing_order_id")?;
    let amount = parse_amount(&body)?;

    accept(&ctx, credit::reapply_envelope(&order_id, amount)).await
}

async fn credit_revoke(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<Value>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let order_id = require_str(&body, "orderId", "missing_order_id")?;
    let reason = optional_str(&body, "reason");

    accept(&ctx, credit::revoke_envelope(&order_id, reason)).await
}

async fn contract_create(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<Value>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let contract_id = require_str(&body, "contractId", "missing_contract_id")?;
    let action_id = Uuid::new_v4();

    let envelope = EventEnvelope::new(
        CONTRACT_CREATED,
        contract_id.clone(),
        json!({
            "contractId": contract_id,
            "customerId": body.get("customerId").and_then(Value::as_str),
            "amount": body.get("amount").cloned(),
        }),
        format!("contract-create:{contract_id}:{action_id}"),
    );

    accept(&ctx, envelope).await
}

async fn contract_renew(
    State(ctx): State<Arc<AppContext>>,
    Path(contract_id): Path<String>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let action_id = Uuid::new_v4();
    let envelope = EventEnvelope::new(
        CONTRACT_RENEWED,
        contract_id.clone(),
        json!({"contractId": contract_id}),
        format!("contract-renew:{contract_id}:{action_id}"),
    );

    accept(&ctx, envelope).await
}

async fn contract_reminders(
    State(ctx): State<Arc<AppContext>>,
    Path(contract_id): Path<String>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let action_id = Uuid::new_v4();
    let envelope = EventEnvelope::new(
        CONTRACT_REMINDER,
        contract_id.clone(),
        json!({"contractId": contract_id}),
        format!("contract-reminder:{contract_id}:{action_id}"),
    );

    accept(&ctx, envelope).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RedriveRequest {
    max_count: Option<u64>,
}

#[derive(Debug, Serialize)]
struct RedriveResponse {
    moved: u64,
}

async fn trigger_redrive(
    State(ctx): State<Arc<AppContext>>,
    body: axum::body::Bytes,
) -> Result<Json<RedriveResponse>, ApiError> {
    // The count is optional and so is the body itself.
    let max = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<RedriveRequest>(&body)
            .map_err(|_| bad_request("invalid_body", "body must be JSON"))?
            .max_count
    };
    let source = AmqpDeadLetterSource::new(ctx.channel.clone());

    match redrive(&source, ctx.config.shard_count, max).await {
        Ok(moved) => Ok(Json(RedriveResponse { moved })),
        Err(err) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("redrive_failed", err.to_string())),
        )),
    }
}

async fn metrics_summary(State(ctx): State<Arc<AppContext>>) -> Json<MetricsSummary> {
    Json(
        collect_summary(
            &ctx.metrics,
            &ctx.management,
            ctx.config.shard_count,
            ctx.config.metrics_top_n,
        )
        .await,
    )
}

async fn accept(
    ctx: &AppContext,
    envelope: EventEnvelope,
) -> Result<Json<AcceptedResponse>, ApiError> {
    match ctx.publisher.publish(&Context::current(), &envelope).await {
        Ok(receipt) => Ok(Json(AcceptedResponse {
            accepted: true,
            event_id: receipt.event_id,
            shard: receipt.shard,
        })),
        Err(err) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("publish_failed", err.to_string())),
        )),
    }
}

fn require_str(body: &Value, field: &str, error_code: &str) -> Result<String, ApiError> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| bad_request(error_code, format!("`{field}` is required")))
}

fn optional_str(body: &Value, field: &str) -> Option<String> {
    body.get(field).and_then(Value::as_str).map(str::to_owned)
}

/// Amounts must be numbers or numeric strings; anything else is rejected
/// synchronously instead of poisoning the stream.
fn parse_amount(body: &Value) -> Result<i64, ApiError> {
    match body.get("amount") {
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| bad_request("invalid_amount", "`amount` must be an integer")),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| bad_request("invalid_amount", "`amount` must be numeric")),
        _ => Err(bad_request("invalid_amount", "`amount` is required")),
    }
}

fn bad_request(error: &str, message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new(error, message)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_are_client_errors() {
        let body = json!({"amount": 100});
        let err = require_str(&body, "orderId", "missing_order_id").unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert_eq!(err.1.error, "missing_order_id");

        let err = require_str(&json!({"orderId": ""}), "orderId", "missing_order_id").unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn amounts_accept_numbers_and_numeric_strings() {
        assert_eq!(parse_amount(&json!({"amount": 1500})).unwrap(), 1500);
        assert_eq!(parse_amount(&json!({"amount": "1500"})).unwrap(), 1500);
    }

    #[test]
    fn non_numeric_amounts_are_client_errors() {
        for body in [
            json!({"amount": "lots"}),
            json!({"amount": {"value": 5}}),
            json!({"amount": 10.5}),
            json!({}),
        ] {
            let err = parse_amount(&body).unwrap_err();
            assert_eq!(err.0, StatusCode::BAD_REQUEST);
            assert_eq!(err.1.error, "invalid_amount");
        }
    }
}
