// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Backbone Configuration
//!
//! Environment-driven configuration for the event backbone. Every value has
//! a local-development default so the service starts with an empty
//! environment next to a stock RabbitMQ container.

use std::env;
use std::time::Duration;

/// Broker connection parameters.
#[derive(Debug, Clone)]
pub struct RabbitMqConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
}

/// Broker management API parameters, used only by the metrics aggregator.
#[derive(Debug, Clone)]
pub struct ManagementConfig {
    pub url: String,
    pub user: String,
    pub password: String,
}

/// Administrative HTTP listener parameters.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

/// Full backbone configuration.
///
/// `shard_count` is a fixed deployment-time parameter: changing it without
/// a migration orphans messages already enqueued under the old placement,
/// since producers and the redrive tooling derive shard placement from it.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: String,
    pub rabbitmq: RabbitMqConfig,
    pub management: ManagementConfig,
    pub http: HttpConfig,
    pub shard_count: u32,
    pub credit_limit: i64,
    pub idempotency_ttl: Duration,
    pub connect_backoff_base: Duration,
    pub connect_backoff_cap: Duration,
    /// Event types whose side effects are forced to fail, exercising the
    /// dead-letter path without touching handler code.
    pub inject_failure_types: Vec<String>,
    pub metrics_top_n: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let user = env::var("AMQP_USER").unwrap_or_else(|_| "guest".to_string());
        let password = env::var("AMQP_PASSWORD").unwrap_or_else(|_| "guest".to_string());

        Ok(Self {
            app_name: env::var("APP_NAME").unwrap_or_else(|_| "event-backbone".to_string()),
            rabbitmq: RabbitMqConfig {
                host: env::var("AMQP_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: env::var("AMQP_PORT")
                    .unwrap_or_else(|_| "5672".to_string())
                    .parse()?,
                user: user.clone(),
                password: password.clone(),
                vhost: env::var("AMQP_VHOST").unwrap_or_else(|_| "/".to_string()),
            },
            management: ManagementConfig {
                url: env::var("MANAGEMENT_URL")
                    .unwrap_or_else(|_| "http://localhost:15672".to_string()),
                user: env::var("MANAGEMENT_USER").unwrap_or(user),
                password: env::var("MANAGEMENT_PASSWORD").unwrap_or(password),
            },
            http: HttpConfig {
                host: env::var("HTTP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("HTTP_PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()?,
            },
            shard_count: env::var("SHARD_COUNT")
                .unwrap_or_else(|_| "4".to_string())
                .parse()?,
            credit_limit: env::var("CREDIT_LIMIT")
                .unwrap_or_else(|_| "1000000".to_string())
                .parse()?,
            idempotency_ttl: Duration::from_secs(
                env::var("IDEMPOTENCY_TTL_SECS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()?,
            ),
            connect_backoff_base: Duration::from_millis(
                env::var("CONNECT_BACKOFF_BASE_MS")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()?,
            ),
            connect_backoff_cap: Duration::from_millis(
                env::var("CONNECT_BACKOFF_CAP_MS")
                    .unwrap_or_else(|_| "5000".to_string())
                    .parse()?,
            ),
            inject_failure_types: env::var("INJECT_FAILURE_TYPES")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
            metrics_top_n: env::var("METRICS_TOP_N")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_with_empty_environment() {
        let cfg = Config::from_env().unwrap();

        assert_eq!(cfg.rabbitmq.port, 5672);
        assert_eq!(cfg.shard_count, 4);
        assert_eq!(cfg.credit_limit, 1_000_000);
        assert_eq!(cfg.idempotency_ttl, Duration::from_secs(3600));
        assert!(cfg.inject_failure_types.is_empty());
    }
}
