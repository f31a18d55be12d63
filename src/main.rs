// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use event_backbone::{
    channel::connect_with_backoff,
    config::Config,
    context::AppContext,
    credit::{CreditDecisionHandler, CreditPolicy, CREDIT_REQUESTED, ORDER_CONFIRMED},
    idempotency::{IdempotencyStore, InMemoryIdempotencyStore},
    metrics::{ManagementClient, Metrics},
    publisher::{AmqpEventPublisher, EventPublisher},
    routes,
    topology::BackboneTopology,
    worker::ShardWorkerPool,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env().expect("invalid configuration");

    // Blocks until the broker is reachable; there is no degraded mode.
    let (_connection, channel) = connect_with_backoff(&config).await;

    BackboneTopology::for_shards(channel.clone(), config.shard_count)
        .install()
        .await
        .expect("failed to install broker topology");
    tracing::info!(shards = config.shard_count, "broker topology installed");

    let publisher: Arc<dyn EventPublisher> =
        AmqpEventPublisher::new(channel.clone(), config.shard_count);
    let store: Arc<dyn IdempotencyStore> = Arc::new(InMemoryIdempotencyStore::new());
    let metrics = Arc::new(Metrics::new());
    let management = Arc::new(ManagementClient::new(&config));

    let credit_handler = Arc::new(CreditDecisionHandler::new(
        CreditPolicy {
            limit: config.credit_limit,
        },
        publisher.clone(),
    ));

    let pool = Arc::new(
        ShardWorkerPool::new(
            channel.clone(),
            config.shard_count,
            store.clone(),
            metrics.clone(),
            config.idempotency_ttl,
        )
        .inject_failures(config.inject_failure_types.clone())
        .register(ORDER_CONFIRMED, credit_handler.clone())
        .register(CREDIT_REQUESTED, credit_handler),
    );

    tokio::spawn(pool.run());
    tracing::info!("shard worker pool started");

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let ctx = Arc::new(AppContext {
        config,
        channel,
        publisher,
        store,
        metrics,
        management,
    });

    let app = routes::router(ctx);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    tracing::info!(%addr, "event backbone listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

// In-flight messages at shutdown stay unacknowledged and are redelivered
// by the broker on reconnect.
async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutdown signal received");
}
