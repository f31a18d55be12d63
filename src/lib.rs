// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;

pub mod channel;
pub mod config;
pub mod context;
pub mod credit;
pub mod envelope;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod idempotency;
pub mod metrics;
pub mod partitioner;
pub mod publisher;
pub mod queue;
pub mod redrive;
pub mod routes;
pub mod topology;
pub mod worker;
