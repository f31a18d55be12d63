// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Application Context
//!
//! Explicitly constructed context owning the broker channel, the publishing
//! seam, the idempotency store, the metrics registry, and the management
//! client. Built once at process start, shared behind `Arc`, and torn down
//! on shutdown; nothing in the backbone lives in module-level globals.

use crate::{
    config::Config,
    idempotency::IdempotencyStore,
    metrics::{ManagementClient, Metrics},
    publisher::EventPublisher,
};
use lapin::Channel;
use std::sync::Arc;

pub struct AppContext {
    pub config: Config,
    pub channel: Arc<Channel>,
    pub publisher: Arc<dyn EventPublisher>,
    pub store: Arc<dyn IdempotencyStore>,
    pub metrics: Arc<Metrics>,
    pub management: Arc<ManagementClient>,
}
