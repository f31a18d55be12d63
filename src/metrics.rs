// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Metrics Aggregator
//!
//! Read-only composite view over three sources: in-process latency samples
//! (completed-work records timestamped at creation and completion),
//! in-process event-type counters, and per-shard queue depths fetched from
//! the broker's management API. The summary is recomputed on each request;
//! a failing sub-query degrades its section to an explicit error marker
//! instead of failing the whole aggregation.

use crate::{
    config::Config,
    errors::BackboneError,
    topology::{shard_dead_queue, shard_queue},
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// In-process counters and latency samples, owned by the application
/// context and shared by every shard worker.
#[derive(Default)]
pub struct Metrics {
    counters: DashMap<String, u64>,
    latencies_ms: Mutex<Vec<f64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed message: bumps the event-type counter and
    /// samples the creation-to-completion latency.
    pub fn record_completed(&self, event_type: &str, latency_ms: f64) {
        *self.counters.entry(event_type.to_owned()).or_insert(0) += 1;

        let mut samples = self
            .latencies_ms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        samples.push(latency_ms);
    }

    /// Latency distribution reduced via nearest-rank on a sorted sample.
    pub fn latency_summary(&self) -> LatencySummary {
        let mut samples = self
            .latencies_ms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        samples.sort_by(|a, b| a.total_cmp(b));

        let count = samples.len();
        let avg_ms = if count == 0 {
            0.0
        } else {
            samples.iter().sum::<f64>() / count as f64
        };

        LatencySummary {
            count,
            avg_ms,
            p50_ms: nearest_rank(&samples, 50.0),
            p95_ms: nearest_rank(&samples, 95.0),
            p99_ms: nearest_rank(&samples, 99.0),
        }
    }

    /// Event-type counters ranked to a top-N list.
    pub fn top_event_types(&self, n: usize) -> Vec<EventTypeCount> {
        let mut counts: Vec<EventTypeCount> = self
            .counters
            .iter()
            .map(|entry| EventTypeCount {
                event_type: entry.key().clone(),
                count: *entry.value(),
            })
            .collect();

        counts.sort_by(|a, b| b.count.cmp(&a.count).then(a.event_type.cmp(&b.event_type)));
        counts.truncate(n);
        counts
    }
}

/// Nearest-rank percentile over an already sorted sample.
fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((percentile / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LatencySummary {
    pub count: usize,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventTypeCount {
    pub event_type: String,
    pub count: u64,
}

/// Ready/unacked depth of one queue, as reported by the management API.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDepth {
    pub ready: u64,
    pub unacked: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardQueueDepth {
    pub shard: u32,
    pub ready: u64,
    pub unacked: u64,
    pub dead_ready: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDepthSummary {
    pub shards: Vec<ShardQueueDepth>,
    pub total_ready: u64,
    pub total_unacked: u64,
    pub total_dead: u64,
}

/// Client for the broker's HTTP management interface; queue depths come
/// from here and not from the data plane.
pub struct ManagementClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    vhost: String,
}

#[derive(Deserialize)]
struct QueueDepthBody {
    #[serde(default)]
    messages_ready: u64,
    #[serde(default)]
    messages_unacknowledged: u64,
}

impl ManagementClient {
    pub fn new(cfg: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: cfg.management.url.trim_end_matches('/').to_owned(),
            user: cfg.management.user.clone(),
            password: cfg.management.password.clone(),
            vhost: cfg.rabbitmq.vhost.clone(),
        }
    }

    pub async fn queue_depth(&self, queue: &str) -> Result<QueueDepth, BackboneError> {
        let vhost = self.vhost.replace('/', "%2F");
        let url = format!("{}/api/queues/{}/{}", self.base_url, vhost, queue);

        let body: QueueDepthBody = self
            .http
            .get(&url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(|err| BackboneError::ManagementError(err.to_string()))?
            .error_for_status()
            .map_err(|err| BackboneError::ManagementError(err.to_string()))?
            .json()
            .await
            .map_err(|err| BackboneError::ManagementError(err.to_string()))?;

        Ok(QueueDepth {
            ready: body.messages_ready,
            unacked: body.messages_unacknowledged,
        })
    }

    /// Per-shard depths for live and dead queues, summed across shards.
    pub async fn queue_depths(&self, shard_count: u32) -> Result<QueueDepthSummary, BackboneError> {
        let mut shards = Vec::with_capacity(shard_count as usize);
        let (mut total_ready, mut total_unacked, mut total_dead) = (0u64, 0u64, 0u64);

        for shard in 0..shard_count {
            let live = self.queue_depth(&shard_queue(shard)).await?;
            let dead = self.queue_depth(&shard_dead_queue(shard)).await?;

            total_ready += live.ready;
            total_unacked += live.unacked;
            total_dead += dead.ready;

            shards.push(ShardQueueDepth {
                shard,
                ready: live.ready,
                unacked: live.unacked,
                dead_ready: dead.ready,
            });
        }

        Ok(QueueDepthSummary {
            shards,
            total_ready,
            total_unacked,
            total_dead,
        })
    }
}

/// A summary section that degrades to an error marker when its source is
/// unreachable.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Section<T> {
    Ok(T),
    Unavailable { error: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub generated_at: DateTime<Utc>,
    pub latency: LatencySummary,
    pub event_types: Vec<EventTypeCount>,
    pub queues: Section<QueueDepthSummary>,
}

/// Recomputes the full summary. Only the queue-depth section can fail, and
/// a failure there degrades that section alone.
pub async fn collect_summary(
    metrics: &Metrics,
    management: &ManagementClient,
    shard_count: u32,
    top_n: usize,
) -> MetricsSummary {
    let queues = match management.queue_depths(shard_count).await {
        Ok(depths) => Section::Ok(depths),
        Err(err) => Section::Unavailable {
            error: err.to_string(),
        },
    };

    MetricsSummary {
        generated_at: Utc::now(),
        latency: metrics.latency_summary(),
        event_types: metrics.top_event_types(top_n),
        queues,
    }
}
