// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Idempotency Store
//!
//! Key-value gate guaranteeing at-most-once side-effect execution across
//! redeliveries. The store's only primitive is an atomic create-if-absent
//! with a finite expiry: presence of a record is the single source of truth
//! for "already handled".
//!
//! The record is reserved before the side effect completes. A crash after
//! the reservation but before the effect leaves a record with no effect,
//! causing a silent skip on redelivery until the record expires; this is
//! the accepted best-effort semantic (see DESIGN.md).

use crate::errors::BackboneError;
use async_trait::async_trait;
use dashmap::{DashMap, Entry};
use std::time::{Duration, Instant};

/// Namespace prefix for idempotency records.
pub const IDEMPOTENCY_KEY_PREFIX: &str = "idemp:";

/// Atomic create-if-absent gate keyed by idempotency key.
///
/// The create must be atomic at the store level: no client-side
/// read-then-write, or concurrent redelivery across shards races into a
/// duplicate side effect.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Reserves `key` for `ttl`. Returns `true` when the reservation was
    /// created, `false` when a live record already existed.
    async fn create_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, BackboneError>;
}

/// In-memory implementation backed by a concurrent map.
///
/// Expired entries are reclaimed lazily on re-reservation, so the map only
/// grows with the set of distinct keys seen inside one expiry window.
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    entries: DashMap<String, Instant>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn create_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, BackboneError> {
        let full_key = format!("{IDEMPOTENCY_KEY_PREFIX}{key}");
        let now = Instant::now();

        match self.entries.entry(full_key) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() <= now {
                    occupied.insert(now + ttl);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now + ttl);
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_reservation_wins_and_duplicates_lose() {
        let store = InMemoryIdempotencyStore::new();
        let ttl = Duration::from_secs(3600);

        assert!(store.create_if_absent("k1", ttl).await.unwrap());
        assert!(!store.create_if_absent("k1", ttl).await.unwrap());
        assert!(!store.create_if_absent("k1", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn distinct_keys_do_not_interfere() {
        let store = InMemoryIdempotencyStore::new();
        let ttl = Duration::from_secs(3600);

        assert!(store.create_if_absent("k1", ttl).await.unwrap());
        assert!(store.create_if_absent("k2", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn expired_record_can_be_reserved_again() {
        let store = InMemoryIdempotencyStore::new();

        assert!(store
            .create_if_absent("k1", Duration::from_millis(10))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store
            .create_if_absent("k1", Duration::from_millis(10))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn keys_are_namespaced() {
        let store = InMemoryIdempotencyStore::new();
        let ttl = Duration::from_secs(60);

        store.create_if_absent("k1", ttl).await.unwrap();
        assert!(store.entries.contains_key("idemp:k1"));
    }
}
