// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Deterministic Partitioner
//!
//! Single shared shard-placement function for producers, administrative
//! endpoints, and the redrive tooling. Everything that routes by partition
//! key must go through `shard_for` so placement never drifts between
//! components.

/// Maps a partition key to a shard in `[0, shard_count)`.
///
/// The hash is an order-dependent 31-multiplier polynomial over the key's
/// characters with unsigned 32-bit wraparound. It depends on nothing but
/// the key itself: no wall-clock time, process identity, or environment,
/// so independent processes agree on placement without coordination.
pub fn shard_for(key: &str, shard_count: u32) -> u32 {
    let mut hash: u32 = 0;
    for ch in key.chars() {
        hash = hash.wrapping_mul(31).wrapping_add(ch as u32);
    }
    hash % shard_count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_keys_map_to_equal_shards() {
        for n in [1, 2, 4, 8, 16] {
            assert_eq!(shard_for("ORD-1", n), shard_for("ORD-1", n));
            assert_eq!(shard_for("CT-100", n), shard_for("CT-100", n));
        }
    }

    #[test]
    fn shard_is_always_in_range() {
        let keys = ["ORD-1", "ORD-2", "CT-100", "timesheet-7", "", "äöü", "a very long partition key indeed"];
        for n in [1, 2, 3, 4, 7, 8, 16, 64] {
            for key in keys {
                assert!(shard_for(key, n) < n);
            }
        }
    }

    #[test]
    fn known_placement_vectors_are_stable() {
        // Pinned values: any change here breaks compatibility with messages
        // already enqueued under the old placement.
        assert_eq!(shard_for("ORD-1", 8), 5);
        assert_eq!(shard_for("ORD-2", 8), 6);
        assert_eq!(shard_for("CT-100", 8), 5);
        assert_eq!(shard_for("ORD-42", 16), 10);
        assert_eq!(shard_for("timesheet-7", 4), 0);
        assert_eq!(shard_for("", 8), 0);
    }

    #[test]
    fn single_shard_absorbs_every_key() {
        for key in ["ORD-1", "ORD-2", "x"] {
            assert_eq!(shard_for(key, 1), 0);
        }
    }
}
