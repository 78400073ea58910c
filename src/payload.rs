//! Synthetic payload generation for throughput measurements.
//!
//! A single small random tile is generated per payload and repeated to the
//! requested length, keeping fill time linear in the output size without
//! drawing a full-size random buffer on every request. Payload bytes only
//! need to be incompressible-looking enough to defeat caches; they carry no
//! meaning.

use crate::config::SizeBounds;
use bytes::Bytes;
use log::debug;
use rand::Rng;
use std::collections::HashMap;

/// Size of the random tile repeated across the payload.
const TILE_SIZE: usize = 1_024;

/// Generate a payload of exactly `bounds.clamp(size)` bytes.
///
/// Out-of-range requests are served with the nearest bound, never rejected,
/// so the caller always receives some valid payload.
pub fn generate(size: u64, bounds: &SizeBounds) -> Bytes {
    fill(bounds.clamp(size) as usize)
}

fn fill(size: usize) -> Bytes {
    let mut tile = [0u8; TILE_SIZE];
    rand::thread_rng().fill(&mut tile[..]);

    let mut buffer = Vec::with_capacity(size);
    while buffer.len() + TILE_SIZE <= size {
        buffer.extend_from_slice(&tile);
    }
    buffer.extend_from_slice(&tile[..size - buffer.len()]);

    Bytes::from(buffer)
}

/// Pre-generated payload buffers owned by the server component.
///
/// Built once during startup and shared read-only with request handlers, so
/// no first-request ever races payload generation and no request can mutate
/// a buffer another request is streaming.
#[derive(Debug)]
pub struct PayloadCache {
    bounds: SizeBounds,
    cached: HashMap<u64, Bytes>,
}

impl PayloadCache {
    pub fn new(bounds: SizeBounds, preset_sizes: &[u64]) -> Self {
        let mut cached = HashMap::new();

        for &size in preset_sizes {
            let clamped = bounds.clamp(size);
            cached.entry(clamped).or_insert_with(|| {
                debug!("pre-generating {} byte payload", clamped);
                fill(clamped as usize)
            });
        }

        Self { bounds, cached }
    }

    /// Payload for a requested size, clamped into bounds.
    ///
    /// Cached buffers are returned as cheap reference-counted clones;
    /// other sizes are generated per request.
    pub fn get(&self, size: u64) -> Bytes {
        let clamped = self.bounds.clamp(size);

        match self.cached.get(&clamped) {
            Some(payload) => payload.clone(),
            None => fill(clamped as usize),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_bounds() -> SizeBounds {
        SizeBounds::new(1_000, 1_000_000).unwrap()
    }

    #[test]
    fn generates_exact_size() {
        let bounds = test_bounds();
        for size in [1_000u64, 1_024, 4_096, 100_000, 999_999, 1_000_000] {
            assert_eq!(generate(size, &bounds).len() as u64, size);
        }
    }

    #[test]
    fn clamps_undersized_requests_to_lower_bound() {
        let bounds = test_bounds();
        assert_eq!(generate(0, &bounds).len(), 1_000);
        assert_eq!(generate(999, &bounds).len(), 1_000);
    }

    #[test]
    fn clamps_oversized_requests_to_upper_bound() {
        let bounds = test_bounds();
        assert_eq!(generate(u64::MAX, &bounds).len(), 1_000_000);
    }

    #[test]
    fn payload_repeats_a_single_tile() {
        let bounds = test_bounds();
        let payload = generate(4_096, &bounds);
        assert_eq!(&payload[..TILE_SIZE], &payload[TILE_SIZE..2 * TILE_SIZE]);
    }

    #[test]
    fn cache_serves_preset_sizes_without_regenerating() {
        let cache =
            PayloadCache::new(test_bounds(), &[100_000, 100_000, 4_096]);

        let first = cache.get(100_000);
        let second = cache.get(100_000);
        assert_eq!(first.len(), 100_000);
        // Bytes clones of the same cached buffer share storage.
        assert_eq!(first.as_ptr(), second.as_ptr());
    }

    #[test]
    fn cache_generates_unlisted_sizes_on_demand() {
        let cache = PayloadCache::new(test_bounds(), &[100_000]);
        assert_eq!(cache.get(5_000).len(), 5_000);
    }

    #[test]
    fn cache_clamps_like_the_generator() {
        let cache = PayloadCache::new(test_bounds(), &[100_000]);
        assert_eq!(cache.get(1).len(), 1_000);
        assert_eq!(cache.get(u64::MAX).len(), 1_000_000);
    }

    proptest! {
        /// Every in-range size is served at exactly the requested length.
        #[test]
        fn in_range_sizes_are_exact(size in 1_000u64..=1_000_000u64) {
            let payload = generate(size, &test_bounds());
            prop_assert_eq!(payload.len() as u64, size);
        }

        /// Every size, in range or not, lands within bounds.
        #[test]
        fn all_sizes_land_within_bounds(size in proptest::num::u64::ANY) {
            let bounds = test_bounds();
            let len = generate(size, &bounds).len() as u64;
            prop_assert!(len >= bounds.min && len <= bounds.max);
        }
    }
}
