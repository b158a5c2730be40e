//! Property-based tests for devsim
//!
//! Random workloads against the accountant, the block cache, block storage
//! and the request queue, checked against simple reference models.

mod proptest_strategies;

use std::sync::Arc;

use devsim::config::InternalConfig;
use devsim::device::{DeviceControlBlock, IoQueue, LruCache};
use devsim::drivers::{InternalMemoryDriver, NoFaults};
use devsim::interrupt::event_prefix;
use devsim::{DeviceError, DeviceId, InterruptTable, IoRequest, RamManager};
use proptest::prelude::*;
use proptest_strategies::*;

/// Most recent `capacity` distinct indices, least recent first
fn recency_tail(touches: &[usize], capacity: usize) -> Vec<usize> {
    let mut order: Vec<usize> = Vec::new();
    for &t in touches {
        order.retain(|&i| i != t);
        order.push(t);
    }
    let skip = order.len().saturating_sub(capacity);
    order.into_iter().skip(skip).collect()
}

fn ssd(cache_size: usize) -> InternalMemoryDriver {
    let config = InternalConfig {
        cache_size,
        ..InternalConfig::default()
    };
    let dcb = Arc::new(DeviceControlBlock::new(DeviceId(0), "SSD", config.capacity));
    InternalMemoryDriver::new(
        dcb,
        &config,
        128,
        Arc::new(RamManager::new(1024)),
        Arc::new(NoFaults),
        &InterruptTable::new(),
    )
}

// ════════════════════════════════════════════════════════════
// Accountant Property Tests
// ════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// `used` stays within `0..=capacity` and matches a saturating model
    #[test]
    fn accountant_never_exceeds_capacity(capacity in ram_capacity(), ops in ram_ops()) {
        let ram = RamManager::new(capacity);
        let mut model = 0usize;
        for op in ops {
            match op {
                RamOp::Allocate(n) => {
                    let fits = model + n <= capacity;
                    prop_assert_eq!(ram.allocate(n), fits);
                    if fits {
                        model += n;
                    }
                }
                RamOp::Free(n) => {
                    ram.free(n);
                    model = model.saturating_sub(n);
                }
            }
            prop_assert!(ram.used() <= capacity);
            prop_assert_eq!(ram.used(), model);
        }
    }

    /// A rejected allocation leaves the accountant untouched
    #[test]
    fn rejected_allocation_changes_nothing(capacity in ram_capacity(), extra in 1usize..1000) {
        let ram = RamManager::new(capacity);
        let err = ram.try_allocate(capacity + extra).unwrap_err();
        let is_capacity_exceeded = matches!(err, DeviceError::CapacityExceeded { .. });
        prop_assert!(is_capacity_exceeded);
        prop_assert_eq!(ram.used(), 0);
    }
}

// ════════════════════════════════════════════════════════════
// Cache Property Tests
// ════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// The cache holds exactly the most recently touched distinct indices
    #[test]
    fn lru_keeps_most_recent(capacity in 0usize..6, touches in block_touches(12)) {
        let mut cache = LruCache::new(capacity);
        for &t in &touches {
            if cache.get(t).is_none() {
                cache.insert(t, vec![t as u8]);
            }
            prop_assert!(cache.len() <= capacity);
        }
        prop_assert_eq!(cache.keys(), recency_tail(&touches, capacity));
    }

    /// Block writes through the driver keep the same recency order
    #[test]
    fn driver_cache_tracks_writes(touches in block_touches(8)) {
        let ssd = ssd(4);
        for &t in &touches {
            ssd.write_block(t, &[t as u8]).unwrap();
        }
        prop_assert_eq!(ssd.block_status().cached, recency_tail(&touches, 4));
    }

    /// A read returns the last write cut to the block size
    #[test]
    fn read_returns_truncated_write(index in 0usize..8, data in payload()) {
        let ssd = ssd(0);
        ssd.write_block(index, &data).unwrap();
        let expected = &data[..data.len().min(256)];
        prop_assert_eq!(ssd.read_block(index).unwrap(), expected.to_vec());
    }
}

// ════════════════════════════════════════════════════════════
// Queue Property Tests
// ════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Length never exceeds capacity and enqueue fails exactly when full
    #[test]
    fn queue_is_bounded(capacity in 1usize..12, ops in queue_ops()) {
        let queue = IoQueue::with_capacity(capacity);
        let mut model = 0usize;
        for op in ops {
            match op {
                QueueOp::Enqueue => {
                    let accepted = queue.enqueue(IoRequest::read(DeviceId(0))).is_ok();
                    prop_assert_eq!(accepted, model < capacity);
                    if accepted {
                        model += 1;
                    }
                }
                QueueOp::Dequeue => {
                    prop_assert_eq!(queue.try_dequeue().is_some(), model > 0);
                    model = model.saturating_sub(1);
                }
            }
            prop_assert!(queue.len() <= capacity);
            prop_assert_eq!(queue.len(), model);
        }
    }

    /// Requests come out in submission order
    #[test]
    fn queue_is_fifo(count in 1usize..10) {
        let queue = IoQueue::with_capacity(10);
        let ids: Vec<_> = (0..count)
            .map(|_| queue.enqueue(IoRequest::read(DeviceId(1))).unwrap())
            .collect();
        let drained: Vec<_> = std::iter::from_fn(|| queue.try_dequeue())
            .map(|r| r.id())
            .collect();
        prop_assert_eq!(drained, ids);
    }
}

// ════════════════════════════════════════════════════════════
// Event Name Property Tests
// ════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Event prefixes are upper-case identifiers of the same length
    #[test]
    fn event_prefix_is_identifier(name in device_name()) {
        let prefix = event_prefix(&name);
        prop_assert_eq!(prefix.chars().count(), name.chars().count());
        prop_assert!(prefix
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'));
    }
}
