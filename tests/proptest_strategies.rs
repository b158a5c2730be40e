//! Proptest strategies for generating accountant, cache and queue workloads

#![allow(dead_code)]

use proptest::prelude::*;

// ════════════════════════════════════════════════════════════
// Accountant
// ════════════════════════════════════════════════════════════

/// One accountant call
#[derive(Debug, Clone)]
pub enum RamOp {
    Allocate(usize),
    Free(usize),
}

/// Accountant capacity
pub fn ram_capacity() -> impl Strategy<Value = usize> {
    0usize..4096
}

pub fn ram_op() -> impl Strategy<Value = RamOp> {
    prop_oneof![
        (0usize..3000).prop_map(RamOp::Allocate),
        (0usize..3000).prop_map(RamOp::Free),
    ]
}

pub fn ram_ops() -> impl Strategy<Value = Vec<RamOp>> {
    prop::collection::vec(ram_op(), 0..64)
}

// ════════════════════════════════════════════════════════════
// Cache
// ════════════════════════════════════════════════════════════

/// Sequence of touched block indices
pub fn block_touches(blocks: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..blocks, 0..100)
}

/// Block payload, sometimes longer than any block
pub fn payload() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..600)
}

// ════════════════════════════════════════════════════════════
// Queue
// ════════════════════════════════════════════════════════════

/// One producer or consumer step
#[derive(Debug, Clone, Copy)]
pub enum QueueOp {
    Enqueue,
    Dequeue,
}

pub fn queue_ops() -> impl Strategy<Value = Vec<QueueOp>> {
    prop::collection::vec(
        prop_oneof![3 => Just(QueueOp::Enqueue), 1 => Just(QueueOp::Dequeue)],
        0..80,
    )
}

/// Device name, sometimes with spaces and punctuation
pub fn device_name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9 ._-]{0,20}".prop_map(|s| s.to_string())
}
