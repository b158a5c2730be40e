//! I/O Request - typed requests and the bounded request queue
//!
//! Producers append to the tail of an [`IoQueue`]; a single worker takes
//! from the head. `enqueue` never blocks, it fails fast once the queue is at
//! capacity.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::device::dev_hdr::DeviceId;
use crate::error::{DeviceError, Result};
use crate::sync::{Event, SleepLock};

// ============================================================================
// I/O Operation
// ============================================================================

/// I/O operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoOp {
    Read,
    Write,
}

impl IoOp {
    pub const fn as_str(&self) -> &'static str {
        match self {
            IoOp::Read => "read",
            IoOp::Write => "write",
        }
    }

    pub const fn is_read(&self) -> bool {
        matches!(self, IoOp::Read)
    }

    pub const fn is_write(&self) -> bool {
        matches!(self, IoOp::Write)
    }
}

impl FromStr for IoOp {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" | "r" => Ok(IoOp::Read),
            "write" | "w" => Ok(IoOp::Write),
            _ => Err(DeviceError::UnknownOperation(String::from(s))),
        }
    }
}

impl core::fmt::Display for IoOp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// I/O Request
// ============================================================================

/// I/O Request identifier, assigned on first enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct IoReqId(pub u64);

impl core::fmt::Display for IoReqId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// I/O Request
///
/// Immutable once queued. A busy-device requeue moves the same value back
/// to the tail without changing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoRequest {
    id: IoReqId,
    device_id: DeviceId,
    op: IoOp,
    payload: Option<Vec<u8>>,
    block: Option<usize>,
    length: Option<usize>,
    origin: Option<String>,
}

impl IoRequest {
    pub fn new(device_id: DeviceId, op: IoOp, payload: Option<Vec<u8>>) -> Self {
        Self {
            id: IoReqId::default(),
            device_id,
            op,
            payload,
            block: None,
            length: None,
            origin: None,
        }
    }

    /// Create a read request
    pub fn read(device_id: DeviceId) -> Self {
        Self::new(device_id, IoOp::Read, None)
    }

    /// Create a write request
    pub fn write(device_id: DeviceId, data: impl Into<Vec<u8>>) -> Self {
        Self::new(device_id, IoOp::Write, Some(data.into()))
    }

    /// Address a specific block on a block device
    pub fn at_block(mut self, index: usize) -> Self {
        self.block = Some(index);
        self
    }

    /// Transfer length for devices without block addressing
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    /// Name of the process issuing the request
    pub fn from_process(mut self, origin: &str) -> Self {
        self.origin = Some(String::from(origin));
        self
    }

    pub fn id(&self) -> IoReqId {
        self.id
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn op(&self) -> IoOp {
        self.op
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn block(&self) -> Option<usize> {
        self.block
    }

    pub fn length(&self) -> Option<usize> {
        self.length
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Bytes this request moves: explicit length, else payload length
    pub fn transfer_len(&self) -> Option<usize> {
        self.length
            .or_else(|| self.payload.as_ref().map(|p| p.len()))
    }
}

// ============================================================================
// I/O Request Queue
// ============================================================================

/// Default queue capacity
pub const IO_QUEUE_DEFAULT_SIZE: usize = 10;

/// Bounded multi-producer FIFO of pending requests
#[derive(Debug)]
pub struct IoQueue {
    pending: SleepLock<VecDeque<IoRequest>>,
    ready: Event,
    capacity: usize,
    next_id: AtomicU64,
}

impl IoQueue {
    pub fn new() -> Self {
        Self::with_capacity(IO_QUEUE_DEFAULT_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: SleepLock::new(VecDeque::with_capacity(capacity)),
            ready: Event::new(),
            capacity,
            next_id: AtomicU64::new(1),
        }
    }

    /// Append a new request, assigning its id
    pub fn enqueue(&self, mut req: IoRequest) -> Result<IoReqId> {
        let mut pending = self.pending.lock();
        if pending.len() >= self.capacity {
            log::warn!(
                target: "queue",
                "I/O queue is full, {} on device {} rejected",
                req.op,
                req.device_id
            );
            return Err(DeviceError::QueueFull {
                capacity: self.capacity,
            });
        }
        req.id = IoReqId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let id = req.id;
        log::debug!(target: "queue", "enqueued {} {} on device {}", id, req.op, req.device_id);
        pending.push_back(req);
        drop(pending);
        self.ready.notify_one();
        Ok(id)
    }

    /// Put an already-queued request back at the tail, unchanged
    pub fn requeue(&self, req: IoRequest) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.len() >= self.capacity {
            log::warn!(target: "queue", "I/O queue is full, {} dropped on requeue", req.id);
            return Err(DeviceError::QueueFull {
                capacity: self.capacity,
            });
        }
        pending.push_back(req);
        drop(pending);
        self.ready.notify_one();
        Ok(())
    }

    /// Take the head request without waiting
    pub fn try_dequeue(&self) -> Option<IoRequest> {
        self.pending.lock().pop_front()
    }

    /// Take the head request, waiting at most `timeout` for one to arrive
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<IoRequest> {
        let mut pending = self.pending.lock();
        if let Some(req) = pending.pop_front() {
            return Some(req);
        }
        let (mut pending, _) = self.ready.wait_timeout(pending, timeout);
        pending.pop_front()
    }

    /// Drop every pending request, returns how many were discarded
    pub fn clear(&self) -> usize {
        let mut pending = self.pending.lock();
        let dropped = pending.len();
        pending.clear();
        dropped
    }

    /// Wake any thread waiting in `dequeue_timeout`
    pub fn wake(&self) {
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the pending requests, head first
    pub fn snapshot(&self) -> Vec<IoRequest> {
        self.pending.lock().iter().cloned().collect()
    }
}

impl Default for IoQueue {
    fn default() -> Self {
        Self::new()
    }
}
