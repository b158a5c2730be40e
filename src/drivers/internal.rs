//! Internal block storage driver
//!
//! Fixed device (SSD or persistent RAM) with block storage, an LRU read
//! cache, simulated latency and injected failures. Staging buffers are
//! charged to the RAM accountant.

use std::sync::Arc;

use crate::config::InternalConfig;
use crate::device::block::{BlockStore, LruCache};
use crate::device::conf::{DeviceDetail, DeviceKind, Driver, DriverStatus, IoCompletion};
use crate::device::dev_hdr::{Device, DeviceControlBlock};
use crate::device::io_req::{IoOp, IoRequest};
use crate::drivers::fault::{simulate_latency, FaultModel};
use crate::error::{DeviceError, Result};
use crate::interrupt::InterruptTable;
use crate::memory::RamManager;
use crate::sync::SleepLock;

/// Storage array and cache, always locked together
#[derive(Debug)]
struct Storage {
    blocks: BlockStore,
    cache: LruCache,
}

/// Used-block count and cache membership
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStatus {
    pub used_blocks: usize,
    pub total_blocks: usize,
    /// Least recently used first
    pub cached: Vec<usize>,
}

/// Internal memory device driver
pub struct InternalMemoryDriver {
    dcb: Arc<DeviceControlBlock>,
    device: Arc<Device>,
    storage: SleepLock<Storage>,
    faults: Arc<dyn FaultModel>,
}

impl InternalMemoryDriver {
    /// Build the driver and register its completion interrupt
    pub fn new(
        dcb: Arc<DeviceControlBlock>,
        config: &InternalConfig,
        buffer_size: usize,
        ram: Arc<RamManager>,
        faults: Arc<dyn FaultModel>,
        interrupts: &InterruptTable,
    ) -> Self {
        let device = Arc::new(Device::with_accountant(dcb.name(), buffer_size, ram));
        let blocks = BlockStore::new(dcb.capacity(), config.block_size);
        log::info!(
            target: "device",
            "{} initialized with {} blocks",
            dcb.name(),
            blocks.total_blocks()
        );

        let driver = Self {
            dcb,
            device,
            storage: SleepLock::new(Storage {
                blocks,
                cache: LruCache::new(config.cache_size),
            }),
            faults,
        };
        let completed = Arc::clone(&driver.device);
        interrupts.register(&driver.completion_event(), move |_| {
            completed.complete();
        });
        driver
    }

    pub fn block_size(&self) -> usize {
        self.storage.lock().blocks.block_size()
    }

    pub fn total_blocks(&self) -> usize {
        self.storage.lock().blocks.total_blocks()
    }

    /// Write `data` (cut to the block size) into block `index`
    pub fn write_block(&self, index: usize, data: &[u8]) -> Result<()> {
        let mut storage = self.storage.lock();
        if let Err(e) = storage.blocks.check(index) {
            log::error!(target: "device", "{}: block {} out of range", self.name(), index);
            return Err(e);
        }

        simulate_latency(self.faults.as_ref());
        if self.faults.should_fail() {
            log::warn!(target: "device", "{}: write failure on block {}", self.name(), index);
            return Err(DeviceError::SimulatedFault {
                device: String::from(self.name()),
                op: "write",
            });
        }

        let stored = storage.blocks.write(index, data)?;
        log::info!(
            target: "device",
            "{}: block {} <- {:?}",
            self.name(),
            index,
            preview(&stored)
        );
        if let Some(evicted) = storage.cache.insert(index, stored) {
            log::debug!(target: "cache", "{}: evicted block {}", self.name(), evicted);
        }
        Ok(())
    }

    /// Read block `index`, from the cache when possible
    pub fn read_block(&self, index: usize) -> Result<Vec<u8>> {
        let mut storage = self.storage.lock();
        if let Err(e) = storage.blocks.check(index) {
            log::error!(target: "device", "{}: block {} out of range", self.name(), index);
            return Err(e);
        }

        simulate_latency(self.faults.as_ref());
        if self.faults.should_fail() {
            log::warn!(target: "device", "{}: read failure on block {}", self.name(), index);
            return Err(DeviceError::SimulatedFault {
                device: String::from(self.name()),
                op: "read",
            });
        }

        if let Some(data) = storage.cache.get(index) {
            log::debug!(
                target: "cache",
                "{}: hit block {} -> {:?}",
                self.name(),
                index,
                preview(&data)
            );
            return Ok(data);
        }

        let data = storage.blocks.read(index)?;
        if let Some(evicted) = storage.cache.insert(index, data.clone()) {
            log::debug!(target: "cache", "{}: evicted block {}", self.name(), evicted);
        }
        log::info!(
            target: "device",
            "{}: block {} -> {:?}",
            self.name(),
            index,
            preview(&data)
        );
        Ok(data)
    }

    /// Used blocks and cache membership
    pub fn block_status(&self) -> BlockStatus {
        let storage = self.storage.lock();
        BlockStatus {
            used_blocks: storage.blocks.used_count(),
            total_blocks: storage.blocks.total_blocks(),
            cached: storage.cache.keys(),
        }
    }

    /// Whether block `index` is currently cached
    pub fn is_cached(&self, index: usize) -> bool {
        self.storage.lock().cache.contains(index)
    }
}

impl Driver for InternalMemoryDriver {
    fn dcb(&self) -> &Arc<DeviceControlBlock> {
        &self.dcb
    }

    fn device(&self) -> &Arc<Device> {
        &self.device
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::InternalStorage
    }

    fn perform(&self, req: &IoRequest) -> Result<IoCompletion> {
        match req.op() {
            IoOp::Write => {
                let index = match req.block() {
                    Some(index) => index,
                    None => self
                        .storage
                        .lock()
                        .blocks
                        .first_free()
                        .ok_or_else(|| DeviceError::NoFreeBlock(String::from(self.name())))?,
                };
                let staged = self.device.stage(req.payload().unwrap_or_default())?;
                self.write_block(index, &staged)?;
                let written = staged.len().min(self.block_size());
                Ok(IoCompletion::write(Some(index), written))
            }
            IoOp::Read => {
                let index = req.block().unwrap_or(0);
                let data = self.read_block(index)?;
                self.device.stage(&data)?;
                Ok(IoCompletion::read(Some(index), data))
            }
        }
    }

    fn status(&self) -> DriverStatus {
        let blocks = self.block_status();
        DriverStatus {
            id: self.id(),
            name: String::from(self.name()),
            kind: self.kind(),
            busy: self.device.is_busy(),
            connection: self.dcb.state(),
            detail: DeviceDetail::Block {
                used_blocks: blocks.used_blocks,
                total_blocks: blocks.total_blocks,
                cached: Some(blocks.cached),
            },
        }
    }
}

/// First 30 bytes of a payload for log lines
pub(crate) fn preview(data: &[u8]) -> String {
    let len = data.len().min(30);
    String::from_utf8_lossy(&data[..len]).into_owned()
}
