//! Removable block storage driver
//!
//! USB-stick style media: block storage without a cache, insert/eject
//! hot-plug, latency and a lower failure rate than internal storage. Every
//! access fails fast when the media is not inserted.

use std::sync::Arc;

use crate::config::RemovableConfig;
use crate::device::block::BlockStore;
use crate::device::conf::{DeviceDetail, DeviceKind, Driver, DriverStatus, IoCompletion};
use crate::device::dev_hdr::{ConnectionState, Device, DeviceControlBlock};
use crate::device::io_req::{IoOp, IoRequest};
use crate::drivers::fault::{simulate_latency, FaultModel};
use crate::drivers::internal::preview;
use crate::error::{DeviceError, Result};
use crate::interrupt::{event_prefix, InterruptTable};
use crate::sync::SleepLock;

/// Removable memory device driver
pub struct RemovableMemoryDriver {
    dcb: Arc<DeviceControlBlock>,
    device: Arc<Device>,
    blocks: SleepLock<BlockStore>,
    faults: Arc<dyn FaultModel>,
}

impl RemovableMemoryDriver {
    /// Build the driver and register its completion and hot-plug interrupts
    ///
    /// Hot-plug events are named `<NAME>_INSERT` and `<NAME>_EJECT`.
    pub fn new(
        dcb: Arc<DeviceControlBlock>,
        config: &RemovableConfig,
        buffer_size: usize,
        faults: Arc<dyn FaultModel>,
        interrupts: &InterruptTable,
    ) -> Arc<Self> {
        let device = Arc::new(Device::new(dcb.name(), buffer_size));
        let blocks = BlockStore::new(dcb.capacity(), config.block_size);
        let driver = Arc::new(Self {
            dcb,
            device,
            blocks: SleepLock::new(blocks),
            faults,
        });

        let completed = Arc::clone(&driver.device);
        interrupts.register(&driver.completion_event(), move |_| {
            completed.complete();
        });
        let prefix = event_prefix(driver.name());
        let inserted = Arc::clone(&driver);
        interrupts.register(&format!("{}_INSERT", prefix), move |_| inserted.insert());
        let ejected = Arc::clone(&driver);
        interrupts.register(&format!("{}_EJECT", prefix), move |_| ejected.eject());
        driver
    }

    /// Insert or reconnect the media
    pub fn insert(&self) {
        self.dcb.set_state(ConnectionState::Connected);
        log::info!(target: "device", "{} inserted", self.name());
    }

    /// Safely remove the media
    pub fn eject(&self) {
        self.dcb.set_state(ConnectionState::Disconnected);
        log::info!(target: "device", "{} has been safely removed", self.name());
    }

    pub fn is_inserted(&self) -> bool {
        self.dcb.is_connected()
    }

    fn ensure_inserted(&self) -> Result<()> {
        if !self.is_inserted() {
            log::error!(target: "device", "{} not inserted", self.name());
            return Err(DeviceError::DeviceNotConnected(String::from(self.name())));
        }
        Ok(())
    }

    /// Write `data` (cut to the block size) into block `index`
    pub fn write_block(&self, index: usize, data: &[u8]) -> Result<()> {
        self.ensure_inserted()?;
        let mut blocks = self.blocks.lock();
        blocks.check(index)?;

        simulate_latency(self.faults.as_ref());
        if self.faults.should_fail() {
            log::warn!(target: "device", "{}: write failure on block {}", self.name(), index);
            return Err(DeviceError::SimulatedFault {
                device: String::from(self.name()),
                op: "write",
            });
        }

        let stored = blocks.write(index, data)?;
        log::info!(
            target: "device",
            "{}: block {} <- {:?}",
            self.name(),
            index,
            preview(&stored)
        );
        Ok(())
    }

    /// Read block `index`
    pub fn read_block(&self, index: usize) -> Result<Vec<u8>> {
        self.ensure_inserted()?;
        let blocks = self.blocks.lock();
        blocks.check(index)?;

        simulate_latency(self.faults.as_ref());
        if self.faults.should_fail() {
            log::warn!(target: "device", "{}: read failure on block {}", self.name(), index);
            return Err(DeviceError::SimulatedFault {
                device: String::from(self.name()),
                op: "read",
            });
        }

        let data = blocks.read(index)?;
        log::info!(
            target: "device",
            "{}: block {} -> {:?}",
            self.name(),
            index,
            preview(&data)
        );
        Ok(data)
    }

    pub fn used_blocks(&self) -> usize {
        self.blocks.lock().used_count()
    }

    pub fn total_blocks(&self) -> usize {
        self.blocks.lock().total_blocks()
    }
}

impl Driver for RemovableMemoryDriver {
    fn dcb(&self) -> &Arc<DeviceControlBlock> {
        &self.dcb
    }

    fn device(&self) -> &Arc<Device> {
        &self.device
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::RemovableStorage
    }

    fn perform(&self, req: &IoRequest) -> Result<IoCompletion> {
        self.ensure_inserted()?;
        match req.op() {
            IoOp::Write => {
                let index = match req.block() {
                    Some(index) => index,
                    None => self
                        .blocks
                        .lock()
                        .first_free()
                        .ok_or_else(|| DeviceError::NoFreeBlock(String::from(self.name())))?,
                };
                let staged = self.device.stage(req.payload().unwrap_or_default())?;
                self.write_block(index, &staged)?;
                let block_size = self.blocks.lock().block_size();
                Ok(IoCompletion::write(Some(index), staged.len().min(block_size)))
            }
            IoOp::Read => {
                let index = req.block().unwrap_or(0);
                let data = self.read_block(index)?;
                self.device.load(&data);
                Ok(IoCompletion::read(Some(index), data))
            }
        }
    }

    fn status(&self) -> DriverStatus {
        let blocks = self.blocks.lock();
        DriverStatus {
            id: self.id(),
            name: String::from(self.name()),
            kind: self.kind(),
            busy: self.device.is_busy(),
            connection: self.dcb.state(),
            detail: DeviceDetail::Block {
                used_blocks: blocks.used_count(),
                total_blocks: blocks.total_blocks(),
                cached: None,
            },
        }
    }
}
