//! Device Configuration - driver interface and driver table
//!
//! Every driver implements [`Driver`]. The [`DriverTable`] maps device ids to
//! driver instances and is the only way the worker finds a driver.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use spin::RwLock;

use crate::device::dev_hdr::{ConnectionState, Device, DeviceControlBlock, DeviceId};
use crate::device::io_req::{IoOp, IoRequest};
use crate::error::{DeviceError, Result};
use crate::interrupt;

// ============================================================================
// Driver Interface
// ============================================================================

/// Device class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Fixed internal block storage with cache
    InternalStorage,
    /// Removable block storage
    RemovableStorage,
    /// Bus-attached transfer device
    BusTransfer,
    /// Character input device
    Input,
}

impl core::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            DeviceKind::InternalStorage => "internal storage",
            DeviceKind::RemovableStorage => "removable storage",
            DeviceKind::BusTransfer => "bus transfer",
            DeviceKind::Input => "input",
        };
        f.write_str(s)
    }
}

/// Result of a successful driver operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoCompletion {
    /// Operation performed
    pub op: IoOp,
    /// Block touched, for block devices
    pub block: Option<usize>,
    /// Bytes moved
    pub bytes: usize,
    /// Data returned by a read
    pub data: Vec<u8>,
    /// Simulated device time
    pub elapsed: Duration,
}

impl IoCompletion {
    pub fn write(block: Option<usize>, bytes: usize) -> Self {
        Self {
            op: IoOp::Write,
            block,
            bytes,
            data: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn read(block: Option<usize>, data: Vec<u8>) -> Self {
        Self {
            op: IoOp::Read,
            block,
            bytes: data.len(),
            data,
            elapsed: Duration::ZERO,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }
}

/// Class-specific part of a status report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceDetail {
    Block {
        used_blocks: usize,
        total_blocks: usize,
        /// Cached block indices, least recently used first
        cached: Option<Vec<usize>>,
    },
    Bus {
        transfer_rate: u64,
    },
    Input {
        pending_events: usize,
    },
}

/// Diagnostic snapshot of one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverStatus {
    pub id: DeviceId,
    pub name: String,
    pub kind: DeviceKind,
    pub busy: bool,
    pub connection: ConnectionState,
    pub detail: DeviceDetail,
}

impl core::fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = if self.busy { "Busy" } else { "Idle" };
        write!(f, "{}. {}: {} ({})", self.id, self.name, state, self.connection)?;
        match &self.detail {
            DeviceDetail::Block {
                used_blocks,
                total_blocks,
                cached,
            } => {
                write!(f, ", blocks used {}/{}", used_blocks, total_blocks)?;
                if let Some(cached) = cached {
                    write!(f, ", cache {:?}", cached)?;
                }
                Ok(())
            }
            DeviceDetail::Bus { transfer_rate } => {
                write!(f, ", {} bytes/s", transfer_rate)
            }
            DeviceDetail::Input { pending_events } => {
                write!(f, ", {} pending events", pending_events)
            }
        }
    }
}

/// Device driver
///
/// `perform` runs on the worker thread after the device has been marked
/// busy. It must not clear the busy flag itself; that happens in the
/// completion interrupt.
pub trait Driver: Send + Sync {
    /// Control block of the device this driver owns
    fn dcb(&self) -> &Arc<DeviceControlBlock>;

    /// Runtime state (busy flag, staging buffer)
    fn device(&self) -> &Arc<Device>;

    /// Device class
    fn kind(&self) -> DeviceKind;

    /// Execute one request
    fn perform(&self, req: &IoRequest) -> Result<IoCompletion>;

    /// Diagnostic snapshot, never mutates
    fn status(&self) -> DriverStatus;

    fn id(&self) -> DeviceId {
        self.dcb().id()
    }

    fn name(&self) -> &str {
        self.dcb().name()
    }

    /// Interrupt raised when a request on this device completes
    fn completion_event(&self) -> String {
        interrupt::completion_event(self.name())
    }
}

// ============================================================================
// Driver Table
// ============================================================================

/// Device id to driver mapping
#[derive(Default)]
pub struct DriverTable {
    drivers: RwLock<BTreeMap<DeviceId, Arc<dyn Driver>>>,
}

impl DriverTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `driver` under `id`, replacing any earlier entry
    pub fn register(&self, id: DeviceId, driver: Arc<dyn Driver>) {
        let name = String::from(driver.name());
        if self.drivers.write().insert(id, driver).is_some() {
            log::warn!(target: "device", "driver for device {} replaced by {}", id, name);
        } else {
            log::debug!(target: "device", "driver {} registered as device {}", name, id);
        }
    }

    /// Find the driver for `id`
    pub fn lookup(&self, id: DeviceId) -> Result<Arc<dyn Driver>> {
        self.drivers
            .read()
            .get(&id)
            .cloned()
            .ok_or(DeviceError::NoDriverRegistered(id))
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.drivers.read().contains_key(&id)
    }

    /// Registered ids in ascending order
    pub fn ids(&self) -> Vec<DeviceId> {
        self.drivers.read().keys().copied().collect()
    }

    pub fn drivers(&self) -> Vec<Arc<dyn Driver>> {
        self.drivers.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.drivers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.read().is_empty()
    }
}

impl core::fmt::Debug for DriverTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DriverTable").field("ids", &self.ids()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDriver {
        dcb: Arc<DeviceControlBlock>,
        device: Arc<Device>,
    }

    impl NullDriver {
        fn new(id: u32, name: &str) -> Self {
            Self {
                dcb: Arc::new(DeviceControlBlock::new(DeviceId(id), name, 0)),
                device: Arc::new(Device::new(name, 16)),
            }
        }
    }

    impl Driver for NullDriver {
        fn dcb(&self) -> &Arc<DeviceControlBlock> {
            &self.dcb
        }

        fn device(&self) -> &Arc<Device> {
            &self.device
        }

        fn kind(&self) -> DeviceKind {
            DeviceKind::Input
        }

        fn perform(&self, req: &IoRequest) -> Result<IoCompletion> {
            Ok(IoCompletion::read(None, req.payload().unwrap_or(&[]).to_vec()))
        }

        fn status(&self) -> DriverStatus {
            DriverStatus {
                id: self.id(),
                name: String::from(self.name()),
                kind: self.kind(),
                busy: self.device.is_busy(),
                connection: self.dcb.state(),
                detail: DeviceDetail::Input { pending_events: 0 },
            }
        }
    }

    #[test]
    fn test_lookup_missing() {
        let table = DriverTable::new();
        let err = table.lookup(DeviceId(5)).err();
        assert_eq!(err, Some(DeviceError::NoDriverRegistered(DeviceId(5))));
    }

    #[test]
    fn test_register_and_replace() {
        let table = DriverTable::new();
        table.register(DeviceId(1), Arc::new(NullDriver::new(1, "first")));
        table.register(DeviceId(1), Arc::new(NullDriver::new(1, "second")));
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(DeviceId(1)).unwrap().name(), "second");
    }

    #[test]
    fn test_default_completion_event() {
        let driver = NullDriver::new(2, "USB Stick");
        assert_eq!(driver.completion_event(), "USB_STICK_COMPLETE");
    }

    #[test]
    fn test_status_display() {
        let status = NullDriver::new(2, "Keyboard").status();
        assert_eq!(
            status.to_string(),
            "2. Keyboard: Idle (connected), 0 pending events"
        );
    }
}
