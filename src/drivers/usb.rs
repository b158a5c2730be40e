//! Bus-attached transfer driver (USB)
//!
//! No block storage: an operation occupies the device for
//! `size / transfer_rate` seconds. Connection state follows the
//! `<NAME>_INSERT` / `<NAME>_REMOVE` interrupts registered at construction.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::BusConfig;
use crate::device::conf::{DeviceDetail, DeviceKind, Driver, DriverStatus, IoCompletion};
use crate::device::dev_hdr::{ConnectionState, Device, DeviceControlBlock};
use crate::device::io_req::{IoOp, IoRequest};
use crate::error::{DeviceError, Result};
use crate::interrupt::{event_prefix, InterruptTable};

/// One bus transfer: direction, size and issuing process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusTransfer {
    pub op: IoOp,
    pub size: usize,
    pub process: String,
}

impl BusTransfer {
    pub fn new(op: IoOp, size: usize, process: &str) -> Self {
        Self {
            op,
            size,
            process: String::from(process),
        }
    }
}

impl core::fmt::Display for BusTransfer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "[BusTransfer] {}, {} bytes, process {}",
            self.op, self.size, self.process
        )
    }
}

/// USB transfer driver
pub struct UsbDriver {
    dcb: Arc<DeviceControlBlock>,
    device: Arc<Device>,
    transfer_rate: u64,
    default_read_size: usize,
    slice: Duration,
}

impl UsbDriver {
    /// Build the driver and register its completion and hot-plug interrupts
    pub fn new(
        dcb: Arc<DeviceControlBlock>,
        config: &BusConfig,
        buffer_size: usize,
        interrupts: &InterruptTable,
    ) -> Arc<Self> {
        let device = Arc::new(Device::new(dcb.name(), buffer_size));
        let driver = Arc::new(Self {
            dcb,
            device,
            transfer_rate: config.transfer_rate.max(1),
            default_read_size: config.default_read_size,
            slice: Duration::from_millis(config.transfer_slice_ms.max(1)),
        });

        let completed = Arc::clone(&driver.device);
        interrupts.register(&driver.completion_event(), move |_| {
            completed.complete();
        });
        let prefix = event_prefix(driver.name());
        let inserted = Arc::clone(&driver);
        interrupts.register(&format!("{}_INSERT", prefix), move |_| inserted.on_insert());
        let removed = Arc::clone(&driver);
        interrupts.register(&format!("{}_REMOVE", prefix), move |_| removed.on_remove());
        driver
    }

    fn on_insert(&self) {
        self.dcb.set_state(ConnectionState::Connected);
        log::info!(target: "usb", "device {} connected", self.name());
    }

    fn on_remove(&self) {
        self.dcb.set_state(ConnectionState::Disconnected);
        log::info!(target: "usb", "device {} disconnected", self.name());
    }

    pub fn transfer_rate(&self) -> u64 {
        self.transfer_rate
    }

    /// Time the bus is occupied moving `size` bytes
    pub fn transfer_time(&self, size: usize) -> Result<Duration> {
        Duration::try_from_secs_f64(size as f64 / self.transfer_rate as f64).map_err(|_| {
            DeviceError::TransferTooLong {
                device: String::from(self.name()),
                size,
            }
        })
    }

    /// Run one transfer, blocking for its duration
    ///
    /// Fails immediately when disconnected, and aborts if the device is
    /// removed while the transfer is in flight.
    pub fn perform_operation(&self, transfer: &BusTransfer) -> Result<Duration> {
        if !self.dcb.is_connected() {
            log::error!(target: "usb", "device {} not connected", self.name());
            return Err(DeviceError::DeviceNotConnected(String::from(self.name())));
        }

        let total = self.transfer_time(transfer.size)?;
        log::info!(target: "usb", "starting {} on {}", transfer, self.name());
        let start = Instant::now();
        loop {
            let elapsed = start.elapsed();
            if !self.dcb.is_connected() {
                log::error!(
                    target: "usb",
                    "transfer on {} interrupted after {:.2} s",
                    self.name(),
                    elapsed.as_secs_f64()
                );
                return Err(DeviceError::TransferAborted {
                    device: String::from(self.name()),
                    elapsed_ms: elapsed.as_millis() as u64,
                });
            }
            let remaining = total.saturating_sub(elapsed);
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(self.slice));
        }

        log::info!(
            target: "usb",
            "operation finished on {}, time {:.2} s",
            self.name(),
            total.as_secs_f64()
        );
        Ok(total)
    }
}

impl Driver for UsbDriver {
    fn dcb(&self) -> &Arc<DeviceControlBlock> {
        &self.dcb
    }

    fn device(&self) -> &Arc<Device> {
        &self.device
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::BusTransfer
    }

    fn perform(&self, req: &IoRequest) -> Result<IoCompletion> {
        let size = match (req.transfer_len(), req.op()) {
            (Some(size), _) => size,
            (None, IoOp::Read) => self.default_read_size,
            (None, IoOp::Write) => 0,
        };
        let transfer = BusTransfer::new(req.op(), size, req.origin().unwrap_or("worker"));
        if let Some(payload) = req.payload() {
            self.device.load(payload);
        }
        let elapsed = self.perform_operation(&transfer)?;
        let done = match req.op() {
            IoOp::Write => IoCompletion::write(None, size),
            IoOp::Read => {
                let mut done = IoCompletion::read(None, Vec::new());
                done.bytes = size;
                done
            }
        };
        Ok(done.with_elapsed(elapsed))
    }

    fn status(&self) -> DriverStatus {
        DriverStatus {
            id: self.id(),
            name: String::from(self.name()),
            kind: self.kind(),
            busy: self.device.is_busy(),
            connection: self.dcb.state(),
            detail: DeviceDetail::Bus {
                transfer_rate: self.transfer_rate,
            },
        }
    }
}
