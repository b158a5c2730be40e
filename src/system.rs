//! Device system facade
//!
//! Owns the shared registries, the four drivers and the I/O worker, and
//! exposes the operations callers use: submit I/O, raise events, query
//! status, shut down.

use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SimConfig;
use crate::device::conf::{Driver, DriverStatus, DriverTable};
use crate::device::dev_hdr::{DcbRegistry, DeviceId};
use crate::device::ds_routines::{IoStats, IoStatsSnapshot, IoWorker, StepOutcome, WorkerHandle};
use crate::device::io_req::{IoOp, IoQueue, IoReqId, IoRequest};
use crate::drivers::fault::{entropy_seed, FaultModel, NoFaults, RandomFaults};
use crate::drivers::{InternalMemoryDriver, KeyboardDriver, RemovableMemoryDriver, UsbDriver};
use crate::error::Result;
use crate::interrupt::{InterruptTable, IrqArg};
use crate::memory::{RamManager, RamUsage};

/// Fault models for the two storage drivers
#[derive(Clone)]
pub struct FaultSet {
    pub internal: Arc<dyn FaultModel>,
    pub removable: Arc<dyn FaultModel>,
}

impl FaultSet {
    /// Random latency and failures from the config, seeded from
    /// `config.seed` or the clock
    pub fn random(config: &SimConfig) -> Self {
        let seed = config.seed.unwrap_or_else(entropy_seed);
        log::debug!(target: "device", "fault seed {}", seed);
        let internal = &config.internal;
        let removable = &config.removable;
        Self {
            internal: Arc::new(RandomFaults::new(
                Duration::from_millis(internal.latency_min_ms),
                Duration::from_millis(internal.latency_max_ms),
                internal.failure_chance,
                seed,
            )),
            removable: Arc::new(RandomFaults::new(
                Duration::from_millis(removable.latency_min_ms),
                Duration::from_millis(removable.latency_max_ms),
                removable.failure_chance,
                seed.rotate_left(32),
            )),
        }
    }

    /// No latency and no failures
    pub fn none() -> Self {
        Self {
            internal: Arc::new(NoFaults),
            removable: Arc::new(NoFaults),
        }
    }
}

/// Snapshot returned by [`DeviceSystem::query_status`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemStatus {
    pub devices: Vec<DriverStatus>,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub ram: RamUsage,
    pub stats: IoStatsSnapshot,
}

impl core::fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "=== DEVICE STATUS ===")?;
        for device in &self.devices {
            writeln!(f, "{}", device)?;
        }
        writeln!(f, "[RAM] Usage: {}", self.ram)?;
        writeln!(
            f,
            "[QUEUE] Pending: {}/{}",
            self.queue_depth, self.queue_capacity
        )?;
        write!(f, "[WORKER] {}", self.stats)
    }
}

/// The assembled simulator
pub struct DeviceSystem {
    config: SimConfig,
    ram: Arc<RamManager>,
    interrupts: Arc<InterruptTable>,
    dcbs: Arc<DcbRegistry>,
    drivers: Arc<DriverTable>,
    queue: Arc<IoQueue>,
    stats: Arc<IoStats>,
    internal: Arc<InternalMemoryDriver>,
    removable: Arc<RemovableMemoryDriver>,
    usb: Arc<UsbDriver>,
    keyboard: Arc<KeyboardDriver>,
    worker: Option<WorkerHandle>,
}

impl DeviceSystem {
    /// Build every component and start the background worker
    pub fn bring_up(config: SimConfig) -> Result<Self> {
        let faults = FaultSet::random(&config);
        let mut system = Self::build(config, faults);
        system.start()?;
        Ok(system)
    }

    /// Build every component without starting the worker
    pub fn build(config: SimConfig, faults: FaultSet) -> Self {
        let ram = Arc::new(RamManager::new(config.ram.capacity));
        let interrupts = Arc::new(InterruptTable::new());
        let dcbs = Arc::new(DcbRegistry::new());
        let drivers = Arc::new(DriverTable::new());
        let queue = Arc::new(IoQueue::with_capacity(config.queue.capacity));
        let buffer_size = config.queue.buffer_size;

        let c = &config.internal;
        let internal = Arc::new(InternalMemoryDriver::new(
            dcbs.create(DeviceId(c.id), &c.name, c.capacity),
            c,
            buffer_size,
            Arc::clone(&ram),
            faults.internal,
            &interrupts,
        ));

        let c = &config.removable;
        let removable = RemovableMemoryDriver::new(
            dcbs.create(DeviceId(c.id), &c.name, c.capacity),
            c,
            buffer_size,
            faults.removable,
            &interrupts,
        );

        let c = &config.keyboard;
        let keyboard = KeyboardDriver::new(
            dcbs.create(DeviceId(c.id), &c.name, 0),
            c,
            buffer_size,
            &interrupts,
        );

        let c = &config.bus;
        let usb = UsbDriver::new(
            dcbs.create(DeviceId(c.id), &c.name, c.capacity),
            c,
            buffer_size,
            &interrupts,
        );

        drivers.register(internal.id(), internal.clone());
        drivers.register(removable.id(), removable.clone());
        drivers.register(keyboard.id(), keyboard.clone());
        drivers.register(usb.id(), usb.clone());

        log::info!(
            target: "device",
            "{} devices registered, RAM {} bytes, queue {}",
            drivers.len(),
            ram.capacity(),
            queue.capacity()
        );

        Self {
            config,
            ram,
            interrupts,
            dcbs,
            drivers,
            queue,
            stats: Arc::new(IoStats::new()),
            internal,
            removable,
            usb,
            keyboard,
            worker: None,
        }
    }

    /// A worker over this system's queue, for running steps on the caller's thread
    pub fn worker(&self) -> IoWorker {
        IoWorker::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.drivers),
            Arc::clone(&self.interrupts),
            self.config.queue.poll_interval(),
        )
        .with_stats(Arc::clone(&self.stats))
    }

    /// Start the background worker if it is not running
    pub fn start(&mut self) -> Result<()> {
        let worker = self.worker();
        self.spawn_worker(worker)
    }

    /// Start the background worker, reporting every outcome to `tx`
    pub fn start_with_reporter(&mut self, tx: Sender<StepOutcome>) -> Result<()> {
        let worker = self.worker().with_reporter(tx);
        self.spawn_worker(worker)
    }

    fn spawn_worker(&mut self, worker: IoWorker) -> Result<()> {
        if self.is_running() {
            log::warn!(target: "worker", "I/O worker already running");
            return Ok(());
        }
        if let Some(mut stale) = self.worker.take() {
            stale.halt();
        }
        self.worker = Some(worker.spawn()?);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(WorkerHandle::is_running)
    }

    /// Queue a request built from its parts
    pub fn submit_io(
        &self,
        device_id: DeviceId,
        op: IoOp,
        payload: Option<Vec<u8>>,
    ) -> Result<IoReqId> {
        self.submit(IoRequest::new(device_id, op, payload))
    }

    /// Queue a fully built request
    pub fn submit(&self, req: IoRequest) -> Result<IoReqId> {
        self.queue.enqueue(req)
    }

    /// Raise an interrupt synchronously
    pub fn trigger_event(&self, event: &str, args: &[IrqArg]) -> Result<()> {
        self.interrupts.trigger(event, args)
    }

    /// Status of one device or all of them
    pub fn query_status(&self, device: Option<DeviceId>) -> Result<SystemStatus> {
        let devices = match device {
            Some(id) => vec![self.drivers.lookup(id)?.status()],
            None => self.drivers.drivers().iter().map(|d| d.status()).collect(),
        };
        Ok(SystemStatus {
            devices,
            queue_depth: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            ram: self.ram.usage(),
            stats: self.stats.snapshot(),
        })
    }

    /// Stop the worker and discard pending requests
    ///
    /// Returns how many requests were discarded.
    pub fn shutdown(&mut self) -> usize {
        let discarded = match self.worker.take() {
            Some(mut worker) => worker.stop(),
            None => self.queue.clear(),
        };
        log::info!(target: "device", "device system shut down");
        discarded
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn ram(&self) -> &Arc<RamManager> {
        &self.ram
    }

    pub fn interrupts(&self) -> &Arc<InterruptTable> {
        &self.interrupts
    }

    pub fn dcbs(&self) -> &Arc<DcbRegistry> {
        &self.dcbs
    }

    pub fn drivers(&self) -> &Arc<DriverTable> {
        &self.drivers
    }

    pub fn queue(&self) -> &Arc<IoQueue> {
        &self.queue
    }

    pub fn stats(&self) -> IoStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn internal(&self) -> &Arc<InternalMemoryDriver> {
        &self.internal
    }

    pub fn removable(&self) -> &Arc<RemovableMemoryDriver> {
        &self.removable
    }

    pub fn usb(&self) -> &Arc<UsbDriver> {
        &self.usb
    }

    pub fn keyboard(&self) -> &Arc<KeyboardDriver> {
        &self.keyboard
    }
}

impl Drop for DeviceSystem {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown();
        }
    }
}

impl core::fmt::Debug for DeviceSystem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceSystem")
            .field("drivers", &self.drivers)
            .field("queue_depth", &self.queue.len())
            .field("ram", &self.ram.usage())
            .field("running", &self.is_running())
            .finish()
    }
}
