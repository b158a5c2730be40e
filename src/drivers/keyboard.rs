//! Keyboard input driver
//!
//! Key events arrive through the `KEYBOARD_IRQ` interrupt (or
//! [`KeyboardDriver::push_event`]) and wait in a bounded buffer until a read
//! request drains them. When the buffer is full the oldest event is dropped.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use spin::Mutex;

use crate::config::KeyboardConfig;
use crate::device::conf::{DeviceDetail, DeviceKind, Driver, DriverStatus, IoCompletion};
use crate::device::dev_hdr::{Device, DeviceControlBlock};
use crate::device::io_req::{IoOp, IoRequest};
use crate::error::{DeviceError, Result};
use crate::interrupt::{InterruptTable, IrqArg, KEYBOARD_IRQ};

/// Longest key name kept in an event
pub const KEY_NAME_MAX: usize = 16;

/// Press or release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventKind {
    Down,
    Up,
}

impl KeyEventKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            KeyEventKind::Down => "down",
            KeyEventKind::Up => "up",
        }
    }
}

impl FromStr for KeyEventKind {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "down" => Ok(KeyEventKind::Down),
            "up" => Ok(KeyEventKind::Up),
            _ => Err(DeviceError::UnknownOperation(String::from(s))),
        }
    }
}

/// One buffered key event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: heapless::String<KEY_NAME_MAX>,
    pub kind: KeyEventKind,
    /// Time since the Unix epoch
    pub timestamp: Duration,
}

impl KeyEvent {
    /// Event stamped with the current time; long key names are cut
    pub fn now(key: &str, kind: KeyEventKind) -> Self {
        let mut name = heapless::String::new();
        for c in key.chars() {
            if name.push(c).is_err() {
                break;
            }
        }
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self {
            key: name,
            kind,
            timestamp,
        }
    }
}

impl core::fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} '{}' at {:.3}",
            self.kind.as_str().to_uppercase(),
            self.key,
            self.timestamp.as_secs_f64()
        )
    }
}

/// Keyboard device driver
pub struct KeyboardDriver {
    dcb: Arc<DeviceControlBlock>,
    device: Arc<Device>,
    events: Mutex<VecDeque<KeyEvent>>,
    capacity: usize,
}

impl KeyboardDriver {
    /// Build the driver and register its completion and `KEYBOARD_IRQ` handlers
    pub fn new(
        dcb: Arc<DeviceControlBlock>,
        config: &KeyboardConfig,
        buffer_size: usize,
        interrupts: &InterruptTable,
    ) -> Arc<Self> {
        let capacity = config.buffer_size.max(1);
        let driver = Arc::new(Self {
            device: Arc::new(Device::new(dcb.name(), buffer_size)),
            dcb,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        });

        let completed = Arc::clone(&driver.device);
        interrupts.register(&driver.completion_event(), move |_| {
            completed.complete();
        });
        let irq = Arc::clone(&driver);
        interrupts.register(KEYBOARD_IRQ, move |args| irq.on_interrupt(args));
        driver
    }

    /// `KEYBOARD_IRQ` handler, args are key name and `down`/`up`
    fn on_interrupt(&self, args: &[IrqArg]) {
        let key = args.first().and_then(IrqArg::as_str);
        let kind = args
            .get(1)
            .and_then(IrqArg::as_str)
            .map(KeyEventKind::from_str);
        match (key, kind) {
            (Some(key), Some(Ok(kind))) => self.push_event(KeyEvent::now(key, kind)),
            _ => log::warn!(target: "keyboard", "malformed keyboard interrupt {:?}", args),
        }
    }

    /// Buffer an event, dropping the oldest one when full
    pub fn push_event(&self, event: KeyEvent) {
        log::info!(
            target: "keyboard",
            "interrupt {} '{}'",
            event.kind.as_str().to_uppercase(),
            event.key
        );
        let mut events = self.events.lock();
        if events.len() == self.capacity {
            if let Some(dropped) = events.pop_front() {
                log::debug!(target: "keyboard", "buffer full, dropped {}", dropped);
            }
        }
        events.push_back(event);
    }

    /// Take every pending event, oldest first
    pub fn drain(&self) -> Vec<KeyEvent> {
        let events: Vec<KeyEvent> = self.events.lock().drain(..).collect();
        for event in &events {
            log::info!(target: "keyboard", "read {}", event);
        }
        events
    }

    pub fn pending(&self) -> usize {
        self.events.lock().len()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.capacity
    }
}

impl Driver for KeyboardDriver {
    fn dcb(&self) -> &Arc<DeviceControlBlock> {
        &self.dcb
    }

    fn device(&self) -> &Arc<Device> {
        &self.device
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Input
    }

    /// Reads return one `<kind> <key>` line per drained event
    fn perform(&self, req: &IoRequest) -> Result<IoCompletion> {
        match req.op() {
            IoOp::Read => {
                let mut data = Vec::new();
                for event in self.drain() {
                    data.extend_from_slice(event.kind.as_str().as_bytes());
                    data.push(b' ');
                    data.extend_from_slice(event.key.as_bytes());
                    data.push(b'\n');
                }
                self.device.load(&data);
                Ok(IoCompletion::read(None, data))
            }
            IoOp::Write => Err(DeviceError::UnsupportedOperation {
                device: String::from(self.name()),
                op: "write",
            }),
        }
    }

    fn status(&self) -> DriverStatus {
        DriverStatus {
            id: self.id(),
            name: String::from(self.name()),
            kind: self.kind(),
            busy: self.device.is_busy(),
            connection: self.dcb.state(),
            detail: DeviceDetail::Input {
                pending_events: self.pending(),
            },
        }
    }
}
