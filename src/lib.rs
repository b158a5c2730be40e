//! devsim - an operating-system device management simulator
//!
//! This crate models the kernel-side machinery between callers and devices:
//! device control blocks, interrupt dispatch, a bounded I/O request queue
//! drained by a single worker thread, per-device drivers (block storage with
//! an LRU cache, removable media, a bus transfer device, a keyboard) and a
//! RAM accountant for in-flight buffers.

// Device types keep explicit constructors alongside Default
#![allow(clippy::new_without_default)]

pub mod config;
pub mod console;
pub mod device;
pub mod drivers;
pub mod error;
pub mod interrupt;
pub mod memory;
pub mod sync;
pub mod system;

pub use config::SimConfig;
pub use device::{DeviceId, IoOp, IoRequest};
pub use error::{ConfigError, DeviceError, Result};
pub use interrupt::{InterruptTable, IrqArg};
pub use memory::RamManager;
pub use system::{DeviceSystem, FaultSet, SystemStatus};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Simulator name
pub const NAME: &str = "devsim";
