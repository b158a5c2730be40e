//! Device drivers
//!
//! One driver per device class. Each driver owns its control block and
//! runtime [`Device`](crate::device::Device) and registers its interrupts
//! on construction:
//! - internal block storage with an LRU cache
//! - removable block storage with insert/eject hot-plug
//! - bus transfer device (USB)
//! - keyboard input

pub mod fault;
pub mod internal;
pub mod keyboard;
pub mod removable;
pub mod usb;

pub use fault::{entropy_seed, FaultModel, FixedFaults, NoFaults, RandomFaults};
pub use internal::{BlockStatus, InternalMemoryDriver};
pub use keyboard::{KeyEvent, KeyEventKind, KeyboardDriver};
pub use removable::RemovableMemoryDriver;
pub use usb::{BusTransfer, UsbDriver};
