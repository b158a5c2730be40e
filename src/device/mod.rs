//! Device Subsystem
//!
//! Provides device management including:
//! - Device control blocks and runtime device state
//! - I/O requests and the bounded request queue
//! - Driver interface and driver table
//! - Block storage and read cache
//! - The I/O worker that drains the queue

pub mod block;
pub mod conf;
pub mod dev_hdr;
pub mod ds_routines;
pub mod io_req;

pub use block::{BlockState, BlockStore, LruCache};
pub use conf::{DeviceDetail, DeviceKind, Driver, DriverStatus, DriverTable, IoCompletion};
pub use dev_hdr::{ConnectionState, DcbRegistry, Device, DeviceControlBlock, DeviceId};
pub use ds_routines::{IoStats, IoStatsSnapshot, IoWorker, StepOutcome, WorkerHandle};
pub use io_req::{IoOp, IoQueue, IoReqId, IoRequest, IO_QUEUE_DEFAULT_SIZE};
