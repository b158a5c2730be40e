//! Error types for device and I/O operations

use thiserror::Error;

use crate::device::DeviceId;

/// Result type for device operations
pub type Result<T> = core::result::Result<T, DeviceError>;

/// Errors reported by the accountant, queue, interrupt table and drivers
///
/// None of these are fatal: the worker logs them and moves on to the next
/// request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Accountant ceiling would be crossed
    #[error("not enough memory to allocate {requested} bytes ({used}/{capacity} in use)")]
    CapacityExceeded {
        requested: usize,
        used: usize,
        capacity: usize,
    },

    /// Bounded request queue is at capacity
    #[error("I/O queue is full ({capacity} requests)")]
    QueueFull { capacity: usize },

    /// Removable or bus device is not present
    #[error("device {0} is not connected")]
    DeviceNotConnected(String),

    /// Block index past the end of the device
    #[error("block {index} out of range ({total} blocks)")]
    BlockOutOfRange { index: usize, total: usize },

    /// Every block of the device is in use
    #[error("no free block on {0}")]
    NoFreeBlock(String),

    /// Injected transient hardware failure
    #[error("simulated {op} failure on {device}")]
    SimulatedFault { device: String, op: &'static str },

    /// Operation name not understood
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// Driver does not implement the requested operation
    #[error("{device} does not support {op}")]
    UnsupportedOperation { device: String, op: &'static str },

    /// Device id has no entry in the driver table
    #[error("no driver registered for device {0}")]
    NoDriverRegistered(DeviceId),

    /// Event name has no handler in the interrupt table
    #[error("no handler registered for interrupt {0}")]
    UnhandledInterrupt(String),

    /// Device went away while a transfer was in flight
    #[error("transfer on {device} aborted after {elapsed_ms} ms")]
    TransferAborted { device: String, elapsed_ms: u64 },

    /// Transfer would occupy the bus longer than a `Duration` can hold
    #[error("transfer of {size} bytes on {device} is too long to simulate")]
    TransferTooLong { device: String, size: usize },

    /// Driver panicked while running a request
    #[error("driver for {device} panicked: {message}")]
    DriverPanicked { device: String, message: String },

    /// Worker thread could not be started
    #[error("failed to start I/O worker: {0}")]
    WorkerSpawn(String),
}

impl DeviceError {
    /// Whether resubmitting the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeviceError::SimulatedFault { .. }
                | DeviceError::QueueFull { .. }
                | DeviceError::CapacityExceeded { .. }
        )
    }
}

/// Errors raised while loading a configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let fault = DeviceError::SimulatedFault {
            device: "SSD".into(),
            op: "write",
        };
        assert!(fault.is_transient());
        assert!(DeviceError::QueueFull { capacity: 10 }.is_transient());
        assert!(!DeviceError::BlockOutOfRange { index: 9, total: 8 }.is_transient());
        assert!(!DeviceError::NoDriverRegistered(DeviceId(7)).is_transient());
    }

    #[test]
    fn test_messages() {
        let err = DeviceError::CapacityExceeded {
            requested: 2048,
            used: 0,
            capacity: 1024,
        };
        assert_eq!(
            err.to_string(),
            "not enough memory to allocate 2048 bytes (0/1024 in use)"
        );
        assert_eq!(
            DeviceError::DeviceNotConnected("USB Stick".into()).to_string(),
            "device USB Stick is not connected"
        );
    }
}
