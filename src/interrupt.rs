//! Interrupt table for devsim
//!
//! Maps an event name to a single synchronous handler. There is no priority
//! or vectoring: `trigger` runs the handler on the caller's thread and never
//! queues. Registering a name twice replaces the earlier handler.

use std::collections::BTreeMap;
use std::sync::Arc;

use spin::RwLock;

use crate::error::{DeviceError, Result};

// ============================================================================
// Well-known event names
// ============================================================================

/// Bus device attached
pub const USB_INSERT: &str = "USB_INSERT";
/// Bus device detached
pub const USB_REMOVE: &str = "USB_REMOVE";
/// Key event from an external keyboard source
pub const KEYBOARD_IRQ: &str = "KEYBOARD_IRQ";

/// Completion event name for a device
pub fn completion_event(device_name: &str) -> String {
    format!("{}_COMPLETE", event_prefix(device_name))
}

/// Upper-case, underscore-separated form of a device name used in event names
pub fn event_prefix(device_name: &str) -> String {
    device_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

// ============================================================================
// Handler arguments
// ============================================================================

/// Argument passed along with an interrupt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrqArg {
    Int(u64),
    Str(String),
}

impl IrqArg {
    pub fn as_int(&self) -> Option<u64> {
        match self {
            IrqArg::Int(v) => Some(*v),
            IrqArg::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            IrqArg::Str(s) => Some(s),
            IrqArg::Int(_) => None,
        }
    }
}

impl From<u64> for IrqArg {
    fn from(v: u64) -> Self {
        IrqArg::Int(v)
    }
}

impl From<&str> for IrqArg {
    fn from(s: &str) -> Self {
        IrqArg::Str(s.into())
    }
}

impl From<String> for IrqArg {
    fn from(s: String) -> Self {
        IrqArg::Str(s)
    }
}

/// Interrupt handler function type
pub type InterruptHandler = Arc<dyn Fn(&[IrqArg]) + Send + Sync>;

// ============================================================================
// Interrupt Table
// ============================================================================

/// Named interrupt table, one handler slot per event
#[derive(Default)]
pub struct InterruptTable {
    handlers: RwLock<BTreeMap<String, InterruptHandler>>,
}

impl InterruptTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`, replacing any previous one
    pub fn register<F>(&self, event: &str, handler: F)
    where
        F: Fn(&[IrqArg]) + Send + Sync + 'static,
    {
        let previous = self
            .handlers
            .write()
            .insert(String::from(event), Arc::new(handler));
        if previous.is_some() {
            log::debug!(target: "interrupt", "handler for {} replaced", event);
        }
    }

    /// Drop the handler for `event`, returns whether one was present
    pub fn unregister(&self, event: &str) -> bool {
        self.handlers.write().remove(event).is_some()
    }

    /// Run the handler for `event` on the calling thread
    pub fn trigger(&self, event: &str, args: &[IrqArg]) -> Result<()> {
        // Handlers may register or trigger other events, so the lock is
        // released before the call.
        let handler = self.handlers.read().get(event).cloned();
        match handler {
            Some(handler) => {
                log::trace!(target: "interrupt", "{} {:?}", event, args);
                handler(args);
                Ok(())
            }
            None => {
                log::warn!(target: "interrupt", "no handler found for interrupt {}", event);
                Err(DeviceError::UnhandledInterrupt(String::from(event)))
            }
        }
    }

    /// Whether `event` has a handler
    pub fn is_registered(&self, event: &str) -> bool {
        self.handlers.read().contains_key(event)
    }

    /// Registered event names in sorted order
    pub fn events(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }
}

impl core::fmt::Debug for InterruptTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InterruptTable")
            .field("events", &self.events())
            .finish()
    }
}
