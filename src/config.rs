//! Simulator configuration
//!
//! Loaded from TOML; every field has a default so an empty document is a
//! valid configuration.
//!
//! ```toml
//! seed = 7
//!
//! [ram]
//! capacity = 1024
//!
//! [internal]
//! name = "SSD"
//! capacity = 2048
//! block_size = 256
//! cache_size = 4
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::interrupt::event_prefix;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    pub ram: RamConfig,
    pub queue: QueueConfig,
    pub internal: InternalConfig,
    pub removable: RemovableConfig,
    pub bus: BusConfig,
    pub keyboard: KeyboardConfig,
    /// Fault RNG seed, clock-derived when absent
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RamConfig {
    /// Accountant ceiling in bytes
    pub capacity: usize,
}

impl Default for RamConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Maximum pending requests
    pub capacity: usize,
    /// Worker wait window before re-checking the stop flag
    pub poll_interval_ms: u64,
    /// Device staging buffer size in bytes
    pub buffer_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            poll_interval_ms: 1000,
            buffer_size: 128,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Fixed internal block device
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InternalConfig {
    pub id: u32,
    pub name: String,
    pub capacity: usize,
    pub block_size: usize,
    pub cache_size: usize,
    pub failure_chance: f64,
    pub latency_min_ms: u64,
    pub latency_max_ms: u64,
}

impl Default for InternalConfig {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::from("SSD"),
            capacity: 2048,
            block_size: 256,
            cache_size: 4,
            failure_chance: 0.05,
            latency_min_ms: 10,
            latency_max_ms: 100,
        }
    }
}

/// Removable block device
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemovableConfig {
    pub id: u32,
    pub name: String,
    pub capacity: usize,
    pub block_size: usize,
    pub failure_chance: f64,
    pub latency_min_ms: u64,
    pub latency_max_ms: u64,
}

impl Default for RemovableConfig {
    fn default() -> Self {
        Self {
            id: 1,
            name: String::from("USB Stick"),
            capacity: 1024,
            block_size: 128,
            failure_chance: 0.03,
            latency_min_ms: 20,
            latency_max_ms: 200,
        }
    }
}

/// Bus-attached transfer device
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    pub id: u32,
    pub name: String,
    /// Advertised capacity, informational only
    pub capacity: usize,
    /// Bytes per second
    pub transfer_rate: u64,
    /// Transfer size for reads that carry no length
    pub default_read_size: usize,
    /// Granularity at which a transfer checks for removal
    pub transfer_slice_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            id: 3,
            name: String::from("USB"),
            capacity: 128,
            transfer_rate: 30_000_000,
            default_read_size: 100_000_000,
            transfer_slice_ms: 10,
        }
    }
}

/// Keyboard input device
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeyboardConfig {
    pub id: u32,
    pub name: String,
    /// Pending events kept before the oldest is dropped
    pub buffer_size: usize,
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            id: 2,
            name: String::from("Keyboard"),
            buffer_size: 20,
        }
    }
}

impl SimConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.queue.capacity == 0 {
            return invalid(String::from("queue.capacity must be at least 1"));
        }
        if self.queue.poll_interval_ms == 0 {
            return invalid(String::from("queue.poll_interval_ms must be at least 1"));
        }
        if self.internal.block_size == 0 || self.removable.block_size == 0 {
            return invalid(String::from("block_size must be non-zero"));
        }
        if self.keyboard.buffer_size == 0 {
            return invalid(String::from("keyboard.buffer_size must be at least 1"));
        }
        if self.bus.transfer_rate == 0 {
            return invalid(String::from("bus.transfer_rate must be non-zero"));
        }
        for (name, chance) in [
            ("internal", self.internal.failure_chance),
            ("removable", self.removable.failure_chance),
        ] {
            if !(0.0..=1.0).contains(&chance) {
                return invalid(format!("{}.failure_chance must be within 0..=1", name));
            }
        }
        if self.internal.latency_min_ms > self.internal.latency_max_ms
            || self.removable.latency_min_ms > self.removable.latency_max_ms
        {
            return invalid(String::from("latency_min_ms exceeds latency_max_ms"));
        }

        let ids = [
            self.internal.id,
            self.removable.id,
            self.keyboard.id,
            self.bus.id,
        ];
        if ids.iter().collect::<BTreeSet<_>>().len() != ids.len() {
            return invalid(format!("device ids must be unique, got {:?}", ids));
        }

        // Interrupt names are derived from device names
        let names = [
            &self.internal.name,
            &self.removable.name,
            &self.keyboard.name,
            &self.bus.name,
        ];
        let mut prefixes = BTreeSet::new();
        for name in names {
            if !prefixes.insert(event_prefix(name)) {
                return invalid(format!(
                    "device name {:?} maps to interrupt prefix {} already in use",
                    name,
                    event_prefix(name)
                ));
            }
        }
        Ok(())
    }
}
