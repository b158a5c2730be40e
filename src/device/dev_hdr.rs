//! Device Header - control blocks and generic device state
//!
//! A [`DeviceControlBlock`] is the metadata record for one physical device
//! slot. A [`Device`] is the driver-owned runtime state: the busy flag that
//! serializes requests and the staging buffer charged to the accountant.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use spin::{Mutex, RwLock};

use crate::error::Result;
use crate::memory::RamManager;

// ============================================================================
// Device ID
// ============================================================================

/// Device identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u32);

impl core::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DeviceId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

// ============================================================================
// Connection State
// ============================================================================

/// Hot-plug state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        *self == ConnectionState::Connected
    }
}

impl core::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
        }
    }
}

// ============================================================================
// Device Control Block
// ============================================================================

/// Maximum stored length of a device name
pub const DEVICE_NAME_MAX: usize = 32;

/// Device Control Block
///
/// Identity and capacity are fixed at creation. The connection state only
/// changes through insert/remove interrupt handlers.
#[derive(Debug)]
pub struct DeviceControlBlock {
    id: DeviceId,
    name: heapless::String<DEVICE_NAME_MAX>,
    capacity: usize,
    connected: AtomicBool,
}

impl DeviceControlBlock {
    /// Create a control block, names longer than [`DEVICE_NAME_MAX`] are cut
    pub fn new(id: DeviceId, name: &str, capacity: usize) -> Self {
        let mut stored = heapless::String::new();
        for c in name.chars() {
            if stored.push(c).is_err() {
                break;
            }
        }
        Self {
            id,
            name: stored,
            capacity,
            connected: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self) -> ConnectionState {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Set the connection state, returns the previous one
    pub(crate) fn set_state(&self, state: ConnectionState) -> ConnectionState {
        let was = self
            .connected
            .swap(state.is_connected(), Ordering::SeqCst);
        if was {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }
}

impl core::fmt::Display for DeviceControlBlock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "[DCB] {} (id {}, capacity {})",
            self.name, self.id, self.capacity
        )
    }
}

// ============================================================================
// Control Block Registry
// ============================================================================

/// Registry of control blocks, one per device slot
#[derive(Debug, Default)]
pub struct DcbRegistry {
    blocks: RwLock<BTreeMap<DeviceId, Arc<DeviceControlBlock>>>,
}

impl DcbRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and record a control block
    ///
    /// An existing block with the same id is returned unchanged, control
    /// blocks are never replaced during a session.
    pub fn create(&self, id: DeviceId, name: &str, capacity: usize) -> Arc<DeviceControlBlock> {
        let mut blocks = self.blocks.write();
        if let Some(existing) = blocks.get(&id) {
            log::warn!(target: "device", "control block {} already exists", id);
            return Arc::clone(existing);
        }
        let dcb = Arc::new(DeviceControlBlock::new(id, name, capacity));
        log::debug!(target: "device", "{}", dcb);
        blocks.insert(id, Arc::clone(&dcb));
        dcb
    }

    pub fn get(&self, id: DeviceId) -> Option<Arc<DeviceControlBlock>> {
        self.blocks.read().get(&id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<DeviceControlBlock>> {
        self.blocks
            .read()
            .values()
            .find(|dcb| dcb.name() == name)
            .cloned()
    }

    pub fn list(&self) -> Vec<Arc<DeviceControlBlock>> {
        self.blocks.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}

// ============================================================================
// Device (driver-owned runtime state)
// ============================================================================

/// Generic driver-owned device state
///
/// `busy` is a mutual-exclusion flag, not a queue depth. Bytes charged to
/// the accountant while staging are released exactly once by [`complete`].
///
/// [`complete`]: Device::complete
#[derive(Debug)]
pub struct Device {
    name: String,
    busy: AtomicBool,
    buffer: Mutex<Vec<u8>>,
    buffer_size: usize,
    charged: AtomicUsize,
    accountant: Option<Arc<RamManager>>,
}

impl Device {
    /// Device whose buffers are not accounted
    pub fn new(name: &str, buffer_size: usize) -> Self {
        Self {
            name: String::from(name),
            busy: AtomicBool::new(false),
            buffer: Mutex::new(Vec::new()),
            buffer_size,
            charged: AtomicUsize::new(0),
            accountant: None,
        }
    }

    /// Device whose staging buffers are charged to `ram`
    pub fn with_accountant(name: &str, buffer_size: usize, ram: Arc<RamManager>) -> Self {
        let mut dev = Self::new(name, buffer_size);
        dev.accountant = Some(ram);
        dev
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Mark the device busy, false if it already was
    pub fn try_acquire(&self) -> bool {
        !self.busy.swap(true, Ordering::SeqCst)
    }

    /// Charge `len` bytes for an upcoming transfer
    pub fn reserve(&self, len: usize) -> Result<()> {
        if let Some(ram) = &self.accountant {
            ram.try_allocate(len)?;
        }
        self.charged.fetch_add(len, Ordering::SeqCst);
        Ok(())
    }

    /// Copy `data` into the staging buffer, cut to the buffer size
    pub fn load(&self, data: &[u8]) {
        let len = data.len().min(self.buffer_size);
        *self.buffer.lock() = data[..len].to_vec();
    }

    /// Reserve and load in one step, returns the staged bytes
    pub fn stage(&self, data: &[u8]) -> Result<Vec<u8>> {
        let len = data.len().min(self.buffer_size);
        self.reserve(len)?;
        let staged = data[..len].to_vec();
        *self.buffer.lock() = staged.clone();
        Ok(staged)
    }

    /// Current staging buffer contents
    pub fn buffer(&self) -> Vec<u8> {
        self.buffer.lock().clone()
    }

    /// Bytes charged and not yet released
    pub fn charged(&self) -> usize {
        self.charged.load(Ordering::SeqCst)
    }

    /// Completion: release charged bytes, clear the buffer and the busy flag
    ///
    /// Returns the number of bytes released.
    pub fn complete(&self) -> usize {
        let charged = self.charged.swap(0, Ordering::SeqCst);
        if charged > 0 {
            if let Some(ram) = &self.accountant {
                ram.free(charged);
            }
        }
        self.buffer.lock().clear();
        self.busy.store(false, Ordering::SeqCst);
        log::info!(target: "interrupt", "operation completed on {}", self.name);
        charged
    }
}
