//! Buffer memory accounting for devsim
//!
//! In-flight I/O buffers are charged against a single bounded byte counter.
//! Nothing is actually allocated here; the manager only enforces the ceiling
//! and keeps `used` observable for diagnostics.

use spin::Mutex;

use crate::error::{DeviceError, Result};

/// Snapshot of accountant state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamUsage {
    /// Bytes currently charged
    pub used: usize,
    /// Hard ceiling
    pub capacity: usize,
}

impl RamUsage {
    /// Bytes still available
    pub fn available(&self) -> usize {
        self.capacity - self.used
    }
}

impl core::fmt::Display for RamUsage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{} bytes", self.used, self.capacity)
    }
}

/// Bounded RAM accountant
///
/// Invariant: `0 <= used <= capacity`.
#[derive(Debug)]
pub struct RamManager {
    capacity: usize,
    used: Mutex<usize>,
}

impl RamManager {
    /// Create an accountant with the given ceiling
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: Mutex::new(0),
        }
    }

    /// Charge `amount` bytes, returns false if the ceiling would be crossed
    pub fn allocate(&self, amount: usize) -> bool {
        self.try_allocate(amount).is_ok()
    }

    /// Charge `amount` bytes, reporting the shortfall on failure
    pub fn try_allocate(&self, amount: usize) -> Result<()> {
        let mut used = self.used.lock();
        let fits = used
            .checked_add(amount)
            .is_some_and(|total| total <= self.capacity);
        if !fits {
            log::warn!(
                target: "ram",
                "not enough memory to allocate {} bytes ({}/{})",
                amount,
                *used,
                self.capacity
            );
            return Err(DeviceError::CapacityExceeded {
                requested: amount,
                used: *used,
                capacity: self.capacity,
            });
        }
        *used += amount;
        log::debug!(target: "ram", "allocated {} bytes, used {}/{}", amount, *used, self.capacity);
        Ok(())
    }

    /// Release `amount` bytes, floored at zero
    pub fn free(&self, amount: usize) {
        let mut used = self.used.lock();
        if amount > *used {
            log::warn!(
                target: "ram",
                "free of {} bytes exceeds {} in use, clamping",
                amount,
                *used
            );
        }
        *used = used.saturating_sub(amount);
        log::debug!(target: "ram", "freed {} bytes, used {}/{}", amount, *used, self.capacity);
    }

    /// Bytes currently charged
    pub fn used(&self) -> usize {
        *self.used.lock()
    }

    /// Configured ceiling
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Consistent snapshot of `used` and `capacity`
    pub fn usage(&self) -> RamUsage {
        RamUsage {
            used: *self.used.lock(),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_over_capacity() {
        let ram = RamManager::new(1024);
        assert!(!ram.allocate(2048));
        assert_eq!(ram.used(), 0);
    }

    #[test]
    fn test_allocate_exact_fit() {
        let ram = RamManager::new(1024);
        assert!(ram.allocate(1000));
        assert!(ram.allocate(24));
        assert!(!ram.allocate(1));
        assert_eq!(ram.usage().available(), 0);
    }

    #[test]
    fn test_free_clamps_at_zero() {
        let ram = RamManager::new(512);
        assert!(ram.allocate(100));
        ram.free(300);
        assert_eq!(ram.used(), 0);
    }

    #[test]
    fn test_try_allocate_reports_state() {
        let ram = RamManager::new(256);
        ram.try_allocate(200).unwrap();
        let err = ram.try_allocate(100).unwrap_err();
        assert_eq!(
            err,
            DeviceError::CapacityExceeded {
                requested: 100,
                used: 200,
                capacity: 256
            }
        );
    }

    #[test]
    fn test_huge_request_does_not_overflow() {
        let ram = RamManager::new(64);
        assert!(ram.allocate(10));
        assert!(!ram.allocate(usize::MAX));
        assert_eq!(ram.used(), 10);
    }
}
