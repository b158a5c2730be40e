//! Block storage and the per-device LRU cache

use std::collections::VecDeque;

use crate::error::{DeviceError, Result};

// ============================================================================
// Block Store
// ============================================================================

/// Allocation state of one block slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockState {
    #[default]
    Free,
    Used,
}

/// Fixed array of `capacity / block_size` slots
#[derive(Debug, Clone)]
pub struct BlockStore {
    block_size: usize,
    slots: Vec<Vec<u8>>,
    states: Vec<BlockState>,
}

impl BlockStore {
    pub fn new(capacity: usize, block_size: usize) -> Self {
        let total = capacity.checked_div(block_size).unwrap_or(0);
        Self {
            block_size,
            slots: vec![Vec::new(); total],
            states: vec![BlockState::Free; total],
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn total_blocks(&self) -> usize {
        self.slots.len()
    }

    /// Range check for `index`
    pub fn check(&self, index: usize) -> Result<()> {
        if index >= self.total_blocks() {
            return Err(DeviceError::BlockOutOfRange {
                index,
                total: self.total_blocks(),
            });
        }
        Ok(())
    }

    /// Store `data` cut to the block size, returns the stored bytes
    pub fn write(&mut self, index: usize, data: &[u8]) -> Result<Vec<u8>> {
        self.check(index)?;
        let len = data.len().min(self.block_size);
        let stored = data[..len].to_vec();
        self.slots[index] = stored.clone();
        self.states[index] = BlockState::Used;
        Ok(stored)
    }

    pub fn read(&self, index: usize) -> Result<Vec<u8>> {
        self.check(index)?;
        Ok(self.slots[index].clone())
    }

    pub fn state(&self, index: usize) -> Option<BlockState> {
        self.states.get(index).copied()
    }

    pub fn used_count(&self) -> usize {
        self.states
            .iter()
            .filter(|s| **s == BlockState::Used)
            .count()
    }

    pub fn first_free(&self) -> Option<usize> {
        self.states.iter().position(|s| *s == BlockState::Free)
    }
}

// ============================================================================
// LRU Cache
// ============================================================================

/// Fixed-capacity block cache with strict recency order
///
/// Entries are kept least recently used first. A capacity of zero disables
/// caching.
#[derive(Debug, Clone)]
pub struct LruCache {
    capacity: usize,
    entries: VecDeque<(usize, Vec<u8>)>,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.position(index).is_some()
    }

    fn position(&self, index: usize) -> Option<usize> {
        self.entries.iter().position(|(i, _)| *i == index)
    }

    /// Look up `index`, promoting it to most recently used on a hit
    pub fn get(&mut self, index: usize) -> Option<Vec<u8>> {
        let pos = self.position(index)?;
        let entry = self.entries.remove(pos)?;
        let data = entry.1.clone();
        self.entries.push_back(entry);
        Some(data)
    }

    /// Insert or refresh `index` as most recently used
    ///
    /// Returns the evicted block index, if any.
    pub fn insert(&mut self, index: usize, data: Vec<u8>) -> Option<usize> {
        if self.capacity == 0 {
            return None;
        }
        if let Some(pos) = self.position(index) {
            self.entries.remove(pos);
            self.entries.push_back((index, data));
            return None;
        }
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front().map(|(i, _)| i)
        } else {
            None
        };
        self.entries.push_back((index, data));
        evicted
    }

    /// Cached indices, least recently used first
    pub fn keys(&self) -> Vec<usize> {
        self.entries.iter().map(|(i, _)| *i).collect()
    }
}
