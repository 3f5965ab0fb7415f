// av_runtime/src/cell.rs

//! Latest-value publish cells connecting the periodic tasks.
//!
//! Each cell has exactly one writing task; readers always see the most
//! recent complete value and never block the writer for long. A version
//! counter lets a reader distinguish a fresh publication from a value it
//! already consumed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

pub struct LatestCell<T> {
    slot: RwLock<Option<T>>,
    version: AtomicU64,
}

impl<T: Clone> LatestCell<T> {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
            version: AtomicU64::new(0),
        }
    }

    /// Replaces the stored value and bumps the version.
    pub fn publish(&self, value: T) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(value);
        self.version.fetch_add(1, Ordering::Release);
    }

    pub fn read(&self) -> Option<T> {
        self.slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Reads the value together with its version. The version only moves
    /// forward, so a consumer can detect whether anything new was published
    /// since its last read.
    pub fn read_versioned(&self) -> Option<(T, u64)> {
        let slot = self.slot.read().unwrap_or_else(|e| e.into_inner());
        let version = self.version.load(Ordering::Acquire);
        slot.as_ref().map(|value| (value.clone(), version))
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

impl<T: Clone> Default for LatestCell<T> {
    fn default() -> Self {
        Self::new()
    }
}
