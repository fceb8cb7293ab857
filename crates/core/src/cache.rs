//! Modification-time-aware snapshot cache, one instance per format reader.
//!
//! Snapshots are immutable and shared as `Arc`s; a changed mtime replaces the slot
//! wholesale. Lookups take the read lock only and refresh the access stamp with a relaxed
//! atomic store. When an insert pushes the map past capacity, the inserting thread sweeps out
//! the least recently accessed slots.
//!
//! Two threads missing on the same path at once will both scan; the later insert wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::UNIX_EPOCH;

use crate::error::ReadError;

/// Default number of resident snapshots per reader.
pub const DEFAULT_CAPACITY: usize = 50;

struct CacheSlot<S> {
    modified_millis: u64,
    snapshot: Arc<S>,
    last_access: AtomicU64,
}

pub struct SnapshotCache<S> {
    slots: RwLock<HashMap<PathBuf, CacheSlot<S>>>,
    capacity: usize,
    clock: AtomicU64,
}

impl<S> SnapshotCache<S> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return the snapshot for `path`, scanning when nothing is cached or the file's mtime
    /// moved. `scan` receives the canonical path and the stale snapshot, if any, so it can
    /// reuse what it learned last time. A failed scan caches nothing.
    pub fn get_or_scan<F>(&self, path: &Path, scan: F) -> Result<Arc<S>, ReadError>
    where
        F: FnOnce(&Path, Option<&S>) -> Result<S, ReadError>,
    {
        let key = std::fs::canonicalize(path)?;
        let modified = modified_millis(&key)?;

        let stale = {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            match slots.get(&key) {
                Some(slot) if slot.modified_millis == modified => {
                    slot.last_access.store(self.tick(), Ordering::Relaxed);
                    tracing::trace!("Snapshot cache hit for {}", key.display());
                    return Ok(Arc::clone(&slot.snapshot));
                }
                Some(slot) => Some(Arc::clone(&slot.snapshot)),
                None => None,
            }
        };

        if stale.is_some() {
            tracing::debug!("{} changed on disk, rescanning", key.display());
        }
        let snapshot = Arc::new(scan(&key, stale.as_deref())?);

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.insert(
            key,
            CacheSlot {
                modified_millis: modified,
                snapshot: Arc::clone(&snapshot),
                last_access: AtomicU64::new(self.tick()),
            },
        );
        self.evict_locked(&mut slots);
        Ok(snapshot)
    }

    /// Whether a snapshot for `path` is resident (regardless of freshness).
    pub fn contains(&self, path: &Path) -> bool {
        let Ok(key) = std::fs::canonicalize(path) else {
            return false;
        };
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&key)
    }

    /// Drop the snapshot for `path`, if resident.
    pub fn invalidate(&self, path: &Path) -> bool {
        let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key)
            .is_some()
    }

    pub fn clear(&self) {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn evict_locked(&self, slots: &mut HashMap<PathBuf, CacheSlot<S>>) {
        if slots.len() <= self.capacity {
            return;
        }
        let excess = slots.len() - self.capacity;
        let mut by_age: Vec<(u64, PathBuf)> = slots
            .iter()
            .map(|(k, slot)| (slot.last_access.load(Ordering::Relaxed), k.clone()))
            .collect();
        by_age.sort_unstable_by_key(|(stamp, _)| *stamp);
        for (_, key) in by_age.into_iter().take(excess) {
            tracing::debug!("Evicting snapshot for {}", key.display());
            slots.remove(&key);
        }
    }
}

impl<S> Default for SnapshotCache<S> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// File modification time in milliseconds since the Unix epoch.
pub fn modified_millis(path: &Path) -> Result<u64, ReadError> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0))
}
