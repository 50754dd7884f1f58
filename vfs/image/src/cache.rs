//! Time-bounded cache of parsed filesystems.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::device::DeviceId;
use crate::session::FsSession;

struct CacheSlot<T> {
    value: Arc<T>,
    inserted: Instant,
}

impl<T> CacheSlot<T> {
    fn new(value: Arc<T>) -> Self {
        Self {
            value,
            inserted: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted.elapsed() >= ttl
    }
}

/// Per-device cell; empty while its first value is being built.
type SharedSlot<T> = Arc<Mutex<Option<CacheSlot<T>>>>;

/// Maps a [`DeviceId`] to a shared value for a fixed time after insertion.
///
/// Expiry is measured from insertion, not last access, and is only checked
/// on lookup. Creation through [`DeviceCache::get_or_try_insert_with`] locks
/// only the key's own slot while the value is built, so concurrent first
/// lookups of one device build it once and other devices are not held up.
pub struct DeviceCache<T = FsSession> {
    ttl: Duration,
    entries: DashMap<DeviceId, SharedSlot<T>>,
}

impl<T> DeviceCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, id: &DeviceId) -> Option<Arc<T>> {
        let slot = self.entries.get(id).map(|slot| slot.value().clone())?;
        {
            let stored = slot.lock();
            match stored.as_ref() {
                Some(live) if !live.is_expired(self.ttl) => {
                    tracing::trace!(device = %id, "Device cache hit");
                    return Some(live.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        let ttl = self.ttl;
        let evicted = self.remove_slot_if(id, &slot, |stored| {
            stored.as_ref().is_some_and(|stored| stored.is_expired(ttl))
        });
        if evicted {
            tracing::debug!(device = %id, "Device cache entry expired");
        }
        None
    }

    pub fn put(&self, id: DeviceId, value: Arc<T>) {
        self.entries
            .insert(id, Arc::new(Mutex::new(Some(CacheSlot::new(value)))));
    }

    /// Return the live value for `id`, building and inserting it with `make`
    /// when absent or expired. A failed build leaves the cache untouched.
    pub fn get_or_try_insert_with<E>(
        &self,
        id: &DeviceId,
        make: impl FnOnce() -> Result<T, E>,
    ) -> Result<Arc<T>, E> {
        // The map's shard lock is released before the slot is locked.
        let slot = self.entries.entry(id.clone()).or_default().value().clone();
        let mut stored = slot.lock();
        match stored.as_ref() {
            Some(live) if !live.is_expired(self.ttl) => {
                tracing::trace!(device = %id, "Device cache hit");
                return Ok(live.value.clone());
            }
            Some(_) => tracing::debug!(device = %id, "Device cache entry expired, rebuilding"),
            None => tracing::debug!(device = %id, "Device cache miss"),
        }

        match make() {
            Ok(value) => {
                let value = Arc::new(value);
                *stored = Some(CacheSlot::new(value.clone()));
                Ok(value)
            }
            Err(err) => {
                drop(stored);
                self.remove_slot_if(id, &slot, Option::is_none);
                Err(err)
            }
        }
    }

    /// Remove `slot` from the map if it is still the one stored under `id`
    /// and `stale` holds. A slot locked by a concurrent build is kept.
    fn remove_slot_if(
        &self,
        id: &DeviceId,
        slot: &SharedSlot<T>,
        stale: impl Fn(&Option<CacheSlot<T>>) -> bool,
    ) -> bool {
        self.entries
            .remove_if(id, |_, current| {
                Arc::ptr_eq(current, slot)
                    && current.try_lock().is_some_and(|stored| stale(&*stored))
            })
            .is_some()
    }

    /// Number of stored entries, including expired ones not yet evicted and
    /// ones still being built.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> fmt::Debug for DeviceCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.len())
            .finish()
    }
}
