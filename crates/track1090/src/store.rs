use crate::aircraft::{key_of, Aircraft};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};

/**
 * The aircraft registry: a concurrent map from the 25-bit logical address
 * (24-bit transponder address plus the non-ICAO flag) to the live record.
 *
 * Lookup is O(1) and lock-free for readers; destructive operations only
 * happen on the sweep workers. Each aircraft is wrapped in its own mutex,
 * held just long enough to update or to snap a shadow copy; an `Arc` keeps
 * a record alive for any worker still holding it after removal, so locks
 * never dangle.
 */
#[derive(Debug, Default)]
pub struct Registry {
    aircraft: DashMap<u32, Arc<Mutex<Aircraft>>>,
}

pub type Handle = Arc<Mutex<Aircraft>>;

impl Registry {
    pub fn new() -> Self {
        Self {
            aircraft: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }

    pub fn get(&self, addr: u32, non_icao: bool) -> Option<Handle> {
        self.aircraft
            .get(&key_of(addr, non_icao))
            .map(|e| e.value().clone())
    }

    /// Fetch or create a record. The caller decides whether creation is
    /// allowed (only address-reliable messages may create).
    pub fn get_or_create(&self, addr: u32, non_icao: bool, now: u64) -> Handle {
        self.aircraft
            .entry(key_of(addr, non_icao))
            .or_insert_with(|| {
                Arc::new(Mutex::new(Aircraft::new(addr, non_icao, now)))
            })
            .value()
            .clone()
    }

    /// Insert a fully formed record (warm restart path). An existing entry
    /// wins: live data is never displaced by a stale file.
    pub fn insert_loaded(&self, aircraft: Aircraft) -> bool {
        let key = aircraft.key();
        let mut inserted = false;
        self.aircraft.entry(key).or_insert_with(|| {
            inserted = true;
            Arc::new(Mutex::new(aircraft))
        });
        inserted
    }

    pub fn remove(&self, key: u32) -> Option<Handle> {
        self.aircraft.remove(&key).map(|(_, v)| v)
    }

    /// Visit every aircraft whose key falls in the worker's shard.
    /// `key % num_shards == shard` partitions the registry disjointly, so
    /// pools can run without coordination.
    pub fn for_shard<F>(&self, shard: usize, num_shards: usize, mut f: F)
    where
        F: FnMut(u32, &Handle),
    {
        for entry in self.aircraft.iter() {
            if (*entry.key() as usize) % num_shards == shard {
                f(*entry.key(), entry.value());
            }
        }
    }

    /// Visit every aircraft
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(u32, &Handle),
    {
        for entry in self.aircraft.iter() {
            f(*entry.key(), entry.value());
        }
    }

    /// Collect the handles of a shard slice: `slice`/`num_slices` further
    /// divides a shard for rotor-style incremental visits.
    pub fn shard_slice(
        &self,
        shard: usize,
        num_shards: usize,
        slice: usize,
        num_slices: usize,
    ) -> Vec<(u32, Handle)> {
        let mut out = Vec::new();
        for entry in self.aircraft.iter() {
            let key = *entry.key() as usize;
            if key % num_shards == shard
                && (key / num_shards) % num_slices == slice
            {
                out.push((*entry.key(), entry.value().clone()));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_lookup() {
        let registry = Registry::new();
        let handle = registry.get_or_create(0x4b1803, false, 1000);
        handle.lock().unwrap().seen = 42;
        let again = registry.get(0x4b1803, false).unwrap();
        assert_eq!(again.lock().unwrap().seen, 42);
        assert!(registry.get(0x4b1803, true).is_none());
    }

    #[test]
    fn test_shards_partition() {
        let registry = Registry::new();
        for addr in 0..100u32 {
            registry.get_or_create(addr, false, 0);
        }
        let mut seen = 0;
        for shard in 0..4 {
            registry.for_shard(shard, 4, |_, _| seen += 1);
        }
        assert_eq!(seen, 100);
    }

    #[test]
    fn test_slices_partition_shard() {
        let registry = Registry::new();
        for addr in 0..256u32 {
            registry.get_or_create(addr, false, 0);
        }
        let mut seen = 0;
        for slice in 0..64 {
            seen += registry.shard_slice(1, 8, slice, 64).len();
        }
        registry.for_shard(1, 8, |_, _| seen -= 1);
        assert_eq!(seen, 0);
    }

    #[test]
    fn test_loaded_does_not_displace_live() {
        let registry = Registry::new();
        let live = registry.get_or_create(0xabcdef, false, 0);
        live.lock().unwrap().seen = 7;
        let loaded = Aircraft::new(0xabcdef, false, 0);
        assert!(!registry.insert_loaded(loaded));
        assert_eq!(
            registry.get(0xabcdef, false).unwrap().lock().unwrap().seen,
            7
        );
    }

    #[test]
    fn test_handle_survives_removal() {
        let registry = Registry::new();
        let handle = registry.get_or_create(0x123456, false, 0);
        let removed = registry.remove(key_of(0x123456, false)).unwrap();
        // both Arcs still point at the same record
        removed.lock().unwrap().seen = 9;
        assert_eq!(handle.lock().unwrap().seen, 9);
        assert!(registry.get(0x123456, false).is_none());
    }
}
