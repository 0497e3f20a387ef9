//! Bounded in-process LRU tier.
//!
//! Recency is a monotonically increasing tick; `order` maps tick -> key so the
//! least recently used entry is always `order`'s first element.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::CacheEntry;

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    tick: u64,
}

#[derive(Debug, Default)]
struct LruState {
    slots: HashMap<String, Slot>,
    order: BTreeMap<u64, String>,
    tick: u64,
}

impl LruState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn drop_key(&mut self, key: &str) -> Option<Slot> {
        let slot = self.slots.remove(key)?;
        self.order.remove(&slot.tick);
        Some(slot)
    }
}

#[derive(Debug)]
pub struct MemoryTier {
    capacity: usize,
    state: Mutex<LruState>,
}

impl MemoryTier {
    /// A capacity of zero disables the tier: inserts are dropped.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(LruState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Look up `key`, marking it most recently used.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut state = self.lock();
        let tick = state.next_tick();
        let slot = state.slots.get_mut(key)?;
        let previous = std::mem::replace(&mut slot.tick, tick);
        let entry = slot.entry.clone();
        state.order.remove(&previous);
        state.order.insert(tick, key.to_string());
        Some(entry)
    }

    /// Insert or replace `key`. Returns the key evicted to make room, if any.
    pub fn insert(&self, key: &str, entry: CacheEntry) -> Option<String> {
        if self.capacity == 0 {
            return None;
        }
        let mut state = self.lock();
        state.drop_key(key);

        let mut evicted = None;
        if state.slots.len() >= self.capacity {
            if let Some((_, lru_key)) = state.order.pop_first() {
                state.slots.remove(&lru_key);
                evicted = Some(lru_key);
            }
        }

        let tick = state.next_tick();
        state.order.insert(tick, key.to_string());
        state.slots.insert(key.to_string(), Slot { entry, tick });
        evicted
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().drop_key(key).is_some()
    }

    /// Drop every entry created strictly before `cutoff`.
    pub fn remove_created_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let stale: Vec<String> = state
            .slots
            .iter()
            .filter(|(_, slot)| slot.entry.created_at < cutoff)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            state.drop_key(key);
        }
        stale.len()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.slots.clear();
        state.order.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
