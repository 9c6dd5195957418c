//! Bounded, time-windowed cache of weather snapshots.
//!
//! Entries are keyed by exact coordinate and target hour. Expiry is measured
//! from insertion. When the cache grows past its capacity, expired entries go
//! first, then the oldest insert (FIFO; lookups do not refresh an entry's
//! position).

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

use crate::helpers::floor_to_hour;
use crate::services::forecast::WeatherSnapshot;

/// `(lat bits, lon bits, unix seconds of the target hour)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(u64, u64, i64);

impl CacheKey {
    pub fn new(lat: f64, lon: f64, target: DateTime<Utc>) -> Self {
        Self(lat.to_bits(), lon.to_bits(), floor_to_hour(target).timestamp())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    snapshot: WeatherSnapshot,
    inserted_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct WeatherCache {
    entries: HashMap<CacheKey, CacheEntry>,
    order: VecDeque<CacheKey>,
    ttl: Duration,
    max_entries: usize,
}

impl WeatherCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Fresh snapshot for `key`, if any. An expired entry is dropped.
    pub fn get(&mut self, key: &CacheKey, now: DateTime<Utc>) -> Option<WeatherSnapshot> {
        let expired = match self.entries.get(key) {
            Some(entry) if now - entry.inserted_at < self.ttl => {
                return Some(entry.snapshot.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.remove(key);
        }
        None
    }

    pub fn insert(&mut self, key: CacheKey, snapshot: WeatherSnapshot, now: DateTime<Utc>) {
        if self.entries.contains_key(&key) {
            self.order.retain(|k| k != &key);
        }
        self.entries.insert(
            key,
            CacheEntry {
                snapshot,
                inserted_at: now,
            },
        );
        self.order.push_back(key);

        if self.entries.len() > self.max_entries {
            self.purge_expired(now);
        }
        while self.entries.len() > self.max_entries {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Drop every expired entry.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, e| now - e.inserted_at < ttl);
        let entries = &self.entries;
        self.order.retain(|k| entries.contains_key(k));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn remove(&mut self, key: &CacheKey) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }
}
