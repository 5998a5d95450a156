//! In-memory cache tier, bounded by total byte size.
//!
//! Backs both L1 and the per-document session tier; the two differ only in
//! capacity and lifetime.

use crate::blob::AudioBlob;
use crate::cache::key::Fingerprint;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

struct Entry {
    blob: AudioBlob,
    inserted_at: Instant,
    last_access: Instant,
    hits: u64,
}

impl Entry {
    /// Eviction score: `age × size / (hits + 1)`. Highest goes first.
    fn score(&self, now: Instant) -> f64 {
        let age = now.duration_since(self.inserted_at).as_secs_f64();
        age * self.blob.byte_len() as f64 / (self.hits + 1) as f64
    }
}

pub struct MemoryTier {
    entries: HashMap<Fingerprint, Entry>,
    total_bytes: u64,
    capacity_bytes: u64,
}

impl MemoryTier {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            entries: HashMap::new(),
            total_bytes: 0,
            capacity_bytes,
        }
    }

    pub fn get(&mut self, key: &Fingerprint) -> Option<AudioBlob> {
        let entry = self.entries.get_mut(key)?;
        entry.last_access = Instant::now();
        entry.hits += 1;
        Some(entry.blob.clone())
    }

    /// Insert, evicting by score until the tier fits its capacity.
    /// Re-inserting an existing key only refreshes its access time.
    pub fn insert(&mut self, key: Fingerprint, blob: AudioBlob) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.last_access = Instant::now();
            return;
        }

        let size = blob.byte_len() as u64;
        if size > self.capacity_bytes {
            debug!("blob of {size} bytes exceeds tier capacity, not cached");
            return;
        }

        let now = Instant::now();
        self.entries.insert(key, Entry {
            blob,
            inserted_at: now,
            last_access: now,
            hits: 0,
        });
        self.total_bytes += size;
        self.evict_to_capacity();
    }

    fn evict_to_capacity(&mut self) {
        while self.total_bytes > self.capacity_bytes {
            let now = Instant::now();
            let victim = self
                .entries
                .iter()
                .max_by(|(_, a), (_, b)| {
                    a.score(now)
                        .partial_cmp(&b.score(now))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(k, _)| *k);
            let Some(key) = victim else { break };
            if let Some(entry) = self.entries.remove(&key) {
                self.total_bytes -= entry.blob.byte_len() as u64;
                debug!(key = %key, "evicted cache entry");
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::VoiceSpec;

    fn key(text: &str) -> Fingerprint {
        Fingerprint::compute(text, &VoiceSpec::new("piper", None, 1.0))
    }

    fn blob(len: usize) -> AudioBlob {
        AudioBlob::new(vec![0u8; len], 44_100)
    }

    #[test]
    fn put_then_get_round_trips() {
        let mut tier = MemoryTier::new(1024);
        tier.insert(key("a"), blob(100));
        let got = tier.get(&key("a"));
        assert_eq!(got.map(|b| b.byte_len()), Some(100));
    }

    #[test]
    fn capacity_is_enforced_after_every_insert() {
        let mut tier = MemoryTier::new(250);
        for text in ["a", "b", "c", "d"] {
            tier.insert(key(text), blob(100));
            assert!(tier.total_bytes() <= 250);
        }
        assert!(tier.len() <= 2);
    }

    #[test]
    fn hot_entries_survive_eviction() {
        let mut tier = MemoryTier::new(250);
        tier.insert(key("hot"), blob(100));
        // Make "hot" popular before capacity pressure arrives.
        for _ in 0..50 {
            let _ = tier.get(&key("hot"));
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
        tier.insert(key("cold"), blob(100));
        std::thread::sleep(std::time::Duration::from_millis(5));
        tier.insert(key("new"), blob(100));
        assert!(tier.get(&key("hot")).is_some());
    }

    #[test]
    fn reinsert_is_idempotent() {
        let mut tier = MemoryTier::new(1024);
        tier.insert(key("a"), blob(100));
        tier.insert(key("a"), blob(100));
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.total_bytes(), 100);
    }

    #[test]
    fn oversized_blob_is_refused() {
        let mut tier = MemoryTier::new(50);
        tier.insert(key("big"), blob(100));
        assert_eq!(tier.len(), 0);
        assert_eq!(tier.total_bytes(), 0);
    }

    #[test]
    fn clear_empties_the_tier() {
        let mut tier = MemoryTier::new(1024);
        tier.insert(key("a"), blob(10));
        tier.insert(key("b"), blob(10));
        tier.clear();
        assert_eq!(tier.len(), 0);
        assert_eq!(tier.total_bytes(), 0);
        assert!(tier.get(&key("a")).is_none());
    }
}
