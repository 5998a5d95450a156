//! Two-tier audio cache with a per-document session tier on top.
//!
//! Lookup order: session → L1 (memory) → L2 (disk, compressed). L2 hits are
//! promoted into L1. Synthesis results flow in through the single-flight
//! [`TtsCache::get_or_compute`], which guarantees at most one producer per
//! fingerprint at any time.

mod disk;
mod flight;
mod key;
mod memory;

pub use disk::SweepStats;
pub use key::{Fingerprint, VoiceSpec};

use crate::blob::AudioBlob;
use crate::config::CacheConfig;
use crate::error::{NarrateError, Result};
use flight::{FlightTable, SharedSynthError, Ticket};
use memory::MemoryTier;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Usage counters for logging and the host's status line.
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub session_entries: usize,
    pub session_bytes: u64,
    pub l1_entries: usize,
    pub l1_bytes: u64,
    pub l2_entries: usize,
    pub l2_bytes: u64,
    pub hits: u64,
    pub misses: u64,
}

pub struct TtsCache {
    session: Mutex<MemoryTier>,
    l1: Mutex<MemoryTier>,
    disk: Option<Arc<disk::DiskTier>>,
    flight: FlightTable,
    hits: AtomicU64,
    misses: AtomicU64,
    closed: AtomicBool,
}

impl TtsCache {
    /// Build the cache. A disk tier that cannot be initialized (unwritable
    /// directory, disk full) degrades the cache to memory-only with a
    /// warning instead of failing.
    pub fn new(config: &CacheConfig, sample_rate: u32) -> Self {
        let dir = config.resolve_disk_path();
        let ttl = Duration::from_secs(config.ttl_days * 86_400);
        let disk = match disk::DiskTier::new(dir, config.disk_bytes, ttl, sample_rate) {
            Ok(tier) => Some(Arc::new(tier)),
            Err(e) => {
                warn!("disk cache unavailable, running memory-only: {e}");
                None
            }
        };

        Self {
            session: Mutex::new(MemoryTier::new(config.session_bytes)),
            l1: Mutex::new(MemoryTier::new(config.memory_bytes)),
            disk,
            flight: FlightTable::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn lock_tier<'a>(tier: &'a Mutex<MemoryTier>) -> std::sync::MutexGuard<'a, MemoryTier> {
        match tier.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Tiered lookup. L2 hits are promoted into L1.
    pub fn get(&self, key: &Fingerprint) -> Option<AudioBlob> {
        if self.closed.load(Ordering::Relaxed) {
            return None;
        }

        if let Some(blob) = Self::lock_tier(&self.session).get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(blob);
        }
        if let Some(blob) = Self::lock_tier(&self.l1).get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(blob);
        }
        if let Some(disk) = &self.disk
            && let Some(blob) = disk.get(key)
        {
            Self::lock_tier(&self.l1).insert(*key, blob.clone());
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "promoted disk entry into memory");
            return Some(blob);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Install a blob in every tier. Idempotent. The disk write-through is
    /// scheduled off the caller's thread when a runtime is available; disk
    /// failures degrade to warnings and never block memory operation.
    pub fn put(&self, key: Fingerprint, blob: AudioBlob) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }

        Self::lock_tier(&self.session).insert(key, blob.clone());
        Self::lock_tier(&self.l1).insert(key, blob.clone());

        if let Some(disk) = &self.disk {
            let disk = Arc::clone(disk);
            let write = move || {
                if let Err(e) = disk.put(&key, &blob) {
                    warn!("disk cache write-through failed: {e}");
                }
            };
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn_blocking(write);
                }
                Err(_) => write(),
            }
        }
    }

    /// The single-flight primitive. If a producer is already running for
    /// `key`, wait for and share its result; otherwise run `producer`
    /// exactly once, install the value, and wake all waiters. Errors are
    /// delivered to every waiter but never cached.
    pub async fn get_or_compute<F, Fut>(&self, key: Fingerprint, producer: F) -> Result<AudioBlob>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AudioBlob>>,
    {
        if self.closed.load(Ordering::Relaxed) {
            return Err(NarrateError::Closed("cache"));
        }

        if let Some(blob) = self.get(&key) {
            return Ok(blob);
        }

        match self.flight.join(key) {
            Ticket::Waiter(mut rx) => match rx.recv().await {
                Ok(Ok(blob)) => Ok(blob),
                Ok(Err(e)) => Err(NarrateError::ProcessFailed(e.message)),
                Err(_) => Err(NarrateError::Channel("synthesis producer vanished".into())),
            },
            Ticket::Producer(tx) => {
                // A concurrent producer may have installed the value between
                // our lookup and the claim.
                if let Some(blob) = self.get(&key) {
                    self.flight.finish(&key, &tx, Ok(blob.clone()));
                    return Ok(blob);
                }

                let result = producer().await;
                let outcome = match &result {
                    Ok(blob) => {
                        self.put(key, blob.clone());
                        Ok(blob.clone())
                    }
                    Err(e) => Err(SharedSynthError {
                        message: e.to_string(),
                    }),
                };
                self.flight.finish(&key, &tx, outcome);
                result
            }
        }
    }

    /// Drop the session tier. Called on document change and shutdown.
    pub fn clear_session(&self) {
        Self::lock_tier(&self.session).clear();
    }

    /// Drop every memory tier. Disk entries are left for the sweeper.
    pub fn clear(&self) {
        Self::lock_tier(&self.session).clear();
        Self::lock_tier(&self.l1).clear();
    }

    /// Run one disk sweep: TTL expiry, then capacity enforcement.
    pub fn sweep(&self) -> Result<SweepStats> {
        match &self.disk {
            Some(disk) => disk.sweep(),
            None => Ok(SweepStats::default()),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let (l2_entries, l2_bytes) = self
            .disk
            .as_ref()
            .map(|d| d.usage())
            .unwrap_or_default();
        let session = Self::lock_tier(&self.session);
        let l1 = Self::lock_tier(&self.l1);
        CacheStats {
            session_entries: session.len(),
            session_bytes: session.total_bytes(),
            l1_entries: l1.len(),
            l1_bytes: l1.total_bytes(),
            l2_entries,
            l2_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Whether the disk tier is operational.
    pub fn disk_available(&self) -> bool {
        self.disk.is_some()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn test_config(dir: &std::path::Path) -> CacheConfig {
        CacheConfig {
            memory_bytes: 1024 * 1024,
            disk_bytes: 1024 * 1024,
            disk_path: Some(dir.to_path_buf()),
            ttl_days: 7,
            session_bytes: 1024 * 1024,
            sweep_interval_secs: 3600,
        }
    }

    fn key(text: &str) -> Fingerprint {
        Fingerprint::compute(text, &VoiceSpec::new("piper", None, 1.0))
    }

    fn blob(byte: u8, len: usize) -> AudioBlob {
        AudioBlob::new(vec![byte; len], 44_100)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let Ok(dir) = tempfile::tempdir() else { return };
        let cache = TtsCache::new(&test_config(dir.path()), 44_100);
        cache.put(key("a"), blob(1, 64));
        assert_eq!(cache.get(&key("a")).map(|b| b.byte_len()), Some(64));
    }

    #[tokio::test]
    async fn get_or_compute_installs_the_value() {
        let Ok(dir) = tempfile::tempdir() else { return };
        let cache = TtsCache::new(&test_config(dir.path()), 44_100);
        let produced = cache
            .get_or_compute(key("k"), || async { Ok(blob(2, 32)) })
            .await;
        assert!(produced.is_ok());
        assert_eq!(cache.get(&key("k")).map(|b| b.byte_len()), Some(32));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn single_flight_runs_the_producer_once() {
        let Ok(dir) = tempfile::tempdir() else { return };
        let cache = Arc::new(TtsCache::new(&test_config(dir.path()), 44_100));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_compute(key("shared"), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(blob(5, 100))
                    })
                    .await
            }));
        }

        let mut payloads = Vec::new();
        for task in tasks {
            let result = task.await;
            let Ok(Ok(b)) = result else {
                unreachable!("all callers must share the single result");
            };
            payloads.push(b.data().clone());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(payloads.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn producer_errors_are_not_cached() {
        let Ok(dir) = tempfile::tempdir() else { return };
        let cache = TtsCache::new(&test_config(dir.path()), 44_100);

        let first = cache
            .get_or_compute(key("err"), || async {
                Err(NarrateError::ProcessFailed("boom".into()))
            })
            .await;
        assert!(first.is_err());
        assert!(cache.get(&key("err")).is_none());

        // A later call runs a fresh producer and can succeed.
        let second = cache
            .get_or_compute(key("err"), || async { Ok(blob(1, 8)) })
            .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn session_clear_keeps_l1() {
        let Ok(dir) = tempfile::tempdir() else { return };
        let cache = TtsCache::new(&test_config(dir.path()), 44_100);
        cache.put(key("a"), blob(1, 16));
        cache.clear_session();
        assert!(cache.get(&key("a")).is_some());
        let stats = cache.stats();
        assert_eq!(stats.session_entries, 0);
        assert!(stats.l1_entries >= 1);
    }

    #[tokio::test]
    async fn disk_promotion_after_memory_clear() {
        let Ok(dir) = tempfile::tempdir() else { return };
        let cache = TtsCache::new(&test_config(dir.path()), 44_100);
        cache.put(key("p"), blob(9, 200));
        // Let the spawned write-through land.
        tokio::time::sleep(Duration::from_millis(100)).await;
        cache.clear();
        let got = cache.get(&key("p"));
        assert_eq!(got.map(|b| b.byte_len()), Some(200));
        // Now present in L1 again.
        assert!(cache.stats().l1_entries >= 1);
    }

    #[tokio::test]
    async fn closed_cache_rejects_computation() {
        let Ok(dir) = tempfile::tempdir() else { return };
        let cache = TtsCache::new(&test_config(dir.path()), 44_100);
        cache.close();
        assert!(cache.get(&key("x")).is_none());
        let result = cache.get_or_compute(key("x"), || async { Ok(blob(0, 4)) }).await;
        assert!(matches!(result, Err(NarrateError::Closed("cache"))));
    }

    #[tokio::test]
    async fn stats_count_hits_and_misses() {
        let Ok(dir) = tempfile::tempdir() else { return };
        let cache = TtsCache::new(&test_config(dir.path()), 44_100);
        let _ = cache.get(&key("absent"));
        cache.put(key("present"), blob(1, 8));
        let _ = cache.get(&key("present"));
        let stats = cache.stats();
        assert!(stats.misses >= 1);
        assert!(stats.hits >= 1);
    }
}
