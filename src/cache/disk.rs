//! On-disk cache tier: one compressed file per fingerprint.
//!
//! Files are named `<64-hex>.bin`; the directory listing is the index.
//! Writes land in a temp file in the same directory and are atomically
//! renamed, so a crash mid-write never corrupts other entries.

use crate::blob::AudioBlob;
use crate::cache::key::Fingerprint;
use crate::error::{NarrateError, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Filename of the optional sweeper manifest. Readers tolerate its absence.
const MANIFEST_FILE: &str = "manifest.json";

/// Outcome of one sweep pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub removed_expired: usize,
    pub removed_for_capacity: usize,
    pub remaining_bytes: u64,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Manifest {
    last_swept_at: chrono::DateTime<chrono::Utc>,
}

pub struct DiskTier {
    dir: PathBuf,
    capacity_bytes: u64,
    ttl: Duration,
    sample_rate: u32,
}

impl DiskTier {
    pub fn new(dir: PathBuf, capacity_bytes: u64, ttl: Duration, sample_rate: u32) -> Result<Self> {
        fs::create_dir_all(&dir)
            .map_err(|e| NarrateError::CacheIo(format!("cannot create {}: {e}", dir.display())))?;
        Ok(Self {
            dir,
            capacity_bytes,
            ttl,
            sample_rate,
        })
    }

    fn entry_path(&self, key: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{}.bin", key.to_hex()))
    }

    /// Read and decompress an entry. A corrupt entry is deleted and
    /// reported as a miss.
    pub fn get(&self, key: &Fingerprint) -> Option<AudioBlob> {
        let path = self.entry_path(key);
        let compressed = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("disk cache read failed for {}: {e}", path.display());
                return None;
            }
        };

        let mut pcm = Vec::new();
        match ZlibDecoder::new(compressed.as_slice()).read_to_end(&mut pcm) {
            Ok(_) if !pcm.is_empty() => Some(AudioBlob::new(pcm, self.sample_rate)),
            _ => {
                warn!("corrupt disk cache entry {}, deleting", path.display());
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    /// Compress and atomically install an entry. Idempotent: an existing
    /// entry is left alone.
    pub fn put(&self, key: &Fingerprint, blob: &AudioBlob) -> Result<()> {
        let path = self.entry_path(key);
        if path.exists() {
            return Ok(());
        }

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| NarrateError::CacheIo(format!("temp file: {e}")))?;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(blob.data())
            .and_then(|()| encoder.finish())
            .map_err(|e| NarrateError::CacheIo(format!("compress: {e}")))
            .and_then(|compressed| {
                tmp.write_all(&compressed)
                    .map_err(|e| NarrateError::CacheIo(format!("write: {e}")))
            })?;
        tmp.persist(&path)
            .map_err(|e| NarrateError::CacheIo(format!("rename into {}: {e}", path.display())))?;
        debug!(key = %key, bytes = blob.byte_len(), "disk cache write-through");
        Ok(())
    }

    /// Remove expired entries, then re-enforce the byte capacity by the
    /// same `age × size` scoring rule used in memory (hit counts are not
    /// tracked on disk). Writes the sweep manifest afterwards.
    pub fn sweep(&self) -> Result<SweepStats> {
        let now = SystemTime::now();
        let mut stats = SweepStats::default();
        let mut live: Vec<(PathBuf, u64, Duration)> = Vec::new();

        let entries = fs::read_dir(&self.dir)
            .map_err(|e| NarrateError::CacheIo(format!("list {}: {e}", self.dir.display())))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();

            if age > self.ttl {
                if fs::remove_file(&path).is_ok() {
                    stats.removed_expired += 1;
                }
                continue;
            }
            live.push((path, meta.len(), age));
        }

        let mut total: u64 = live.iter().map(|(_, size, _)| size).sum();
        if total > self.capacity_bytes {
            live.sort_by(|a, b| {
                let score_a = a.2.as_secs_f64() * a.1 as f64;
                let score_b = b.2.as_secs_f64() * b.1 as f64;
                score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
            });
            for (path, size, _) in &live {
                if total <= self.capacity_bytes {
                    break;
                }
                if fs::remove_file(path).is_ok() {
                    total -= size;
                    stats.removed_for_capacity += 1;
                }
            }
        }
        stats.remaining_bytes = total;

        self.write_manifest();
        info!(
            expired = stats.removed_expired,
            capacity = stats.removed_for_capacity,
            remaining_bytes = stats.remaining_bytes,
            "disk cache sweep complete"
        );
        Ok(stats)
    }

    fn write_manifest(&self) {
        let manifest = Manifest {
            last_swept_at: chrono::Utc::now(),
        };
        if let Ok(json) = serde_json::to_vec_pretty(&manifest) {
            let _ = fs::write(self.dir.join(MANIFEST_FILE), json);
        }
    }

    /// Current `(entries, bytes)` usage from the directory listing.
    pub fn usage(&self) -> (usize, u64) {
        let mut count = 0usize;
        let mut bytes = 0u64;
        if let Ok(entries) = fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                if entry.path().extension().and_then(|e| e.to_str()) == Some("bin")
                    && let Ok(meta) = entry.metadata()
                {
                    count += 1;
                    bytes += meta.len();
                }
            }
        }
        (count, bytes)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::VoiceSpec;

    fn key(text: &str) -> Fingerprint {
        Fingerprint::compute(text, &VoiceSpec::new("piper", None, 1.0))
    }

    fn tier(dir: &Path, capacity: u64) -> DiskTier {
        match DiskTier::new(dir.to_path_buf(), capacity, Duration::from_secs(7 * 86_400), 44_100) {
            Ok(t) => t,
            Err(e) => unreachable!("tier init failed: {e}"),
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().map_err(|e| e.to_string());
        let Ok(dir) = dir else { return };
        let tier = tier(dir.path(), 1024 * 1024);

        let blob = AudioBlob::new(vec![7u8; 500], 44_100);
        assert!(tier.put(&key("a"), &blob).is_ok());
        let got = tier.get(&key("a"));
        assert_eq!(got.as_ref().map(|b| b.byte_len()), Some(500));
        assert_eq!(got.map(|b| b.data()[0]), Some(7));
    }

    #[test]
    fn entries_are_named_by_hex_fingerprint() {
        let Ok(dir) = tempfile::tempdir() else { return };
        let tier = tier(dir.path(), 1024 * 1024);
        let k = key("named");
        let _ = tier.put(&k, &AudioBlob::new(vec![0u8; 16], 44_100));
        assert!(dir.path().join(format!("{}.bin", k.to_hex())).exists());
    }

    #[test]
    fn corrupt_entry_is_deleted_on_read() {
        let Ok(dir) = tempfile::tempdir() else { return };
        let tier = tier(dir.path(), 1024 * 1024);
        let k = key("corrupt");
        let path = dir.path().join(format!("{}.bin", k.to_hex()));
        let _ = fs::write(&path, b"this is not zlib");
        assert!(tier.get(&k).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn sweep_enforces_capacity() {
        let Ok(dir) = tempfile::tempdir() else { return };
        let tier = tier(dir.path(), 600);
        // Compressed zero-filled blobs are tiny; use incompressible data.
        for (i, text) in ["a", "b", "c", "d"].iter().enumerate() {
            let data: Vec<u8> = (0..400u32).map(|j| (j as u8).wrapping_mul(i as u8 + 3)).collect();
            let _ = tier.put(&key(text), &AudioBlob::new(data, 44_100));
        }
        let stats = match tier.sweep() {
            Ok(s) => s,
            Err(e) => unreachable!("sweep failed: {e}"),
        };
        assert!(stats.remaining_bytes <= 600);
        let (_, bytes) = tier.usage();
        assert!(bytes <= 600);
    }

    #[test]
    fn sweep_writes_a_manifest() {
        let Ok(dir) = tempfile::tempdir() else { return };
        let tier = tier(dir.path(), 1024);
        let _ = tier.sweep();
        let manifest = fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap_or_default();
        assert!(manifest.contains("last_swept_at"));
    }

    #[test]
    fn expired_entries_are_removed() {
        let Ok(dir) = tempfile::tempdir() else { return };
        let tier = DiskTier::new(dir.path().to_path_buf(), 1024 * 1024, Duration::ZERO, 44_100);
        let Ok(tier) = tier else { return };
        let _ = tier.put(&key("old"), &AudioBlob::new(vec![1u8; 64], 44_100));
        std::thread::sleep(Duration::from_millis(20));
        let stats = match tier.sweep() {
            Ok(s) => s,
            Err(e) => unreachable!("sweep failed: {e}"),
        };
        assert_eq!(stats.removed_expired, 1);
        assert!(tier.get(&key("old")).is_none());
    }

    #[test]
    fn put_is_idempotent() {
        let Ok(dir) = tempfile::tempdir() else { return };
        let tier = tier(dir.path(), 1024 * 1024);
        let blob = AudioBlob::new(vec![3u8; 100], 44_100);
        assert!(tier.put(&key("same"), &blob).is_ok());
        assert!(tier.put(&key("same"), &blob).is_ok());
        let (count, _) = tier.usage();
        assert_eq!(count, 1);
    }
}
