//! PCM audio blobs shared between the cache and the player.

use crate::error::{NarrateError, Result};
use bytes::Bytes;
use std::time::Duration;

/// Bytes per sample for signed 16-bit PCM.
pub const BYTES_PER_SAMPLE: usize = 2;

/// One synthesized sentence: raw interleaved signed 16-bit little-endian
/// samples, mono, headerless, plus the rate they were rendered at.
///
/// The payload is refcounted. The cache holds one reference; the player
/// holds another for the whole duration of playback, so eviction on the
/// cache side can never reclaim bytes the device thread is still reading.
#[derive(Debug, Clone)]
pub struct AudioBlob {
    data: Bytes,
    sample_rate: u32,
}

impl AudioBlob {
    pub fn new(data: impl Into<Bytes>, sample_rate: u32) -> Self {
        Self {
            data: data.into(),
            sample_rate,
        }
    }

    /// Raw PCM payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn sample_count(&self) -> usize {
        self.data.len() / BYTES_PER_SAMPLE
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Playback duration at the blob's own sample rate.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.sample_count() as f64 / f64::from(self.sample_rate))
    }

    /// Check that this blob is playable on a device running at
    /// `device_rate`: matching rate, even byte length, non-empty.
    pub fn check_playable(&self, device_rate: u32) -> Result<()> {
        if self.data.is_empty() {
            return Err(NarrateError::InvalidFormat("empty blob".into()));
        }
        if self.data.len() % BYTES_PER_SAMPLE != 0 {
            return Err(NarrateError::InvalidFormat(format!(
                "odd byte length {} is not 16-bit PCM",
                self.data.len()
            )));
        }
        if self.sample_rate != device_rate {
            return Err(NarrateError::InvalidFormat(format!(
                "blob rate {} does not match device rate {device_rate}",
                self.sample_rate
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_from_sample_count() {
        // 44100 samples of s16le mono at 44.1 kHz is exactly one second.
        let blob = AudioBlob::new(vec![0u8; 44_100 * 2], 44_100);
        assert_eq!(blob.duration(), Duration::from_secs(1));
        assert_eq!(blob.sample_count(), 44_100);
    }

    #[test]
    fn playable_requires_matching_rate() {
        let blob = AudioBlob::new(vec![0u8; 4], 22_050);
        assert!(blob.check_playable(22_050).is_ok());
        assert!(matches!(
            blob.check_playable(44_100),
            Err(NarrateError::InvalidFormat(_))
        ));
    }

    #[test]
    fn playable_rejects_odd_length_and_empty() {
        assert!(AudioBlob::new(vec![0u8; 3], 44_100).check_playable(44_100).is_err());
        assert!(AudioBlob::new(Vec::new(), 44_100).check_playable(44_100).is_err());
    }

    #[test]
    fn clones_share_payload() {
        let blob = AudioBlob::new(vec![1u8; 128], 44_100);
        let other = blob.clone();
        assert_eq!(blob.data().as_ptr(), other.data().as_ptr());
    }
}
