//! Audio playback: a driver thread owns the device; the rest of the core
//! talks to it through a [`PlayerHandle`].
//!
//! The driver retains the current blob (and the stream callback its own
//! refcounted clone) for the entire playback. `stop`, `close`, and the
//! next `play` are the only release points, which is what keeps eviction
//! on the cache side from ever starving the device thread.

mod cpal_driver;
mod null;

pub use cpal_driver::spawn_cpal_player;
pub use null::spawn_null_player;

use crate::blob::AudioBlob;
use crate::error::{NarrateError, Result};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// Requests processed by the driver thread.
pub enum PlayerRequest {
    /// Replace any in-flight playback with this blob.
    Play { index: usize, blob: AudioBlob },
    Pause,
    Resume,
    Stop,
    Close,
}

/// Events emitted by the driver thread.
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    /// The blob for `index` was fully submitted and drained.
    Completed { index: usize },
    /// Playback of `index` was cancelled before draining.
    Stopped { index: usize },
    /// The device hard-faulted. Fatal for the session.
    DeviceError { message: String },
}

/// Playback state shared between the handle, the driver, and the stream
/// callback. Position is derived from the submitted-sample count, so it is
/// monotonic while playing and frozen while paused.
pub struct PlayerShared {
    sample_rate: u32,
    playing: AtomicBool,
    paused: AtomicBool,
    submitted_samples: AtomicU64,
    total_samples: AtomicU64,
    volume_bits: AtomicU32,
}

impl PlayerShared {
    pub fn new(sample_rate: u32, volume: f32) -> Self {
        Self {
            sample_rate,
            playing: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            submitted_samples: AtomicU64::new(0),
            total_samples: AtomicU64::new(0),
            volume_bits: AtomicU32::new(volume.clamp(0.0, 1.0).to_bits()),
        }
    }

    pub(crate) fn begin(&self, total_samples: u64) {
        self.submitted_samples.store(0, Ordering::Release);
        self.total_samples.store(total_samples, Ordering::Release);
        self.paused.store(false, Ordering::Release);
        self.playing.store(true, Ordering::Release);
    }

    pub(crate) fn add_submitted(&self, samples: u64) {
        self.submitted_samples.fetch_add(samples, Ordering::AcqRel);
    }

    pub(crate) fn finish(&self) {
        let total = self.total_samples.load(Ordering::Acquire);
        self.submitted_samples.store(total, Ordering::Release);
        self.paused.store(false, Ordering::Release);
        self.playing.store(false, Ordering::Release);
    }

    pub(crate) fn reset(&self) {
        self.submitted_samples.store(0, Ordering::Release);
        self.total_samples.store(0, Ordering::Release);
        self.paused.store(false, Ordering::Release);
        self.playing.store(false, Ordering::Release);
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Acquire))
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Release);
    }

    pub fn position(&self) -> Duration {
        let submitted = self.submitted_samples.load(Ordering::Acquire);
        Duration::from_secs_f64(submitted as f64 / f64::from(self.sample_rate))
    }

    pub fn duration(&self) -> Duration {
        let total = self.total_samples.load(Ordering::Acquire);
        Duration::from_secs_f64(total as f64 / f64::from(self.sample_rate))
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire) && !self.paused.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.playing.load(Ordering::Acquire) && self.paused.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Handle through which the controller drives playback. Sends never block;
/// state misuse is rejected here without reaching the driver.
#[derive(Clone)]
pub struct PlayerHandle {
    cmd_tx: mpsc::Sender<PlayerRequest>,
    shared: Arc<PlayerShared>,
}

impl PlayerHandle {
    pub(crate) fn new(cmd_tx: mpsc::Sender<PlayerRequest>, shared: Arc<PlayerShared>) -> Self {
        Self { cmd_tx, shared }
    }

    fn send(&self, request: PlayerRequest) -> Result<()> {
        self.cmd_tx
            .send(request)
            .map_err(|_| NarrateError::Closed("player"))
    }

    /// Start playing a blob, replacing any in-flight playback. The blob is
    /// validated against the device rate before it crosses the thread
    /// boundary.
    pub fn play(&self, index: usize, blob: AudioBlob) -> Result<()> {
        blob.check_playable(self.shared.sample_rate)?;
        self.shared.begin(blob.sample_count() as u64);
        self.send(PlayerRequest::Play { index, blob })
    }

    pub fn pause(&self) -> Result<()> {
        if !self.shared.playing.load(Ordering::Acquire) {
            return Err(NarrateError::State("pause while not playing".into()));
        }
        if self.shared.paused.load(Ordering::Acquire) {
            return Err(NarrateError::State("already paused".into()));
        }
        self.shared.set_paused(true);
        self.send(PlayerRequest::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        if !self.shared.is_paused() {
            return Err(NarrateError::State("resume while not paused".into()));
        }
        self.shared.set_paused(false);
        self.send(PlayerRequest::Resume)
    }

    /// Stop and release the current blob. Valid in any state.
    pub fn stop(&self) -> Result<()> {
        self.send(PlayerRequest::Stop)
    }

    /// Volume in [0, 1]; visible to the next submitted frame.
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(NarrateError::State(format!("volume {volume} outside 0.0–1.0")));
        }
        self.shared.set_volume(volume);
        Ok(())
    }

    pub fn position(&self) -> Duration {
        self.shared.position()
    }

    pub fn duration(&self) -> Duration {
        self.shared.duration()
    }

    pub fn is_playing(&self) -> bool {
        self.shared.is_playing()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    pub fn close(&self) {
        let _ = self.cmd_tx.send(PlayerRequest::Close);
    }

    pub(crate) fn shared(&self) -> &Arc<PlayerShared> {
        &self.shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_is_clamped_and_atomic() {
        let shared = PlayerShared::new(44_100, 0.8);
        assert!((shared.volume() - 0.8).abs() < 1e-6);
        shared.set_volume(1.5);
        assert!((shared.volume() - 1.0).abs() < 1e-6);
        shared.set_volume(-0.3);
        assert!(shared.volume().abs() < 1e-6);
    }

    #[test]
    fn position_tracks_submitted_samples() {
        let shared = PlayerShared::new(44_100, 1.0);
        shared.begin(44_100);
        shared.add_submitted(22_050);
        let pos = shared.position();
        assert!((pos.as_secs_f64() - 0.5).abs() < 1e-6);
        assert_eq!(shared.duration(), Duration::from_secs(1));
    }

    #[test]
    fn finish_pins_position_to_duration() {
        let shared = PlayerShared::new(44_100, 1.0);
        shared.begin(1000);
        shared.add_submitted(400);
        shared.finish();
        assert_eq!(shared.position(), shared.duration());
        assert!(!shared.is_playing());
    }

    #[test]
    fn pause_freezes_the_playing_flag() {
        let shared = PlayerShared::new(44_100, 1.0);
        shared.begin(1000);
        assert!(shared.is_playing());
        shared.set_paused(true);
        assert!(!shared.is_playing());
        assert!(shared.is_paused());
    }
}
