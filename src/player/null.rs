//! Headless playback driver.
//!
//! Identical channel contract to the cpal driver, no audio device:
//! playback advances on a timer at many times real speed and completion
//! events fire once the simulated cursor drains. Used by the test suites
//! and by `--no-audio` host runs.

use crate::player::{PlaybackEvent, PlayerHandle, PlayerRequest, PlayerShared};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

/// Driver tick.
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Simulated playback speed relative to real time. Long blobs still take
/// proportionally longer, so tests can navigate mid-playback.
const SIM_SPEEDUP: u64 = 10;

struct SimPlayback {
    index: usize,
    total: u64,
    submitted: u64,
}

/// Start the headless driver thread.
pub fn spawn_null_player(
    sample_rate: u32,
    initial_volume: f32,
    event_tx: UnboundedSender<PlaybackEvent>,
) -> PlayerHandle {
    let shared = Arc::new(PlayerShared::new(sample_rate, initial_volume));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PlayerRequest>();

    let thread_shared = Arc::clone(&shared);
    let _ = std::thread::Builder::new()
        .name("narrate-null-playback".into())
        .spawn(move || run_driver(thread_shared, cmd_rx, event_tx));

    PlayerHandle::new(cmd_tx, shared)
}

fn run_driver(
    shared: Arc<PlayerShared>,
    cmd_rx: mpsc::Receiver<PlayerRequest>,
    event_tx: UnboundedSender<PlaybackEvent>,
) {
    let mut current: Option<SimPlayback> = None;
    let mut paused = false;

    loop {
        match cmd_rx.recv_timeout(POLL_INTERVAL) {
            Ok(PlayerRequest::Play { index, blob }) => {
                paused = false;
                current = Some(SimPlayback {
                    index,
                    total: blob.sample_count() as u64,
                    submitted: 0,
                });
            }
            Ok(PlayerRequest::Pause) => paused = true,
            Ok(PlayerRequest::Resume) => paused = false,
            Ok(PlayerRequest::Stop) => {
                if let Some(sim) = current.take() {
                    shared.reset();
                    let _ = event_tx.send(PlaybackEvent::Stopped { index: sim.index });
                }
            }
            Ok(PlayerRequest::Close) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        if paused {
            continue;
        }
        if let Some(sim) = &mut current {
            let per_tick = u64::from(shared.sample_rate()) * SIM_SPEEDUP
                * POLL_INTERVAL.as_millis() as u64
                / 1000;
            let advance = per_tick.max(1).min(sim.total - sim.submitted);
            sim.submitted += advance;
            shared.add_submitted(advance);
            if sim.submitted >= sim.total {
                let index = sim.index;
                current = None;
                shared.finish();
                let _ = event_tx.send(PlaybackEvent::Completed { index });
            }
        }
    }

    info!("null playback driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::AudioBlob;

    fn blob(samples: usize) -> AudioBlob {
        AudioBlob::new(vec![0u8; samples * 2], 44_100)
    }

    #[tokio::test]
    async fn play_emits_completed() {
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
        let player = spawn_null_player(44_100, 1.0, event_tx);
        assert!(player.play(3, blob(1000)).is_ok());

        let event = tokio::time::timeout(Duration::from_secs(2), event_rx.recv()).await;
        assert!(matches!(event, Ok(Some(PlaybackEvent::Completed { index: 3 }))));
        assert!(!player.is_playing());
        player.close();
    }

    #[tokio::test]
    async fn stop_emits_stopped_not_completed() {
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
        let player = spawn_null_player(44_100, 1.0, event_tx);
        // Large blob so the stop lands before the simulated drain.
        assert!(player.play(0, blob(44_100 * 60)).is_ok());
        assert!(player.stop().is_ok());

        let event = tokio::time::timeout(Duration::from_secs(2), event_rx.recv()).await;
        assert!(matches!(event, Ok(Some(PlaybackEvent::Stopped { index: 0 }))));
        player.close();
    }

    #[tokio::test]
    async fn position_is_monotonic_while_playing() {
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
        let player = spawn_null_player(44_100, 1.0, event_tx);
        assert!(player.play(0, blob(44_100)).is_ok());

        let mut last = Duration::ZERO;
        for _ in 0..20 {
            let pos = player.position();
            assert!(pos >= last, "position went backwards: {pos:?} < {last:?}");
            last = pos;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let _ = tokio::time::timeout(Duration::from_secs(2), event_rx.recv()).await;
        player.close();
    }

    #[tokio::test]
    async fn pause_rejects_state_misuse() {
        let (event_tx, _event_rx) = tokio::sync::mpsc::unbounded_channel();
        let player = spawn_null_player(44_100, 1.0, event_tx);
        // Nothing playing yet.
        assert!(player.pause().is_err());
        assert!(player.resume().is_err());
        player.close();
    }

    #[tokio::test]
    async fn rejects_wrong_rate_blob() {
        let (event_tx, _event_rx) = tokio::sync::mpsc::unbounded_channel();
        let player = spawn_null_player(44_100, 1.0, event_tx);
        let wrong = AudioBlob::new(vec![0u8; 128], 22_050);
        assert!(player.play(0, wrong).is_err());
        player.close();
    }
}
