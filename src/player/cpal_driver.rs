//! The cpal playback driver.
//!
//! One process-wide audio context: the underlying library forbids a second
//! context in the same process, so creation is guarded by a claim flag.
//! The driver runs on a dedicated thread because `cpal::Stream` is not
//! `Send`; per-blob streams are built and torn down inside it.

use crate::player::{PlaybackEvent, PlayerHandle, PlayerRequest, PlayerShared};
use crate::blob::AudioBlob;
use crate::error::{NarrateError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

/// The single process-wide device context claim.
static CONTEXT_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Driver poll interval for drain detection and command pickup.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

struct ActivePlayback {
    index: usize,
    drained: Arc<AtomicBool>,
    // Held, not read: the stream keeps the device callback alive and the
    // blob keeps the bytes alive until this struct drops.
    _stream: cpal::Stream,
    _blob: AudioBlob,
}

/// Open the default output device and start the driver thread.
///
/// Fails with [`NarrateError::Device`] when no device is available or a
/// context has already been claimed by this process.
pub fn spawn_cpal_player(
    sample_rate: u32,
    initial_volume: f32,
    event_tx: UnboundedSender<PlaybackEvent>,
) -> Result<PlayerHandle> {
    if CONTEXT_CLAIMED.swap(true, Ordering::SeqCst) {
        return Err(NarrateError::Device(
            "an audio context already exists in this process".into(),
        ));
    }

    let host = cpal::default_host();
    let device = match host.default_output_device() {
        Some(d) => d,
        None => {
            CONTEXT_CLAIMED.store(false, Ordering::SeqCst);
            return Err(NarrateError::Device("no default output device".into()));
        }
    };
    let device_name = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("using output device: {device_name}");

    let stream_config = StreamConfig {
        channels: 1,
        sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let shared = Arc::new(PlayerShared::new(sample_rate, initial_volume));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PlayerRequest>();

    let thread_shared = Arc::clone(&shared);
    let spawned = std::thread::Builder::new()
        .name("narrate-playback".into())
        .spawn(move || {
            run_driver(device, stream_config, thread_shared, cmd_rx, event_tx);
            CONTEXT_CLAIMED.store(false, Ordering::SeqCst);
        });
    if let Err(e) = spawned {
        CONTEXT_CLAIMED.store(false, Ordering::SeqCst);
        return Err(NarrateError::Device(format!(
            "cannot spawn playback thread: {e}"
        )));
    }

    Ok(PlayerHandle::new(cmd_tx, shared))
}

fn run_driver(
    device: cpal::Device,
    stream_config: StreamConfig,
    shared: Arc<PlayerShared>,
    cmd_rx: mpsc::Receiver<PlayerRequest>,
    event_tx: UnboundedSender<PlaybackEvent>,
) {
    let mut current: Option<ActivePlayback> = None;

    loop {
        match cmd_rx.recv_timeout(POLL_INTERVAL) {
            Ok(PlayerRequest::Play { index, blob }) => {
                // Replacing playback releases the previous stream and blob.
                current = None;
                match build_stream(&device, &stream_config, &shared, &blob, &event_tx) {
                    Ok((stream, drained)) => {
                        current = Some(ActivePlayback {
                            index,
                            drained,
                            _stream: stream,
                            _blob: blob,
                        });
                    }
                    Err(e) => {
                        error!("failed to start playback: {e}");
                        shared.reset();
                        let _ = event_tx.send(PlaybackEvent::DeviceError {
                            message: e.to_string(),
                        });
                    }
                }
            }
            Ok(PlayerRequest::Pause) => {
                if let Some(active) = &current
                    && let Err(e) = active._stream.pause()
                {
                    warn!("stream pause failed: {e}");
                }
            }
            Ok(PlayerRequest::Resume) => {
                if let Some(active) = &current
                    && let Err(e) = active._stream.play()
                {
                    warn!("stream resume failed: {e}");
                }
            }
            Ok(PlayerRequest::Stop) => {
                if let Some(active) = current.take() {
                    shared.reset();
                    let _ = event_tx.send(PlaybackEvent::Stopped {
                        index: active.index,
                    });
                }
            }
            Ok(PlayerRequest::Close) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        // Drain detection: the callback raises the flag once every sample
        // has been handed to the device.
        if let Some(active) = &current
            && active.drained.load(Ordering::Acquire)
        {
            let index = active.index;
            current = None;
            shared.finish();
            let _ = event_tx.send(PlaybackEvent::Completed { index });
        }
    }

    // Shutdown releases the stream, the blob, and the device handle.
    drop(current);
    info!("playback driver stopped");
}

fn build_stream(
    device: &cpal::Device,
    stream_config: &StreamConfig,
    shared: &Arc<PlayerShared>,
    blob: &AudioBlob,
    event_tx: &UnboundedSender<PlaybackEvent>,
) -> Result<(cpal::Stream, Arc<AtomicBool>)> {
    let drained = Arc::new(AtomicBool::new(false));
    let drained_cb = Arc::clone(&drained);
    let shared_cb = Arc::clone(shared);
    // The callback owns its own refcount on the payload; cache eviction
    // cannot reclaim these bytes while the stream lives.
    let data = blob.data().clone();
    let mut cursor = 0usize;

    let err_tx = event_tx.clone();
    let stream = device
        .build_output_stream(
            stream_config,
            move |out: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let volume = shared_cb.volume();
                let mut written = 0u64;
                for sample in out.iter_mut() {
                    let byte = cursor * 2;
                    if byte + 1 < data.len() {
                        let value = i16::from_le_bytes([data[byte], data[byte + 1]]);
                        *sample = f32::from(value) / 32_768.0 * volume;
                        cursor += 1;
                        written += 1;
                    } else {
                        *sample = 0.0;
                        drained_cb.store(true, Ordering::Release);
                    }
                }
                if written > 0 {
                    shared_cb.add_submitted(written);
                }
            },
            move |err| {
                error!("audio output stream error: {err}");
                let _ = err_tx.send(PlaybackEvent::DeviceError {
                    message: err.to_string(),
                });
            },
            None,
        )
        .map_err(|e| NarrateError::Device(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| NarrateError::Device(format!("failed to start output stream: {e}")))?;

    Ok((stream, drained))
}
