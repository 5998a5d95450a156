//! Audio format conversion through the system converter (ffmpeg).
//!
//! Both helpers follow the pre-populated-stdin subprocess discipline:
//! input audio is staged in a temp file before the converter starts.

use crate::engine::subprocess::run_with_stdin;
use crate::error::{NarrateError, Result};
use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Time-stretch bounds accepted by the converter's `atempo` filter.
pub const MIN_TEMPO: f32 = 0.5;
pub const MAX_TEMPO: f32 = 2.0;

/// Decode MP3 bytes to headerless s16le mono PCM at `rate`, applying a
/// time-stretch when `tempo` is not 1.0. Tempo is clamped to [0.5, 2.0].
pub fn mp3_to_pcm(
    converter: &Path,
    mp3: &[u8],
    rate: u32,
    tempo: f32,
    timeout: Duration,
    max_output_bytes: usize,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let mut args: Vec<OsString> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        "mp3".into(),
        "-i".into(),
        "pipe:0".into(),
    ];
    let tempo = tempo.clamp(MIN_TEMPO, MAX_TEMPO);
    if (tempo - 1.0).abs() > f32::EPSILON {
        args.push("-filter:a".into());
        args.push(format!("atempo={tempo}").into());
    }
    args.extend([
        OsString::from("-f"),
        "s16le".into(),
        "-acodec".into(),
        "pcm_s16le".into(),
        "-ac".into(),
        "1".into(),
        "-ar".into(),
        rate.to_string().into(),
        "pipe:1".into(),
    ]);

    let arg_refs: Vec<&OsStr> = args.iter().map(OsString::as_os_str).collect();
    let out = run_with_stdin(converter, &arg_refs, mp3, timeout, max_output_bytes, cancel)?;
    if out.stdout.is_empty() {
        return Err(NarrateError::ProcessFailed(format!(
            "converter produced no audio: {}",
            out.stderr.trim()
        )));
    }
    Ok(out.stdout)
}

/// Resample headerless s16le mono PCM from `from_rate` to `to_rate`.
pub fn resample_pcm(
    converter: &Path,
    pcm: &[u8],
    from_rate: u32,
    to_rate: u32,
    timeout: Duration,
    max_output_bytes: usize,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    if from_rate == to_rate {
        return Ok(pcm.to_vec());
    }

    let args: Vec<OsString> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        "s16le".into(),
        "-ac".into(),
        "1".into(),
        "-ar".into(),
        from_rate.to_string().into(),
        "-i".into(),
        "pipe:0".into(),
        "-f".into(),
        "s16le".into(),
        "-acodec".into(),
        "pcm_s16le".into(),
        "-ac".into(),
        "1".into(),
        "-ar".into(),
        to_rate.to_string().into(),
        "pipe:1".into(),
    ];

    let arg_refs: Vec<&OsStr> = args.iter().map(OsString::as_os_str).collect();
    let out = run_with_stdin(converter, &arg_refs, pcm, timeout, max_output_bytes, cancel)?;
    if out.stdout.is_empty() {
        return Err(NarrateError::ProcessFailed(format!(
            "resampler produced no audio: {}",
            out.stderr.trim()
        )));
    }
    Ok(out.stdout)
}
