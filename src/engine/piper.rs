//! Local piper engine: one subprocess per synthesis request.
//!
//! Spawn cost (~100 ms) is traded for reliability and amortized by the
//! cache; there is no process pool and no recycling.

use crate::config::PiperConfig;
use crate::engine::{convert, resolve_binary, subprocess::run_with_stdin, EngineInfo, SpeechEngine};
use crate::error::{NarrateError, Result};
use bytes::Bytes;
use std::ffi::{OsStr, OsString};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// System audio converter used for resampling.
const CONVERTER_BINARY: &str = "ffmpeg";

pub struct PiperEngine {
    config: PiperConfig,
    target_rate: u32,
    timeout: Duration,
    cancel: CancellationToken,
}

impl PiperEngine {
    pub fn new(config: &PiperConfig, target_rate: u32, cancel: CancellationToken) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            config: config.clone(),
            target_rate,
            cancel,
        }
    }

    fn build_args(&self, speed: f32) -> Vec<OsString> {
        // piper's length-scale stretches phoneme durations; speech at 2×
        // speed means a scale of 0.5.
        let length_scale = 1.0 / speed.clamp(0.5, 2.0);
        let mut args: Vec<OsString> = vec![
            "--model".into(),
            self.config.model_path.clone().into_os_string(),
            "--output-raw".into(),
            "--length-scale".into(),
            format!("{length_scale:.3}").into(),
        ];
        if let Some(ref voice) = self.config.voice {
            args.push("--speaker".into());
            args.push(voice.into());
        }
        args
    }
}

impl SpeechEngine for PiperEngine {
    fn synthesize(&self, text: &str, speed: f32) -> Result<Bytes> {
        let text = text.trim();
        if text.is_empty() {
            return Err(NarrateError::Rejected("empty text".into()));
        }
        if text.chars().count() > self.config.max_text_chars {
            return Err(NarrateError::Rejected(format!(
                "text exceeds {} character limit",
                self.config.max_text_chars
            )));
        }

        let binary = resolve_binary(&self.config.binary)?;
        let args = self.build_args(speed);
        let arg_refs: Vec<&OsStr> = args.iter().map(OsString::as_os_str).collect();

        // piper consumes one line of text from stdin and exits.
        let mut payload = text.replace(['\r', '\n'], " ");
        payload.push('\n');

        let out = run_with_stdin(
            &binary,
            &arg_refs,
            payload.as_bytes(),
            self.timeout,
            self.config.max_output_bytes,
            &self.cancel,
        )?;
        if out.stdout.is_empty() {
            return Err(NarrateError::ProcessFailed(format!(
                "piper produced no audio: {}",
                out.stderr.trim()
            )));
        }

        let pcm = if self.config.native_sample_rate == self.target_rate {
            out.stdout
        } else {
            let converter = resolve_binary(CONVERTER_BINARY)?;
            convert::resample_pcm(
                &converter,
                &out.stdout,
                self.config.native_sample_rate,
                self.target_rate,
                self.timeout,
                self.config.max_output_bytes,
                &self.cancel,
            )?
        };

        debug!(chars = text.chars().count(), bytes = pcm.len(), "piper synthesis complete");
        Ok(Bytes::from(pcm))
    }

    fn validate(&self) -> Result<()> {
        let binary = resolve_binary(&self.config.binary)?;
        if !self.config.model_path.is_file() {
            return Err(NarrateError::InvalidConfig(format!(
                "piper model not found at {}",
                self.config.model_path.display()
            )));
        }
        if self.config.native_sample_rate != self.target_rate {
            resolve_binary(CONVERTER_BINARY)?;
        }

        // Round-trip self-check: a short phrase must come back as audio.
        let sample = self.synthesize("Ready.", 1.0)?;
        if sample.is_empty() {
            return Err(NarrateError::EngineUnavailable(
                "piper round-trip produced no audio".into(),
            ));
        }
        info!("piper validated ({} at {})", binary.display(), self.config.model_path.display());
        Ok(())
    }

    fn info(&self) -> EngineInfo {
        EngineInfo {
            name: "piper",
            sample_rate: self.target_rate,
            max_text_chars: self.config.max_text_chars,
            requires_network: false,
        }
    }
}
