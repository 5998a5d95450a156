//! Online gtts engine: text-to-MP3 client plus MP3-to-PCM converter,
//! gated by a per-minute rate limiter.

use crate::config::GttsConfig;
use crate::engine::rate_limit::RateLimiter;
use crate::engine::{convert, resolve_binary, subprocess::run_with_stdin, EngineInfo, SpeechEngine};
use crate::error::{NarrateError, Result};
use bytes::Bytes;
use std::ffi::{OsStr, OsString};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// System audio converter used for MP3 decode and time-stretch.
const CONVERTER_BINARY: &str = "ffmpeg";

/// Stderr markers that identify a connectivity failure rather than a bad
/// request.
const NETWORK_MARKERS: &[&str] = &[
    "Failed to connect",
    "Connection",
    "connection",
    "Max retries",
    "urlopen",
    "getaddrinfo",
    "Temporary failure in name resolution",
];

pub struct GttsEngine {
    config: GttsConfig,
    target_rate: u32,
    timeout: Duration,
    limiter: Mutex<RateLimiter>,
    cancel: CancellationToken,
}

impl GttsEngine {
    pub fn new(config: &GttsConfig, target_rate: u32, cancel: CancellationToken) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            limiter: Mutex::new(RateLimiter::new(config.requests_per_minute)),
            config: config.clone(),
            target_rate,
            cancel,
        }
    }

    /// Sleep off the rate limit. The synthesis worker is the only caller,
    /// so waiting here never stalls the controller.
    fn wait_for_token(&self) -> Result<()> {
        loop {
            let wait = {
                let mut limiter = match self.limiter.lock() {
                    Ok(l) => l,
                    Err(poisoned) => poisoned.into_inner(),
                };
                limiter.try_acquire()
            };
            match wait {
                Ok(()) => return Ok(()),
                Err(retry_after) => {
                    if self.cancel.is_cancelled() {
                        return Err(NarrateError::Cancelled);
                    }
                    debug!("rate limited, waiting {retry_after:?}");
                    std::thread::sleep(retry_after.min(Duration::from_secs(1)));
                }
            }
        }
    }

    fn classify(error: NarrateError) -> NarrateError {
        if let NarrateError::ProcessFailed(ref msg) = error
            && NETWORK_MARKERS.iter().any(|m| msg.contains(m))
        {
            return NarrateError::Network(msg.clone());
        }
        error
    }
}

impl SpeechEngine for GttsEngine {
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
        let converter = resolve_binary(CONVERTER_BINARY)?;
        self.wait_for_token()?;

        // Stage 1: text (on stdin, "-") to MP3 on stdout.
        let args: Vec<OsString> = vec!["--lang".into(), self.config.language.clone().into(), "-".into()];
        let arg_refs: Vec<&OsStr> = args.iter().map(OsString::as_os_str).collect();
        let out = run_with_stdin(
            &binary,
            &arg_refs,
            text.as_bytes(),
            self.timeout,
            self.config.max_output_bytes,
            &self.cancel,
        )
        .map_err(Self::classify)?;
        if out.stdout.is_empty() {
            return Err(NarrateError::ProcessFailed(format!(
                "gtts produced no audio: {}",
                out.stderr.trim()
            )));
        }

        // Stage 2: MP3 to PCM at the player rate, applying the
        // time-stretch (gtts itself has no speed parameter).
        let pcm = convert::mp3_to_pcm(
            &converter,
            &out.stdout,
            self.target_rate,
            speed.clamp(convert::MIN_TEMPO, convert::MAX_TEMPO),
            self.timeout,
            self.config.max_output_bytes,
            &self.cancel,
        )?;

        debug!(chars = text.chars().count(), bytes = pcm.len(), "gtts synthesis complete");
        Ok(Bytes::from(pcm))
    }

    fn validate(&self) -> Result<()> {
        let binary = resolve_binary(&self.config.binary)?;
        resolve_binary(CONVERTER_BINARY)?;

        // Round-trip self-check; also proves connectivity.
        let sample = self
            .synthesize("Ready.", 1.0)
            .map_err(|e| NarrateError::EngineUnavailable(format!("gtts round-trip failed: {e}")))?;
        if sample.is_empty() {
            return Err(NarrateError::EngineUnavailable(
                "gtts round-trip produced no audio".into(),
            ));
        }
        info!("gtts validated ({}, lang={})", binary.display(), self.config.language);
        Ok(())
    }

    fn info(&self) -> EngineInfo {
        EngineInfo {
            name: "gtts",
            sample_rate: self.target_rate,
            max_text_chars: self.config.max_text_chars,
            requires_network: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> GttsEngine {
        let config = GttsConfig {
            binary: "definitely-not-a-real-gtts".to_owned(),
            ..GttsConfig::default()
        };
        GttsEngine::new(&config, 44_100, CancellationToken::new())
    }

    #[test]
    fn empty_text_is_rejected() {
        assert!(matches!(
            engine().synthesize("", 1.0),
            Err(NarrateError::Rejected(_))
        ));
    }

    #[test]
    fn oversize_text_is_rejected() {
        let long = "word ".repeat(2000);
        assert!(matches!(
            engine().synthesize(&long, 1.0),
            Err(NarrateError::Rejected(_))
        ));
    }

    #[test]
    fn missing_binary_fails_validation() {
        assert!(matches!(
            engine().validate(),
            Err(NarrateError::EngineUnavailable(_))
        ));
    }

    #[test]
    fn connection_failures_classify_as_network_errors() {
        let classified = GttsEngine::classify(NarrateError::ProcessFailed(
            "gtts-cli exited with code 1: Failed to connect to translate host".into(),
        ));
        assert!(matches!(classified, NarrateError::Network(_)));

        let untouched = GttsEngine::classify(NarrateError::ProcessFailed("bad flag".into()));
        assert!(matches!(untouched, NarrateError::ProcessFailed(_)));
    }

    #[test]
    fn info_reports_online_engine() {
        let info = engine().info();
        assert_eq!(info.name, "gtts");
        assert!(info.requires_network);
        assert_eq!(info.max_text_chars, 5_000);
    }
}
