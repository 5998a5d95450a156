//! Speech engine adapters: one trait, two subprocess back-ends.
//!
//! The engine is chosen once at startup. There is no automatic fallback;
//! a future composite adapter would implement [`SpeechEngine`] and choose
//! at call time without touching the rest of the core.

mod convert;
mod gtts;
mod piper;
mod rate_limit;
mod subprocess;

pub use gtts::GttsEngine;
pub use piper::PiperEngine;
pub use rate_limit::RateLimiter;

use crate::config::{EngineChoice, NarrateConfig};
use crate::error::{NarrateError, Result};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Static facts about an engine, used for enqueue-time rejection and
/// status display.
#[derive(Debug, Clone, Copy)]
pub struct EngineInfo {
    pub name: &'static str,
    pub sample_rate: u32,
    pub max_text_chars: usize,
    pub requires_network: bool,
}

/// Uniform interface over the speech back-ends.
///
/// `synthesize` blocks on subprocess completion; callers run it on a
/// worker thread (`spawn_blocking`), never on the controller. Every call
/// is independent: no call leaves the engine in an unrecoverable state.
pub trait SpeechEngine: Send + Sync {
    /// Turn text into headerless s16le mono PCM at the player's rate.
    fn synthesize(&self, text: &str, speed: f32) -> Result<Bytes>;

    /// Startup self-check: binary present, model accessible, round-trip.
    fn validate(&self) -> Result<()>;

    fn info(&self) -> EngineInfo;

    /// Release resources. Subprocess engines hold none between calls.
    fn close(&self) {}
}

/// Resolve an engine or converter binary: absolute paths are used as-is,
/// bare names go through `PATH`.
pub(crate) fn resolve_binary(name: impl AsRef<Path>) -> Result<PathBuf> {
    let name = name.as_ref();
    if name.is_absolute() {
        if name.is_file() {
            return Ok(name.to_path_buf());
        }
        return Err(NarrateError::EngineUnavailable(format!(
            "{} not found",
            name.display()
        )));
    }
    which::which(name)
        .map_err(|_| NarrateError::EngineUnavailable(format!("{} not found in PATH", name.display())))
}

/// Build the configured engine. The returned adapter has not been
/// validated yet; the controller runs `validate()` during `Start`.
pub fn create_engine(
    choice: EngineChoice,
    config: &NarrateConfig,
    cancel: CancellationToken,
) -> Result<Arc<dyn SpeechEngine>> {
    match choice {
        EngineChoice::Piper => {
            if config.piper.model_path.as_os_str().is_empty() {
                return Err(NarrateError::InvalidConfig(
                    "piper.model_path is required for the piper engine".into(),
                ));
            }
            Ok(Arc::new(PiperEngine::new(
                &config.piper,
                config.sample_rate,
                cancel,
            )))
        }
        EngineChoice::Gtts => Ok(Arc::new(GttsEngine::new(
            &config.gtts,
            config.sample_rate,
            cancel,
        ))),
    }
}
