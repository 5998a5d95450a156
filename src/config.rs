//! Configuration types for the narration core.

use crate::error::{NarrateError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Fixed palette accepted for `highlight_color`. The color is a UI concern;
/// the core only validates the name.
pub const HIGHLIGHT_PALETTE: &[&str] = &[
    "yellow", "cyan", "magenta", "green", "blue", "red", "white",
];

/// Which speech engine drives synthesis. Chosen once at startup; there is
/// no automatic fallback between engines.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineChoice {
    /// Local piper subprocess (model file on disk, no network).
    #[default]
    Piper,
    /// Online gtts subprocess chain (network required).
    #[serde(alias = "google")]
    Gtts,
}

impl EngineChoice {
    /// Engine name as used in cache fingerprints and log lines.
    pub fn name(self) -> &'static str {
        match self {
            Self::Piper => "piper",
            Self::Gtts => "gtts",
        }
    }

    /// Parse a user-supplied engine name. `google` is accepted as an alias
    /// for `gtts`.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "piper" => Ok(Self::Piper),
            "gtts" | "google" => Ok(Self::Gtts),
            other => Err(NarrateError::Config(format!(
                "unknown engine '{other}' (valid choices: piper, gtts)"
            ))),
        }
    }
}

impl std::fmt::Display for EngineChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Top-level configuration for the narration core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrateConfig {
    /// Which engine to use. Required; the core is not instantiated without it.
    pub engine: EngineChoice,
    /// Output PCM rate in Hz. Permitted: 44100, 48000.
    pub sample_rate: u32,
    /// Playback volume, 0.0–1.0.
    pub volume: f32,
    /// Look-ahead depth: how many upcoming sentences to keep cached or in
    /// synthesis while playing. 1–10.
    pub buffer_size: usize,
    /// Highlight color name for the UI. Validated against the fixed palette.
    pub highlight_color: String,
    /// Local engine settings.
    pub piper: PiperConfig,
    /// Online engine settings.
    pub gtts: GttsConfig,
    /// Cache tier settings.
    pub cache: CacheConfig,
    /// Synthesis queue settings.
    pub queue: QueueConfig,
}

impl NarrateConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| NarrateError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&contents)
            .map_err(|e| NarrateError::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// Validate option values and cross-field requirements.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.sample_rate, 44_100 | 48_000) {
            return Err(NarrateError::Config(format!(
                "sample_rate {} not permitted (44100 or 48000)",
                self.sample_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(NarrateError::Config(format!(
                "volume {} outside 0.0–1.0",
                self.volume
            )));
        }
        if !(1..=10).contains(&self.buffer_size) {
            return Err(NarrateError::Config(format!(
                "buffer_size {} outside 1–10",
                self.buffer_size
            )));
        }
        if !HIGHLIGHT_PALETTE.contains(&self.highlight_color.as_str()) {
            return Err(NarrateError::Config(format!(
                "highlight_color '{}' not in palette {HIGHLIGHT_PALETTE:?}",
                self.highlight_color
            )));
        }
        if self.engine == EngineChoice::Piper && self.piper.model_path.as_os_str().is_empty() {
            return Err(NarrateError::Config(
                "piper.model_path is required when engine is piper".into(),
            ));
        }
        Ok(())
    }
}

/// Local piper engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PiperConfig {
    /// Path to the voice model (.onnx). Required when the engine is piper.
    pub model_path: PathBuf,
    /// Optional speaker id within a multi-speaker model.
    pub voice: Option<String>,
    /// Binary name or path; resolved through `PATH` when not absolute.
    pub binary: String,
    /// Sample rate the model renders at. Resampled to `sample_rate` when
    /// they differ.
    pub native_sample_rate: u32,
    /// Hard per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Sanity cap on subprocess output size in bytes.
    pub max_output_bytes: usize,
    /// Longest text accepted for a single request, in characters.
    pub max_text_chars: usize,
}

impl Default for PiperConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            voice: None,
            binary: "piper".to_owned(),
            native_sample_rate: 22_050,
            timeout_secs: 10,
            max_output_bytes: 10 * 1024 * 1024,
            max_text_chars: 10_000,
        }
    }
}

/// Online gtts engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GttsConfig {
    /// ISO language code passed to the service.
    pub language: String,
    /// Token-bucket size: requests allowed per minute.
    pub requests_per_minute: u32,
    /// Binary name or path of the text-to-MP3 client.
    pub binary: String,
    /// Hard cap on request text length, in characters.
    pub max_text_chars: usize,
    /// Hard per-request timeout in seconds (applies to each subprocess in
    /// the chain).
    pub timeout_secs: u64,
    /// Sanity cap on subprocess output size in bytes.
    pub max_output_bytes: usize,
}

impl Default for GttsConfig {
    fn default() -> Self {
        Self {
            language: "en".to_owned(),
            requests_per_minute: 50,
            binary: "gtts-cli".to_owned(),
            max_text_chars: 5_000,
            timeout_secs: 30,
            max_output_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Cache tier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// L1 (in-memory) capacity in bytes.
    pub memory_bytes: u64,
    /// L2 (on-disk) capacity in bytes.
    pub disk_bytes: u64,
    /// L2 directory. `None` resolves to the platform cache dir.
    pub disk_path: Option<PathBuf>,
    /// L2 entry time-to-live in days.
    pub ttl_days: u64,
    /// Session tier capacity in bytes. The session tier is cleared on
    /// document change and shutdown.
    pub session_bytes: u64,
    /// Minimum interval between L2 sweeps, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_bytes: 100 * 1024 * 1024,
            disk_bytes: 1024 * 1024 * 1024,
            disk_path: None,
            ttl_days: 7,
            session_bytes: 50 * 1024 * 1024,
            sweep_interval_secs: 3600,
        }
    }
}

impl CacheConfig {
    /// Resolve the on-disk cache directory: the configured path, the
    /// `NARRATE_CACHE_DIR` environment override, or the platform cache dir.
    pub fn resolve_disk_path(&self) -> PathBuf {
        if let Some(ref p) = self.disk_path {
            return p.clone();
        }
        if let Some(override_dir) = std::env::var_os("NARRATE_CACHE_DIR") {
            return PathBuf::from(override_dir);
        }
        dirs::cache_dir()
            .map(|d| d.join("narrate").join("tts"))
            .unwrap_or_else(|| PathBuf::from("/tmp/narrate-cache"))
    }
}

/// Synthesis queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum queued items.
    pub capacity: usize,
    /// Soft byte budget over queued sentence text lengths. Exceeding it
    /// refuses the enqueue without waiting.
    pub text_byte_budget: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 32,
            text_byte_budget: 256 * 1024,
        }
    }
}

impl Default for NarrateConfig {
    fn default() -> Self {
        Self {
            engine: EngineChoice::default(),
            sample_rate: 44_100,
            volume: 0.8,
            buffer_size: 3,
            highlight_color: "yellow".to_owned(),
            piper: PiperConfig::default(),
            gtts: GttsConfig::default(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}
