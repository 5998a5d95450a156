//! Narrate: spoken-narration core for terminal markdown readers.
//!
//! Turns a rendered markdown document into a sequence of navigable,
//! cached, gap-free audio playback units while staying responsive to
//! user commands.
//!
//! # Architecture
//!
//! Independent components wired together by the controller over typed
//! channels:
//! - **Extraction**: markdown → sentences with source spans (`extract`)
//! - **Cache**: fingerprint → PCM blob, session/memory/disk tiers with
//!   single-flight synthesis (`cache`)
//! - **Engines**: piper (local subprocess) or gtts (online subprocess
//!   chain) behind one trait (`engine`)
//! - **Queue**: bounded two-priority synthesis queue (`queue`)
//! - **Player**: cpal output on a dedicated driver thread (`player`)
//! - **Controller**: the state machine and orchestration loop
//!   (`controller`)
//!
//! The core speaks to its host only through [`Command`] and
//! [`StatusMessage`] values; it never touches the screen.

pub mod blob;
pub mod cache;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod extract;
pub mod player;
pub mod queue;

pub use blob::AudioBlob;
pub use cache::{CacheStats, Fingerprint, TtsCache, VoiceSpec};
pub use config::{EngineChoice, NarrateConfig};
pub use controller::{Command, Controller, ControllerHandle, ReaderState, StatusMessage};
pub use engine::{EngineInfo, SpeechEngine};
pub use error::{NarrateError, Result};
pub use extract::{Document, Extractor, Sentence, SourceSpan};
pub use player::{spawn_cpal_player, spawn_null_player, PlaybackEvent, PlayerHandle};
pub use queue::{Priority, QueueItem, SynthesisQueue};
