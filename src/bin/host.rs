//! Thin headless host for the narration core.
//!
//! Wires config → controller and narrates a markdown file from the
//! command line. The terminal reader embeds the same core through the
//! library API; this binary exists for scripted use and smoke testing.
//!
//! Exit codes: 0 success, 2 invalid argument combination, 3 engine
//! validation failed, 4 audio device init failed, 1 any other fatal.

use clap::Parser;
use narrate::{
    spawn_cpal_player, spawn_null_player, Controller, EngineChoice, NarrateConfig, NarrateError,
    ReaderState, StatusMessage, SynthesisQueue, TtsCache,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_BAD_ARGS: u8 = 2;
const EXIT_ENGINE: u8 = 3;
const EXIT_DEVICE: u8 = 4;

#[derive(Debug, Parser)]
#[command(name = "narrate-host", about = "Narrate a markdown file aloud")]
struct Cli {
    /// Speech engine: piper (local) or gtts (online; google is an alias).
    /// Without this flag no TTS code path runs.
    #[arg(long = "tts", value_name = "ENGINE")]
    tts: Option<String>,

    /// Markdown file to narrate.
    #[arg(value_name = "FILE")]
    markdown: Option<PathBuf>,

    /// Config file (TOML). Defaults are used when absent.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Plain pager mode (no TUI). Incompatible with --tts.
    #[arg(long)]
    pager: bool,

    /// Use the headless playback driver instead of the audio device.
    #[arg(long)]
    no_audio: bool,

    /// Append logs to this file instead of stderr.
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

fn init_tracing(log_file: Option<&PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file = path.file_name().map(PathBuf::from).unwrap_or_else(|| "narrate.log".into());
            let appender = tracing_appender::rolling::never(dir, file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_file.as_ref());

    let Some(ref engine_name) = cli.tts else {
        // No --tts: the core is never instantiated.
        println!("TTS disabled; pass --tts <piper|gtts> to narrate");
        return ExitCode::SUCCESS;
    };

    if cli.pager {
        eprintln!("--tts requires the TUI; it cannot be combined with --pager");
        return ExitCode::from(EXIT_BAD_ARGS);
    }

    let engine = match EngineChoice::parse(engine_name) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(EXIT_BAD_ARGS);
        }
    };

    let mut config = match cli.config.as_deref().map(NarrateConfig::load).transpose() {
        Ok(loaded) => loaded.unwrap_or_default(),
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(EXIT_BAD_ARGS);
        }
    };
    config.engine = engine;
    if let Err(e) = config.validate() {
        eprintln!("{e}");
        return ExitCode::from(EXIT_BAD_ARGS);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config, engine, cli.markdown, cli.no_audio)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("{e}");
            let code = match e {
                NarrateError::Device(_) => EXIT_DEVICE,
                NarrateError::EngineUnavailable(_) | NarrateError::InvalidConfig(_) => EXIT_ENGINE,
                NarrateError::Config(_) => EXIT_BAD_ARGS,
                _ => 1,
            };
            ExitCode::from(code)
        }
    }
}

async fn run(
    config: NarrateConfig,
    engine: EngineChoice,
    markdown: Option<PathBuf>,
    no_audio: bool,
) -> Result<(), NarrateError> {
    let cache = Arc::new(TtsCache::new(&config.cache, config.sample_rate));
    let queue = Arc::new(SynthesisQueue::new(&config.queue));

    let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
    let player = if no_audio {
        spawn_null_player(config.sample_rate, config.volume, event_tx)
    } else {
        spawn_cpal_player(config.sample_rate, config.volume, event_tx)?
    };

    let controller = Controller::new(config, cache, queue, player, event_rx);
    let (handle, mut status_rx, join) = controller.spawn();

    handle.start(engine).await?;
    wait_for_ready(&mut status_rx).await?;
    info!("engine ready");

    if let Some(path) = markdown {
        let text = std::fs::read_to_string(&path)
            .map_err(|e| NarrateError::Config(format!("cannot read {}: {e}", path.display())))?;
        handle.load_document(text).await?;
        handle.play().await?;

        // Narrate to the end, Ctrl-C to stop early.
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted");
                    break;
                }
                message = status_rx.recv() => {
                    let Some(message) = message else { break };
                    match message {
                        StatusMessage::SentenceChanged { index, total, .. } => {
                            info!("sentence {}/{}", index + 1, total);
                        }
                        StatusMessage::Error { message, recoverable: false } => {
                            let _ = handle.shutdown().await;
                            let _ = join.await;
                            return Err(NarrateError::ProcessFailed(message));
                        }
                        StatusMessage::Error { message, .. } => {
                            info!("skipped: {message}");
                        }
                        StatusMessage::StateChanged { state: ReaderState::Ready, prev: ReaderState::Playing } => {
                            info!("document finished");
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    let _ = handle.shutdown().await;
    let _ = join.await;
    Ok(())
}

/// Wait for the engine validation outcome after `Start`.
async fn wait_for_ready(
    status_rx: &mut tokio::sync::mpsc::Receiver<StatusMessage>,
) -> Result<(), NarrateError> {
    while let Some(message) = status_rx.recv().await {
        match message {
            StatusMessage::Ready => return Ok(()),
            StatusMessage::Error { message, recoverable: false } => {
                return Err(NarrateError::EngineUnavailable(message));
            }
            _ => {}
        }
    }
    Err(NarrateError::Closed("controller"))
}
