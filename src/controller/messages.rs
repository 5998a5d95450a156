//! Typed messages crossing the core ↔ UI boundary.

use crate::config::EngineChoice;
use crate::controller::state::ReaderState;
use crate::error::{NarrateError, Result};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Inbound commands. Each is acknowledged synchronously (acceptance or a
/// typed error); effects follow asynchronously as status messages.
#[derive(Debug, Clone)]
pub enum Command {
    Start(EngineChoice),
    LoadDocument(String),
    Play,
    Pause,
    Stop,
    Next,
    Prev,
    Seek(usize),
    SetSpeed(f32),
    SetVolume(f32),
    Shutdown,
}

/// Outbound status. The UI layer translates these into view updates; the
/// controller never calls into the UI directly.
#[derive(Debug, Clone)]
pub enum StatusMessage {
    StateChanged {
        state: ReaderState,
        prev: ReaderState,
    },
    SentenceChanged {
        index: usize,
        total: usize,
        progress: f32,
    },
    PositionUpdate {
        position: Duration,
        duration: Duration,
    },
    BufferStatus {
        buffered: usize,
        capacity: usize,
    },
    Error {
        message: String,
        recoverable: bool,
    },
    Ready,
    Completed {
        index: usize,
    },
}

pub(crate) type CommandEnvelope = (Command, oneshot::Sender<Result<()>>);

/// Cloneable handle for submitting commands to a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    cmd_tx: mpsc::Sender<CommandEnvelope>,
}

impl ControllerHandle {
    pub(crate) fn new(cmd_tx: mpsc::Sender<CommandEnvelope>) -> Self {
        Self { cmd_tx }
    }

    /// Submit a command and wait for its acceptance result.
    pub async fn send(&self, command: Command) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send((command, reply_tx))
            .await
            .map_err(|_| NarrateError::Closed("controller"))?;
        reply_rx
            .await
            .map_err(|_| NarrateError::Closed("controller"))?
    }

    pub async fn start(&self, engine: EngineChoice) -> Result<()> {
        self.send(Command::Start(engine)).await
    }

    pub async fn load_document(&self, markdown: impl Into<String>) -> Result<()> {
        self.send(Command::LoadDocument(markdown.into())).await
    }

    pub async fn play(&self) -> Result<()> {
        self.send(Command::Play).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(Command::Pause).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(Command::Stop).await
    }

    pub async fn next(&self) -> Result<()> {
        self.send(Command::Next).await
    }

    pub async fn prev(&self) -> Result<()> {
        self.send(Command::Prev).await
    }

    pub async fn seek(&self, index: usize) -> Result<()> {
        self.send(Command::Seek(index)).await
    }

    pub async fn set_speed(&self, speed: f32) -> Result<()> {
        self.send(Command::SetSpeed(speed)).await
    }

    pub async fn set_volume(&self, volume: f32) -> Result<()> {
        self.send(Command::SetVolume(volume)).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }
}
