//! The controller: state machine, command processing, and the
//! synthesis/playback orchestration loop.
//!
//! Component handles are passed in at construction; there are no
//! back-pointers. The controller task owns a command inbox and a status
//! outbox, and spawns two long-lived workers: the synthesis worker
//! (queue → cache → engine) and the cache sweeper. The playback driver
//! thread is owned by the player handle passed in. No detached work is
//! fired from command handlers; everything is cancellable and awaited at
//! shutdown.

mod messages;
mod state;

pub use messages::{Command, ControllerHandle, StatusMessage};
pub use state::{ReaderState, StateMachine};

use crate::blob::AudioBlob;
use crate::cache::{Fingerprint, TtsCache, VoiceSpec};
use crate::config::{EngineChoice, NarrateConfig};
use crate::engine::{self, SpeechEngine};
use crate::error::{NarrateError, Result};
use crate::extract::{Document, Extractor};
use crate::player::{PlaybackEvent, PlayerHandle};
use crate::queue::{Priority, QueueItem, SynthesisQueue};
use messages::CommandEnvelope;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const COMMAND_CHANNEL_SIZE: usize = 16;
const STATUS_CHANNEL_SIZE: usize = 256;
/// Cadence of `PositionUpdate` while playing.
const POSITION_TICK: Duration = Duration::from_millis(250);
/// How long an enqueue may wait on a full queue before the item is
/// dropped (look-ahead is best-effort; the next advance re-requests).
const ENQUEUE_DEADLINE: Duration = Duration::from_secs(1);
/// Grace period for workers at shutdown before they are abandoned.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Builds an engine for a `Start` command. Swappable so tests can inject
/// a spy engine.
pub type EngineFactory = Box<dyn Fn(EngineChoice) -> Result<Arc<dyn SpeechEngine>> + Send + Sync>;

enum WorkerEvent {
    Validated(Result<()>),
    Synthesized {
        index: usize,
        fingerprint: Fingerprint,
        result: Result<AudioBlob>,
    },
}

/// Controller builder: collects component handles, then [`Controller::spawn`]
/// starts the task.
pub struct Controller {
    config: NarrateConfig,
    cache: Arc<TtsCache>,
    queue: Arc<SynthesisQueue>,
    player: PlayerHandle,
    player_events: mpsc::UnboundedReceiver<PlaybackEvent>,
    engine_factory: EngineFactory,
    cancel: CancellationToken,
}

impl Controller {
    pub fn new(
        config: NarrateConfig,
        cache: Arc<TtsCache>,
        queue: Arc<SynthesisQueue>,
        player: PlayerHandle,
        player_events: mpsc::UnboundedReceiver<PlaybackEvent>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let factory_config = config.clone();
        let factory_cancel = cancel.clone();
        let engine_factory: EngineFactory = Box::new(move |choice| {
            engine::create_engine(choice, &factory_config, factory_cancel.clone())
        });
        Self {
            config,
            cache,
            queue,
            player,
            player_events,
            engine_factory,
            cancel,
        }
    }

    /// Replace the engine factory (tests inject spies here).
    pub fn with_engine_factory(mut self, factory: EngineFactory) -> Self {
        self.engine_factory = factory;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start the controller task and its cache sweeper.
    pub fn spawn(self) -> (ControllerHandle, mpsc::Receiver<StatusMessage>, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel::<CommandEnvelope>(COMMAND_CHANNEL_SIZE);
        let (status_tx, status_rx) = mpsc::channel::<StatusMessage>(STATUS_CHANNEL_SIZE);
        let (worker_tx, worker_rx) = mpsc::unbounded_channel::<WorkerEvent>();

        let sweeper_handle = spawn_sweeper(
            Arc::clone(&self.cache),
            self.config.cache.sweep_interval_secs,
            self.cancel.clone(),
        );

        let task = ControllerTask {
            engine_factory: self.engine_factory,
            extractor: Extractor::new(),
            machine: StateMachine::new(),
            engine: None,
            engine_choice: None,
            document: None,
            current: 0,
            speed: 1.0,
            pending_play: None,
            playing_index: None,
            failed: HashSet::new(),
            scheduled: HashSet::new(),
            worker_handle: None,
            sweeper_handle: Some(sweeper_handle),
            status_tx,
            worker_tx,
            config: self.config,
            cache: self.cache,
            queue: self.queue,
            player: self.player,
            cancel: self.cancel,
        };

        let join = tokio::spawn(task.run(cmd_rx, self.player_events, worker_rx));
        (ControllerHandle::new(cmd_tx), status_rx, join)
    }
}

fn spawn_sweeper(
    cache: Arc<TtsCache>,
    interval_secs: u64,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let cache = Arc::clone(&cache);
                    match tokio::task::spawn_blocking(move || cache.sweep()).await {
                        Ok(Ok(stats)) => debug!(
                            expired = stats.removed_expired,
                            capacity = stats.removed_for_capacity,
                            "sweep pass done"
                        ),
                        Ok(Err(e)) => warn!("cache sweep failed: {e}"),
                        Err(e) => warn!("cache sweep task failed: {e}"),
                    }
                }
            }
        }
        debug!("cache sweeper stopped");
    })
}

struct ControllerTask {
    config: NarrateConfig,
    cache: Arc<TtsCache>,
    queue: Arc<SynthesisQueue>,
    player: PlayerHandle,
    engine_factory: EngineFactory,
    extractor: Extractor,
    machine: StateMachine,
    engine: Option<Arc<dyn SpeechEngine>>,
    engine_choice: Option<EngineChoice>,
    document: Option<Arc<Document>>,
    current: usize,
    speed: f32,
    /// Sentence whose blob is awaited before playback can start.
    pending_play: Option<usize>,
    /// Sentence currently in the player.
    playing_index: Option<usize>,
    /// Sentences skipped this session: oversize or failed synthesis.
    failed: HashSet<usize>,
    /// Work already enqueued or in flight, to avoid duplicate enqueues.
    scheduled: HashSet<Fingerprint>,
    worker_handle: Option<JoinHandle<()>>,
    sweeper_handle: Option<JoinHandle<()>>,
    status_tx: mpsc::Sender<StatusMessage>,
    worker_tx: mpsc::UnboundedSender<WorkerEvent>,
    cancel: CancellationToken,
}

impl ControllerTask {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<CommandEnvelope>,
        mut player_events: mpsc::UnboundedReceiver<PlaybackEvent>,
        mut worker_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        let mut position_tick = tokio::time::interval(POSITION_TICK);
        position_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    self.shutdown().await;
                    break;
                }
                envelope = cmd_rx.recv() => {
                    let Some((command, reply)) = envelope else {
                        self.shutdown().await;
                        break;
                    };
                    let is_shutdown = matches!(command, Command::Shutdown);
                    let result = self.handle_command(command).await;
                    let _ = reply.send(result);
                    if is_shutdown {
                        self.shutdown().await;
                        break;
                    }
                }
                Some(event) = player_events.recv() => {
                    self.handle_player_event(event).await;
                }
                Some(event) = worker_rx.recv() => {
                    self.handle_worker_event(event).await;
                }
                _ = position_tick.tick() => {
                    self.emit_position();
                }
            }
        }
    }

    // -- Command handling -------------------------------------------------

    async fn handle_command(&mut self, command: Command) -> Result<()> {
        debug!(state = %self.machine.state(), "command: {command:?}");
        match command {
            Command::Start(choice) => self.cmd_start(choice).await,
            Command::LoadDocument(markdown) => self.cmd_load(markdown).await,
            Command::Play => self.cmd_play().await,
            Command::Pause => self.cmd_pause().await,
            Command::Stop => self.cmd_stop().await,
            Command::Next => {
                let target = self.clamp_index(self.current.saturating_add(1));
                self.cmd_navigate(target).await
            }
            Command::Prev => {
                let target = self.current.saturating_sub(1);
                self.cmd_navigate(target).await
            }
            Command::Seek(index) => {
                let target = self.clamp_index(index);
                self.cmd_navigate(target).await
            }
            Command::SetSpeed(speed) => self.cmd_set_speed(speed).await,
            Command::SetVolume(volume) => self.player.set_volume(volume),
            Command::Shutdown => Ok(()),
        }
    }

    async fn cmd_start(&mut self, choice: EngineChoice) -> Result<()> {
        let prev = self.machine.transition(ReaderState::Initializing)?;
        self.emit(StatusMessage::StateChanged {
            state: ReaderState::Initializing,
            prev,
        })
        .await;

        let engine = match (self.engine_factory)(choice) {
            Ok(e) => e,
            Err(e) => {
                self.fail_session(&e).await;
                return Err(e);
            }
        };
        self.engine = Some(Arc::clone(&engine));
        self.engine_choice = Some(choice);
        info!(engine = engine.info().name, "engine starting");

        // Validation runs a subprocess round-trip; keep it off this thread
        // so the command handler returns within bounded time.
        let tx = self.worker_tx.clone();
        tokio::spawn(async move {
            let result = match tokio::task::spawn_blocking(move || engine.validate()).await {
                Ok(r) => r,
                Err(e) => Err(NarrateError::Channel(format!("validation task failed: {e}"))),
            };
            let _ = tx.send(WorkerEvent::Validated(result));
        });
        Ok(())
    }

    async fn cmd_load(&mut self, markdown: String) -> Result<()> {
        let prev = self.machine.transition(ReaderState::Processing)?;
        self.emit(StatusMessage::StateChanged {
            state: ReaderState::Processing,
            prev,
        })
        .await;

        // The previous document is destroyed: playback stops, pending work
        // is dropped, the session tier is cleared.
        let _ = self.player.stop();
        self.pending_play = None;
        self.playing_index = None;
        self.queue.clear();
        self.scheduled.clear();
        self.failed.clear();
        self.cache.clear_session();
        self.current = 0;

        let document = self.extractor.parse(&markdown);
        info!(sentences = document.len(), "document parsed");
        self.document = if document.is_empty() {
            None
        } else {
            Some(Arc::new(document))
        };

        let prev = self
            .machine
            .transition(ReaderState::Ready)
            .unwrap_or(ReaderState::Processing);
        self.emit(StatusMessage::StateChanged {
            state: ReaderState::Ready,
            prev,
        })
        .await;

        if self.document.is_some() {
            self.schedule_lookahead().await;
        }
        Ok(())
    }

    async fn cmd_play(&mut self) -> Result<()> {
        match self.machine.state() {
            ReaderState::Paused => {
                let prev = self.machine.transition(ReaderState::Playing)?;
                self.emit(StatusMessage::StateChanged {
                    state: ReaderState::Playing,
                    prev,
                })
                .await;
                if self.player.is_paused() {
                    let _ = self.player.resume();
                } else {
                    // Nothing was in the device when we paused (synthesis
                    // was still pending); restart from the cursor.
                    self.advance_to(self.current).await;
                }
                Ok(())
            }
            ReaderState::Ready => {
                if self.document.is_none() {
                    return Err(NarrateError::State("no document loaded".into()));
                }
                let prev = self.machine.transition(ReaderState::Playing)?;
                self.emit(StatusMessage::StateChanged {
                    state: ReaderState::Playing,
                    prev,
                })
                .await;
                self.advance_to(self.current).await;
                Ok(())
            }
            s => Err(NarrateError::State(format!("cannot play while {s}"))),
        }
    }

    async fn cmd_pause(&mut self) -> Result<()> {
        let prev = self.machine.transition(ReaderState::Paused)?;
        if self.player.is_playing() {
            let _ = self.player.pause();
        }
        self.emit(StatusMessage::StateChanged {
            state: ReaderState::Paused,
            prev,
        })
        .await;
        // Synthesis continues for look-ahead while paused.
        Ok(())
    }

    async fn cmd_stop(&mut self) -> Result<()> {
        let prev = self.machine.transition(ReaderState::Ready)?;
        let _ = self.player.stop();
        self.pending_play = None;
        self.playing_index = None;
        self.emit(StatusMessage::StateChanged {
            state: ReaderState::Ready,
            prev,
        })
        .await;
        Ok(())
    }

    async fn cmd_navigate(&mut self, target: usize) -> Result<()> {
        if self.document.is_none() {
            return Err(NarrateError::State("no document loaded".into()));
        }
        match self.machine.state() {
            ReaderState::Playing => {
                // Cancel current playback; the player releases the blob,
                // the controller never held it.
                let _ = self.player.stop();
                self.pending_play = None;
                self.playing_index = None;
                self.advance_to(target).await;
                Ok(())
            }
            ReaderState::Paused | ReaderState::Ready => {
                let _ = self.player.stop();
                self.pending_play = None;
                self.playing_index = None;
                self.set_cursor(target).await;
                Ok(())
            }
            s => Err(NarrateError::State(format!("cannot navigate while {s}"))),
        }
    }

    async fn cmd_set_speed(&mut self, speed: f32) -> Result<()> {
        if !(0.5..=2.0).contains(&speed) {
            return Err(NarrateError::State(format!(
                "speed {speed} outside 0.5–2.0"
            )));
        }
        if (speed - self.speed).abs() < 1e-6 {
            return Ok(());
        }
        self.speed = speed;
        info!(speed, "speed changed");

        // Pending look-ahead at the old speed is discarded; anything
        // already in flight finishes and lands in the cache.
        self.queue.clear();
        self.scheduled.clear();
        if let Some(pending) = self.pending_play {
            self.ensure_enqueued(pending, Priority::High).await;
        }
        self.schedule_lookahead().await;
        Ok(())
    }

    // -- Worker and player events -----------------------------------------

    async fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Validated(result) => self.on_validated(result).await,
            WorkerEvent::Synthesized {
                index,
                fingerprint,
                result,
            } => self.on_synthesized(index, fingerprint, result).await,
        }
    }

    async fn on_validated(&mut self, result: Result<()>) {
        if self.machine.state() != ReaderState::Initializing {
            return; // superseded by shutdown or another Start
        }
        match result {
            Ok(()) => {
                let prev = self
                    .machine
                    .transition(ReaderState::Ready)
                    .unwrap_or(ReaderState::Initializing);
                self.emit(StatusMessage::StateChanged {
                    state: ReaderState::Ready,
                    prev,
                })
                .await;
                self.emit(StatusMessage::Ready).await;
                self.spawn_worker();
                info!("engine validated");
            }
            Err(e) => {
                warn!("engine validation failed: {e}");
                self.fail_session(&e).await;
            }
        }
    }

    async fn on_synthesized(
        &mut self,
        index: usize,
        fingerprint: Fingerprint,
        result: Result<AudioBlob>,
    ) {
        self.scheduled.remove(&fingerprint);
        match result {
            Ok(blob) => {
                if self.pending_play == Some(index)
                    && self.machine.state() == ReaderState::Playing
                    && self.fingerprint_at(index) == Some(fingerprint)
                {
                    self.pending_play = None;
                    self.start_playback(index, blob).await;
                }
                self.emit_buffer_status();
            }
            Err(NarrateError::Cancelled) => {}
            Err(e) if !e.is_recoverable() => {
                self.fail_session(&e).await;
            }
            Err(e) => {
                warn!(index, "synthesis failed, skipping sentence: {e}");
                self.failed.insert(index);
                self.emit(StatusMessage::Error {
                    message: e.to_string(),
                    recoverable: true,
                })
                .await;
                if self.pending_play == Some(index) {
                    self.pending_play = None;
                    if self.machine.state() == ReaderState::Playing {
                        self.advance_to(index + 1).await;
                    }
                }
            }
        }
    }

    async fn handle_player_event(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Completed { index } => {
                self.playing_index = None;
                self.emit(StatusMessage::Completed { index }).await;
                match self.machine.state() {
                    ReaderState::Playing => self.advance_to(index + 1).await,
                    ReaderState::Paused => {
                        // Completion raced a pause; park the cursor on the
                        // next sentence for resume.
                        if let Some(doc) = &self.document
                            && index + 1 < doc.len()
                        {
                            self.current = index + 1;
                        }
                    }
                    _ => {}
                }
            }
            PlaybackEvent::Stopped { index } => {
                debug!(index, "playback cancelled");
                self.playing_index = None;
            }
            PlaybackEvent::DeviceError { message } => {
                self.fail_session(&NarrateError::Device(message)).await;
            }
        }
    }

    // -- Playback orchestration -------------------------------------------

    /// Move the cursor to `start` (skipping failed sentences) and play it:
    /// from cache when possible, otherwise via a `High` priority synthesis
    /// request. Reaching the end of the document returns to `Ready`.
    async fn advance_to(&mut self, start: usize) {
        let Some(total) = self.document.as_ref().map(|d| d.len()) else {
            return;
        };

        let mut index = start;
        loop {
            while index < total && self.failed.contains(&index) {
                index += 1;
            }
            if index >= total {
                self.pending_play = None;
                if matches!(
                    self.machine.state(),
                    ReaderState::Playing | ReaderState::Paused
                ) {
                    let prev = self
                        .machine
                        .transition(ReaderState::Ready)
                        .unwrap_or(ReaderState::Playing);
                    self.emit(StatusMessage::StateChanged {
                        state: ReaderState::Ready,
                        prev,
                    })
                    .await;
                }
                return;
            }

            self.current = index;
            self.emit(StatusMessage::SentenceChanged {
                index,
                total,
                progress: index as f32 / total as f32,
            })
            .await;

            let Some(fingerprint) = self.fingerprint_at(index) else {
                return;
            };
            if let Some(blob) = self.cache.get(&fingerprint) {
                match self.player.play(index, blob) {
                    Ok(()) => {
                        self.playing_index = Some(index);
                        self.pending_play = None;
                        break;
                    }
                    Err(e @ NarrateError::InvalidFormat(_)) => {
                        warn!(index, "unplayable blob, skipping: {e}");
                        self.failed.insert(index);
                        self.emit(StatusMessage::Error {
                            message: e.to_string(),
                            recoverable: true,
                        })
                        .await;
                        index += 1;
                    }
                    Err(e) => {
                        self.fail_session(&e).await;
                        return;
                    }
                }
            } else {
                self.pending_play = Some(index);
                self.ensure_enqueued(index, Priority::High).await;
                break;
            }
        }

        self.schedule_lookahead().await;
    }

    async fn start_playback(&mut self, index: usize, blob: AudioBlob) {
        match self.player.play(index, blob) {
            Ok(()) => self.playing_index = Some(index),
            Err(e @ NarrateError::InvalidFormat(_)) => {
                self.failed.insert(index);
                self.emit(StatusMessage::Error {
                    message: e.to_string(),
                    recoverable: true,
                })
                .await;
                self.advance_to(index + 1).await;
            }
            Err(e) => self.fail_session(&e).await,
        }
    }

    /// Park the cursor without starting playback (navigation while paused
    /// or stopped). The target sentence is still prefetched at `High`.
    async fn set_cursor(&mut self, index: usize) {
        let Some(total) = self.document.as_ref().map(|d| d.len()) else {
            return;
        };
        self.current = index.min(total.saturating_sub(1));
        self.emit(StatusMessage::SentenceChanged {
            index: self.current,
            total,
            progress: self.current as f32 / total as f32,
        })
        .await;
        self.ensure_enqueued(self.current, Priority::High).await;
        self.schedule_lookahead().await;
    }

    /// Enqueue synthesis work for a sentence unless it is already cached,
    /// scheduled, or marked failed. Oversize sentences are rejected here,
    /// at enqueue time, and skipped at playback.
    async fn ensure_enqueued(&mut self, index: usize, priority: Priority) {
        let Some(doc) = &self.document else { return };
        let Some(sentence) = doc.sentence(index) else {
            return;
        };
        if self.failed.contains(&index) {
            return;
        }

        let max_chars = self
            .engine
            .as_ref()
            .map(|e| e.info().max_text_chars)
            .unwrap_or(usize::MAX);
        let text = sentence.text.clone();
        if text.chars().count() > max_chars {
            self.failed.insert(index);
            self.emit(StatusMessage::Error {
                message: format!("sentence {index} exceeds the engine's {max_chars} character limit"),
                recoverable: true,
            })
            .await;
            return;
        }

        let Some(fingerprint) = self.fingerprint_at(index) else {
            return;
        };
        if self.scheduled.contains(&fingerprint) || self.cache.get(&fingerprint).is_some() {
            return;
        }

        let item = QueueItem {
            sentence_index: index,
            text,
            fingerprint,
            speed: self.speed,
            priority,
            enqueued_at: Instant::now(),
        };
        self.scheduled.insert(fingerprint);
        match tokio::time::timeout(ENQUEUE_DEADLINE, self.queue.enqueue(item)).await {
            Ok(Ok(())) => {}
            Ok(Err(NarrateError::QueueFull)) => {
                // Byte-budget refusal: the caller drops the item.
                self.scheduled.remove(&fingerprint);
                debug!(index, "queue byte budget refused look-ahead item");
            }
            Ok(Err(e)) => {
                self.scheduled.remove(&fingerprint);
                warn!(index, "enqueue failed: {e}");
            }
            Err(_) => {
                self.scheduled.remove(&fingerprint);
                warn!(index, "enqueue timed out, dropping request");
            }
        }
    }

    /// Keep up to `buffer_size` upcoming sentences cached or in synthesis.
    async fn schedule_lookahead(&mut self) {
        let Some(doc) = &self.document else { return };
        if self.engine.is_none() {
            return;
        }
        let total = doc.len();
        let k = self.config.buffer_size;
        let first = self.current + 1;
        let upcoming: Vec<usize> = (first..(first + k).min(total)).collect();

        let mut buffered = 0usize;
        for index in upcoming {
            if self.failed.contains(&index) {
                continue;
            }
            if let Some(fp) = self.fingerprint_at(index)
                && self.cache.get(&fp).is_some()
            {
                buffered += 1;
                continue;
            }
            self.ensure_enqueued(index, Priority::Normal).await;
        }
        let _ = self.status_tx.try_send(StatusMessage::BufferStatus {
            buffered,
            capacity: k,
        });
    }

    fn spawn_worker(&mut self) {
        if self.worker_handle.is_some() {
            return;
        }
        let Some(engine) = self.engine.clone() else {
            return;
        };
        let queue = Arc::clone(&self.queue);
        let cache = Arc::clone(&self.cache);
        let tx = self.worker_tx.clone();
        let sample_rate = self.config.sample_rate;

        self.worker_handle = Some(tokio::spawn(async move {
            loop {
                let item = match queue.dequeue().await {
                    Ok(item) => item,
                    Err(_) => break,
                };
                let engine = Arc::clone(&engine);
                let text = item.text.clone();
                let speed = item.speed;
                let result = cache
                    .get_or_compute(item.fingerprint, move || async move {
                        match tokio::task::spawn_blocking(move || engine.synthesize(&text, speed))
                            .await
                        {
                            Ok(r) => r.map(|pcm| AudioBlob::new(pcm, sample_rate)),
                            Err(e) => {
                                Err(NarrateError::Channel(format!("synthesis task failed: {e}")))
                            }
                        }
                    })
                    .await;
                if tx
                    .send(WorkerEvent::Synthesized {
                        index: item.sentence_index,
                        fingerprint: item.fingerprint,
                        result,
                    })
                    .is_err()
                {
                    break;
                }
            }
            debug!("synthesis worker stopped");
        }));
    }

    // -- Plumbing ----------------------------------------------------------

    fn clamp_index(&self, index: usize) -> usize {
        let total = self.document.as_ref().map(|d| d.len()).unwrap_or(0);
        index.min(total.saturating_sub(1))
    }

    fn voice_spec(&self) -> VoiceSpec {
        let engine_name = self
            .engine
            .as_ref()
            .map(|e| e.info().name)
            .unwrap_or("none");
        let voice = match self.engine_choice {
            Some(EngineChoice::Piper) => self.config.piper.voice.clone().unwrap_or_default(),
            Some(EngineChoice::Gtts) => self.config.gtts.language.clone(),
            None => String::new(),
        };
        VoiceSpec {
            engine: engine_name.to_owned(),
            voice,
            speed: self.speed,
        }
    }

    fn fingerprint_at(&self, index: usize) -> Option<Fingerprint> {
        let doc = self.document.as_ref()?;
        let sentence = doc.sentence(index)?;
        Some(Fingerprint::compute(&sentence.text, &self.voice_spec()))
    }

    async fn fail_session(&mut self, error: &NarrateError) {
        let prev = self.machine.fail(error.to_string());
        let _ = self.player.stop();
        self.pending_play = None;
        self.playing_index = None;
        self.emit(StatusMessage::StateChanged {
            state: ReaderState::Error,
            prev,
        })
        .await;
        self.emit(StatusMessage::Error {
            message: error.to_string(),
            recoverable: false,
        })
        .await;
    }

    fn emit_position(&self) {
        if self.machine.state() == ReaderState::Playing && self.playing_index.is_some() {
            let _ = self.status_tx.try_send(StatusMessage::PositionUpdate {
                position: self.player.position(),
                duration: self.player.duration(),
            });
        }
    }

    fn emit_buffer_status(&self) {
        let Some(doc) = &self.document else { return };
        let k = self.config.buffer_size;
        let first = self.current + 1;
        let buffered = (first..(first + k).min(doc.len()))
            .filter(|&i| {
                self.fingerprint_at(i)
                    .is_some_and(|fp| self.cache.get(&fp).is_some())
            })
            .count();
        let _ = self.status_tx.try_send(StatusMessage::BufferStatus {
            buffered,
            capacity: k,
        });
    }

    async fn emit(&self, message: StatusMessage) {
        let _ = self.status_tx.send(message).await;
    }

    // -- Shutdown ----------------------------------------------------------

    /// Cooperative teardown: drain stops, workers are closed in dependency
    /// order (queue, worker, player, sweeper, cache), each with a bounded
    /// grace period.
    async fn shutdown(&mut self) {
        if self.machine.state() != ReaderState::Stopping
            && let Ok(prev) = self.machine.transition(ReaderState::Stopping)
        {
            self.emit(StatusMessage::StateChanged {
                state: ReaderState::Stopping,
                prev,
            })
            .await;
        }

        self.cancel.cancel();
        self.queue.close();
        let _ = self.player.stop();
        self.player.close();

        if let Some(handle) = self.worker_handle.take()
            && tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err()
        {
            warn!("synthesis worker did not stop within grace period");
        }
        if let Some(handle) = self.sweeper_handle.take()
            && tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err()
        {
            warn!("cache sweeper did not stop within grace period");
        }

        if let Some(engine) = self.engine.take() {
            engine.close();
        }
        self.cache.clear_session();
        self.cache.close();
        self.document = None;

        if let Ok(prev) = self.machine.transition(ReaderState::Idle) {
            self.emit(StatusMessage::StateChanged {
                state: ReaderState::Idle,
                prev,
            })
            .await;
        }
        info!("controller stopped");
    }
}
