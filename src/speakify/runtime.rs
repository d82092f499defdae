//! Runs a [`Converter`] on its own single-threaded event loop.
//!
//! All converter and playback state lives on one thread. Callers talk to it
//! through a cloneable [`ConverterHandle`]; the remote call is the only
//! suspension point and runs as a local task that reports back with its
//! sequence number.

use super::audio::RawAudio;
use super::converter::{Converter, ConverterError, ConverterSnapshot, WavDownload};
use super::gemini::{ApiError, SpeechSynthesizer};
use super::history::HistoryStore;
use super::playback::{AudioBackend, PlaybackEngine, PlaybackError};
use super::types::{HistoryEntry, VoiceName};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::LocalSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Roughly one display frame.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Generate {
        text: String,
        voice: VoiceName,
        reply: Reply<Result<HistoryEntry, ConverterError>>,
    },
    CancelGeneration {
        reply: Reply<bool>,
    },
    Play {
        reply: Reply<Result<bool, ConverterError>>,
    },
    Pause {
        reply: Reply<bool>,
    },
    TogglePlay {
        reply: Reply<Result<bool, ConverterError>>,
    },
    Stop {
        reply: Reply<bool>,
    },
    Download {
        reply: Reply<Result<WavDownload, ConverterError>>,
    },
    SaveDownload {
        dir: PathBuf,
        reply: Reply<Result<PathBuf, ConverterError>>,
    },
    History {
        reply: Reply<Vec<HistoryEntry>>,
    },
    DeleteHistory {
        id: Uuid,
        reply: Reply<Result<bool, ConverterError>>,
    },
    ClearHistory {
        reply: Reply<Result<(), ConverterError>>,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub frame_interval: Duration,
    pub thread_name: String,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            frame_interval: DEFAULT_FRAME_INTERVAL,
            thread_name: "speakify-converter".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ConverterHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<ConverterSnapshot>,
}

/// Starts the converter thread. The backend is opened lazily on that thread,
/// so it does not need to be `Send`.
pub fn spawn_converter<B, F>(
    synthesizer: Arc<dyn SpeechSynthesizer>,
    open_backend: F,
    history: HistoryStore,
    options: RuntimeOptions,
) -> std::io::Result<ConverterHandle>
where
    B: AudioBackend + 'static,
    F: FnMut() -> Result<B, PlaybackError> + Send + 'static,
{
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (snapshots_tx, snapshots_rx) = watch::channel(ConverterSnapshot::default());
    let frame_interval = options.frame_interval;

    std::thread::Builder::new()
        .name(options.thread_name)
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(error = %e, "failed to build converter runtime");
                    return;
                }
            };

            let converter = Converter::new(synthesizer, PlaybackEngine::new(open_backend), history);
            let local = LocalSet::new();
            local.block_on(
                &rt,
                event_loop(converter, commands_rx, snapshots_tx, frame_interval),
            );
            debug!("converter thread exiting");
        })?;

    Ok(ConverterHandle {
        commands: commands_tx,
        snapshots: snapshots_rx,
    })
}

async fn event_loop<B: AudioBackend + 'static>(
    mut converter: Converter<B>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    snapshots: watch::Sender<ConverterSnapshot>,
    frame_interval: Duration,
) {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(u64, Result<RawAudio, ApiError>)>();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<()>();
    let mut waiting: Option<(u64, Reply<Result<HistoryEntry, ConverterError>>)> = None;

    info!("converter event loop started");
    loop {
        // Replies go out after the snapshot is published, so a caller that
        // got an answer always observes the state it produced.
        let mut deferred: Vec<Deferred> = Vec::new();

        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    Command::Shutdown => break,
                    Command::Generate { text, voice, reply } => {
                        match converter.begin_generate(&text, voice) {
                            Ok(pending) => {
                                let synthesizer = converter.synthesizer();
                                let done_tx = done_tx.clone();
                                tokio::task::spawn_local(async move {
                                    let result = synthesizer.synthesize(&pending.request).await;
                                    let _ = done_tx.send((pending.sequence, result));
                                });
                                waiting = Some((pending.sequence, reply));
                            }
                            Err(e) => deferred.push(respond(reply, Err(e))),
                        }
                    }
                    Command::CancelGeneration { reply } => {
                        let cancelled = converter.cancel_generation();
                        if let Some((_, pending_reply)) = waiting.take() {
                            deferred.push(respond(pending_reply, Err(ConverterError::Cancelled)));
                        }
                        deferred.push(respond(reply, cancelled));
                    }
                    Command::Play { reply } => {
                        let result = converter.play();
                        if matches!(result, Ok(true)) {
                            start_readout(&converter, frame_interval, frame_tx.clone());
                        }
                        deferred.push(respond(reply, result));
                    }
                    Command::Pause { reply } => {
                        deferred.push(respond(reply, converter.pause()));
                    }
                    Command::TogglePlay { reply } => {
                        let was_playing = converter.engine().is_playing();
                        let result = converter.toggle_play();
                        if !was_playing && matches!(result, Ok(true)) {
                            start_readout(&converter, frame_interval, frame_tx.clone());
                        }
                        deferred.push(respond(reply, result));
                    }
                    Command::Stop { reply } => {
                        deferred.push(respond(reply, converter.stop()));
                    }
                    Command::Download { reply } => {
                        deferred.push(respond(reply, converter.download()));
                    }
                    Command::SaveDownload { dir, reply } => {
                        deferred.push(respond(reply, converter.save_download(&dir)));
                    }
                    Command::History { reply } => {
                        deferred.push(respond(reply, converter.history().entries().to_vec()));
                    }
                    Command::DeleteHistory { id, reply } => {
                        deferred.push(respond(reply, converter.delete_history(id)));
                    }
                    Command::ClearHistory { reply } => {
                        deferred.push(respond(reply, converter.clear_history()));
                    }
                }
            }
            Some((sequence, result)) = done_rx.recv() => {
                let outcome = converter.finish_generate(sequence, result);
                if waiting.as_ref().is_some_and(|(seq, _)| *seq == sequence) {
                    if let Some((_, reply)) = waiting.take() {
                        deferred.push(respond(reply, outcome));
                    }
                }
            }
            Some(()) = frame_rx.recv() => {
                converter.tick();
            }
        }

        publish(&snapshots, converter.snapshot());
        for reply in deferred {
            reply();
        }
    }

    converter.stop();
    publish(&snapshots, converter.snapshot());
    info!("converter event loop stopped");
}

type Deferred = Box<dyn FnOnce()>;

fn respond<T: 'static>(reply: Reply<T>, value: T) -> Deferred {
    Box::new(move || {
        let _ = reply.send(value);
    })
}

fn publish(snapshots: &watch::Sender<ConverterSnapshot>, next: ConverterSnapshot) {
    snapshots.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}

/// Schedules one frame per `interval` until the engine's readout token is
/// cancelled, which happens on every transition away from playing.
fn start_readout<B: AudioBackend>(
    converter: &Converter<B>,
    interval: Duration,
    frames: mpsc::UnboundedSender<()>,
) {
    let Some(token) = converter.readout_token() else {
        return;
    };
    tokio::task::spawn_local(readout_loop(token, interval, frames));
}

async fn readout_loop(
    token: CancellationToken,
    interval: Duration,
    frames: mpsc::UnboundedSender<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if frames.send(()).is_err() {
                    break;
                }
            }
        }
    }
    debug!("readout loop stopped");
}

impl ConverterHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, ConverterError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| ConverterError::Closed)?;
        rx.await.map_err(|_| ConverterError::Closed)
    }

    /// Resolves when the generation finishes, fails or is cancelled.
    pub async fn generate(
        &self,
        text: impl Into<String>,
        voice: VoiceName,
    ) -> Result<HistoryEntry, ConverterError> {
        let text = text.into();
        self.request(|reply| Command::Generate { text, voice, reply })
            .await?
    }

    pub async fn cancel_generation(&self) -> Result<bool, ConverterError> {
        self.request(|reply| Command::CancelGeneration { reply }).await
    }

    pub async fn play(&self) -> Result<bool, ConverterError> {
        self.request(|reply| Command::Play { reply }).await?
    }

    pub async fn pause(&self) -> Result<bool, ConverterError> {
        self.request(|reply| Command::Pause { reply }).await
    }

    pub async fn toggle_play(&self) -> Result<bool, ConverterError> {
        self.request(|reply| Command::TogglePlay { reply }).await?
    }

    pub async fn stop(&self) -> Result<bool, ConverterError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    pub async fn download(&self) -> Result<WavDownload, ConverterError> {
        self.request(|reply| Command::Download { reply }).await?
    }

    /// Writes the current audio as a WAV file into `dir` and returns its path.
    pub async fn save_download(&self, dir: impl Into<PathBuf>) -> Result<PathBuf, ConverterError> {
        let dir = dir.into();
        self.request(|reply| Command::SaveDownload { dir, reply })
            .await?
    }

    pub async fn history(&self) -> Result<Vec<HistoryEntry>, ConverterError> {
        self.request(|reply| Command::History { reply }).await
    }

    pub async fn delete_history(&self, id: Uuid) -> Result<bool, ConverterError> {
        self.request(|reply| Command::DeleteHistory { id, reply }).await?
    }

    pub async fn clear_history(&self) -> Result<(), ConverterError> {
        self.request(|reply| Command::ClearHistory { reply }).await?
    }

    pub fn snapshot(&self) -> ConverterSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConverterSnapshot> {
        self.snapshots.clone()
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}
