use super::audio::DecodedAudio;

use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A source-ended notification closer than this to the end of the buffer
/// counts as the audio finishing on its own.
pub const NATURAL_END_EPSILON: f64 = 0.1;

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("Audio output unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Audio source failed: {0}")]
    SourceFailed(String),
}

/// Identifies one playback attempt. Every `play()` gets a fresh tag so that
/// ended notifications from superseded sources can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackTag(u64);

impl PlaybackTag {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// A started, single-use audio source. Stopping consumes it.
pub trait AudioSource {
    fn stop(self);
}

/// The rendering side of the engine: a clock plus a way to start sources.
pub trait AudioBackend {
    type Source: AudioSource;

    /// Engine clock in seconds. Monotonic, independent of wall-clock time.
    fn current_time(&self) -> f64;

    /// Starts playing `buffer` from `offset` seconds.
    fn start_source(
        &mut self,
        buffer: Arc<DecodedAudio>,
        offset: f64,
        tag: PlaybackTag,
    ) -> Result<Self::Source, PlaybackError>;

    /// Drains tags of sources that ended since the last call, whether they
    /// ran out or were stopped.
    fn take_ended(&mut self) -> Vec<PlaybackTag>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub elapsed_seconds: f64,
    pub pause_offset_seconds: f64,
    pub engine_start_wall_clock: Option<f64>,
}

type BackendFactory<B> = Box<dyn FnMut() -> Result<B, PlaybackError>>;

/// Play/pause/stop state machine over a decoded buffer.
///
/// The backend is opened on first `play()` and kept for the life of the engine.
pub struct PlaybackEngine<B: AudioBackend> {
    open_backend: Option<BackendFactory<B>>,
    backend: Option<B>,
    audio: Option<Arc<DecodedAudio>>,
    state: PlaybackState,
    active: Option<(PlaybackTag, B::Source)>,
    next_tag: u64,
    readout: Option<CancellationToken>,
}

impl<B: AudioBackend> PlaybackEngine<B> {
    pub fn new(open_backend: impl FnMut() -> Result<B, PlaybackError> + 'static) -> Self {
        Self {
            open_backend: Some(Box::new(open_backend)),
            backend: None,
            audio: None,
            state: PlaybackState::default(),
            active: None,
            next_tag: 0,
            readout: None,
        }
    }

    pub fn with_backend(backend: B) -> Self {
        Self {
            open_backend: None,
            backend: Some(backend),
            audio: None,
            state: PlaybackState::default(),
            active: None,
            next_tag: 0,
            readout: None,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn status(&self) -> PlaybackStatus {
        self.state.status
    }

    pub fn is_playing(&self) -> bool {
        self.state.status == PlaybackStatus::Playing
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn audio(&self) -> Option<&DecodedAudio> {
        self.audio.as_deref()
    }

    pub fn duration(&self) -> f64 {
        self.audio.as_ref().map(|a| a.duration_seconds()).unwrap_or(0.0)
    }

    pub fn backend(&self) -> Option<&B> {
        self.backend.as_ref()
    }

    /// Token of the running readout loop. Cancelled on every transition away
    /// from `Playing`; `None` when not playing.
    pub fn readout_token(&self) -> Option<CancellationToken> {
        self.readout.clone().filter(|t| !t.is_cancelled())
    }

    /// Replaces the loaded audio. Any active source is halted and the
    /// playback state starts over.
    pub fn load(&mut self, audio: DecodedAudio) {
        self.halt_source();
        self.cancel_readout();
        self.state = PlaybackState::default();
        debug!(duration = audio.duration_seconds(), "audio loaded");
        self.audio = Some(Arc::new(audio));
    }

    /// Starts or resumes playback. Returns `false` without doing anything when
    /// no audio is loaded or playback is already running.
    pub fn play(&mut self) -> Result<bool, PlaybackError> {
        let Some(audio) = self.audio.clone() else {
            return Ok(false);
        };
        if self.is_playing() {
            return Ok(false);
        }

        let duration = audio.duration_seconds();
        let start_offset = if duration > 0.0 {
            self.state.pause_offset_seconds.rem_euclid(duration)
        } else {
            0.0
        };

        self.next_tag += 1;
        let tag = PlaybackTag(self.next_tag);

        let backend = self.ensure_backend()?;
        let source = backend.start_source(audio, start_offset, tag)?;
        let now = backend.current_time();

        self.active = Some((tag, source));
        self.state.engine_start_wall_clock = Some(now - start_offset);
        self.state.elapsed_seconds = start_offset;
        self.state.status = PlaybackStatus::Playing;

        self.cancel_readout();
        self.readout = Some(CancellationToken::new());

        info!(tag = tag.value(), offset = start_offset, "playback started");
        Ok(true)
    }

    /// Hard-stops the active source and remembers where it was.
    pub fn pause(&mut self) -> bool {
        if !self.is_playing() {
            return false;
        }

        let played = self.played_seconds();
        self.halt_source();
        self.cancel_readout();

        self.state.pause_offset_seconds = played;
        self.state.elapsed_seconds = played.min(self.duration());
        self.state.engine_start_wall_clock = None;
        self.state.status = PlaybackStatus::Paused;

        info!(offset = played, "playback paused");
        true
    }

    pub fn stop(&mut self) -> bool {
        if !matches!(
            self.state.status,
            PlaybackStatus::Playing | PlaybackStatus::Paused
        ) {
            return false;
        }

        self.halt_source();
        self.cancel_readout();
        self.reset_to_idle();

        info!("playback stopped");
        true
    }

    /// Handles an ended notification. Only the current source finishing near
    /// the end of the buffer resets playback; anything else is ignored.
    pub fn on_source_ended(&mut self, tag: PlaybackTag) -> bool {
        let current = self.active.as_ref().map(|(t, _)| *t);
        if current != Some(tag) || !self.is_playing() {
            debug!(tag = tag.value(), "ignoring ended notification from superseded source");
            return false;
        }

        let played = self.played_seconds();
        if played < self.duration() - NATURAL_END_EPSILON {
            debug!(tag = tag.value(), played, "ignoring early ended notification");
            return false;
        }

        // The source already finished; nothing left to stop.
        self.active = None;
        self.cancel_readout();
        self.reset_to_idle();

        info!(tag = tag.value(), "playback finished");
        true
    }

    /// One readout frame: applies pending ended notifications, then refreshes
    /// the elapsed time. Returns `None` once playback is no longer running.
    pub fn on_frame(&mut self) -> Option<f64> {
        let ended = match self.backend.as_mut() {
            Some(backend) => backend.take_ended(),
            None => Vec::new(),
        };
        for tag in ended {
            self.on_source_ended(tag);
        }

        if !self.is_playing() {
            return None;
        }

        let elapsed = self.played_seconds().clamp(0.0, self.duration());
        self.state.elapsed_seconds = elapsed;
        Some(elapsed)
    }

    fn played_seconds(&self) -> f64 {
        match (self.backend.as_ref(), self.state.engine_start_wall_clock) {
            (Some(backend), Some(start)) => backend.current_time() - start,
            _ => self.state.pause_offset_seconds,
        }
    }

    fn ensure_backend(&mut self) -> Result<&mut B, PlaybackError> {
        if self.backend.is_none() {
            let open = self.open_backend.as_mut().ok_or_else(|| {
                PlaybackError::DeviceUnavailable("no audio backend configured".to_string())
            })?;
            let backend = open()?;
            debug!("audio backend opened");
            self.backend = Some(backend);
        }
        self.backend
            .as_mut()
            .ok_or_else(|| PlaybackError::DeviceUnavailable("audio backend missing".to_string()))
    }

    fn halt_source(&mut self) {
        if let Some((tag, source)) = self.active.take() {
            debug!(tag = tag.value(), "stopping source");
            source.stop();
        }
    }

    fn cancel_readout(&mut self) {
        if let Some(token) = self.readout.take() {
            token.cancel();
        }
    }

    fn reset_to_idle(&mut self) {
        self.state.status = PlaybackStatus::Idle;
        self.state.pause_offset_seconds = 0.0;
        self.state.elapsed_seconds = 0.0;
        self.state.engine_start_wall_clock = None;
    }
}

impl<B: AudioBackend> Drop for PlaybackEngine<B> {
    fn drop(&mut self) {
        self.halt_source();
        self.cancel_readout();
    }
}
