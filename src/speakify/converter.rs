use super::audio::{AudioError, RawAudio};
use super::gemini::{ApiError, SpeechSynthesizer};
use super::history::HistoryStore;
use super::playback::{AudioBackend, PlaybackEngine, PlaybackError, PlaybackStatus};
use super::store::StoreError;
use super::types::{format_time, AppStatus, HistoryEntry, InvalidInput, SpeechRequest, VoiceName};
use super::wav::encode_wav;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ConverterError {
    #[error(transparent)]
    InvalidInput(#[from] InvalidInput),

    #[error("A generation is already in progress")]
    Busy,

    #[error("No audio has been generated yet")]
    NoAudio,

    #[error("Generation {0} was superseded by a newer request")]
    Stale(u64),

    #[error("Generation was cancelled")]
    Cancelled,

    #[error("Converter is no longer running")]
    Closed,

    #[error("Failed to generate speech: {0}")]
    Api(#[from] ApiError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to write file: {0}")]
    Io(#[from] std::io::Error),
}

/// A generation that has been accepted and is waiting for the remote call.
#[derive(Debug, Clone)]
pub struct PendingGeneration {
    pub sequence: u64,
    pub request: SpeechRequest,
}

#[derive(Debug, Clone)]
struct Generation {
    raw: RawAudio,
    voice: VoiceName,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct WavDownload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverterSnapshot {
    pub status: AppStatus,
    pub elapsed_seconds: f64,
    pub duration_seconds: f64,
    /// Readout text, `m:ss / m:ss`.
    pub progress_label: String,
    pub has_audio: bool,
    pub voice: Option<VoiceName>,
    pub error: Option<String>,
}

impl Default for ConverterSnapshot {
    fn default() -> Self {
        Self {
            status: AppStatus::Idle,
            elapsed_seconds: 0.0,
            duration_seconds: 0.0,
            progress_label: progress_label(0.0, 0.0),
            has_audio: false,
            voice: None,
            error: None,
        }
    }
}

fn progress_label(elapsed: f64, duration: f64) -> String {
    format!("{} / {}", format_time(elapsed), format_time(duration))
}

/// Orchestrates one text-to-speech session: request, playback, download and
/// history bookkeeping.
pub struct Converter<B: AudioBackend> {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    engine: PlaybackEngine<B>,
    history: HistoryStore,
    current: Option<Generation>,
    pending: Option<PendingGeneration>,
    sequence: u64,
    last_error: Option<String>,
}

impl<B: AudioBackend> Converter<B> {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        engine: PlaybackEngine<B>,
        history: HistoryStore,
    ) -> Self {
        Self {
            synthesizer,
            engine,
            history,
            current: None,
            pending: None,
            sequence: 0,
            last_error: None,
        }
    }

    pub fn status(&self) -> AppStatus {
        if self.pending.is_some() {
            return AppStatus::Generating;
        }
        match self.engine.status() {
            PlaybackStatus::Playing => AppStatus::Playing,
            PlaybackStatus::Paused => AppStatus::Paused,
            PlaybackStatus::Idle if self.last_error.is_some() => AppStatus::Error,
            PlaybackStatus::Idle => AppStatus::Idle,
        }
    }

    pub fn snapshot(&self) -> ConverterSnapshot {
        let elapsed_seconds = self.engine.state().elapsed_seconds;
        let duration_seconds = self.engine.duration();
        ConverterSnapshot {
            status: self.status(),
            elapsed_seconds,
            duration_seconds,
            progress_label: progress_label(elapsed_seconds, duration_seconds),
            has_audio: self.current.is_some(),
            voice: self.current.as_ref().map(|g| g.voice),
            error: self.last_error.clone(),
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn engine(&self) -> &PlaybackEngine<B> {
        &self.engine
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn synthesizer(&self) -> Arc<dyn SpeechSynthesizer> {
        self.synthesizer.clone()
    }

    pub fn current_audio(&self) -> Option<&RawAudio> {
        self.current.as_ref().map(|g| &g.raw)
    }

    /// Validates the input and claims the single in-flight slot. Active
    /// playback is stopped before the request goes out.
    pub fn begin_generate(
        &mut self,
        text: &str,
        voice: VoiceName,
    ) -> Result<PendingGeneration, ConverterError> {
        let request = SpeechRequest::new(text, voice)?;
        if let Some(pending) = &self.pending {
            warn!(sequence = pending.sequence, "generation already in flight");
            return Err(ConverterError::Busy);
        }

        self.engine.stop();
        self.sequence += 1;
        self.last_error = None;

        let pending = PendingGeneration {
            sequence: self.sequence,
            request,
        };
        self.pending = Some(pending.clone());

        info!(sequence = pending.sequence, voice = %voice, "generation started");
        Ok(pending)
    }

    /// Applies the outcome of a remote call. Results for anything but the
    /// latest pending request are discarded.
    pub fn finish_generate(
        &mut self,
        sequence: u64,
        result: Result<RawAudio, ApiError>,
    ) -> Result<HistoryEntry, ConverterError> {
        let is_latest = self
            .pending
            .as_ref()
            .is_some_and(|p| p.sequence == sequence);
        if !is_latest {
            warn!(sequence, "discarding result of superseded generation");
            return Err(ConverterError::Stale(sequence));
        }
        let Some(pending) = self.pending.take() else {
            return Err(ConverterError::Stale(sequence));
        };

        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                error!(sequence, error = %e, "generation failed");
                self.last_error = Some(format!("Failed to generate speech: {e}"));
                return Err(e.into());
            }
        };

        let decoded = raw.decode();
        let duration = decoded.duration_seconds();
        self.engine.load(decoded);

        let voice = pending.request.voice();
        self.current = Some(Generation {
            raw,
            voice,
            created_at: Utc::now(),
        });

        let entry = HistoryEntry::new(pending.request.text(), voice, duration);
        if let Err(e) = self.history.add(entry.clone()) {
            warn!(error = %e, "failed to record history entry");
        }

        info!(sequence, duration, "generation finished");
        Ok(entry)
    }

    /// Abandons the in-flight request. Its result will be discarded on arrival.
    pub fn cancel_generation(&mut self) -> bool {
        match self.pending.take() {
            Some(p) => {
                info!(sequence = p.sequence, "generation cancelled");
                true
            }
            None => false,
        }
    }

    /// Generates speech end to end: validate, call the remote endpoint, apply.
    pub async fn generate(
        &mut self,
        text: &str,
        voice: VoiceName,
    ) -> Result<HistoryEntry, ConverterError> {
        let pending = self.begin_generate(text, voice)?;
        let synthesizer = self.synthesizer.clone();
        let result = synthesizer.synthesize(&pending.request).await;
        self.finish_generate(pending.sequence, result)
    }

    pub fn play(&mut self) -> Result<bool, ConverterError> {
        if self.pending.is_some() {
            return Ok(false);
        }
        let started = self.engine.play()?;
        if started {
            self.last_error = None;
        }
        Ok(started)
    }

    pub fn pause(&mut self) -> bool {
        self.engine.pause()
    }

    pub fn stop(&mut self) -> bool {
        self.engine.stop()
    }

    /// Pauses when playing, plays otherwise.
    pub fn toggle_play(&mut self) -> Result<bool, ConverterError> {
        if self.engine.is_playing() {
            Ok(self.pause())
        } else {
            self.play()
        }
    }

    /// Advances the elapsed-time readout by one frame.
    pub fn tick(&mut self) -> Option<f64> {
        self.engine.on_frame()
    }

    pub fn readout_token(&self) -> Option<CancellationToken> {
        self.engine.readout_token()
    }

    pub fn download(&self) -> Result<WavDownload, ConverterError> {
        let generation = self.current.as_ref().ok_or(ConverterError::NoAudio)?;
        let bytes = encode_wav(&generation.raw)?;
        Ok(WavDownload {
            file_name: download_file_name(generation.voice, generation.created_at),
            bytes,
        })
    }

    /// Writes the current audio as a WAV file into `dir`.
    pub fn save_download(&self, dir: &Path) -> Result<PathBuf, ConverterError> {
        let download = self.download()?;
        fs::create_dir_all(dir)?;
        let path = dir.join(&download.file_name);
        fs::write(&path, &download.bytes)?;
        info!(path = %path.display(), bytes = download.bytes.len(), "audio saved");
        Ok(path)
    }

    pub fn delete_history(&mut self, id: Uuid) -> Result<bool, ConverterError> {
        Ok(self.history.delete(id)?)
    }

    pub fn clear_history(&mut self) -> Result<(), ConverterError> {
        Ok(self.history.clear()?)
    }
}

pub fn download_file_name(voice: VoiceName, created_at: DateTime<Utc>) -> String {
    format!("speakify_{}_{}.wav", voice, created_at.timestamp_millis())
}
