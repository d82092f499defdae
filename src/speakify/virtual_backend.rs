//! Deterministic audio backend driven by an explicitly advanced clock.
//!
//! Nothing is rendered. Sources "play" for the remaining length of their
//! buffer in clock time, which makes the engine usable headless and in tests.

use super::audio::DecodedAudio;
use super::playback::{AudioBackend, AudioSource, PlaybackError, PlaybackTag};

use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Shared {
    now: f64,
    voices: Vec<Voice>,
    ended: Vec<PlaybackTag>,
    started: Vec<(PlaybackTag, f64)>,
}

#[derive(Debug)]
struct Voice {
    tag: PlaybackTag,
    ends_at: f64,
}

impl Shared {
    fn finish_due_voices(&mut self) {
        let now = self.now;
        let (due, live): (Vec<Voice>, Vec<Voice>) =
            self.voices.drain(..).partition(|v| v.ends_at <= now);
        self.voices = live;
        self.ended.extend(due.into_iter().map(|v| v.tag));
    }
}

/// Handle used to move time forward and inspect what the backend did.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    shared: Arc<Mutex<Shared>>,
}

impl VirtualClock {
    pub fn now(&self) -> f64 {
        self.shared.lock().now
    }

    /// Advances the clock; sources whose buffer ran out report ended.
    pub fn advance(&self, seconds: f64) {
        let mut shared = self.shared.lock();
        shared.now += seconds.max(0.0);
        shared.finish_due_voices();
    }

    /// Advances the clock without delivering ended notifications, as when a
    /// frame lands before the backend reports the end of a source.
    pub fn advance_without_ending(&self, seconds: f64) {
        self.shared.lock().now += seconds.max(0.0);
    }

    /// Every source started so far, with its start offset.
    pub fn started(&self) -> Vec<(PlaybackTag, f64)> {
        self.shared.lock().started.clone()
    }

    pub fn active_sources(&self) -> usize {
        self.shared.lock().voices.len()
    }
}

pub struct VirtualBackend {
    shared: Arc<Mutex<Shared>>,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    pub fn clock(&self) -> VirtualClock {
        VirtualClock {
            shared: self.shared.clone(),
        }
    }
}

impl Default for VirtualBackend {
    fn default() -> Self {
        Self::new()
    }
}

pub struct VirtualSource {
    tag: PlaybackTag,
    shared: Arc<Mutex<Shared>>,
}

impl AudioSource for VirtualSource {
    fn stop(self) {
        let mut shared = self.shared.lock();
        let before = shared.voices.len();
        shared.voices.retain(|v| v.tag != self.tag);
        // Stopped sources report ended too, like a browser audio graph.
        if shared.voices.len() != before {
            shared.ended.push(self.tag);
        }
    }
}

impl AudioBackend for VirtualBackend {
    type Source = VirtualSource;

    fn current_time(&self) -> f64 {
        self.shared.lock().now
    }

    fn start_source(
        &mut self,
        buffer: Arc<DecodedAudio>,
        offset: f64,
        tag: PlaybackTag,
    ) -> Result<Self::Source, PlaybackError> {
        let mut shared = self.shared.lock();
        let remaining = (buffer.duration_seconds() - offset).max(0.0);
        let ends_at = shared.now + remaining;
        shared.voices.push(Voice { tag, ends_at });
        shared.started.push((tag, offset));
        shared.finish_due_voices();

        Ok(VirtualSource {
            tag,
            shared: self.shared.clone(),
        })
    }

    fn take_ended(&mut self) -> Vec<PlaybackTag> {
        std::mem::take(&mut self.shared.lock().ended)
    }
}
