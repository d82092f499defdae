use super::audio::DecodedAudio;
use super::playback::{AudioBackend, AudioSource, PlaybackError, PlaybackTag};

use parking_lot::Mutex;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink, Source};
use std::sync::Arc;
use std::time::{Duration, Instant};

type LiveSinks = Arc<Mutex<Vec<(PlaybackTag, Arc<Sink>)>>>;

/// Plays through the default output device. One sink per source.
pub struct RodioBackend {
    stream: OutputStream,
    epoch: Instant,
    live: LiveSinks,
    ended: Arc<Mutex<Vec<PlaybackTag>>>,
}

impl RodioBackend {
    pub fn open_default() -> Result<Self, PlaybackError> {
        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?;

        Ok(Self {
            stream,
            epoch: Instant::now(),
            live: Arc::new(Mutex::new(Vec::new())),
            ended: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

pub struct RodioSource {
    tag: PlaybackTag,
    sink: Arc<Sink>,
    live: LiveSinks,
    ended: Arc<Mutex<Vec<PlaybackTag>>>,
}

impl AudioSource for RodioSource {
    fn stop(self) {
        self.sink.stop();
        self.live.lock().retain(|(t, _)| *t != self.tag);
        self.ended.lock().push(self.tag);
    }
}

impl AudioBackend for RodioBackend {
    type Source = RodioSource;

    fn current_time(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn start_source(
        &mut self,
        buffer: Arc<DecodedAudio>,
        offset: f64,
        tag: PlaybackTag,
    ) -> Result<Self::Source, PlaybackError> {
        if !offset.is_finite() || offset < 0.0 {
            return Err(PlaybackError::SourceFailed(format!(
                "invalid start offset {offset}"
            )));
        }

        let samples = SamplesBuffer::new(1, buffer.sample_rate(), buffer.samples().to_vec());
        let sink = Arc::new(Sink::connect_new(self.stream.mixer()));
        sink.append(samples.skip_duration(Duration::from_secs_f64(offset)));

        self.live.lock().push((tag, sink.clone()));

        Ok(RodioSource {
            tag,
            sink,
            live: self.live.clone(),
            ended: self.ended.clone(),
        })
    }

    fn take_ended(&mut self) -> Vec<PlaybackTag> {
        let mut ended = std::mem::take(&mut *self.ended.lock());
        let mut live = self.live.lock();
        live.retain(|(tag, sink)| {
            if sink.empty() {
                ended.push(*tag);
                false
            } else {
                true
            }
        });
        ended
    }
}
