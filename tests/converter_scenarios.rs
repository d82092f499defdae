use async_trait::async_trait;
use parking_lot::Mutex;
use speakify_lib::speakify::audio::RawAudio;
use speakify_lib::speakify::converter::{Converter, ConverterError};
use speakify_lib::speakify::gemini::{ApiError, SpeechSynthesizer};
use speakify_lib::speakify::history::HistoryStore;
use speakify_lib::speakify::playback::PlaybackEngine;
use speakify_lib::speakify::types::{AppStatus, InvalidInput, SpeechRequest, VoiceName};
use speakify_lib::speakify::virtual_backend::{VirtualBackend, VirtualClock};
use speakify_lib::speakify::wav::WAV_HEADER_LEN;
use std::sync::Arc;

/// Replays queued results and records every request it receives.
#[derive(Default)]
struct FakeSynthesizer {
    results: Mutex<Vec<Result<RawAudio, ApiError>>>,
    requests: Mutex<Vec<SpeechRequest>>,
}

impl FakeSynthesizer {
    fn with(results: Vec<Result<RawAudio, ApiError>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<RawAudio, ApiError> {
        self.requests.lock().push(request.clone());
        let mut results = self.results.lock();
        if results.is_empty() {
            return Err(ApiError::EmptyResponse);
        }
        results.remove(0)
    }
}

fn setup(
    results: Vec<Result<RawAudio, ApiError>>,
) -> (Converter<VirtualBackend>, Arc<FakeSynthesizer>, VirtualClock) {
    let fake = FakeSynthesizer::with(results);
    let backend = VirtualBackend::new();
    let clock = backend.clock();
    let converter = Converter::new(
        fake.clone(),
        PlaybackEngine::with_backend(backend),
        HistoryStore::in_memory(),
    );
    (converter, fake, clock)
}

fn silence(bytes: usize) -> RawAudio {
    RawAudio::from_pcm(vec![0u8; bytes])
}

#[tokio::test]
async fn scenario_a_hello_world_is_recorded() {
    let (mut conv, fake, _) = setup(vec![Ok(silence(2400))]);

    let entry = conv.generate("Hello world", VoiceName::Kore).await.unwrap();

    assert_eq!(fake.calls(), 1);
    assert_eq!(conv.status(), AppStatus::Idle);
    assert_eq!(entry.voice, VoiceName::Kore);
    assert_eq!(entry.text_preview, "Hello world");
    assert!((entry.duration_seconds - 0.05).abs() < 1e-9);
    assert_eq!(conv.history().entries(), &[entry]);
}

#[tokio::test]
async fn scenario_a_600_samples_last_25_ms() {
    let (mut conv, _, _) = setup(vec![Ok(silence(1200))]);

    let entry = conv.generate("Hello world", VoiceName::Kore).await.unwrap();

    assert!((entry.duration_seconds - 0.025).abs() < 1e-9);
    assert!((conv.snapshot().duration_seconds - 0.025).abs() < 1e-9);
}

#[tokio::test]
async fn scenario_b_long_text_is_truncated_in_history() {
    let (mut conv, _, _) = setup(vec![Ok(silence(480))]);
    let text = "abcdefghij".repeat(15);
    assert_eq!(text.chars().count(), 150);

    let entry = conv.generate(&text, VoiceName::Puck).await.unwrap();

    assert_eq!(entry.text_preview.chars().count(), 103);
    assert_eq!(&entry.text_preview[..100], &text[..100]);
    assert!(entry.text_preview.ends_with("..."));
}

#[tokio::test]
async fn scenario_c_resume_continues_from_pause() {
    let (mut conv, _, clock) = setup(vec![Ok(silence(48_000 * 5))]);
    conv.generate("Five seconds", VoiceName::Charon).await.unwrap();

    assert!(conv.play().unwrap());
    clock.advance(2.0);
    assert_eq!(conv.tick(), Some(2.0));
    assert!(conv.pause());
    assert_eq!(conv.status(), AppStatus::Paused);

    assert!(conv.play().unwrap());
    let starts = clock.started();
    assert_eq!(starts.len(), 2);
    assert!((starts[1].1 - 2.0).abs() < 1e-9);
    assert_eq!(conv.status(), AppStatus::Playing);
}

#[tokio::test]
async fn scenario_d_failure_keeps_previous_audio() {
    let (mut conv, _, clock) = setup(vec![
        Ok(silence(48_000)),
        Err(ApiError::ApiResponse {
            status: 503,
            message: "unavailable".to_string(),
        }),
    ]);
    conv.generate("first", VoiceName::Kore).await.unwrap();
    let before = conv.download().unwrap();

    let err = conv.generate("second", VoiceName::Fenrir).await.unwrap_err();
    match err {
        ConverterError::Api(api) => assert!(api.is_transport()),
        other => panic!("Expected ConverterError::Api, got {:?}", other),
    }

    assert_eq!(conv.status(), AppStatus::Error);
    assert!(conv.last_error().is_some());
    assert_eq!(conv.history().len(), 1);
    assert_eq!(conv.download().unwrap().bytes, before.bytes);
    assert_eq!(conv.snapshot().voice, Some(VoiceName::Kore));

    assert!(conv.play().unwrap());
    clock.advance(0.25);
    assert_eq!(conv.tick(), Some(0.25));
}

#[tokio::test]
async fn scenario_e_blank_text_is_a_no_op() {
    let (mut conv, fake, _) = setup(vec![]);

    let err = conv.generate("", VoiceName::Kore).await.unwrap_err();
    assert!(matches!(err, ConverterError::InvalidInput(InvalidInput::Blank)));
    let err = conv.generate("   ", VoiceName::Kore).await.unwrap_err();
    assert!(matches!(err, ConverterError::InvalidInput(InvalidInput::Blank)));

    assert_eq!(fake.calls(), 0);
    assert_eq!(conv.status(), AppStatus::Idle);
    assert!(conv.history().is_empty());
}

#[tokio::test]
async fn natural_end_returns_to_idle() {
    let (mut conv, _, clock) = setup(vec![Ok(silence(24_000))]);
    conv.generate("half a second", VoiceName::Zephyr).await.unwrap();

    conv.play().unwrap();
    clock.advance(0.3);
    assert!(conv.tick().is_some());
    clock.advance(0.3);
    assert_eq!(conv.tick(), None);

    assert_eq!(conv.status(), AppStatus::Idle);
    let snapshot = conv.snapshot();
    assert_eq!(snapshot.elapsed_seconds, 0.0);
    assert!(snapshot.has_audio);
    assert!(conv.readout_token().is_none());
}

#[tokio::test]
async fn download_wraps_current_pcm() {
    let pcm: Vec<u8> = (0..2400u32).map(|i| (i % 251) as u8).collect();
    let (mut conv, _, _) = setup(vec![Ok(RawAudio::from_pcm(pcm.clone()))]);
    conv.generate("Hello world", VoiceName::Kore).await.unwrap();

    let download = conv.download().unwrap();
    assert!(download.file_name.starts_with("speakify_Kore_"));
    assert_eq!(download.bytes.len(), WAV_HEADER_LEN + pcm.len());
    assert_eq!(&download.bytes[WAV_HEADER_LEN..], &pcm[..]);
}

#[tokio::test]
async fn history_mutations_go_through_converter() {
    let (mut conv, _, _) = setup(vec![Ok(silence(480)), Ok(silence(480))]);
    let first = conv.generate("one", VoiceName::Kore).await.unwrap();
    conv.generate("two", VoiceName::Kore).await.unwrap();

    assert!(conv.delete_history(first.id).unwrap());
    assert_eq!(conv.history().len(), 1);
    conv.clear_history().unwrap();
    assert!(conv.history().is_empty());
}
