use async_trait::async_trait;
use speakify_lib::speakify::audio::RawAudio;
use speakify_lib::speakify::converter::ConverterError;
use speakify_lib::speakify::gemini::{ApiError, SpeechSynthesizer};
use speakify_lib::speakify::history::HistoryStore;
use speakify_lib::speakify::runtime::{spawn_converter, ConverterHandle, RuntimeOptions};
use speakify_lib::speakify::types::{AppStatus, SpeechRequest, VoiceName};
use speakify_lib::speakify::virtual_backend::{VirtualBackend, VirtualClock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Returns `bytes` of silence once `release` is notified.
struct Gated {
    bytes: usize,
    release: Arc<Notify>,
}

#[async_trait]
impl SpeechSynthesizer for Gated {
    async fn synthesize(&self, _request: &SpeechRequest) -> Result<RawAudio, ApiError> {
        self.release.notified().await;
        Ok(RawAudio::from_pcm(vec![0u8; self.bytes]))
    }
}

struct Immediate(usize);

#[async_trait]
impl SpeechSynthesizer for Immediate {
    async fn synthesize(&self, _request: &SpeechRequest) -> Result<RawAudio, ApiError> {
        Ok(RawAudio::from_pcm(vec![0u8; self.0]))
    }
}

fn start(synthesizer: Arc<dyn SpeechSynthesizer>) -> (ConverterHandle, VirtualClock) {
    let backend = VirtualBackend::new();
    let clock = backend.clock();
    let mut slot = Some(backend);
    let handle = spawn_converter(
        synthesizer,
        move || Ok(slot.take().unwrap_or_default()),
        HistoryStore::in_memory(),
        RuntimeOptions {
            frame_interval: Duration::from_millis(2),
            ..RuntimeOptions::default()
        },
    )
    .unwrap();
    (handle, clock)
}

async fn wait_for(
    handle: &ConverterHandle,
    what: impl Fn(&speakify_lib::ConverterSnapshot) -> bool,
) -> speakify_lib::ConverterSnapshot {
    let mut rx = handle.subscribe();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| what(s)))
        .await
        .expect("timed out waiting for snapshot")
        .expect("converter stopped");
    snapshot.clone()
}

#[tokio::test]
async fn readout_tracks_clock_and_stops_at_end() {
    let (handle, clock) = start(Arc::new(Immediate(48_000 * 3)));

    let entry = handle.generate("three seconds", VoiceName::Kore).await.unwrap();
    assert_eq!(entry.duration_seconds, 3.0);
    assert!(handle.play().await.unwrap());

    clock.advance(1.5);
    let snap = wait_for(&handle, |s| s.elapsed_seconds >= 1.5).await;
    assert_eq!(snap.status, AppStatus::Playing);

    clock.advance(2.0);
    let snap = wait_for(&handle, |s| s.status == AppStatus::Idle).await;
    assert_eq!(snap.elapsed_seconds, 0.0);
    assert!(snap.has_audio);

    handle.shutdown();
}

#[tokio::test]
async fn pause_freezes_readout() {
    let (handle, clock) = start(Arc::new(Immediate(48_000 * 4)));
    handle.generate("four seconds", VoiceName::Puck).await.unwrap();

    assert!(handle.toggle_play().await.unwrap());
    clock.advance(1.0);
    wait_for(&handle, |s| s.elapsed_seconds >= 1.0).await;

    assert!(handle.toggle_play().await.unwrap());
    let paused = handle.snapshot();
    assert_eq!(paused.status, AppStatus::Paused);

    clock.advance(1.0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(handle.snapshot().elapsed_seconds, paused.elapsed_seconds);

    assert!(handle.stop().await.unwrap());
    assert_eq!(handle.snapshot().status, AppStatus::Idle);
    handle.shutdown();
}

#[tokio::test]
async fn second_generate_is_busy_and_cancel_discards_result() {
    let release = Arc::new(Notify::new());
    let (handle, _clock) = start(Arc::new(Gated {
        bytes: 4800,
        release: release.clone(),
    }));

    let first = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.generate("first", VoiceName::Kore).await })
    };
    wait_for(&handle, |s| s.status == AppStatus::Generating).await;

    let busy = handle.generate("second", VoiceName::Kore).await;
    assert!(matches!(busy, Err(ConverterError::Busy)));

    assert!(handle.cancel_generation().await.unwrap());
    let outcome = first.await.unwrap();
    assert!(matches!(outcome, Err(ConverterError::Cancelled)));

    release.notify_one();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let snap = handle.snapshot();
    assert_eq!(snap.status, AppStatus::Idle);
    assert!(!snap.has_audio);
    assert!(handle.history().await.unwrap().is_empty());
    handle.shutdown();
}

#[tokio::test]
async fn download_and_history_through_handle() {
    let (handle, _clock) = start(Arc::new(Immediate(2400)));
    assert!(matches!(
        handle.download().await,
        Err(ConverterError::NoAudio)
    ));

    let entry = handle.generate("Hello world", VoiceName::Zephyr).await.unwrap();
    let download = handle.download().await.unwrap();
    assert_eq!(download.bytes.len(), 44 + 2400);

    assert_eq!(handle.history().await.unwrap(), vec![entry.clone()]);
    assert!(handle.delete_history(entry.id).await.unwrap());
    handle.clear_history().await.unwrap();
    assert!(handle.history().await.unwrap().is_empty());
    handle.shutdown();
}

#[tokio::test]
async fn save_download_writes_file_through_handle() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, _clock) = start(Arc::new(Immediate(2400)));
    assert!(matches!(
        handle.save_download(dir.path()).await,
        Err(ConverterError::NoAudio)
    ));

    handle.generate("Hello world", VoiceName::Fenrir).await.unwrap();
    let path = handle.save_download(dir.path().join("downloads")).await.unwrap();

    assert_eq!(path.parent(), Some(dir.path().join("downloads").as_path()));
    let name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("speakify_Fenrir_"));
    assert!(name.ends_with(".wav"));
    assert_eq!(std::fs::read(&path).unwrap().len(), 44 + 2400);
    handle.shutdown();
}

#[tokio::test]
async fn closed_runtime_reports_closed() {
    let (handle, _clock) = start(Arc::new(Immediate(2)));
    handle.shutdown();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(matches!(handle.play().await, Err(ConverterError::Closed)));
}
