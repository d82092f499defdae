use crate::speakify::audio::RawAudio;
use crate::speakify::config::{init_logging, SpeakifyConfig};
use crate::speakify::converter::ConverterSnapshot;
use crate::speakify::gemini::{ApiError, GeminiClient, SpeechSynthesizer};
use crate::speakify::history::HistoryStore;
use crate::speakify::rodio_backend::RodioBackend;
use crate::speakify::runtime::{spawn_converter, ConverterHandle, RuntimeOptions};
use crate::speakify::session::SessionStore;
use crate::speakify::store::StoreError;
use crate::speakify::types::{HistoryEntry, SpeechRequest, User, VoiceName};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tauri::async_runtime::Mutex;
use tauri::{Emitter, Manager};
use tracing::{info, warn};
use uuid::Uuid;

struct AppState {
    converter: ConverterHandle,
    session: Mutex<SessionStore>,
    gemini: Option<Arc<GeminiClient>>,
}

/// Stands in for the Gemini client when no API key is configured, so the
/// window still opens and reports the problem on first use.
struct Unconfigured;

#[async_trait]
impl SpeechSynthesizer for Unconfigured {
    async fn synthesize(&self, _request: &SpeechRequest) -> Result<RawAudio, ApiError> {
        Err(ApiError::NoApiKey {
            provider: "gemini".to_string(),
        })
    }
}

#[tauri::command]
async fn speakify_generate(
    state: tauri::State<'_, AppState>,
    text: String,
    voice: VoiceName,
) -> Result<HistoryEntry, String> {
    state
        .converter
        .generate(text, voice)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn speakify_cancel_generation(state: tauri::State<'_, AppState>) -> Result<bool, String> {
    state
        .converter
        .cancel_generation()
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn speakify_play(state: tauri::State<'_, AppState>) -> Result<bool, String> {
    state.converter.play().await.map_err(|e| e.to_string())
}

#[tauri::command]
async fn speakify_pause(state: tauri::State<'_, AppState>) -> Result<bool, String> {
    state.converter.pause().await.map_err(|e| e.to_string())
}

#[tauri::command]
async fn speakify_toggle_play(state: tauri::State<'_, AppState>) -> Result<bool, String> {
    state.converter.toggle_play().await.map_err(|e| e.to_string())
}

#[tauri::command]
async fn speakify_stop(state: tauri::State<'_, AppState>) -> Result<bool, String> {
    state.converter.stop().await.map_err(|e| e.to_string())
}

/// Saves the current audio as a WAV file in the user's download folder.
#[tauri::command]
async fn speakify_download(
    app: tauri::AppHandle,
    state: tauri::State<'_, AppState>,
) -> Result<String, String> {
    let dir = app.path().download_dir().map_err(|e| e.to_string())?;
    let path = state
        .converter
        .save_download(dir)
        .await
        .map_err(|e| e.to_string())?;
    Ok(path.display().to_string())
}

#[tauri::command]
async fn speakify_status(state: tauri::State<'_, AppState>) -> Result<ConverterSnapshot, String> {
    Ok(state.converter.snapshot())
}

#[tauri::command]
async fn speakify_voices() -> Result<Vec<VoiceName>, String> {
    Ok(VoiceName::ALL.to_vec())
}

#[tauri::command]
async fn speakify_history(state: tauri::State<'_, AppState>) -> Result<Vec<HistoryEntry>, String> {
    if !state.session.lock().await.can_view_history() {
        return Err("Sign in to view history".to_string());
    }
    state.converter.history().await.map_err(|e| e.to_string())
}

#[tauri::command]
async fn speakify_delete_history(
    state: tauri::State<'_, AppState>,
    id: Uuid,
) -> Result<bool, String> {
    state
        .converter
        .delete_history(id)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn speakify_clear_history(state: tauri::State<'_, AppState>) -> Result<(), String> {
    state
        .converter
        .clear_history()
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn speakify_login(state: tauri::State<'_, AppState>) -> Result<User, String> {
    state.session.lock().await.login().map_err(|e| e.to_string())
}

#[tauri::command]
async fn speakify_logout(state: tauri::State<'_, AppState>) -> Result<(), String> {
    state.session.lock().await.logout().map_err(|e| e.to_string())
}

#[tauri::command]
async fn speakify_current_user(state: tauri::State<'_, AppState>) -> Result<Option<User>, String> {
    Ok(state.session.lock().await.current().cloned())
}

#[tauri::command]
async fn speakify_test_connection(state: tauri::State<'_, AppState>) -> Result<String, String> {
    let client = state.gemini.as_ref().ok_or_else(|| {
        ApiError::NoApiKey {
            provider: "gemini".to_string(),
        }
        .to_string()
    })?;

    let t0 = Instant::now();
    client.test_connection().await.map_err(|e| e.to_string())?;
    let ms = t0.elapsed().as_millis();

    Ok(format!(
        "provider: gemini\nendpoint: {}\nmodel: {}\nauth: x-goog-api-key (set)\nlatencyMs: {}",
        client.generate_content_url(),
        client.model(),
        ms
    ))
}

pub fn run() {
    init_logging();
    let config = SpeakifyConfig::from_env();

    tauri::Builder::default()
        .plugin(tauri_plugin_updater::Builder::new().build())
        .setup(move |app| {
            let data_dir = config
                .resolve_data_dir()
                .or_else(|| app.path().app_data_dir().ok())
                .ok_or(StoreError::NoDataDir)?;
            let history = HistoryStore::open(&data_dir)?;
            let session = SessionStore::open(&data_dir)?;

            let gemini = match GeminiClient::new(&config) {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    warn!(error = %e, "speech client not configured");
                    None
                }
            };
            let synthesizer: Arc<dyn SpeechSynthesizer> = match &gemini {
                Some(client) => client.clone() as Arc<dyn SpeechSynthesizer>,
                None => Arc::new(Unconfigured),
            };

            let converter = spawn_converter(
                synthesizer,
                RodioBackend::open_default,
                history,
                RuntimeOptions::default(),
            )?;

            let mut snapshots = converter.subscribe();
            let handle = app.handle().clone();
            tauri::async_runtime::spawn(async move {
                while snapshots.changed().await.is_ok() {
                    let snapshot = snapshots.borrow_and_update().clone();
                    let _ = handle.emit("speakify:status", snapshot);
                }
            });

            app.manage(AppState {
                converter,
                session: Mutex::new(session),
                gemini,
            });
            info!(data_dir = %data_dir.display(), "speakify ready");
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            speakify_generate,
            speakify_cancel_generation,
            speakify_play,
            speakify_pause,
            speakify_toggle_play,
            speakify_stop,
            speakify_download,
            speakify_status,
            speakify_voices,
            speakify_history,
            speakify_delete_history,
            speakify_clear_history,
            speakify_login,
            speakify_logout,
            speakify_current_user,
            speakify_test_connection,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
