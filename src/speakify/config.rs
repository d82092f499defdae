use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-tts";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct SpeakifyConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub data_dir: Option<PathBuf>,
    pub request_timeout: Duration,
}

impl Default for SpeakifyConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            data_dir: None,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl SpeakifyConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| non_blank(lookup(key));
        let defaults = Self::default();

        let request_timeout = get("SPEAKIFY_REQUEST_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        Self {
            api_key: get("GEMINI_API_KEY").or_else(|| get("API_KEY")),
            base_url: get("SPEAKIFY_GEMINI_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            model: get("SPEAKIFY_TTS_MODEL").unwrap_or(defaults.model),
            data_dir: get("SPEAKIFY_DATA_DIR").map(PathBuf::from),
            request_timeout,
        }
    }

    /// Directory holding the history and session files.
    pub fn resolve_data_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("speakify")))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let t = v.trim().to_string();
        if t.is_empty() { None } else { Some(t) }
    })
}

/// Installs the global `tracing` subscriber. `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("speakify_lib=info,speakify=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
