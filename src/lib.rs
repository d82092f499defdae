pub mod speakify;

#[cfg(feature = "gui")]
mod desktop;

pub use speakify::config::{init_logging, SpeakifyConfig};
pub use speakify::converter::{Converter, ConverterError, ConverterSnapshot, WavDownload};
pub use speakify::gemini::{ApiError, GeminiClient, SpeechSynthesizer};
pub use speakify::playback::{AudioBackend, PlaybackEngine, PlaybackStatus};
pub use speakify::runtime::{spawn_converter, ConverterHandle, RuntimeOptions};
pub use speakify::types::{AppStatus, HistoryEntry, SpeechRequest, VoiceName};

#[cfg(feature = "gui")]
pub use desktop::run;
