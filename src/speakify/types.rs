use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Sample rate of every PCM payload returned by the speech endpoint.
pub const SAMPLE_RATE: u32 = 24_000;
pub const CHANNELS: u16 = 1;
pub const BITS_PER_SAMPLE: u16 = 16;

pub const MAX_TEXT_CHARS: usize = 5000;
pub const PREVIEW_CHARS: usize = 100;
pub const PREVIEW_ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoiceName {
    #[default]
    Kore,
    Puck,
    Charon,
    Fenrir,
    Zephyr,
}

impl VoiceName {
    pub const ALL: [VoiceName; 5] = [
        VoiceName::Kore,
        VoiceName::Puck,
        VoiceName::Charon,
        VoiceName::Fenrir,
        VoiceName::Zephyr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceName::Kore => "Kore",
            VoiceName::Puck => "Puck",
            VoiceName::Charon => "Charon",
            VoiceName::Fenrir => "Fenrir",
            VoiceName::Zephyr => "Zephyr",
        }
    }
}

impl fmt::Display for VoiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown voice: {0}")]
pub struct UnknownVoice(pub String);

impl FromStr for VoiceName {
    type Err = UnknownVoice;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        VoiceName::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(t))
            .ok_or_else(|| UnknownVoice(t.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidInput {
    #[error("Text is empty")]
    Blank,

    #[error("Text is {len} characters, the limit is {max}")]
    TooLong { len: usize, max: usize },
}

/// Text plus voice, validated for submission to the speech endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechRequest {
    text: String,
    voice: VoiceName,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>, voice: VoiceName) -> Result<Self, InvalidInput> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(InvalidInput::Blank);
        }
        let len = text.chars().count();
        if len > MAX_TEXT_CHARS {
            return Err(InvalidInput::TooLong {
                len,
                max: MAX_TEXT_CHARS,
            });
        }
        Ok(Self { text, voice })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn voice(&self) -> VoiceName {
        self.voice
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    #[default]
    Idle,
    Generating,
    Playing,
    Paused,
    Error,
}

/// Metadata of one successful generation. Audio bytes are never stored.
///
/// Field names on disk follow the history file written by earlier releases
/// (`text`, `date`, `duration`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    #[serde(rename = "text")]
    pub text_preview: String,
    pub voice: VoiceName,
    #[serde(rename = "duration", default)]
    pub duration_seconds: f64,
    #[serde(rename = "date")]
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(text: &str, voice: VoiceName, duration_seconds: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            text_preview: preview_text(text),
            voice,
            duration_seconds,
            created_at: Utc::now(),
        }
    }
}

pub fn preview_text(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    out.push_str(PREVIEW_ELLIPSIS);
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}

/// Formats seconds as `m:ss` for the progress readout.
pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{}:{:02}", total / 60, total % 60)
}
