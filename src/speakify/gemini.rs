use super::audio::{decode_base64, AudioError, RawAudio};
use super::config::SpeakifyConfig;
use super::types::{SpeechRequest, VoiceName};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("No API key set for provider: {provider}")]
    NoApiKey { provider: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned error: {status} - {message}")]
    ApiResponse { status: u16, message: String },

    #[error("No audio data returned from API")]
    EmptyResponse,

    #[error(transparent)]
    Audio(#[from] AudioError),
}

impl ApiError {
    /// Network or HTTP-level failure, including rate limiting and quota errors.
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Http(_) | ApiError::ApiResponse { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::ApiResponse { status, .. } => Some(*status),
            ApiError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Turns text into raw PCM audio. One call is one remote request; nothing is
/// retried or cached.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<RawAudio, ApiError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: VoiceName,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    data: String,
}

impl GenerateContentResponse {
    fn into_audio_payload(self) -> Option<InlineData> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .find_map(|p| p.inline_data)
            .filter(|d| !d.data.is_empty())
    }
}

/// Gemini `generateContent` client configured for audio output.
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(config: &SpeakifyConfig) -> Result<Self, ApiError> {
        let api_key = config
            .api_key
            .clone()
            .and_then(|k| {
                let t = k.trim().to_string();
                if t.is_empty() { None } else { Some(t) }
            })
            .ok_or_else(|| ApiError::NoApiKey {
                provider: "gemini".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            model: config.model.trim().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn generate_content_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    pub fn model_url(&self) -> String {
        format!("{}/v1beta/models/{}", self.base_url, self.model)
    }

    /// Fetches the model's metadata to confirm the key and model are usable.
    pub async fn test_connection(&self) -> Result<(), ApiError> {
        let response = self
            .client
            .get(self.model_url())
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::ApiResponse {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiClient {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<RawAudio, ApiError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![TextPart {
                    text: request.text(),
                }],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: request.voice(),
                        },
                    },
                },
            },
        };

        debug!(
            voice = %request.voice(),
            chars = request.text().chars().count(),
            model = %self.model,
            "requesting speech"
        );

        let response = self
            .client
            .post(self.generate_content_url())
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "speech request failed");
            return Err(ApiError::ApiResponse {
                status: status.as_u16(),
                message: body,
            });
        }

        let resp: GenerateContentResponse = response.json().await?;
        let payload = resp.into_audio_payload().ok_or(ApiError::EmptyResponse)?;
        if let Some(mime) = payload.mime_type.as_deref() {
            debug!(mime, "audio payload received");
        }

        let raw = decode_base64(&payload.data)?;
        info!(
            voice = %request.voice(),
            bytes = raw.pcm_bytes().len(),
            duration = raw.duration_seconds(),
            "speech generated"
        );
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_body_matches_wire_format() {
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![TextPart { text: "Hello" }],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: VoiceName::Puck,
                        },
                    },
                },
            },
        };

        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "contents": [{ "parts": [{ "text": "Hello" }] }],
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": {
                        "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": "Puck" } }
                    }
                }
            })
        );
    }

    #[test]
    fn payload_is_taken_from_first_inline_part() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "ignored" },
                    { "inlineData": { "mimeType": "audio/L16;codec=pcm;rate=24000", "data": "AAA=" } }
                ]}
            }]
        }))
        .unwrap();

        let payload = resp.into_audio_payload().unwrap();
        assert_eq!(payload.data, "AAA=");
    }

    #[test]
    fn missing_payload_is_none() {
        for value in [
            json!({}),
            json!({ "candidates": [] }),
            json!({ "candidates": [{ "content": { "parts": [{ "text": "no audio" }] } }] }),
            json!({ "candidates": [{ "content": { "parts": [{ "inlineData": { "data": "" } }] } }] }),
        ] {
            let resp: GenerateContentResponse = serde_json::from_value(value).unwrap();
            assert!(resp.into_audio_payload().is_none());
        }
    }

    #[test]
    fn client_requires_api_key() {
        let cfg = SpeakifyConfig {
            api_key: Some("   ".to_string()),
            ..SpeakifyConfig::default()
        };
        assert!(matches!(
            GeminiClient::new(&cfg),
            Err(ApiError::NoApiKey { .. })
        ));
    }

    #[test]
    fn status_is_exposed_for_transport_errors() {
        let err = ApiError::ApiResponse {
            status: 429,
            message: "quota".to_string(),
        };
        assert!(err.is_transport());
        assert_eq!(err.status(), Some(429));
        assert!(!ApiError::EmptyResponse.is_transport());
    }
}
