use super::types::{BITS_PER_SAMPLE, CHANNELS, SAMPLE_RATE};

use base64::Engine as _;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("Audio payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("WAV encoding produced {actual} bytes, expected {expected}")]
    EncodingInvariantViolation { expected: usize, actual: usize },

    #[error("PCM payload of {0} bytes does not fit in a WAV container")]
    TooLarge(usize),

    #[error("WAV encoding failed: {0}")]
    Wav(#[from] hound::Error),
}

/// Mono 16-bit little-endian PCM at 24 kHz, as returned by the speech endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAudio {
    pcm: Arc<[u8]>,
}

impl RawAudio {
    /// Wraps raw PCM bytes. A dangling final byte is dropped so the payload
    /// always holds whole samples.
    pub fn from_pcm(mut bytes: Vec<u8>) -> Self {
        if bytes.len() % 2 == 1 {
            warn!(
                len = bytes.len(),
                "PCM payload has an odd byte count, dropping the last byte"
            );
            bytes.pop();
        }
        Self { pcm: bytes.into() }
    }

    pub fn pcm_bytes(&self) -> &[u8] {
        &self.pcm
    }

    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    pub fn channels(&self) -> u16 {
        CHANNELS
    }

    pub fn bits_per_sample(&self) -> u16 {
        BITS_PER_SAMPLE
    }

    pub fn frame_count(&self) -> usize {
        self.pcm.len() / 2
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frame_count() as f64 / SAMPLE_RATE as f64
    }

    pub fn decode(&self) -> DecodedAudio {
        DecodedAudio::from_raw(self)
    }
}

/// Read-only float view over a [`RawAudio`], samples in `[-1.0, 1.0)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl DecodedAudio {
    pub fn from_raw(raw: &RawAudio) -> Self {
        let samples: Arc<[f32]> = raw
            .pcm_bytes()
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
            .collect();
        Self {
            samples,
            sample_rate: raw.sample_rate(),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }
}

/// Decodes the base64 audio payload of a speech response.
pub fn decode_base64(payload: &str) -> Result<RawAudio, AudioError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(payload.trim())?;
    Ok(RawAudio::from_pcm(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn duration_follows_byte_length() {
        let raw = decode_base64(&b64(&vec![0u8; 2400])).unwrap();
        assert_eq!(raw.frame_count(), 1200);
        assert!((raw.duration_seconds() - 0.05).abs() < 1e-12);

        let one_second = decode_base64(&b64(&vec![0u8; 48_000])).unwrap();
        assert_eq!(one_second.duration_seconds(), 1.0);
    }

    #[test]
    fn samples_are_normalized_little_endian() {
        let pcm: Vec<u8> = [0i16, i16::MAX, i16::MIN, -16384, 256]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let decoded = decode_base64(&b64(&pcm)).unwrap().decode();

        assert_eq!(decoded.frame_count(), 5);
        assert_eq!(decoded.samples()[0], 0.0);
        assert_eq!(decoded.samples()[1], 32767.0 / 32768.0);
        assert_eq!(decoded.samples()[2], -1.0);
        assert_eq!(decoded.samples()[3], -0.5);
        assert_eq!(decoded.samples()[4], 256.0 / 32768.0);
        assert_eq!(decoded.sample_rate(), 24_000);
    }

    #[test]
    fn odd_length_drops_trailing_byte() {
        let raw = decode_base64(&b64(&[0x00, 0x40, 0x7f])).unwrap();
        assert_eq!(raw.pcm_bytes(), &[0x00, 0x40]);
        assert_eq!(raw.decode().samples(), &[0.5]);
    }

    #[test]
    fn malformed_base64_is_a_decode_error() {
        assert!(matches!(
            decode_base64("not*base64!"),
            Err(AudioError::Decode(_))
        ));
        // Missing padding
        assert!(matches!(decode_base64("AAE"), Err(AudioError::Decode(_))));
    }

    #[test]
    fn empty_payload_decodes_to_silence_of_zero_length() {
        let raw = decode_base64("").unwrap();
        assert_eq!(raw.frame_count(), 0);
        assert_eq!(raw.decode().duration_seconds(), 0.0);
    }
}
