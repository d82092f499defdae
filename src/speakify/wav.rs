use super::audio::{AudioError, RawAudio};

use std::io::Cursor;

pub const WAV_HEADER_LEN: usize = 44;

/// Largest PCM payload whose RIFF chunk size (`36 + len`) still fits in 32 bits.
const MAX_PCM_BYTES: usize = (u32::MAX - 36) as usize;

/// Wraps the PCM of `audio` in a mono 16-bit WAV container ready to be saved
/// as a file. The output is always the 44-byte header plus the payload.
pub fn encode_wav(audio: &RawAudio) -> Result<Vec<u8>, AudioError> {
    let pcm = audio.pcm_bytes();
    if pcm.len() > MAX_PCM_BYTES {
        return Err(AudioError::TooLarge(pcm.len()));
    }

    let spec = hound::WavSpec {
        channels: audio.channels(),
        sample_rate: audio.sample_rate(),
        bits_per_sample: audio.bits_per_sample(),
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(WAV_HEADER_LEN + pcm.len()));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for pair in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        writer.finalize()?;
    }
    let out = cursor.into_inner();

    let expected = WAV_HEADER_LEN + pcm.len();
    if out.len() != expected {
        return Err(AudioError::EncodingInvariantViolation {
            expected,
            actual: out.len(),
        });
    }

    Ok(out)
}
