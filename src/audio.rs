//! # Audio Container Conversion
//!
//! Stateless transform from the synthesis provider's raw PCM output
//! (32-bit float, little-endian, mono) to a playable WAV container.
//!
//! The synthesis provider streams bare PCM frames with no header; browsers
//! and most audio elements want a container. When `convert_to_wav` is
//! enabled in the Cartesia configuration, every audio chunk is run through
//! [`pcm_f32le_to_wav`] before it is relayed to the client.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use wav::{BitDepth, Header};

/// Convert raw 32-bit float little-endian PCM bytes into a WAV file image.
///
/// ## Parameters:
/// - **pcm**: Raw PCM payload; length must be a multiple of 4 (one f32 per sample)
/// - **sample_rate**: Sample rate of the source audio in Hz
///
/// ## Errors:
/// Returns an error for payloads that are not whole f32 samples, or if the
/// container serialization fails (which only happens on I/O errors and
/// cannot occur with an in-memory cursor in practice).
pub fn pcm_f32le_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>, String> {
    if pcm.len() % 4 != 0 {
        return Err(format!(
            "PCM payload length {} is not a whole number of f32 samples",
            pcm.len()
        ));
    }

    let mut reader = Cursor::new(pcm);
    let mut samples = Vec::with_capacity(pcm.len() / 4);
    for _ in 0..pcm.len() / 4 {
        let sample = reader
            .read_f32::<LittleEndian>()
            .map_err(|e| format!("Failed to read f32 sample: {}", e))?;
        samples.push(sample);
    }

    let header = Header::new(wav::header::WAV_FORMAT_IEEE_FLOAT, 1, sample_rate, 32);
    let mut out = Cursor::new(Vec::new());
    wav::write(header, &BitDepth::ThirtyTwoFloat(samples), &mut out)
        .map_err(|e| format!("Failed to write WAV container: {}", e))?;

    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};

    fn pcm_from_samples(samples: &[f32]) -> Vec<u8> {
        let mut pcm = Vec::new();
        for &s in samples {
            pcm.write_f32::<LittleEndian>(s).unwrap();
        }
        pcm
    }

    #[test]
    fn test_wav_output_has_riff_header() {
        let pcm = pcm_from_samples(&[0.0, 0.25, -0.25, 1.0]);
        let wav_bytes = pcm_f32le_to_wav(&pcm, 44100).unwrap();

        assert_eq!(&wav_bytes[0..4], b"RIFF");
        assert_eq!(&wav_bytes[8..12], b"WAVE");
        // The data must be at least header + payload sized
        assert!(wav_bytes.len() >= 44 + pcm.len());
    }

    #[test]
    fn test_rejects_partial_samples() {
        // 6 bytes is one and a half f32 samples
        let result = pcm_f32le_to_wav(&[0u8; 6], 44100);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_payload_is_valid() {
        let wav_bytes = pcm_f32le_to_wav(&[], 44100).unwrap();
        assert_eq!(&wav_bytes[0..4], b"RIFF");
    }
}
