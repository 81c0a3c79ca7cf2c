//! PCM ↔ base64 plumbing for the audio I/O port.
//!
//! Mic capture produces 16 kHz mono PCM16; the speaker side accepts
//! 24 kHz PCM16. Both cross the ports as base64 chunks of little-endian
//! sample bytes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Mic capture rate (Hz).
pub const MIC_SAMPLE_RATE: u32 = 16_000;
/// Playback rate (Hz).
pub const SPEAKER_SAMPLE_RATE: u32 = 24_000;

/// Encode PCM16 samples as a base64 chunk.
pub fn pcm_to_b64(samples: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// Decode a base64 chunk back into PCM16 samples. A trailing odd byte
/// is dropped.
pub fn b64_to_pcm(chunk: &str) -> Option<Vec<i16>> {
    let bytes = STANDARD.decode(chunk).ok()?;
    Some(
        bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_round_trip() {
        let samples: Vec<i16> = vec![0, 1, -1, i16::MAX, i16::MIN, 12345];
        let chunk = pcm_to_b64(&samples);
        assert_eq!(b64_to_pcm(&chunk).unwrap(), samples);
    }

    #[test]
    fn invalid_base64_is_none() {
        assert!(b64_to_pcm("not base64 !!!").is_none());
    }

    #[test]
    fn empty_chunk_decodes_empty() {
        assert_eq!(b64_to_pcm(&pcm_to_b64(&[])).unwrap(), Vec::<i16>::new());
    }
}
