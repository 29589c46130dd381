//! PCM16 audio primitives shared by both pumps: sample-rate bookkeeping,
//! byte packing for the upstream wire format, buffering and resampling.

mod buffer;
mod resample;

pub use buffer::SampleBuffer;
pub use resample::resample;

/// The three sample rates a bridged call moves audio between, fixed for the
/// process lifetime.
#[derive(Debug, Clone, Copy)]
pub struct AudioRates {
    /// Rate of the telephony leg, both directions (e.g. 8000 Hz)
    pub telephony_hz: u32,
    /// Rate the upstream service expects for input audio (e.g. 16000 Hz)
    pub upstream_in_hz: u32,
    /// Rate the upstream service produces output audio at (e.g. 24000 Hz)
    pub upstream_out_hz: u32,
}

/// Pack PCM16 samples as little-endian bytes for the upstream wire format.
pub fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

/// Unpack little-endian PCM16 bytes into samples. A trailing odd byte is
/// dropped rather than treated as an error.
pub fn le_bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_roundtrip() {
        let samples = vec![0i16, 1, -1, i16::MAX, i16::MIN, 12345];
        let bytes = samples_to_le_bytes(&samples);
        assert_eq!(bytes.len(), samples.len() * 2);
        assert_eq!(le_bytes_to_samples(&bytes), samples);
    }

    #[test]
    fn odd_trailing_byte_dropped() {
        let mut bytes = samples_to_le_bytes(&[100, 200]);
        bytes.push(0x7f);
        assert_eq!(le_bytes_to_samples(&bytes), vec![100, 200]);
    }
}
