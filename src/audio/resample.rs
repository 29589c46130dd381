//! Linear-interpolation sample-rate conversion for PCM16 mono audio.
//!
//! Telephony audio is narrowband speech already band-limited well below the
//! Nyquist rate of every conversion this bridge performs, so plain linear
//! interpolation is sufficient. The function is pure and stateless.

/// Convert `samples` from `from_hz` to `to_hz`.
///
/// Output ordering equals input ordering; output length is
/// `round(len * to_hz / from_hz)`. Equal rates return the input unchanged.
pub fn resample(samples: &[i16], from_hz: u32, to_hz: u32) -> Vec<i16> {
    if from_hz == to_hz || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = to_hz as f64 / from_hz as f64;
    let out_len = ((samples.len() as f64) * ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let pos = i as f64 / ratio;
        let idx = pos.floor() as usize;
        if idx + 1 < samples.len() {
            let frac = pos - idx as f64;
            let a = samples[idx] as f64;
            let b = samples[idx + 1] as f64;
            out.push((a + (b - a) * frac).round() as i16);
        } else {
            out.push(samples[samples.len() - 1]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_rates_is_identity() {
        let samples = vec![5i16, -3, 100, -32768];
        assert_eq!(resample(&samples, 8000, 8000), samples);
    }

    #[test]
    fn empty_input_stays_empty() {
        assert!(resample(&[], 8000, 16000).is_empty());
    }

    #[test]
    fn upsample_doubles_length() {
        let samples = vec![0i16; 160];
        assert_eq!(resample(&samples, 8000, 16000).len(), 320);
    }

    #[test]
    fn downsample_thirds_length() {
        let samples = vec![0i16; 480];
        assert_eq!(resample(&samples, 24000, 8000).len(), 160);
    }

    #[test]
    fn monotonic_ramp_stays_monotonic() {
        let ramp: Vec<i16> = (0..100).map(|i| (i * 100) as i16).collect();
        let up = resample(&ramp, 8000, 16000);
        assert!(up.windows(2).all(|w| w[0] <= w[1]));
        let down = resample(&ramp, 8000, 6000);
        assert!(down.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn constant_signal_is_preserved() {
        let samples = vec![1234i16; 240];
        assert!(resample(&samples, 24000, 8000).iter().all(|&s| s == 1234));
        assert!(resample(&samples, 8000, 16000).iter().all(|&s| s == 1234));
    }
}
