//! Waveform peak extraction.
//!
//! The decoder renders the track to mono 16-bit PCM in the scratch
//! directory; the peak array is computed here by windowing the samples and
//! taking each window's absolute maximum, normalised to `[0, 1]`.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Decode sample rate used for peak extraction; low on purpose, peaks do
/// not need audible fidelity.
const DECODE_RATE: &str = "8000";

/// Errors from the peak extraction step.
#[derive(Debug, Error)]
pub enum PeaksError {
    /// The decoder exceeded its hard timeout and was killed.
    #[error("decoder timed out")]
    Timeout,
    /// The decoder binary could not be launched.
    #[error("decoder failed to launch")]
    Launch {
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The decoder exited non-zero.
    #[error("decoder rejected the input")]
    Rejected {
        /// Captured stderr, truncated.
        stderr: String,
    },
    /// The decoded PCM could not be read back.
    #[error("decoded pcm unreadable")]
    Io {
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Decode `source` and compute `samples` normalised peaks.
///
/// # Errors
///
/// Returns [`PeaksError::Timeout`] when the hard timeout elapses and
/// launch/rejection/IO errors otherwise.
pub async fn extract_peaks(
    bin: &str,
    source: &Path,
    scratch: &Path,
    timeout: Duration,
    samples: usize,
) -> Result<Vec<f32>, PeaksError> {
    let pcm_path = scratch.join("decoded.pcm");
    let mut command = Command::new(bin);
    command
        .args(["-v", "error", "-y", "-i"])
        .arg(source)
        .args(["-ac", "1", "-ar", DECODE_RATE, "-f", "s16le"])
        .arg(&pcm_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| PeaksError::Timeout)?
        .map_err(|source| PeaksError::Launch { source })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PeaksError::Rejected {
            stderr: stderr.chars().take(512).collect(),
        });
    }

    let pcm = tokio::fs::read(&pcm_path)
        .await
        .map_err(|source| PeaksError::Io { source })?;
    Ok(peaks_from_pcm(&pcm, samples))
}

/// Window signed 16-bit little-endian mono PCM into `samples` peaks in
/// `[0, 1]`.
#[must_use]
pub fn peaks_from_pcm(pcm: &[u8], samples: usize) -> Vec<f32> {
    if samples == 0 {
        return Vec::new();
    }
    let values: Vec<i16> = pcm
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    if values.is_empty() {
        return vec![0.0; samples];
    }

    let window = values.len().div_ceil(samples);
    let mut peaks = Vec::with_capacity(samples);
    for chunk in values.chunks(window) {
        let peak = chunk
            .iter()
            .map(|sample| f32::from(*sample).abs() / f32::from(i16::MAX).abs())
            .fold(0.0_f32, f32::max);
        peaks.push(peak.min(1.0));
    }
    peaks.resize(samples, 0.0);
    peaks
}

/// Serialize peaks as a JSON array, halving resolution until the encoding
/// fits `max_bytes`. The output is always valid JSON.
#[must_use]
pub fn encode_peaks(mut peaks: Vec<f32>, max_bytes: usize) -> Vec<u8> {
    loop {
        let encoded = serde_json::to_vec(&peaks).unwrap_or_else(|_| b"[]".to_vec());
        if encoded.len() <= max_bytes || peaks.len() <= 1 {
            return encoded;
        }
        peaks = peaks
            .chunks(2)
            .map(|pair| pair.iter().copied().fold(0.0_f32, f32::max))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_from(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn peaks_are_normalised_window_maxima() {
        // Two windows: |−32768|→1.0 (clamped), |16384|→0.5.
        let pcm = pcm_from(&[100, i16::MIN, 16_384, -8_192]);
        let peaks = peaks_from_pcm(&pcm, 2);
        assert_eq!(peaks.len(), 2);
        assert!((peaks[0] - 1.0).abs() < 1e-3);
        assert!((peaks[1] - 0.5).abs() < 1e-2);
    }

    #[test]
    fn all_peaks_stay_in_unit_range() {
        let pcm = pcm_from(&(0..4_000).map(|i| ((i * 37) % 65_536 - 32_768) as i16).collect::<Vec<_>>());
        let peaks = peaks_from_pcm(&pcm, 1_000);
        assert_eq!(peaks.len(), 1_000);
        assert!(peaks.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn short_input_pads_to_requested_length() {
        let pcm = pcm_from(&[1_000; 10]);
        let peaks = peaks_from_pcm(&pcm, 100);
        assert_eq!(peaks.len(), 100);
        assert_eq!(peaks[99], 0.0);
    }

    #[test]
    fn empty_input_yields_silence() {
        let peaks = peaks_from_pcm(&[], 16);
        assert_eq!(peaks, vec![0.0; 16]);
    }

    #[test]
    fn encoding_caps_by_halving_not_truncating_json() {
        let peaks = vec![0.123_456_79_f32; 10_000];
        let encoded = encode_peaks(peaks, 1_024);
        assert!(encoded.len() <= 1_024);
        let decoded: Vec<f32> = serde_json::from_slice(&encoded).expect("valid json");
        assert!(!decoded.is_empty());
    }
}
