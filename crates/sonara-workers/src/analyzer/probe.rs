//! Metadata extraction via `ffprobe`.
//!
//! The prober is an external process under a hard timeout; its JSON output
//! is parsed here and validated by the analyzer against the configured
//! limits.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Raw technical metadata as reported by the prober.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutput {
    /// Container duration in seconds.
    pub duration_secs: f64,
    /// Sample rate in hertz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u8,
    /// Codec name of the first audio stream.
    pub codec: String,
    /// Average bitrate in bits per second, when reported.
    pub bitrate: Option<u64>,
}

/// Errors from the probing step.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The prober exceeded its hard timeout and was killed.
    #[error("prober timed out")]
    Timeout,
    /// The prober binary could not be launched.
    #[error("prober failed to launch")]
    Launch {
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The prober exited non-zero (unreadable or non-media input).
    #[error("prober rejected the input")]
    Rejected {
        /// Captured stderr, truncated.
        stderr: String,
    },
    /// The prober output could not be parsed.
    #[error("prober output unparseable")]
    Parse {
        /// What was missing or malformed.
        detail: &'static str,
    },
}

/// Run the prober against a local file.
///
/// # Errors
///
/// Returns [`ProbeError::Timeout`] when the hard timeout elapses (the
/// process is killed), and launch/rejection/parse errors otherwise.
pub async fn probe_file(
    bin: &str,
    path: &Path,
    timeout: Duration,
) -> Result<ProbeOutput, ProbeError> {
    let mut command = Command::new(bin);
    command
        .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| ProbeError::Timeout)?
        .map_err(|source| ProbeError::Launch { source })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::Rejected {
            stderr: stderr.chars().take(512).collect(),
        });
    }

    let raw = String::from_utf8_lossy(&output.stdout);
    debug!(bytes = raw.len(), "prober output captured");
    parse_probe_output(&raw)
}

/// Parse the prober's JSON document into [`ProbeOutput`].
///
/// # Errors
///
/// Returns [`ProbeError::Parse`] when the document is not JSON, has no
/// audio stream, or lacks a duration.
pub fn parse_probe_output(raw: &str) -> Result<ProbeOutput, ProbeError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|_| ProbeError::Parse { detail: "not json" })?;

    let streams = value
        .get("streams")
        .and_then(serde_json::Value::as_array)
        .ok_or(ProbeError::Parse { detail: "no streams" })?;
    let audio = streams
        .iter()
        .find(|stream| stream.get("codec_type").and_then(serde_json::Value::as_str) == Some("audio"))
        .ok_or(ProbeError::Parse {
            detail: "no audio stream",
        })?;

    let codec = audio
        .get("codec_name")
        .and_then(serde_json::Value::as_str)
        .ok_or(ProbeError::Parse { detail: "no codec" })?
        .to_string();
    let sample_rate = audio
        .get("sample_rate")
        .and_then(string_or_number)
        .and_then(|v| u32::try_from(v as i64).ok())
        .unwrap_or(0);
    let channels = audio
        .get("channels")
        .and_then(serde_json::Value::as_u64)
        .and_then(|v| u8::try_from(v).ok())
        .unwrap_or(0);

    let duration_secs = value
        .get("format")
        .and_then(|format| format.get("duration"))
        .and_then(string_or_number)
        .or_else(|| audio.get("duration").and_then(string_or_number))
        .ok_or(ProbeError::Parse {
            detail: "no duration",
        })?;
    let bitrate = value
        .get("format")
        .and_then(|format| format.get("bit_rate"))
        .and_then(string_or_number)
        .map(|v| v as u64);

    Ok(ProbeOutput {
        duration_secs,
        sample_rate,
        channels,
        codec,
        bitrate,
    })
}

fn string_or_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::String(raw) => raw.parse().ok(),
        serde_json::Value::Number(number) => number.as_f64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {
                "codec_type": "audio",
                "codec_name": "mp3",
                "sample_rate": "44100",
                "channels": 2
            }
        ],
        "format": {
            "duration": "221.394286",
            "bit_rate": "160000"
        }
    }"#;

    #[test]
    fn parses_the_usual_shape() {
        let output = parse_probe_output(SAMPLE).expect("parseable");
        assert!((output.duration_secs - 221.394_286).abs() < 1e-6);
        assert_eq!(output.sample_rate, 44_100);
        assert_eq!(output.channels, 2);
        assert_eq!(output.codec, "mp3");
        assert_eq!(output.bitrate, Some(160_000));
    }

    #[test]
    fn video_only_files_are_rejected() {
        let raw = r#"{"streams":[{"codec_type":"video","codec_name":"h264"}],"format":{"duration":"10"}}"#;
        let err = parse_probe_output(raw).unwrap_err();
        assert!(matches!(err, ProbeError::Parse { detail: "no audio stream" }));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(
            parse_probe_output("ID3\u{3}\u{0}garbage").unwrap_err(),
            ProbeError::Parse { detail: "not json" }
        ));
    }

    #[test]
    fn missing_duration_is_a_parse_error() {
        let raw = r#"{"streams":[{"codec_type":"audio","codec_name":"flac","sample_rate":"48000","channels":2}],"format":{}}"#;
        assert!(matches!(
            parse_probe_output(raw).unwrap_err(),
            ProbeError::Parse { detail: "no duration" }
        ));
    }
}
