//! # Audio Normalizer
//!
//! Streams an uploaded buffer through an ffmpeg child process and collects its
//! WAV output. One attempt per call: the result is either a complete, verified
//! buffer or a [`EvalError::Transcode`].
//!
//! ## Pipeline:
//! 1. Spawn ffmpeg reading `pipe:0` and writing `pipe:1`
//! 2. Feed the upload into stdin on its own task
//! 3. Drain stdout and stderr until the process exits
//! 4. Check the exit status, the stdin write and finally the WAV header

use crate::audio::NormalizedAudio;
use crate::config::TranscoderConfig;
use crate::error::EvalError;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Longest slice of ffmpeg's stderr carried into an error message.
const MAX_STDERR_CHARS: usize = 500;

/// Converts arbitrary audio into 16kHz mono PCM WAV.
///
/// Holds only configuration; every call spawns its own process, so a single
/// instance serves any number of concurrent requests.
#[derive(Debug, Clone)]
pub struct AudioNormalizer {
    ffmpeg_path: String,
    sample_rate: u32,
    channels: u16,
    bitrate: String,
    sample_format: String,
}

impl AudioNormalizer {
    pub fn new(config: &TranscoderConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            bitrate: config.bitrate.clone(),
            sample_format: config.sample_format.clone(),
        }
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.ffmpeg_path
    }

    /// ffmpeg command line, input and output both on pipes.
    pub fn arguments(&self) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            "pipe:0".to_string(),
            "-ar".to_string(),
            self.sample_rate.to_string(),
            "-ac".to_string(),
            self.channels.to_string(),
            "-b:a".to_string(),
            self.bitrate.clone(),
            "-sample_fmt".to_string(),
            self.sample_format.clone(),
            "-f".to_string(),
            "wav".to_string(),
            "pipe:1".to_string(),
        ]
    }

    /// Transcode `raw` and return the verified result.
    pub async fn normalize(&self, raw: Vec<u8>) -> Result<NormalizedAudio, EvalError> {
        let input_len = raw.len();
        debug!(input_bytes = input_len, ffmpeg = %self.ffmpeg_path, "Starting transcode");

        let mut child = Command::new(&self.ffmpeg_path)
            .args(self.arguments())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EvalError::Transcode(format!("Failed to start ffmpeg: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EvalError::Transcode("ffmpeg stdin unavailable".to_string()))?;

        // Writing on a separate task keeps a full stdout pipe from stalling the write
        let writer = tokio::spawn(async move {
            stdin.write_all(&raw).await?;
            stdin.flush().await
            // stdin drops here, signalling end of input
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| EvalError::Transcode(format!("Failed to read ffmpeg output: {}", e)))?;

        let write_result = writer
            .await
            .map_err(|e| EvalError::Transcode(format!("ffmpeg input task failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            warn!(status = %output.status, stderr = %stderr, "ffmpeg rejected input");
            return Err(EvalError::Transcode(if stderr.is_empty() {
                format!("ffmpeg exited with {}", output.status)
            } else {
                format!("ffmpeg failed: {}", truncate(stderr, MAX_STDERR_CHARS))
            }));
        }

        if let Err(e) = write_result {
            warn!(error = %e, "ffmpeg stopped reading input early");
            return Err(EvalError::Transcode(format!(
                "Failed to stream audio into ffmpeg: {}",
                e
            )));
        }

        let audio = NormalizedAudio::from_wav(output.stdout)?;
        debug!(input_bytes = input_len, output_bytes = audio.byte_len(), "Transcode finished");
        Ok(audio)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}... (truncated)", &text[..index]),
        None => text.to_string(),
    }
}

/// Whether an `ffmpeg` binary is on PATH. Tests that need one skip otherwise.
#[cfg(test)]
pub(crate) fn ffmpeg_available() -> bool {
    std::process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// A shell script standing in for ffmpeg: it drains stdin and prints `output`.
///
/// The script lives inside the returned directory, which must be kept alive
/// for as long as the path is used.
#[cfg(all(test, unix))]
pub(crate) fn stub_transcoder(output: &[u8]) -> (tempfile::TempDir, String) {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::TempDir::new().unwrap();
    let fixture = dir.path().join("output.wav");
    std::fs::write(&fixture, output).unwrap();

    let script = dir.path().join("ffmpeg");
    std::fs::write(
        &script,
        format!("#!/bin/sh\ncat >/dev/null\ncat '{}'\n", fixture.display()),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let path = script.to_string_lossy().into_owned();
    (dir, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav;
    use crate::config::AppConfig;

    fn normalizer() -> AudioNormalizer {
        AudioNormalizer::new(&AppConfig::default().transcoder)
    }

    fn normalizer_with(ffmpeg_path: &str) -> AudioNormalizer {
        let mut config = AppConfig::default().transcoder;
        config.ffmpeg_path = ffmpeg_path.to_string();
        AudioNormalizer::new(&config)
    }

    #[test]
    fn test_arguments() {
        let args = normalizer().arguments().join(" ");
        assert!(args.contains("-i pipe:0"));
        assert!(args.contains("-ar 16000"));
        assert!(args.contains("-ac 1"));
        assert!(args.contains("-b:a 96k"));
        assert!(args.contains("-sample_fmt s16"));
        assert!(args.ends_with("-f wav pipe:1"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc... (truncated)");
    }

    #[tokio::test]
    async fn test_missing_binary_is_transcode_error() {
        let result = normalizer_with("/nonexistent/ffmpeg").normalize(vec![1, 2, 3]).await;
        match result {
            Err(EvalError::Transcode(msg)) => assert!(msg.contains("Failed to start ffmpeg")),
            other => panic!("expected transcode error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_engine_is_transcode_error() {
        // `false` ignores its arguments and exits 1
        let result = normalizer_with("false").normalize(vec![0u8; 4096]).await;
        assert!(matches!(result, Err(EvalError::Transcode(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_engine_output_is_verified() {
        let (_dir, stub) = stub_transcoder(&wav::pcm16_wav(16000, 1, &wav::tone(16000)));
        let audio = normalizer_with(&stub).normalize(vec![7u8; 100_000]).await.unwrap();
        assert_eq!(audio.format().sample_rate, 16000);
        assert_eq!(audio.byte_len(), 44 + 32000);

        // An engine that ignores the requested target is caught by the header check
        let (_dir, stub) = stub_transcoder(&wav::pcm16_wav(44100, 2, &wav::tone(4410)));
        match normalizer_with(&stub).normalize(vec![7u8; 1024]).await {
            Err(EvalError::Transcode(msg)) => assert!(msg.contains("Unexpected WAV output")),
            other => panic!("expected transcode error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_silent_engine_is_transcode_error() {
        let (_dir, stub) = stub_transcoder(&[]);
        match normalizer_with(&stub).normalize(vec![1, 2, 3]).await {
            Err(EvalError::Transcode(msg)) => assert!(msg.contains("no output")),
            other => panic!("expected transcode error, got {:?}", other),
        }
    }

    /// MPEG audio at 44.1kHz stereo, encoded with ffmpeg's built-in mp2 encoder.
    async fn encode_mpeg_audio() -> Vec<u8> {
        let mut child = Command::new("ffmpeg")
            .args([
                "-hide_banner", "-loglevel", "error", "-f", "wav", "-i", "pipe:0",
                "-c:a", "mp2", "-b:a", "128k", "-f", "mp2", "pipe:1",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();

        let mut stdin = child.stdin.take().unwrap();
        let input = wav::pcm16_wav(44100, 2, &wav::tone(44100));
        let writer = tokio::spawn(async move {
            stdin.write_all(&input).await.unwrap();
        });
        let output = child.wait_with_output().await.unwrap();
        writer.await.unwrap();

        assert!(output.status.success());
        assert_ne!(&output.stdout[..4], b"RIFF");
        output.stdout
    }

    #[tokio::test]
    async fn test_normalizes_compressed_input() {
        if !ffmpeg_available() {
            eprintln!("ffmpeg not found, skipping");
            return;
        }

        let compressed = encode_mpeg_audio().await;
        let audio = normalizer().normalize(compressed).await.unwrap();

        let format = audio.format();
        assert!(format.is_pcm());
        assert_eq!(format.sample_rate, 16000);
        assert_eq!(format.channels, 1);
        assert_eq!(format.bits_per_sample, 16);
        assert!(audio.byte_len() > 16000);
    }

    #[tokio::test]
    async fn test_resamples_stereo_input() {
        if !ffmpeg_available() {
            eprintln!("ffmpeg not found, skipping");
            return;
        }

        let input = wav::pcm16_wav(44100, 2, &wav::tone(44100));
        let audio = normalizer().normalize(input).await.unwrap();

        let format = audio.format();
        assert_eq!(format.sample_rate, 16000);
        assert_eq!(format.channels, 1);
        assert_eq!(format.bits_per_sample, 16);
        // One second of 16kHz mono s16 plus a header
        assert!(audio.byte_len() >= 32000);
    }

    #[tokio::test]
    async fn test_corrupt_input_fails() {
        if !ffmpeg_available() {
            eprintln!("ffmpeg not found, skipping");
            return;
        }

        let garbage: Vec<u8> = (0..8192u32).map(|i| (i * 7919 % 251) as u8).collect();
        let result = normalizer().normalize(garbage).await;
        assert!(matches!(result, Err(EvalError::Transcode(_))));
    }

    #[tokio::test]
    async fn test_empty_input_fails() {
        if !ffmpeg_available() {
            eprintln!("ffmpeg not found, skipping");
            return;
        }

        let result = normalizer().normalize(Vec::new()).await;
        assert!(matches!(result, Err(EvalError::Transcode(_))));
    }
}
