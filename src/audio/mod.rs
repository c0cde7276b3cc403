//! # Audio Normalization Module
//!
//! Turns an uploaded audio file of any container and codec into the single
//! format the scoring service accepts.
//!
//! ## Key Components:
//! - **Normalizer**: Streams the upload through ffmpeg and collects the WAV output
//! - **WAV inspection**: Verifies the produced header before the audio is used
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Container**: WAV

pub mod normalizer;   // ffmpeg-driven transcoding
pub mod wav;          // RIFF/WAVE header inspection

pub use normalizer::AudioNormalizer;

use crate::error::EvalError;
use wav::WavFormat;

pub const TARGET_SAMPLE_RATE: u32 = 16000;
pub const TARGET_CHANNELS: u16 = 1;
pub const TARGET_BITS_PER_SAMPLE: u16 = 16;

/// A WAV buffer known to be 16kHz, mono, 16-bit PCM.
///
/// The only constructor checks the header, so holding one of these is proof
/// of the format. Immutable once built.
#[derive(Debug, Clone)]
pub struct NormalizedAudio {
    bytes: Vec<u8>,
    format: WavFormat,
}

impl NormalizedAudio {
    pub fn from_wav(bytes: Vec<u8>) -> Result<Self, EvalError> {
        if bytes.is_empty() {
            return Err(EvalError::Transcode("Transcoder produced no output".to_string()));
        }

        let format = wav::read_format(&bytes)
            .map_err(|e| EvalError::Transcode(format!("Invalid WAV output: {}", e)))?;
        format
            .ensure(TARGET_SAMPLE_RATE, TARGET_CHANNELS, TARGET_BITS_PER_SAMPLE)
            .map_err(|e| EvalError::Transcode(format!("Unexpected WAV output: {}", e)))?;

        Ok(Self { bytes, format })
    }

    pub fn format(&self) -> &WavFormat {
        &self.format
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
