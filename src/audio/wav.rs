//! # WAV Header Inspection
//!
//! Reads the RIFF/WAVE `fmt ` chunk of a buffer so the normalizer can prove its
//! output really is 16kHz, mono, 16-bit PCM before anything is sent upstream.
//!
//! ffmpeg writing to a pipe cannot seek back to patch chunk sizes, so the RIFF
//! and `data` sizes may be placeholders. Only the `fmt ` chunk is trusted.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

/// `WAVE_FORMAT_PCM`
pub const FORMAT_PCM: u16 = 0x0001;
/// `WAVE_FORMAT_EXTENSIBLE`, which ffmpeg may use for PCM as well
pub const FORMAT_EXTENSIBLE: u16 = 0xFFFE;
/// `KSDATAFORMAT_SUBTYPE_PCM` as laid out in the file.
pub const SUBTYPE_PCM: [u8; 16] = [
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71,
];

/// Size of a `fmt ` chunk carrying the extensible fields.
const EXTENSIBLE_FMT_SIZE: u32 = 40;

/// Fields of the `fmt ` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    /// SubFormat GUID, present only for `WAVE_FORMAT_EXTENSIBLE`
    pub sub_format: Option<[u8; 16]>,
}

impl WavFormat {
    pub fn is_pcm(&self) -> bool {
        match self.format_tag {
            FORMAT_PCM => true,
            FORMAT_EXTENSIBLE => self.sub_format == Some(SUBTYPE_PCM),
            _ => false,
        }
    }

    /// Check against an expected rate/channels/bit depth.
    pub fn ensure(&self, sample_rate: u32, channels: u16, bits_per_sample: u16) -> Result<(), String> {
        if !self.is_pcm() {
            return Err(format!("Unexpected WAV format tag 0x{:04X}, expected PCM", self.format_tag));
        }

        if self.sample_rate != sample_rate {
            return Err(format!(
                "Sample rate mismatch: expected {}, got {}",
                sample_rate, self.sample_rate
            ));
        }

        if self.channels != channels {
            return Err(format!(
                "Channel count mismatch: expected {}, got {}",
                channels, self.channels
            ));
        }

        if self.bits_per_sample != bits_per_sample {
            return Err(format!(
                "Bit depth mismatch: expected {}, got {}",
                bits_per_sample, self.bits_per_sample
            ));
        }

        Ok(())
    }
}

/// Walk the RIFF chunks until the `fmt ` chunk is found and decode it.
pub fn read_format(bytes: &[u8]) -> Result<WavFormat, String> {
    let mut cursor = Cursor::new(bytes);

    let riff = read_tag(&mut cursor).map_err(|_| "Audio is too short to be WAV".to_string())?;
    if &riff != b"RIFF" {
        return Err("Missing RIFF header".to_string());
    }
    cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| "Truncated RIFF header".to_string())?;
    let wave = read_tag(&mut cursor).map_err(|_| "Truncated RIFF header".to_string())?;
    if &wave != b"WAVE" {
        return Err("RIFF container is not WAVE".to_string());
    }

    loop {
        let id = read_tag(&mut cursor).map_err(|_| "No fmt chunk found".to_string())?;
        let size = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| "Truncated chunk header".to_string())?;

        match &id {
            b"fmt " => return read_fmt_chunk(&mut cursor, size),
            b"data" => return Err("data chunk precedes fmt chunk".to_string()),
            _ => {
                // Chunks are word aligned
                let skip = u64::from(size) + u64::from(size % 2);
                let next = cursor.position() + skip;
                if next > bytes.len() as u64 {
                    return Err("Truncated chunk".to_string());
                }
                cursor.set_position(next);
            }
        }
    }
}

fn read_tag(cursor: &mut Cursor<&[u8]>) -> std::io::Result<[u8; 4]> {
    let mut tag = [0u8; 4];
    cursor.read_exact(&mut tag)?;
    Ok(tag)
}

fn read_fmt_chunk(cursor: &mut Cursor<&[u8]>, size: u32) -> Result<WavFormat, String> {
    if size < 16 {
        return Err(format!("fmt chunk too small: {} bytes", size));
    }

    let mut read = || -> std::io::Result<WavFormat> {
        let mut format = WavFormat {
            format_tag: cursor.read_u16::<LittleEndian>()?,
            channels: cursor.read_u16::<LittleEndian>()?,
            sample_rate: cursor.read_u32::<LittleEndian>()?,
            byte_rate: cursor.read_u32::<LittleEndian>()?,
            block_align: cursor.read_u16::<LittleEndian>()?,
            bits_per_sample: cursor.read_u16::<LittleEndian>()?,
            sub_format: None,
        };

        // cbSize, valid bits and channel mask precede the SubFormat GUID
        if format.format_tag == FORMAT_EXTENSIBLE && size >= EXTENSIBLE_FMT_SIZE {
            let _extension_size = cursor.read_u16::<LittleEndian>()?;
            let _valid_bits = cursor.read_u16::<LittleEndian>()?;
            let _channel_mask = cursor.read_u32::<LittleEndian>()?;
            let mut guid = [0u8; 16];
            cursor.read_exact(&mut guid)?;
            format.sub_format = Some(guid);
        }

        Ok(format)
    };

    read().map_err(|_| "Truncated fmt chunk".to_string())
}

/// Build a PCM16 WAV buffer. Test fixture only.
#[cfg(test)]
pub(crate) fn pcm16_wav(sample_rate: u32, channels: u16, frames: &[i16]) -> Vec<u8> {
    use byteorder::WriteBytesExt;

    let data_len = (frames.len() * 2 * channels as usize) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.write_u32::<LittleEndian>(36 + data_len).unwrap();
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.write_u32::<LittleEndian>(16).unwrap();
    out.write_u16::<LittleEndian>(FORMAT_PCM).unwrap();
    out.write_u16::<LittleEndian>(channels).unwrap();
    out.write_u32::<LittleEndian>(sample_rate).unwrap();
    out.write_u32::<LittleEndian>(sample_rate * 2 * channels as u32).unwrap();
    out.write_u16::<LittleEndian>(2 * channels).unwrap();
    out.write_u16::<LittleEndian>(16).unwrap();
    out.extend_from_slice(b"data");
    out.write_u32::<LittleEndian>(data_len).unwrap();
    for sample in frames {
        for _ in 0..channels {
            out.write_i16::<LittleEndian>(*sample).unwrap();
        }
    }
    out
}

/// One second of a 440Hz tone. Test fixture only.
#[cfg(test)]
pub(crate) fn tone(sample_rate: u32) -> Vec<i16> {
    (0..sample_rate)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            ((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 12000.0) as i16
        })
        .collect()
}
