//! # Sample Codec
//!
//! Conversion between 16-bit signed PCM and normalized float samples, and the
//! canonical 44-byte WAV container used for every export.
//!
//! ## Conversion rules:
//! - **PCM16 → float**: `sample / 32768`
//! - **float → PCM16**: `clamp(round(sample * 32768), -32768, 32767)`
//!
//! This is the only place in the crate where float-domain rounding happens.
//!
//! ## Container layout (all integers little-endian):
//! ```text
//!  0..4   "RIFF"          4..8   total size - 8
//!  8..12  "WAVE"         12..16  "fmt "
//! 16..20  16             20..22  1 (linear PCM)
//! 22..24  1 (mono)       24..28  sample rate
//! 28..32  byte rate      32..34  block align = 2
//! 34..36  16 bits        36..40  "data"
//! 40..44  payload length 44..    PCM16 samples
//! ```

use crate::error::{AppError, AppResult};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

/// Size of the fixed container header in bytes.
pub const HEADER_LEN: usize = 44;

const PCM_FORMAT_TAG: u16 = 1;
const CHANNELS: u16 = 1;
const BLOCK_ALIGN: u16 = 2;
const BITS_PER_SAMPLE: u16 = 16;

/// Convert one PCM16 sample to a float in `[-1.0, 1.0)`.
#[inline]
pub fn pcm16_to_float(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Convert one normalized float to PCM16, rounding to nearest and clamping.
#[inline]
pub fn float_to_pcm16(sample: f32) -> i16 {
    // NaN casts to 0
    (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

pub fn pcm16_slice_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| pcm16_to_float(s)).collect()
}

/// Decode little-endian PCM16 bytes. The length must be even.
pub fn pcm16_from_le_bytes(data: &[u8]) -> AppResult<Vec<i16>> {
    if data.len() % 2 != 0 {
        return Err(AppError::ArchiveConversionError(
            "PCM16 data length must be even".to_string(),
        ));
    }
    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }
    Ok(samples)
}

pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Build the canonical mono PCM16 container.
///
/// ## Returns:
/// Exactly `44 + 2 * samples.len()` bytes, or `ArchiveConversionError` when
/// the rate or length does not fit the 32-bit header fields.
pub fn build_container(samples: &[i16], sample_rate: u32) -> AppResult<Vec<u8>> {
    let data_len = samples
        .len()
        .checked_mul(2)
        .and_then(|len| u32::try_from(len).ok())
        .ok_or_else(|| conversion("payload too large for a WAV container"))?;
    let riff_len = data_len
        .checked_add(36)
        .ok_or_else(|| conversion("payload too large for a WAV container"))?;
    let byte_rate = sample_rate
        .checked_mul(BLOCK_ALIGN as u32)
        .ok_or_else(|| conversion("sample rate out of range"))?;
    let mut out = Vec::with_capacity(HEADER_LEN + samples.len() * 2);

    out.extend_from_slice(b"RIFF");
    push_u32(&mut out, riff_len);
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    push_u32(&mut out, 16);
    push_u16(&mut out, PCM_FORMAT_TAG);
    push_u16(&mut out, CHANNELS);
    push_u32(&mut out, sample_rate);
    push_u32(&mut out, byte_rate);
    push_u16(&mut out, BLOCK_ALIGN);
    push_u16(&mut out, BITS_PER_SAMPLE);
    out.extend_from_slice(b"data");
    push_u32(&mut out, data_len);
    out.extend_from_slice(&pcm16_to_le_bytes(samples));

    Ok(out)
}

/// Parse a container produced by [`build_container`].
///
/// Only the canonical layout is accepted; anything else is an
/// `ArchiveConversionError`.
pub fn parse_container(data: &[u8]) -> AppResult<(Vec<i16>, u32)> {
    if data.len() < HEADER_LEN {
        return Err(conversion("container shorter than header"));
    }

    let mut cursor = Cursor::new(data);
    expect_tag(&mut cursor, b"RIFF")?;
    let riff_len = read_u32(&mut cursor)? as usize;
    expect_tag(&mut cursor, b"WAVE")?;
    expect_tag(&mut cursor, b"fmt ")?;

    if read_u32(&mut cursor)? != 16 {
        return Err(conversion("unexpected fmt chunk size"));
    }
    if read_u16(&mut cursor)? != PCM_FORMAT_TAG {
        return Err(conversion("not linear PCM"));
    }
    if read_u16(&mut cursor)? != CHANNELS {
        return Err(conversion("not mono"));
    }
    let sample_rate = read_u32(&mut cursor)?;
    let byte_rate = read_u32(&mut cursor)?;
    let block_align = read_u16(&mut cursor)?;
    let bits = read_u16(&mut cursor)?;
    if block_align != BLOCK_ALIGN || bits != BITS_PER_SAMPLE || sample_rate.checked_mul(2) != Some(byte_rate) {
        return Err(conversion("inconsistent PCM16 format fields"));
    }

    expect_tag(&mut cursor, b"data")?;
    let data_len = read_u32(&mut cursor)? as usize;
    if data_len != data.len() - HEADER_LEN || riff_len != data.len() - 8 {
        return Err(conversion("length fields do not match payload"));
    }

    let samples = pcm16_from_le_bytes(&data[HEADER_LEN..])?;
    Ok((samples, sample_rate))
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    // Writing into a Vec cannot fail
    let _ = out.write_u16::<LittleEndian>(value);
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    let _ = out.write_u32::<LittleEndian>(value);
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> AppResult<u16> {
    cursor.read_u16::<LittleEndian>().map_err(|_| conversion("truncated header"))
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> AppResult<u32> {
    cursor.read_u32::<LittleEndian>().map_err(|_| conversion("truncated header"))
}

fn expect_tag(cursor: &mut Cursor<&[u8]>, tag: &[u8; 4]) -> AppResult<()> {
    let mut found = [0u8; 4];
    cursor.read_exact(&mut found).map_err(|_| conversion("truncated header"))?;
    if &found != tag {
        return Err(conversion(&format!(
            "expected {:?} chunk, found {:?}",
            String::from_utf8_lossy(tag),
            String::from_utf8_lossy(&found)
        )));
    }
    Ok(())
}

fn conversion(msg: &str) -> AppError {
    AppError::ArchiveConversionError(msg.to_string())
}
