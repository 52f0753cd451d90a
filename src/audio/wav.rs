//! WAV encoder — rendered float mix → canonical 44-byte-header PCM file.
//!
//! The output layout is fixed:
//!
//! ```text
//! offset  size  field
//!      0     4  "RIFF"
//!      4     4  file length - 8
//!      8     4  "WAVE"
//!     12     4  "fmt "
//!     16     4  16 (fmt chunk length)
//!     20     2  format tag (1 = PCM, 3 = IEEE float)
//!     22     2  channel count
//!     24     4  sample rate
//!     28     4  byte rate
//!     32     2  block align
//!     34     2  bits per sample
//!     36     4  "data"
//!     40     4  data length
//!     44     …  interleaved little-endian samples
//! ```
//!
//! [`encode`] is pure: no I/O, and for a well-formed [`RenderedMix`] it cannot
//! fail.  An [`EncodeError`] means an upstream invariant was broken.

use thiserror::Error;

use crate::audio::types::{EncodedAsset, RenderedMix, WAV_MIME_TYPE};

/// Length of the canonical header.
pub const HEADER_LEN: usize = 44;

/// `fmt ` format tag for integer PCM.
pub const FORMAT_PCM: u16 = 1;
/// `fmt ` format tag for IEEE float samples.
pub const FORMAT_IEEE_FLOAT: u16 = 3;

const BITS_PER_SAMPLE: u16 = 16;

// ---------------------------------------------------------------------------
// EncodeError
// ---------------------------------------------------------------------------

/// Invariant violations detected while encoding.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("rendered mix has no channels")]
    NoChannels,

    #[error("channel {channel} has {found} frames, expected {expected}")]
    RaggedChannels {
        channel: usize,
        expected: usize,
        found: usize,
    },

    #[error("sample rate must be > 0")]
    ZeroSampleRate,

    #[error("data chunk of {0} bytes does not fit a WAV header")]
    TooLarge(usize),

    #[error("byte rate of {sample_rate} Hz × {channels} ch does not fit a WAV header")]
    ByteRateOverflow { sample_rate: u32, channels: usize },
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Append a canonical 44-byte header to `buf`.
///
/// `data_len` is the byte length of the data chunk that will follow.
pub fn write_header(
    buf: &mut Vec<u8>,
    format_tag: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    data_len: u32,
) {
    let block_align = channels.saturating_mul(bits_per_sample / 8);
    let byte_rate = sample_rate.saturating_mul(block_align as u32);

    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&data_len.saturating_add(36).to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&format_tag.to_le_bytes());
    buf.extend_from_slice(&channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&bits_per_sample.to_le_bytes());

    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
}

// ---------------------------------------------------------------------------
// Quantization
// ---------------------------------------------------------------------------

/// Quantize a float sample to signed 16-bit.
///
/// Negative values scale by 32768 and positive values by 32767 so that both
/// -1.0 and 1.0 map onto the full i16 range without overflow.
///
/// ```
/// use voice_mixdown::audio::wav::quantize;
///
/// assert_eq!(quantize(1.0), i16::MAX);
/// assert_eq!(quantize(-1.0), i16::MIN);
/// assert_eq!(quantize(0.0), 0);
/// assert_eq!(quantize(7.5), i16::MAX); // clamped
/// ```
pub fn quantize(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    let scale = if s < 0.0 { 32_768.0 } else { 32_767.0 };
    (s * scale).round() as i16
}

// ---------------------------------------------------------------------------
// encode
// ---------------------------------------------------------------------------

/// Encode `mix` as a 16-bit PCM WAV asset.
///
/// The asset length is always `44 + frames * channels * 2`.
pub fn encode(mix: &RenderedMix) -> Result<EncodedAsset, EncodeError> {
    let channels = mix.channels.len();
    if channels == 0 {
        return Err(EncodeError::NoChannels);
    }
    if mix.sample_rate == 0 {
        return Err(EncodeError::ZeroSampleRate);
    }

    if u16::try_from(channels)
        .ok()
        .and_then(|ch| ch.checked_mul(BITS_PER_SAMPLE / 8))
        .and_then(|align| mix.sample_rate.checked_mul(align as u32))
        .is_none()
    {
        return Err(EncodeError::ByteRateOverflow {
            sample_rate: mix.sample_rate,
            channels,
        });
    }

    let frames = mix.frame_count();
    if let Some((channel, found)) = mix
        .channels
        .iter()
        .map(Vec::len)
        .enumerate()
        .find(|&(_, len)| len != frames)
    {
        return Err(EncodeError::RaggedChannels {
            channel,
            expected: frames,
            found,
        });
    }

    let data_len = frames * channels * 2;
    let declared = u32::try_from(data_len)
        .ok()
        .filter(|len| len.checked_add(36).is_some())
        .ok_or(EncodeError::TooLarge(data_len))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + data_len);
    write_header(
        &mut bytes,
        FORMAT_PCM,
        channels as u16,
        mix.sample_rate,
        BITS_PER_SAMPLE,
        declared,
    );

    for frame in 0..frames {
        for channel in &mix.channels {
            bytes.extend_from_slice(&quantize(channel[frame]).to_le_bytes());
        }
    }

    debug_assert_eq!(bytes.len(), HEADER_LEN + data_len);

    Ok(EncodedAsset {
        bytes,
        mime_type: WAV_MIME_TYPE,
        sample_rate: mix.sample_rate,
        channel_count: channels as u16,
        duration_secs: frames as f64 / mix.sample_rate as f64,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
