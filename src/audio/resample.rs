//! Sample-rate conversion and channel down-mixing.
//!
//! Every buffer entering a mix must already be at the mix rate, so the
//! decoder runs [`resample`] on anything that arrives at another rate.
//! Conversion uses `rubato`'s `FastFixedIn` with a septic polynomial, fed the
//! whole track as one chunk and flushed, with the resampler's output delay
//! trimmed so the result is time-aligned with the input.
//!
//! [`downmix`] is used by the capture callback when the device only offers
//! more channels than were requested.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use thiserror::Error;

/// Errors raised by the resampler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResampleError {
    #[error("sample rate must be > 0 (from {from} Hz to {to} Hz)")]
    ZeroRate { from: u32, to: u32 },

    #[error("failed to create resampler: {0}")]
    Construction(String),

    #[error("resampling failed: {0}")]
    Process(String),
}

// ---------------------------------------------------------------------------
// downmix
// ---------------------------------------------------------------------------

/// Mix interleaved `from`-channel audio down to `to` interleaved channels.
///
/// Output channel `k` is the average of source channels `k, k + to, k + 2·to, …`;
/// with `to == 1` this is the plain average of every channel.
///
/// * `from == to` returns the input unchanged.
/// * `from == 0`, `to == 0` or `to > from` return an empty vector.
///
/// ```rust
/// use voice_mixdown::audio::downmix;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = downmix(&stereo, 2, 1);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[0] - 0.0).abs() < 1e-6);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    if from == to {
        return samples.to_vec();
    }
    if from == 0 || to == 0 || to > from {
        return Vec::new();
    }

    let (from, to) = (from as usize, to as usize);
    let mut out = Vec::with_capacity(samples.len() / from * to);
    for frame in samples.chunks_exact(from) {
        for k in 0..to {
            let group: Vec<f32> = frame.iter().skip(k).step_by(to).copied().collect();
            out.push(group.iter().sum::<f32>() / group.len() as f32);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// resample
// ---------------------------------------------------------------------------

/// Number of output frames `resample` produces for `frames` input frames.
pub fn resampled_len(frames: usize, from: u32, to: u32) -> usize {
    if from == 0 {
        return 0;
    }
    (frames as f64 * to as f64 / from as f64).round() as usize
}

/// Resample planar `channels` from `from` Hz to `to` Hz.
///
/// * `from == to` returns the input unchanged (no interpolation).
/// * Empty input returns empty channels.
///
/// The output has exactly [`resampled_len`] frames per channel.
pub fn resample(
    channels: Vec<Vec<f32>>,
    from: u32,
    to: u32,
) -> Result<Vec<Vec<f32>>, ResampleError> {
    if from == 0 || to == 0 {
        return Err(ResampleError::ZeroRate { from, to });
    }
    if from == to || channels.is_empty() {
        return Ok(channels);
    }

    let frames = channels[0].len();
    if frames == 0 {
        return Ok(channels);
    }

    let expected = resampled_len(frames, from, to);
    log::debug!(
        "resample: {} frames × {} ch {} Hz → {} Hz ({} frames)",
        frames,
        channels.len(),
        from,
        to,
        expected
    );

    let mut resampler = FastFixedIn::<f32>::new(
        to as f64 / from as f64,
        1.0,
        PolynomialDegree::Septic,
        frames,
        channels.len(),
    )
    .map_err(|e| ResampleError::Construction(e.to_string()))?;

    let delay = resampler.output_delay();

    let mut output = resampler
        .process(&channels, None)
        .map_err(|e| ResampleError::Process(e.to_string()))?;

    // Flush until the delayed tail has been produced.
    while output[0].len() < delay + expected {
        let tail = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| ResampleError::Process(e.to_string()))?;
        if tail[0].is_empty() {
            break;
        }
        for (out, t) in output.iter_mut().zip(tail) {
            out.extend(t);
        }
    }

    Ok(output
        .into_iter()
        .map(|ch| {
            let mut ch: Vec<f32> = ch.into_iter().skip(delay).take(expected).collect();
            ch.resize(expected, 0.0);
            ch
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
