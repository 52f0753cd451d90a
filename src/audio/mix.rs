//! Mix engine — one deterministic, non-realtime render pass.
//!
//! For output frame `t` and channel `c`:
//!
//! ```text
//! out[c][t] = clamp( Σ_i env_i(t - off_i) · s_i[c][t - off_i], -1, 1 )
//! ```
//!
//! where `s_i[c][x] = 0` outside `[0, duration_i)`.  The whole output is
//! computed in one synchronous pass with f64 accumulation, so identical
//! inputs always give bit-identical output.  Overlapping fades from
//! different tracks are simply summed before the final clamp.
//!
//! Channel mapping per track:
//!
//! | track ch | output ch | mapping                      |
//! |----------|-----------|------------------------------|
//! | n        | n         | 1:1                          |
//! | 1        | 2         | duplicate                    |
//! | n > 1    | 1         | average of all track channels|
//! | other    | 2         | channel `min(c, n - 1)`      |

use thiserror::Error;

use crate::audio::decode::DecodeError;
use crate::audio::envelope::{secs_to_frames, Envelope};
use crate::audio::types::{DecodedBuffer, MixRequest, RenderedMix};

// ---------------------------------------------------------------------------
// MixError
// ---------------------------------------------------------------------------

/// Why a mix could not be rendered.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MixErrorKind {
    #[error("{0}")]
    Decode(DecodeError),

    #[error("sample rate {found} Hz does not match mix rate {expected} Hz")]
    SampleRateMismatch { expected: u32, found: u32 },

    #[error("invalid track parameter: {0}")]
    InvalidParameter(String),

    #[error("decoded buffer has no channels")]
    EmptyBuffer,

    #[error("unsupported output format: {0}")]
    InvalidFormat(String),
}

/// A failed mix, pointing at the offending track when there is one.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", describe(.failing_track_index, .kind))]
pub struct MixError {
    pub failing_track_index: Option<usize>,
    pub kind: MixErrorKind,
}

fn describe(index: &Option<usize>, kind: &MixErrorKind) -> String {
    match index {
        Some(i) => format!("track {i}: {kind}"),
        None => kind.to_string(),
    }
}

impl MixError {
    pub fn track(index: usize, kind: MixErrorKind) -> Self {
        Self {
            failing_track_index: Some(index),
            kind,
        }
    }

    pub fn format(reason: impl Into<String>) -> Self {
        Self {
            failing_track_index: None,
            kind: MixErrorKind::InvalidFormat(reason.into()),
        }
    }

    /// Wrap an upstream decode failure of track `index`.
    pub fn decode(index: usize, err: DecodeError) -> Self {
        Self::track(index, MixErrorKind::Decode(err))
    }
}

// ---------------------------------------------------------------------------
// render
// ---------------------------------------------------------------------------

/// Render `request` into a single clamped buffer.
///
/// The request is consumed; its decoded buffers are dropped once the pass is
/// complete.
pub fn render(request: MixRequest) -> Result<RenderedMix, MixError> {
    validate(&request)?;

    let sample_rate = request.sample_rate;
    let out_channels = request.channel_count as usize;

    let placed: Vec<(usize, Envelope, &DecodedBuffer)> = request
        .tracks
        .iter()
        .map(|(track, buffer)| {
            let offset = secs_to_frames(track.start_offset_secs, sample_rate);
            let envelope = Envelope::for_track(track, buffer.frame_count(), sample_rate);
            (offset, envelope, buffer)
        })
        .collect();

    let frame_count = match request.output_duration_secs {
        Some(secs) => secs_to_frames(secs, sample_rate),
        None => placed
            .iter()
            .map(|(offset, env, _)| offset.saturating_add(env.duration_frames))
            .max()
            .unwrap_or(0),
    };

    log::debug!(
        "mix: rendering {} track(s) → {} frames × {} ch @ {} Hz",
        placed.len(),
        frame_count,
        out_channels,
        sample_rate
    );

    let mut acc = vec![vec![0.0f64; frame_count]; out_channels];

    for (offset, envelope, buffer) in &placed {
        if envelope.gain == 0.0 || *offset >= frame_count {
            continue;
        }
        let end = offset.saturating_add(envelope.duration_frames).min(frame_count);

        for (c, out) in acc.iter_mut().enumerate() {
            for t in *offset..end {
                let local = t - offset;
                let gain = envelope.at(local);
                if gain == 0.0 {
                    continue;
                }
                out[t] += gain * source_sample(buffer, c, out_channels, local);
            }
        }
    }

    let channels = acc
        .into_iter()
        .map(|ch| {
            ch.into_iter()
                .map(|s| if s.is_finite() { s.clamp(-1.0, 1.0) as f32 } else { 0.0 })
                .collect()
        })
        .collect();

    Ok(RenderedMix {
        channels,
        sample_rate,
    })
}

/// Sample of `buffer` feeding output channel `c` at local frame `x`.
fn source_sample(buffer: &DecodedBuffer, c: usize, out_channels: usize, x: usize) -> f64 {
    let n = buffer.channels.len();
    if out_channels == 1 && n > 1 {
        let sum: f64 = buffer.channels.iter().map(|ch| ch[x] as f64).sum();
        return sum / n as f64;
    }
    buffer.channels[c.min(n - 1)][x] as f64
}

/// Longest mix, in frames, whose 16-bit data chunk still fits a WAV header.
pub fn max_frames(channel_count: u16) -> usize {
    let bytes_per_frame = (channel_count.max(1) as u64) * 2;
    ((u32::MAX - 36) as u64 / bytes_per_frame) as usize
}

/// `secs` at `sample_rate` stays within [`max_frames`].
pub fn fits_output(secs: f64, sample_rate: u32, channel_count: u16) -> bool {
    secs.is_finite() && secs * sample_rate as f64 <= max_frames(channel_count) as f64
}

fn validate(request: &MixRequest) -> Result<(), MixError> {
    if request.sample_rate == 0 {
        return Err(MixError::format("sample rate must be > 0"));
    }
    if !(1..=2).contains(&request.channel_count) {
        return Err(MixError::format(format!(
            "channel count must be 1 or 2 (got {})",
            request.channel_count
        )));
    }
    if let Some(secs) = request.output_duration_secs {
        if !secs.is_finite() || secs < 0.0 {
            return Err(MixError::format(format!(
                "output duration must be a finite value >= 0 (got {secs})"
            )));
        }
        if !fits_output(secs, request.sample_rate, request.channel_count) {
            return Err(MixError::format(format!(
                "output duration of {secs}s exceeds the largest WAV file"
            )));
        }
    }
    let limit = max_frames(request.channel_count);

    for (i, (track, buffer)) in request.tracks.iter().enumerate() {
        track
            .validate()
            .map_err(|reason| MixError::track(i, MixErrorKind::InvalidParameter(reason)))?;

        if buffer.sample_rate != request.sample_rate {
            return Err(MixError::track(
                i,
                MixErrorKind::SampleRateMismatch {
                    expected: request.sample_rate,
                    found: buffer.sample_rate,
                },
            ));
        }

        if buffer.channels.is_empty() {
            return Err(MixError::track(i, MixErrorKind::EmptyBuffer));
        }

        let frames = buffer.frame_count();
        if buffer.channels.iter().any(|ch| ch.len() != frames) {
            return Err(MixError::track(
                i,
                MixErrorKind::InvalidParameter("decoded channels differ in length".into()),
            ));
        }

        // A fixed output duration truncates late tracks instead.
        if request.output_duration_secs.is_none() {
            let end = secs_to_frames(track.start_offset_secs, request.sample_rate)
                .checked_add(frames)
                .filter(|&end| end <= limit);
            if end.is_none() {
                return Err(MixError::track(
                    i,
                    MixErrorKind::InvalidParameter(format!(
                        "start offset {}s ends beyond the largest WAV file",
                        track.start_offset_secs
                    )),
                ));
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decode::DecodeErrorKind;
    use crate::audio::types::AudioTrack;
    use crate::audio::wav;

    const SR: u32 = 44_100;

    fn track() -> AudioTrack {
        AudioTrack::new(Vec::<u8>::new())
    }

    fn mono(samples: Vec<f32>) -> DecodedBuffer {
        DecodedBuffer::new(vec![samples], SR)
    }

    fn request(tracks: Vec<(AudioTrack, DecodedBuffer)>, channels: u16) -> MixRequest {
        MixRequest {
            tracks,
            sample_rate: SR,
            channel_count: channels,
            output_duration_secs: None,
        }
    }

    /// Deterministic pseudo-random signal in [-0.9, 0.9].
    fn noise(len: usize, seed: u32) -> Vec<f32> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                ((state >> 8) as f32 / (1u32 << 24) as f32 - 0.5) * 1.8
            })
            .collect()
    }

    #[test]
    fn empty_track_list_with_no_duration_is_zero_length() {
        let out = render(request(Vec::new(), 2)).expect("render");
        assert_eq!(out.channel_count(), 2);
        assert_eq!(out.frame_count(), 0);
    }

    #[test]
    fn empty_track_list_with_fixed_duration_is_silence() {
        let mut req = request(Vec::new(), 1);
        req.output_duration_secs = Some(0.5);
        let out = render(req).expect("render");
        assert_eq!(out.frame_count(), 22_050);
        assert!(out.channels[0].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn linearity_two_half_gain_tracks_equal_one_full_gain_track() {
        let signal = noise(4_410, 7);

        let halves = render(request(
            vec![
                (track().with_gain(0.5), mono(signal.clone())),
                (track().with_gain(0.5), mono(signal.clone())),
            ],
            1,
        ))
        .expect("render");
        let full = render(request(vec![(track(), mono(signal))], 1)).expect("render");

        for (a, b) in halves.channels[0].iter().zip(&full.channels[0]) {
            assert!((a - b).abs() <= 1.0 / 32_768.0, "{a} vs {b}");
        }
    }

    #[test]
    fn zero_gain_track_contributes_nothing() {
        let bed = noise(1_000, 3);
        let loud = vec![1.0f32; 1_000];

        let with_muted = render(request(
            vec![
                (track().with_gain(0.7), mono(bed.clone())),
                (track().with_gain(0.0), mono(loud)),
            ],
            1,
        ))
        .expect("render");
        let alone = render(request(vec![(track().with_gain(0.7), mono(bed))], 1)).expect("render");

        assert_eq!(with_muted, alone);
    }

    #[test]
    fn fade_in_envelope_shapes_constant_signal() {
        let out = render(request(
            vec![(track().with_fades(2.0, 0.0), mono(vec![1.0; 3 * SR as usize]))],
            1,
        ))
        .expect("render");
        let ch = &out.channels[0];
        assert_eq!(ch[0], 0.0);
        assert!((ch[2 * SR as usize] - 1.0).abs() < 1e-6);
        assert!(ch[..2 * SR as usize].windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn start_offset_pads_with_leading_silence() {
        let out = render(request(
            vec![(track().with_offset(0.01), mono(vec![0.5; 100]))],
            1,
        ))
        .expect("render");
        assert_eq!(out.frame_count(), 441 + 100);
        assert!(out.channels[0][..441].iter().all(|&s| s == 0.0));
        assert!(out.channels[0][441..].iter().all(|&s| s == 0.5));
    }

    #[test]
    fn short_track_is_zero_padded_not_looped() {
        let mut req = request(vec![(track(), mono(vec![0.5; 10]))], 1);
        req.output_duration_secs = Some(20.0 / SR as f64);
        let out = render(req).expect("render");
        assert_eq!(out.frame_count(), 20);
        assert!(out.channels[0][10..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn fixed_duration_truncates_long_tracks() {
        let mut req = request(vec![(track(), mono(vec![0.5; 1_000]))], 1);
        req.output_duration_secs = Some(100.0 / SR as f64);
        assert_eq!(render(req).expect("render").frame_count(), 100);
    }

    #[test]
    fn sum_is_clamped() {
        let out = render(request(
            vec![
                (track(), mono(vec![0.8; 10])),
                (track(), mono(vec![0.8; 10])),
                (track(), DecodedBuffer::new(vec![vec![-0.9; 10]], SR)),
            ],
            1,
        ))
        .expect("render");
        assert!(out.channels[0].iter().all(|&s| (-1.0..=1.0).contains(&s)));

        let hot = render(request(
            vec![(track(), mono(vec![0.8; 10])), (track(), mono(vec![0.8; 10]))],
            1,
        ))
        .expect("render");
        assert!(hot.channels[0].iter().all(|&s| s == 1.0));
    }

    #[test]
    fn mono_track_is_duplicated_into_stereo() {
        let out = render(request(vec![(track(), mono(vec![0.25, -0.25]))], 2)).expect("render");
        assert_eq!(out.channels[0], vec![0.25, -0.25]);
        assert_eq!(out.channels[1], vec![0.25, -0.25]);
    }

    #[test]
    fn stereo_track_is_averaged_into_mono() {
        let stereo = DecodedBuffer::new(vec![vec![1.0, 0.5], vec![0.0, -0.5]], SR);
        let out = render(request(vec![(track(), stereo)], 1)).expect("render");
        assert_eq!(out.channels[0], vec![0.5, 0.0]);
    }

    #[test]
    fn rendering_is_deterministic() {
        let make = || {
            request(
                vec![
                    (track().with_gain(0.6).with_fades(0.01, 0.01), mono(noise(2_000, 1))),
                    (track().with_gain(0.3).with_offset(0.005), mono(noise(2_000, 2))),
                ],
                2,
            )
        };
        assert_eq!(render(make()).expect("a"), render(make()).expect("b"));
    }

    #[test]
    fn mismatched_sample_rate_names_the_track() {
        let err = render(request(
            vec![
                (track(), mono(vec![0.0; 4])),
                (track(), DecodedBuffer::new(vec![vec![0.0; 4]], 48_000)),
            ],
            1,
        ))
        .unwrap_err();
        assert_eq!(err.failing_track_index, Some(1));
        assert!(matches!(
            err.kind,
            MixErrorKind::SampleRateMismatch {
                expected: 44_100,
                found: 48_000
            }
        ));
    }

    #[test]
    fn invalid_gain_names_the_track() {
        let err = render(request(
            vec![
                (track(), mono(vec![0.0; 4])),
                (track(), mono(vec![0.0; 4])),
                (track().with_gain(-0.1), mono(vec![0.0; 4])),
            ],
            1,
        ))
        .unwrap_err();
        assert_eq!(err.failing_track_index, Some(2));
        assert!(err.to_string().starts_with("track 2:"));
    }

    #[test]
    fn three_channel_output_is_rejected() {
        let err = render(request(Vec::new(), 3)).unwrap_err();
        assert_eq!(err.failing_track_index, None);
        assert!(matches!(err.kind, MixErrorKind::InvalidFormat(_)));
    }

    #[test]
    fn huge_start_offset_is_rejected_not_overflowed() {
        let mut late = track();
        late.start_offset_secs = 1e300;
        let err = render(request(vec![(track(), mono(vec![0.5; 4])), (late, mono(vec![0.5; 4]))], 2))
            .unwrap_err();
        assert_eq!(err.failing_track_index, Some(1));
        assert!(matches!(err.kind, MixErrorKind::InvalidParameter(_)));
    }

    #[test]
    fn huge_start_offset_under_fixed_duration_is_truncated_away() {
        let mut late = track();
        late.start_offset_secs = 1e300;
        let mut req = request(vec![(late, mono(vec![0.5; 4]))], 1);
        req.output_duration_secs = Some(0.001);
        let mix = render(req).expect("render");
        assert!(mix.channels[0].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn huge_output_duration_is_an_invalid_format() {
        let mut req = request(Vec::new(), 2);
        req.output_duration_secs = Some(1e300);
        let err = render(req).unwrap_err();
        assert_eq!(err.failing_track_index, None);
        assert!(matches!(err.kind, MixErrorKind::InvalidFormat(_)));
    }

    #[test]
    fn max_frames_keeps_data_chunk_within_u32() {
        assert_eq!(max_frames(1) * 2, (u32::MAX - 36) as usize - 1);
        assert!(max_frames(2) * 4 <= (u32::MAX - 36) as usize);
        assert!(fits_output(60.0, SR, 2));
        assert!(!fits_output(f64::INFINITY, SR, 2));
    }

    #[test]
    fn decode_failures_wrap_with_index() {
        let err = MixError::decode(
            2,
            DecodeError::new(DecodeErrorKind::Corrupt, "voice.mp3", "bad frame"),
        );
        assert_eq!(err.failing_track_index, Some(2));
        assert!(err.to_string().contains("voice.mp3"));
    }

    #[test]
    fn silent_faded_track_encodes_to_all_zero_bytes() {
        let out = render(request(
            vec![(track().with_fades(0.5, 0.5), mono(vec![0.0; 3 * SR as usize]))],
            1,
        ))
        .expect("render");
        let asset = wav::encode(&out).expect("encode");
        assert_eq!(asset.bytes.len(), 264_644);
        assert!(asset.bytes[wav::HEADER_LEN..].iter().all(|&b| b == 0));
    }
}
