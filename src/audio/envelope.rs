//! Piecewise-linear gain envelope (fade-in / hold / fade-out).

use crate::audio::types::AudioTrack;

/// Convert seconds to a whole number of frames at `sample_rate`.
pub fn secs_to_frames(secs: f64, sample_rate: u32) -> usize {
    if !secs.is_finite() || secs <= 0.0 {
        return 0;
    }
    (secs * sample_rate as f64).round() as usize
}

/// Gain automation of one track, in frames relative to the track start.
///
/// ```text
/// gain ┤      ┌──────────────┐
///      │     ╱                ╲
///    0 ┼────╱                  ╲────
///          0  fade_in   fade_out  duration
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub gain: f64,
    pub fade_in_frames: usize,
    pub fade_out_frames: usize,
    pub duration_frames: usize,
}

impl Envelope {
    /// Build the envelope for `track` whose decoded length is
    /// `duration_frames` at `sample_rate`.
    pub fn for_track(track: &AudioTrack, duration_frames: usize, sample_rate: u32) -> Self {
        Self {
            gain: track.gain as f64,
            fade_in_frames: secs_to_frames(track.fade_in_secs, sample_rate),
            fade_out_frames: secs_to_frames(track.fade_out_secs, sample_rate),
            duration_frames,
        }
    }

    /// Gain multiplier at `frame` frames after the track start.
    ///
    /// Zero outside `[0, duration)`.  The fade-in ramp is exactly 0 on the
    /// first frame and reaches `gain` at `fade_in_frames`; the fade-out ramp
    /// reaches 0 at `duration`.  When the two windows overlap the smaller
    /// ramp wins.
    pub fn at(&self, frame: usize) -> f64 {
        if frame >= self.duration_frames || self.gain == 0.0 {
            return 0.0;
        }

        let rising = if frame < self.fade_in_frames {
            frame as f64 / self.fade_in_frames as f64
        } else {
            1.0
        };

        let remaining = self.duration_frames - frame;
        let falling = if remaining < self.fade_out_frames {
            remaining as f64 / self.fade_out_frames as f64
        } else {
            1.0
        };

        self.gain * rising.min(falling)
    }

    /// `true` when the envelope is the constant `gain` across the track.
    pub fn is_flat(&self) -> bool {
        self.fade_in_frames == 0 && self.fade_out_frames == 0
    }
}
