//! Audio pipeline — capture, decode, resample, mix and encode.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → CaptureHost (cpal) → CaptureEvent (mpsc) → Recorder
//!           → ChunkBuffer → RecordedTake (WAV blob)
//!
//! TrackSource (url | path | bytes) → AudioDecoder (symphonia + rubato)
//!           → DecodedBuffer ─┐
//!                            ├─▶ mix::render → RenderedMix → wav::encode → EncodedAsset
//! AudioTrack (gain, fades) ──┘
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use voice_mixdown::audio::{mix, wav, AudioTrack, DecodedBuffer, MixRequest};
//!
//! let voice = DecodedBuffer::new(vec![vec![0.5; 44_100]], 44_100);
//! let request = MixRequest {
//!     tracks: vec![(AudioTrack::new(Vec::new()).with_fades(0.1, 0.1), voice)],
//!     sample_rate: 44_100,
//!     channel_count: 2,
//!     output_duration_secs: None,
//! };
//! let rendered = mix::render(request).unwrap();
//! let asset = wav::encode(&rendered).unwrap();
//! assert_eq!(asset.bytes.len(), 44 + 44_100 * 2 * 2);
//! ```

pub mod buffer;
pub mod capture;
pub mod decode;
pub mod envelope;
pub mod mix;
pub mod recorder;
pub mod resample;
pub mod types;
pub mod wav;

pub use buffer::{BufferFull, ChunkBuffer};
pub use capture::{
    CaptureConstraints, CaptureError, CaptureEvent, CaptureHost, CpalHost, LiveStream,
    RecordingEncoding,
};
pub use decode::{AudioDecoder, DecodeError, DecodeErrorKind, SymphoniaDecoder};
pub use envelope::Envelope;
pub use mix::{MixError, MixErrorKind};
pub use recorder::{RecordedTake, Recorder, RecorderState, SessionHandle};
pub use resample::{downmix, resample, ResampleError};
pub use types::{
    AudioTrack, DecodedBuffer, EncodedAsset, MixRequest, RenderRequest, RenderedMix, TrackSource,
};
pub use wav::EncodeError;
