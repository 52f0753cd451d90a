//! voice-mixdown — record a voice take, mix it with other tracks, and encode
//! the result as a 16-bit PCM WAV file.
//!
//! * [`audio`] — capture, decode, resample, mix and encode.
//! * [`config`] — `settings.toml` persistence and platform paths.
//! * [`pipeline`] — the orchestrator that sequences recording and mixing.

pub mod audio;
pub mod config;
pub mod pipeline;
