//! Plain data types shared by every pipeline stage.
//!
//! Everything here is read-only once constructed.  Ownership flows one way:
//! [`AudioTrack`] + [`DecodedBuffer`] go into a [`MixRequest`], the mix engine
//! turns that into a [`RenderedMix`], and the encoder turns that into an
//! [`EncodedAsset`] owned by the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// MIME type of every asset produced by the encoder.
pub const WAV_MIME_TYPE: &str = "audio/wav";

/// Default mix sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

// ---------------------------------------------------------------------------
// TrackSource
// ---------------------------------------------------------------------------

/// Where the encoded bytes of a track come from.
///
/// In TOML request files a source is written as `source = { url = "..." }`
/// or `source = { path = "..." }`.  In-memory bytes (e.g. a finished
/// recording) cannot be expressed in a file and are skipped by serde.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackSource {
    /// HTTP(S) URL fetched with the decoder's timeout.
    Url(String),
    /// Local file.
    Path(PathBuf),
    /// Opaque encoded audio already in memory.
    #[serde(skip)]
    Bytes(Arc<[u8]>),
}

impl TrackSource {
    /// Short printable reference used in error messages and logs.
    pub fn source_ref(&self) -> String {
        match self {
            TrackSource::Url(url) => url.clone(),
            TrackSource::Path(path) => path.display().to_string(),
            TrackSource::Bytes(bytes) => format!("<{} bytes in memory>", bytes.len()),
        }
    }

    /// Extension hint for the format probe, when one is available.
    pub fn extension_hint(&self) -> Option<String> {
        let ext = |p: &Path| p.extension().and_then(|e| e.to_str()).map(str::to_lowercase);
        match self {
            TrackSource::Url(url) => {
                let path = url.split(['?', '#']).next().unwrap_or(url);
                ext(Path::new(path))
            }
            TrackSource::Path(path) => ext(path),
            TrackSource::Bytes(_) => None,
        }
    }
}

impl From<Vec<u8>> for TrackSource {
    fn from(bytes: Vec<u8>) -> Self {
        TrackSource::Bytes(bytes.into())
    }
}

// ---------------------------------------------------------------------------
// AudioTrack
// ---------------------------------------------------------------------------

/// One input track of a mix with its gain/fade/offset automation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTrack {
    pub source: TrackSource,
    /// Linear gain in `[0.0, 1.0]`.
    #[serde(default = "unity_gain")]
    pub gain: f32,
    #[serde(default)]
    pub fade_in_secs: f64,
    #[serde(default)]
    pub fade_out_secs: f64,
    #[serde(default)]
    pub start_offset_secs: f64,
}

fn unity_gain() -> f32 {
    1.0
}

impl AudioTrack {
    /// A track at unity gain with no fades and no offset.
    pub fn new(source: impl Into<TrackSource>) -> Self {
        Self {
            source: source.into(),
            gain: 1.0,
            fade_in_secs: 0.0,
            fade_out_secs: 0.0,
            start_offset_secs: 0.0,
        }
    }

    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    pub fn with_fades(mut self, fade_in_secs: f64, fade_out_secs: f64) -> Self {
        self.fade_in_secs = fade_in_secs;
        self.fade_out_secs = fade_out_secs;
        self
    }

    pub fn with_offset(mut self, start_offset_secs: f64) -> Self {
        self.start_offset_secs = start_offset_secs;
        self
    }

    /// Check the automation parameters.  Returns a description of the first
    /// offending field.
    pub fn validate(&self) -> Result<(), String> {
        if !self.gain.is_finite() || !(0.0..=1.0).contains(&self.gain) {
            return Err(format!("gain {} outside [0, 1]", self.gain));
        }
        for (name, value) in [
            ("fade_in_secs", self.fade_in_secs),
            ("fade_out_secs", self.fade_out_secs),
            ("start_offset_secs", self.start_offset_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{name} must be a finite value >= 0 (got {value})"));
            }
        }
        Ok(())
    }
}

impl From<String> for TrackSource {
    fn from(url: String) -> Self {
        TrackSource::Url(url)
    }
}

impl From<PathBuf> for TrackSource {
    fn from(path: PathBuf) -> Self {
        TrackSource::Path(path)
    }
}

// ---------------------------------------------------------------------------
// DecodedBuffer
// ---------------------------------------------------------------------------

/// Planar float samples produced by the decoder at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    /// One `Vec` per channel, all of equal length.
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl DecodedBuffer {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Input of the mix engine: every track already decoded to `sample_rate`.
///
/// The request owns its buffers; rendering consumes it.
#[derive(Debug, Clone)]
pub struct MixRequest {
    pub tracks: Vec<(AudioTrack, DecodedBuffer)>,
    pub sample_rate: u32,
    pub channel_count: u16,
    /// Fixed output length.  `None` means "until the last track ends".
    pub output_duration_secs: Option<f64>,
}

/// A caller-facing mix request: track sources plus output format.
///
/// Loadable from TOML or JSON:
///
/// ```toml
/// sample_rate = 44100
/// channel_count = 2
///
/// [[tracks]]
/// source = { url = "https://cdn.example.com/voice.mp3" }
/// gain = 0.9
/// fade_in_secs = 0.5
///
/// [[tracks]]
/// source = { path = "music/bed.ogg" }
/// gain = 0.3
/// start_offset_secs = 1.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub tracks: Vec<AudioTrack>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channel_count")]
    pub channel_count: u16,
    #[serde(default)]
    pub output_duration_secs: Option<f64>,
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_channel_count() -> u16 {
    2
}

impl RenderRequest {
    pub fn new(tracks: Vec<AudioTrack>) -> Self {
        Self {
            tracks,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channel_count: default_channel_count(),
            output_duration_secs: None,
        }
    }

    pub fn with_format(mut self, sample_rate: u32, channel_count: u16) -> Self {
        self.sample_rate = sample_rate;
        self.channel_count = channel_count;
        self
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.output_duration_secs = Some(secs);
        self
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Output of the mix engine.  Every sample is within `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMix {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl RenderedMix {
    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }
}

/// A complete, valid WAV file plus its format summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodedAsset {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub sample_rate: u32,
    pub channel_count: u16,
    pub duration_secs: f64,
}

impl EncodedAsset {
    /// Number of sample frames in the data chunk.
    pub fn frame_count(&self) -> usize {
        let block = self.channel_count as usize * 2;
        if block == 0 {
            return 0;
        }
        self.bytes.len().saturating_sub(crate::audio::wav::HEADER_LEN) / block
    }

    /// Write the asset to `path`, creating parent directories as needed.
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, &self.bytes)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_validation_rejects_out_of_range_gain() {
        let track = AudioTrack::new(vec![0u8; 4]).with_gain(1.5);
        assert!(track.validate().unwrap_err().contains("gain"));
    }

    #[test]
    fn track_validation_rejects_negative_fade() {
        let track = AudioTrack::new(vec![0u8; 4]).with_fades(-0.1, 0.0);
        assert!(track.validate().unwrap_err().contains("fade_in_secs"));
    }

    #[test]
    fn track_validation_rejects_nan_offset() {
        let track = AudioTrack::new(vec![0u8; 4]).with_offset(f64::NAN);
        assert!(track.validate().is_err());
    }

    #[test]
    fn extension_hint_ignores_query_string() {
        let src = TrackSource::Url("https://cdn.example.com/a/voice.MP3?sig=abc".into());
        assert_eq!(src.extension_hint().as_deref(), Some("mp3"));
        assert_eq!(TrackSource::from(vec![1u8]).extension_hint(), None);
    }

    #[test]
    fn render_request_parses_from_toml_with_defaults() {
        let text = r#"
            [[tracks]]
            source = { url = "https://cdn.example.com/voice.mp3" }
            fade_in_secs = 0.5

            [[tracks]]
            source = { path = "bed.ogg" }
            gain = 0.25
            start_offset_secs = 2.0
        "#;
        let req: RenderRequest = toml::from_str(text).expect("parse");
        assert_eq!(req.sample_rate, 44_100);
        assert_eq!(req.channel_count, 2);
        assert_eq!(req.tracks.len(), 2);
        assert_eq!(req.tracks[0].gain, 1.0);
        assert_eq!(req.tracks[0].fade_in_secs, 0.5);
        assert_eq!(req.tracks[1].source, TrackSource::Path("bed.ogg".into()));
        assert_eq!(req.tracks[1].start_offset_secs, 2.0);
        assert!(req.output_duration_secs.is_none());
    }

    #[test]
    fn decoded_buffer_duration() {
        let buf = DecodedBuffer::new(vec![vec![0.0; 22_050]; 2], 44_100);
        assert_eq!(buf.frame_count(), 22_050);
        assert_eq!(buf.channel_count(), 2);
        assert!((buf.duration_secs() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn asset_write_to_creates_parent_dirs() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("renders").join("mix.wav");
        let asset = EncodedAsset {
            bytes: vec![1, 2, 3],
            mime_type: WAV_MIME_TYPE,
            sample_rate: 44_100,
            channel_count: 1,
            duration_secs: 0.0,
        };
        asset.write_to(&path).expect("write");
        assert_eq!(std::fs::read(&path).expect("read"), vec![1, 2, 3]);
    }
}
