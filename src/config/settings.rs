//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.
//! Every section is `#[serde(default)]`, so a partial `settings.toml` only
//! overrides the keys it names.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::audio::capture::{CaptureConstraints, RecordingEncoding};
use crate::audio::types::{AudioTrack, RenderRequest, DEFAULT_SAMPLE_RATE};

// ---------------------------------------------------------------------------
// MixConfig
// ---------------------------------------------------------------------------

/// Output format used for ad-hoc mixes built from a track list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Output channel count, 1 (mono) or 2 (stereo).
    pub channel_count: u16,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channel_count: 2,
        }
    }
}

impl MixConfig {
    /// A render request for `tracks` in this output format.
    pub fn request(&self, tracks: Vec<AudioTrack>) -> RenderRequest {
        RenderRequest::new(tracks).with_format(self.sample_rate, self.channel_count)
    }
}

// ---------------------------------------------------------------------------
// RecordingConfig
// ---------------------------------------------------------------------------

/// Settings for microphone capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Ask the host for echo cancellation.  Not every host can provide it.
    pub echo_cancellation: bool,
    /// Ask the host for noise suppression.  Not every host can provide it.
    pub noise_suppression: bool,
    /// Encodings to try, most preferred first.
    pub preferred_encodings: Vec<RecordingEncoding>,
    /// Upper bound on captured bytes held for one take.
    pub max_buffered_bytes: usize,
    /// Input device name; `None` selects the system default.
    pub device: Option<String>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
            preferred_encodings: vec![RecordingEncoding::WavPcm16, RecordingEncoding::WavFloat32],
            max_buffered_bytes: 64 * 1024 * 1024,
            device: None,
        }
    }
}

impl RecordingConfig {
    pub fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            sample_rate: self.sample_rate,
            channels: self.channels,
            echo_cancellation: self.echo_cancellation,
            noise_suppression: self.noise_suppression,
        }
    }
}

// ---------------------------------------------------------------------------
// DecoderConfig
// ---------------------------------------------------------------------------

/// Limits applied while fetching and decoding track sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Seconds to wait for a source's bytes before giving up.
    pub fetch_timeout_secs: f64,
    /// Sources larger than this are rejected before decoding.
    pub max_source_bytes: usize,
}

const DEFAULT_FETCH_TIMEOUT_SECS: f64 = 30.0;

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            max_source_bytes: 256 * 1024 * 1024,
        }
    }
}

impl DecoderConfig {
    /// The fetch timeout as a [`Duration`], at least 1 ms.
    ///
    /// Values that do not fit a `Duration` (infinite, overflowing, negative)
    /// fall back to the 30 s default.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.fetch_timeout_secs.max(0.001)).unwrap_or_else(|_| {
            log::warn!(
                "fetch_timeout_secs = {} is out of range; using {DEFAULT_FETCH_TIMEOUT_SECS}s",
                self.fetch_timeout_secs
            );
            Duration::from_secs_f64(DEFAULT_FETCH_TIMEOUT_SECS)
        })
    }
}

// ---------------------------------------------------------------------------
// OutputConfig
// ---------------------------------------------------------------------------

/// Where rendered files are written when no explicit path is given.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// `None` means [`AppPaths::renders_dir`].
    pub directory: Option<PathBuf>,
}

impl OutputConfig {
    pub fn resolve_dir(&self, paths: &AppPaths) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| paths.renders_dir.clone())
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use voice_mixdown::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Output format for ad-hoc mixes.
    pub mix: MixConfig,
    /// Microphone capture settings.
    pub recording: RecordingConfig,
    /// Source fetch / decode limits.
    pub decoder: DecoderConfig,
    /// Render output location.
    pub output: OutputConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// so callers never need to special-case a missing file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
