//! Cross-platform application paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\voice-mixdown\
//!   macOS:   ~/Library/Application Support/voice-mixdown/
//!   Linux:   ~/.config/voice-mixdown/
//!
//! Data dir (rendered mixes and recordings):
//!   Windows: %LOCALAPPDATA%\voice-mixdown\renders\
//!   macOS:   ~/Library/Application Support/voice-mixdown/renders/
//!   Linux:   ~/.local/share/voice-mixdown/renders/

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Default directory for rendered WAV files.
    pub renders_dir: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "voice-mixdown";

    /// Resolves all paths using the `dirs` crate.
    ///
    /// Falls back to the current directory if the platform cannot provide a
    /// standard path.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        Self {
            settings_file: config_dir.join("settings.toml"),
            config_dir,
            renders_dir: data_dir.join("renders"),
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
