//! Output settings and per-request transcoder configuration

use std::path::{Path, PathBuf};

/// Constant bitrates (kbps) the MP3 encoder accepts
pub const SUPPORTED_BITRATES_KBPS: &[u32] = &[
    8, 16, 24, 32, 40, 48, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];

/// Highest (worst) encoder quality step; 0 is best
pub const MAX_QUALITY: u8 = 9;

pub const DEFAULT_BITRATE_KBPS: u32 = 320;
pub const DEFAULT_QUALITY: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("unsupported bitrate {0} kbps (expected one of {SUPPORTED_BITRATES_KBPS:?})")]
    Bitrate(u32),

    #[error("quality {0} out of range (0 = best ..= {MAX_QUALITY})")]
    Quality(u8),
}

/// Validated encoder output settings, shared by every transcoder of a mount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSettings {
    bitrate_kbps: u32,
    quality: u8,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
            quality: DEFAULT_QUALITY,
        }
    }
}

impl OutputSettings {
    pub fn new(bitrate_kbps: u32, quality: u8) -> Result<Self, SettingsError> {
        if !SUPPORTED_BITRATES_KBPS.contains(&bitrate_kbps) {
            return Err(SettingsError::Bitrate(bitrate_kbps));
        }
        if quality > MAX_QUALITY {
            return Err(SettingsError::Quality(quality));
        }
        Ok(Self {
            bitrate_kbps,
            quality,
        })
    }

    pub fn bitrate_kbps(&self) -> u32 {
        self.bitrate_kbps
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encoded audio bytes for a stream of the given length
    pub fn audio_bytes(&self, duration_secs: f64) -> u64 {
        (duration_secs * self.bitrate_kbps as f64 * 1000.0 / 8.0).ceil() as u64
    }
}

/// Everything one transcoder instance needs, fixed at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscoderConfig {
    real_path: PathBuf,
    output: OutputSettings,
}

impl TranscoderConfig {
    pub fn new(real_path: impl Into<PathBuf>, output: OutputSettings) -> Self {
        Self {
            real_path: real_path.into(),
            output,
        }
    }

    pub fn real_path(&self) -> &Path {
        &self.real_path
    }

    pub fn output(&self) -> OutputSettings {
        self.output
    }
}
