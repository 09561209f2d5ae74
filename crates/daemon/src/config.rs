//! Mount configuration
//!
//! Values are layered: command line flags win over `MP3FS_*` environment
//! variables (both handled by clap), which win over an optional TOML file,
//! which wins over built-in defaults. The result is validated once and is
//! immutable for the life of the mount.

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::transcoder::{OutputSettings, SettingsError, DEFAULT_BITRATE_KBPS, DEFAULT_QUALITY};
use serde::{Deserialize, Serialize};

use crate::cli::Cli;

pub const DEFAULT_CACHE_SIZE_MB: u32 = 512;
pub const DEFAULT_CACHE_TTL_SECS: u32 = 60;
pub const DEFAULT_ATTR_TTL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("missing required option: {0}")]
    Missing(&'static str),

    #[error("source directory {0} does not exist or is not a directory")]
    SourceDir(PathBuf),

    #[error("failed to create mount point {path}: {source}")]
    MountPoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid output settings: {0}")]
    Output(#[from] SettingsError),

    #[error("cache size must be at least 1 MB")]
    CacheSize,
}

/// Shape of the optional TOML config file; every key is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub source_dir: Option<PathBuf>,
    pub mount_point: Option<PathBuf>,
    pub bitrate: Option<u32>,
    pub quality: Option<u8>,
    pub cache_size_mb: Option<u32>,
    pub cache_ttl_secs: Option<u32>,
    pub allow_other: Option<bool>,
    pub log_dir: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully resolved, validated mount configuration
#[derive(Debug, Clone)]
pub struct MountConfig {
    pub source_dir: PathBuf,
    pub mount_point: PathBuf,
    pub output: OutputSettings,
    pub cache_size_mb: u32,
    pub cache_ttl_secs: u32,
    pub allow_other: bool,
    /// How long the kernel may cache attributes and lookups
    pub attr_ttl: Duration,
    pub log_dir: Option<PathBuf>,
}

impl MountConfig {
    /// Layer the CLI over its config file (if any) and validate
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::layered(cli, file)
    }

    pub fn layered(cli: &Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let source_dir = cli
            .source_dir
            .clone()
            .or(file.source_dir)
            .ok_or(ConfigError::Missing("sourcepath"))?;
        let mount_point = cli
            .mount_point
            .clone()
            .or(file.mount_point)
            .ok_or(ConfigError::Missing("mountpoint"))?;

        let output = OutputSettings::new(
            cli.bitrate.or(file.bitrate).unwrap_or(DEFAULT_BITRATE_KBPS),
            cli.quality.or(file.quality).unwrap_or(DEFAULT_QUALITY),
        )?;

        let cache_size_mb = cli
            .cache_size_mb
            .or(file.cache_size_mb)
            .unwrap_or(DEFAULT_CACHE_SIZE_MB);
        if cache_size_mb == 0 {
            return Err(ConfigError::CacheSize);
        }

        Ok(Self {
            source_dir,
            mount_point,
            output,
            cache_size_mb,
            cache_ttl_secs: cli
                .cache_ttl_secs
                .or(file.cache_ttl_secs)
                .unwrap_or(DEFAULT_CACHE_TTL_SECS),
            allow_other: cli.allow_other || file.allow_other.unwrap_or(false),
            attr_ttl: DEFAULT_ATTR_TTL,
            log_dir: cli.log_dir.clone().or(file.log_dir),
        })
    }

    /// Check the source tree and make sure the mount point exists
    pub fn prepare_paths(&self) -> Result<(), ConfigError> {
        if !self.source_dir.is_dir() {
            return Err(ConfigError::SourceDir(self.source_dir.clone()));
        }
        if !self.mount_point.exists() {
            std::fs::create_dir_all(&self.mount_point).map_err(|source| {
                ConfigError::MountPoint {
                    path: self.mount_point.clone(),
                    source,
                }
            })?;
            tracing::info!(path = %self.mount_point.display(), "created mount point");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(source: &str, mount: &str) -> Cli {
        Cli {
            source_dir: Some(source.into()),
            mount_point: Some(mount.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = MountConfig::layered(&cli("/music", "/mnt"), FileConfig::default()).unwrap();
        assert_eq!(config.output.bitrate_kbps(), 320);
        assert_eq!(config.output.quality(), 2);
        assert_eq!(config.cache_size_mb, 512);
        assert_eq!(config.cache_ttl_secs, 60);
        assert!(!config.allow_other);
        assert_eq!(config.attr_ttl, Duration::from_secs(1));
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            source_dir = "/from/file"
            bitrate = 128
            quality = 7
            cache_ttl_secs = 5
            allow_other = true
            "#,
        )
        .unwrap();
        let mut cli = cli("/from/cli", "/mnt");
        cli.bitrate = Some(192);

        let config = MountConfig::layered(&cli, file).unwrap();
        assert_eq!(config.source_dir, PathBuf::from("/from/cli"));
        assert_eq!(config.output.bitrate_kbps(), 192);
        assert_eq!(config.output.quality(), 7);
        assert_eq!(config.cache_ttl_secs, 5);
        assert!(config.allow_other);
    }

    #[test]
    fn test_missing_paths() {
        let err = MountConfig::layered(&Cli::default(), FileConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("sourcepath")));

        let file = FileConfig {
            source_dir: Some("/music".into()),
            ..Default::default()
        };
        let err = MountConfig::layered(&Cli::default(), file).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("mountpoint")));
    }

    #[test]
    fn test_invalid_values() {
        let mut bad_bitrate = cli("/music", "/mnt");
        bad_bitrate.bitrate = Some(300);
        assert!(matches!(
            MountConfig::layered(&bad_bitrate, FileConfig::default()),
            Err(ConfigError::Output(SettingsError::Bitrate(300)))
        ));

        let mut bad_cache = cli("/music", "/mnt");
        bad_cache.cache_size_mb = Some(0);
        assert!(matches!(
            MountConfig::layered(&bad_cache, FileConfig::default()),
            Err(ConfigError::CacheSize)
        ));
    }

    #[test]
    fn test_unknown_file_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mp3fs.toml");
        std::fs::write(&path, "bitrat = 320\n").unwrap();
        assert!(matches!(
            FileConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_prepare_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mount = dir.path().join("mnt/nested");
        let config = MountConfig::layered(
            &cli(dir.path().to_str().unwrap(), mount.to_str().unwrap()),
            FileConfig::default(),
        )
        .unwrap();

        config.prepare_paths().unwrap();
        assert!(mount.is_dir());

        let missing = MountConfig::layered(
            &cli("/nonexistent/music", mount.to_str().unwrap()),
            FileConfig::default(),
        )
        .unwrap();
        assert!(matches!(
            missing.prepare_paths(),
            Err(ConfigError::SourceDir(_))
        ));
    }
}
