//! Mount lifecycle

use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::codec::CodecSet;
use common::transcoder::TranscoderSelector;
use fuser::{BackgroundSession, MountOption};
use tokio::runtime::Handle;

use super::cache::{CacheStats, TranscodeCache, TranscodeCacheConfig};
use super::mp3_fs::Mp3Fs;
use super::transcode_fs::TranscodeFs;
use crate::config::{ConfigError, MountConfig};

const FS_NAME: &str = "mp3fs";

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to mount at {path}: {source}")]
    Mount {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A mounted filesystem; unmounts when dropped or on [`LiveMount::unmount`]
pub struct LiveMount {
    session: BackgroundSession,
    mount_point: PathBuf,
    cache: TranscodeCache,
}

impl LiveMount {
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Unmount and wait for the session thread to exit
    pub fn unmount(self) -> CacheStats {
        let stats = self.cache.stats();
        self.session.join();
        tracing::info!(path = %self.mount_point.display(), "unmounted");
        stats
    }
}

impl std::fmt::Debug for LiveMount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveMount")
            .field("mount_point", &self.mount_point)
            .field("cache", &self.cache)
            .finish()
    }
}

pub fn mount_options(config: &MountConfig) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::RO,
        MountOption::FSName(FS_NAME.to_string()),
        MountOption::AutoUnmount,
    ];
    if config.allow_other {
        options.push(MountOption::AllowOther);
    }
    options
}

/// Build the filesystem for `config` and mount it on a background thread.
///
/// Kernel callbacks are served on `runtime`.
pub fn spawn_mount(
    config: &MountConfig,
    codecs: CodecSet,
    runtime: Handle,
) -> Result<LiveMount, MountError> {
    config.prepare_paths()?;

    let cache = TranscodeCache::new(TranscodeCacheConfig::from_basic(
        config.cache_size_mb,
        config.cache_ttl_secs,
    ));
    let selector = TranscoderSelector::new(config.output, codecs);
    tracing::info!(
        source = %config.source_dir.display(),
        mount_point = %config.mount_point.display(),
        bitrate_kbps = config.output.bitrate_kbps(),
        quality = config.output.quality(),
        extensions = ?selector.supported_extensions(),
        "mounting"
    );

    let fs = Arc::new(TranscodeFs::new(
        config.source_dir.clone(),
        selector,
        cache.clone(),
    ));
    let filesystem = Mp3Fs::new(fs, runtime, config.attr_ttl);

    let session = fuser::spawn_mount2(filesystem, &config.mount_point, &mount_options(config))
        .map_err(|source| MountError::Mount {
            path: config.mount_point.clone(),
            source,
        })?;

    Ok(LiveMount {
        session,
        mount_point: config.mount_point.clone(),
        cache,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use crate::config::FileConfig;

    fn config(allow_other: bool) -> MountConfig {
        let cli = Cli {
            source_dir: Some("/music".into()),
            mount_point: Some("/mnt/mp3".into()),
            allow_other,
            ..Default::default()
        };
        MountConfig::layered(&cli, FileConfig::default()).unwrap()
    }

    #[test]
    fn test_mount_is_read_only() {
        let options = mount_options(&config(false));
        assert!(options.contains(&MountOption::RO));
        assert!(!options.contains(&MountOption::AllowOther));
    }

    #[test]
    fn test_allow_other() {
        assert!(mount_options(&config(true)).contains(&MountOption::AllowOther));
    }

    #[tokio::test]
    async fn test_missing_source_fails_before_mounting() {
        let cli = Cli {
            source_dir: Some("/nonexistent/music".into()),
            mount_point: Some("/nonexistent/mnt".into()),
            ..Default::default()
        };
        let config = MountConfig::layered(&cli, FileConfig::default()).unwrap();
        let err = spawn_mount(&config, CodecSet::production(), Handle::current()).unwrap_err();
        assert!(matches!(err, MountError::Config(ConfigError::SourceDir(_))));
    }
}
