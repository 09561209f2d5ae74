use std::path::PathBuf;

use clap::Parser;

/// Mount a FLAC library as a read-only tree of MP3 files
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "mp3fs", version, about)]
pub struct Cli {
    /// Directory holding the source FLAC library
    #[arg(short = 's', long = "sourcepath", env = "MP3FS_SOURCEPATH")]
    pub source_dir: Option<PathBuf>,

    /// Where to mount the transcoded view (created if missing)
    #[arg(short = 'm', long = "mountpoint", env = "MP3FS_MOUNTPOINT")]
    pub mount_point: Option<PathBuf>,

    /// MP3 bitrate in kbps (default: 320)
    #[arg(short = 'b', long, env = "MP3FS_BITRATE")]
    pub bitrate: Option<u32>,

    /// Encoder quality, 0 = best ..= 9 (default: 2)
    #[arg(short = 'q', long, env = "MP3FS_QUALITY")]
    pub quality: Option<u8>,

    /// Transcode cache ceiling in megabytes (default: 512)
    #[arg(long, env = "MP3FS_CACHE_SIZE_MB")]
    pub cache_size_mb: Option<u32>,

    /// Seconds a transcoded file stays cached (default: 60)
    #[arg(long, env = "MP3FS_CACHE_TTL_SECS")]
    pub cache_ttl_secs: Option<u32>,

    /// Let users other than the mounting user access the mount
    #[arg(long, env = "MP3FS_ALLOW_OTHER")]
    pub allow_other: bool,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, env = "MP3FS_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// TOML file supplying any of the options above
    #[arg(long, env = "MP3FS_CONFIG")]
    pub config: Option<PathBuf>,
}
