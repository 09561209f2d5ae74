//! FUSE filesystem serving FLAC sources as transcoded MP3
//!
//! # Architecture
//!
//! - `TranscodeFs`: readdir/getattr/read/release over virtual paths
//! - `TranscodeCache`: TTL + size-bounded cache with at-most-once production
//! - `Mp3Fs`: fuser `Filesystem` bridging inode callbacks onto `TranscodeFs`
//! - `InodeTable`: bidirectional inode ↔ virtual path mapping
//! - `spawn_mount` / `LiveMount`: mount lifecycle
//!
//! # Request flow
//!
//! A kernel read on `/album/track.flac.mp3` resolves to the real
//! `/album/track.flac`, then either hits the cache or joins/starts the one
//! production for that key. Reads on any other file go straight to disk.

mod cache;
mod inode_table;
mod mount;
mod mp3_fs;
mod transcode_fs;

pub use cache::{CacheError, CacheStats, TranscodeCache, TranscodeCacheConfig};
pub use inode_table::InodeTable;
pub use mount::{mount_options, spawn_mount, LiveMount, MountError};
pub use mp3_fs::Mp3Fs;
pub use transcode_fs::{DirEntry, EntryAttr, EntryKind, FsError, TranscodeFs};
