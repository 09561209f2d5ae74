//! Kernel operations expressed over virtual paths
//!
//! [`TranscodeFs`] knows nothing about inodes or reply objects; the fuser
//! bridge translates those and maps [`FsError`] onto errno values. Every
//! operation is read-only with respect to the source tree.

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use common::transcoder::{PassthroughTranscoder, TranscoderError, TranscoderSelector};
use common::vpath::VirtualPathResolver;
use moka::sync::Cache;

use super::cache::{CacheError, TranscodeCache};

/// Permission bits that never reach the kernel; the mount is read-only
const WRITE_BITS: u32 = 0o222;

/// Upper bound on memoized size estimates
const MAX_ESTIMATES: u64 = 100_000;

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("no such entry: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("read-only filesystem")]
    ReadOnly,

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Transcoder(#[from] TranscoderError),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    /// errno reported to the kernel
    pub fn errno(&self) -> libc::c_int {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::IsADirectory(_) => libc::EISDIR,
            FsError::ReadOnly => libc::EROFS,
            FsError::Cache(CacheError::CapacityExceeded { .. }) => libc::EFBIG,
            FsError::Cache(_) | FsError::Transcoder(_) | FsError::Io { .. } => libc::EIO,
        }
    }

    fn from_io(path: &str, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
            _ => FsError::Io {
                path: path.to_string(),
                source,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Attributes reported for one virtual entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryAttr {
    pub kind: EntryKind,
    pub size: u64,
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl EntryAttr {
    fn from_metadata(metadata: &Metadata, size: u64) -> Self {
        let kind = if metadata.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        let mtime = metadata.modified().unwrap_or(UNIX_EPOCH);
        Self {
            kind,
            size,
            perm: (metadata.mode() & 0o7777 & !WRITE_BITS) as u16,
            nlink: metadata.nlink() as u32,
            uid: metadata.uid(),
            gid: metadata.gid(),
            atime: metadata.accessed().unwrap_or(mtime),
            mtime,
            ctime: unix_time(metadata.ctime(), metadata.ctime_nsec()),
        }
    }
}

fn unix_time(secs: i64, nsecs: i64) -> SystemTime {
    match u64::try_from(secs) {
        Ok(secs) => UNIX_EPOCH + Duration::new(secs, nsecs.clamp(0, 999_999_999) as u32),
        Err(_) => UNIX_EPOCH,
    }
}

/// One listed directory entry, already under its virtual name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// The filesystem adapter: resolver, selector and cache behind the four
/// kernel operations
pub struct TranscodeFs {
    source_root: PathBuf,
    resolver: VirtualPathResolver,
    selector: TranscoderSelector,
    cache: TranscodeCache,
    /// Size estimates by real path, so attribute storms do not re-probe
    estimates: Cache<PathBuf, u64>,
}

impl TranscodeFs {
    pub fn new(
        source_root: impl Into<PathBuf>,
        selector: TranscoderSelector,
        cache: TranscodeCache,
    ) -> Self {
        let estimates = Cache::builder()
            .time_to_live(cache.config().ttl)
            .max_capacity(MAX_ESTIMATES)
            .build();
        Self {
            source_root: source_root.into(),
            resolver: VirtualPathResolver::new(selector.mappings()),
            selector,
            cache,
            estimates,
        }
    }

    pub fn cache(&self) -> &TranscodeCache {
        &self.cache
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Whether reads of this virtual path are served from a transcode
    pub fn is_transcoded(&self, virtual_path: &str) -> bool {
        self.resolver.is_virtual(virtual_path)
    }

    /// Real path on the source tree for a virtual path
    pub fn real_path(&self, virtual_path: &str) -> PathBuf {
        let real = self.resolver.to_real(virtual_path);
        self.source_root.join(real.trim_start_matches('/'))
    }

    /// Stat the real entry behind a virtual path.
    ///
    /// Names that only exist under their virtual form are not found under
    /// their real form, and vice versa for directories.
    async fn resolve(&self, virtual_path: &str) -> Result<(PathBuf, Metadata), FsError> {
        let real = self.real_path(virtual_path);
        let metadata = tokio::fs::metadata(&real)
            .await
            .map_err(|e| FsError::from_io(virtual_path, e))?;

        let is_file = metadata.is_file();
        if is_file && self.resolver.is_hidden_source(virtual_path) {
            return Err(FsError::NotFound(virtual_path.to_string()));
        }
        if !is_file && self.resolver.is_virtual(virtual_path) {
            return Err(FsError::NotFound(virtual_path.to_string()));
        }
        Ok((real, metadata))
    }

    /// List a directory, presenting transcodable files under virtual names
    pub async fn readdir(&self, virtual_path: &str) -> Result<Vec<DirEntry>, FsError> {
        let (real, metadata) = self.resolve(virtual_path).await?;
        if !metadata.is_dir() {
            return Err(FsError::NotADirectory(virtual_path.to_string()));
        }

        let io_err = |e| FsError::from_io(virtual_path, e);
        let mut dir = tokio::fs::read_dir(&real).await.map_err(io_err)?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(io_err)? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::debug!(path = ?entry.path(), "skipping non-UTF-8 entry");
                continue;
            };

            // Follows symlinks; a dangling link or a file removed since the
            // listing is skipped rather than failing the whole directory
            let metadata = match tokio::fs::metadata(entry.path()).await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %entry.path().display(), "entry vanished during readdir");
                    continue;
                }
                Err(e) => return Err(io_err(e)),
            };

            // A real file already carrying the virtual suffix could never be
            // resolved and would collide with the name of its source
            if !metadata.is_dir() && self.resolver.is_virtual(&name) {
                tracing::debug!(path = %entry.path().display(), "skipping file shadowed by virtual name");
                continue;
            }

            let (name, kind) = if metadata.is_dir() {
                (name, EntryKind::Directory)
            } else {
                (self.resolver.to_virtual(&name), EntryKind::File)
            };
            entries.push(DirEntry { name, kind });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Attributes of a virtual entry; transcoded files report their output
    /// size
    pub async fn getattr(&self, virtual_path: &str) -> Result<EntryAttr, FsError> {
        let (real, metadata) = self.resolve(virtual_path).await?;
        if !metadata.is_file() || !self.is_transcoded(virtual_path) {
            return Ok(EntryAttr::from_metadata(&metadata, metadata.len()));
        }

        let size = match self.cache.cached_len(&real) {
            Some(exact) => exact,
            None => self.estimate(&real).await.map_err(|e| {
                tracing::warn!(path = %virtual_path, error = %e, "failed to estimate output size");
                FsError::NotFound(virtual_path.to_string())
            })?,
        };
        Ok(EntryAttr::from_metadata(&metadata, size))
    }

    async fn estimate(&self, real: &Path) -> Result<u64, TranscoderError> {
        if let Some(size) = self.estimates.get(real) {
            return Ok(size);
        }
        let mut transcoder = self.selector.select(real);
        transcoder.initialize().await?;
        let size = transcoder.estimate_output_size()?;
        self.estimates.insert(real.to_path_buf(), size);
        Ok(size)
    }

    /// Up to `len` bytes at `offset`; empty at or past end of file
    pub async fn read(&self, virtual_path: &str, offset: u64, len: usize) -> Result<Bytes, FsError> {
        let (real, metadata) = self.resolve(virtual_path).await?;
        if metadata.is_dir() {
            return Err(FsError::IsADirectory(virtual_path.to_string()));
        }

        if !self.is_transcoded(virtual_path) {
            return PassthroughTranscoder::read_range(&real, offset, len)
                .await
                .map_err(|e| match e {
                    TranscoderError::Io { source, .. } => FsError::from_io(virtual_path, source),
                    other => FsError::Transcoder(other),
                });
        }

        let selector = self.selector.clone();
        let target = real.clone();
        let data = self
            .cache
            .populate(&real, move || selector.select(&target))
            .await
            .map_err(|e| {
                tracing::error!(path = %virtual_path, error = %e, "read failed");
                FsError::Cache(e)
            })?;
        Ok(slice(&data, offset, len))
    }

    /// Drop the cached output for a virtual path
    pub fn release(&self, virtual_path: &str) {
        if self.is_transcoded(virtual_path) {
            self.cache.release(&self.real_path(virtual_path));
        }
    }
}

impl std::fmt::Debug for TranscodeFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodeFs")
            .field("source_root", &self.source_root)
            .field("cache", &self.cache)
            .field("estimates", &self.estimates.entry_count())
            .finish()
    }
}

/// `data[offset..min(len(data), offset + len)]`, empty past the end
fn slice(data: &Bytes, offset: u64, len: usize) -> Bytes {
    let total = data.len() as u64;
    if offset >= total {
        return Bytes::new();
    }
    let start = offset as usize;
    let end = start + len.min(data.len() - start);
    data.slice(start..end)
}
