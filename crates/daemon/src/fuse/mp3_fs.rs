//! fuser bridge: inode-addressed kernel callbacks onto [`TranscodeFs`]
//!
//! fuser drives callbacks from its own session thread. Each callback resolves
//! the inode, then moves the reply into a task on the tokio runtime so slow
//! transcodes never block other kernel requests.

use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, Request,
};
use parking_lot::Mutex;
use tokio::runtime::Handle;

use super::inode_table::InodeTable;
use super::transcode_fs::{EntryAttr, EntryKind, FsError, TranscodeFs};

pub struct Mp3Fs {
    fs: Arc<TranscodeFs>,
    inodes: Arc<Mutex<InodeTable>>,
    runtime: Handle,
    attr_ttl: Duration,
    next_fh: AtomicU64,
}

impl Mp3Fs {
    pub fn new(fs: Arc<TranscodeFs>, runtime: Handle, attr_ttl: Duration) -> Self {
        Self {
            fs,
            inodes: Arc::new(Mutex::new(InodeTable::new())),
            runtime,
            attr_ttl,
            next_fh: AtomicU64::new(1),
        }
    }

    fn path_of(&self, ino: u64) -> Option<String> {
        self.inodes.lock().get_path(ino).map(str::to_string)
    }
}

fn file_type(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::File => FileType::RegularFile,
        EntryKind::Directory => FileType::Directory,
    }
}

fn to_file_attr(ino: u64, attr: &EntryAttr) -> FileAttr {
    FileAttr {
        ino,
        size: attr.size,
        blocks: (attr.size + 511) / 512,
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: UNIX_EPOCH,
        kind: file_type(attr.kind),
        perm: attr.perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

fn log_failure(op: &str, path: &str, err: &FsError) {
    match err {
        FsError::NotFound(_) => tracing::trace!(op, path, "not found"),
        _ => tracing::debug!(op, path, error = %err, errno = err.errno(), "operation failed"),
    }
}

impl Filesystem for Mp3Fs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let (Some(parent_path), Some(name)) = (self.path_of(parent), name.to_str()) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = InodeTable::child_path(&parent_path, name);

        let fs = self.fs.clone();
        let inodes = self.inodes.clone();
        let ttl = self.attr_ttl;
        self.runtime.spawn(async move {
            match fs.getattr(&path).await {
                Ok(attr) => {
                    let ino = inodes.lock().get_or_create(&path);
                    reply.entry(&ttl, &to_file_attr(ino, &attr), 0);
                }
                Err(e) => {
                    log_failure("lookup", &path, &e);
                    reply.error(e.errno());
                }
            }
        });
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        let fs = self.fs.clone();
        let ttl = self.attr_ttl;
        self.runtime.spawn(async move {
            match fs.getattr(&path).await {
                Ok(attr) => reply.attr(&ttl, &to_file_attr(ino, &attr)),
                Err(e) => {
                    log_failure("getattr", &path, &e);
                    reply.error(e.errno());
                }
            }
        });
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        let fs = self.fs.clone();
        let inodes = self.inodes.clone();
        self.runtime.spawn(async move {
            let listing = match fs.readdir(&path).await {
                Ok(listing) => listing,
                Err(e) => {
                    log_failure("readdir", &path, &e);
                    reply.error(e.errno());
                    return;
                }
            };

            let entries: Vec<(u64, FileType, String)> = {
                let mut inodes = inodes.lock();
                let parent = inodes.get_or_create(&InodeTable::parent_path(&path));
                let mut entries = vec![
                    (ino, FileType::Directory, ".".to_string()),
                    (parent, FileType::Directory, "..".to_string()),
                ];
                for entry in listing {
                    let child = inodes.get_or_create(&InodeTable::child_path(&path, &entry.name));
                    entries.push((child, file_type(entry.kind), entry.name));
                }
                entries
            };

            for (i, (e_ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
                if reply.add(*e_ino, (i + 1) as i64, *kind, name) {
                    break;
                }
            }
            reply.ok();
        });
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            reply.error(FsError::ReadOnly.errno());
            return;
        }

        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        let fs = self.fs.clone();
        self.runtime.spawn(async move {
            match fs.getattr(&path).await {
                Ok(attr) if attr.kind == EntryKind::Directory => {
                    reply.error(FsError::IsADirectory(path).errno())
                }
                Ok(_) => {
                    // Transcoded sizes are estimates until produced; let the
                    // kernel read until we signal EOF
                    let open_flags = if fs.is_transcoded(&path) {
                        fuser::consts::FOPEN_DIRECT_IO
                    } else {
                        0
                    };
                    reply.opened(fh, open_flags);
                }
                Err(e) => {
                    log_failure("open", &path, &e);
                    reply.error(e.errno());
                }
            }
        });
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };

        let fs = self.fs.clone();
        self.runtime.spawn(async move {
            match fs.read(&path, offset, size as usize).await {
                Ok(data) => reply.data(&data),
                Err(e) => {
                    log_failure("read", &path, &e);
                    reply.error(e.errno());
                }
            }
        });
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        if let Some(path) = self.path_of(ino) {
            self.fs.release(&path);
        }
        reply.ok();
    }

    fn destroy(&mut self) {
        tracing::info!(stats = ?self.fs.cache().stats(), "filesystem destroyed");
    }
}
