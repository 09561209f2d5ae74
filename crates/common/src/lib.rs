//! Core of mp3fs: path virtualization, transcoders and codec services.
//!
//! The FUSE-facing pieces (cache, adapter, mount) live in the daemon crate;
//! everything here is usable without a kernel mount.

pub mod codec;
pub mod transcoder;
pub mod vpath;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
