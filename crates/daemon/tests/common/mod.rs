//! Shared fixtures for filesystem adapter tests

#![allow(dead_code)]

use std::sync::Arc;

use ::common::codec::CodecSet;
use ::common::testing::{FakeDecoder, FakeEncoder};
use ::common::transcoder::{OutputSettings, TranscoderSelector};
use mp3fs_daemon::fuse::{TranscodeCache, TranscodeCacheConfig, TranscodeFs};
use tempfile::TempDir;

pub const NOTES: &[u8] = b"liner notes\n";

/// Source tree plus an adapter wired to fake codecs
pub struct Harness {
    pub tree: TempDir,
    pub decoder: Arc<FakeDecoder>,
    pub encoder: FakeEncoder,
    pub fs: Arc<TranscodeFs>,
}

impl Harness {
    pub fn new(decoder: FakeDecoder, encoder: FakeEncoder, cache: TranscodeCacheConfig) -> Self {
        let tree = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(tree.path().join("album")).expect("album dir");
        std::fs::write(tree.path().join("album/track.flac"), b"fLaC placeholder").expect("flac");
        std::fs::write(tree.path().join("notes.txt"), NOTES).expect("notes");

        let decoder = Arc::new(decoder);
        let codecs = CodecSet::new(decoder.clone(), Arc::new(encoder.clone()));
        let selector = TranscoderSelector::new(OutputSettings::default(), codecs);
        let fs = Arc::new(TranscodeFs::new(
            tree.path(),
            selector,
            TranscodeCache::new(cache),
        ));

        Self {
            tree,
            decoder,
            encoder,
            fs,
        }
    }

    /// Track One / Artist, 180 s, default cache
    pub fn standard() -> Self {
        Self::new(
            FakeDecoder::default(),
            FakeEncoder::default(),
            TranscodeCacheConfig::default(),
        )
    }
}
