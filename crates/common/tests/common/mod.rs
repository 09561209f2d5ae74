//! Shared helpers for transcoder integration tests

use std::path::Path;
use std::sync::Arc;

use ::common::codec::{
    AudioDecoder, AudioMetadata, CodecError, CodecSet, LameEncoder, PcmAudio, TrackTags,
};
use bytes::Bytes;
use tempfile::TempDir;

/// Decoder that synthesizes a 440 Hz tone for whatever duration it reports,
/// so the real LAME encoder can run without FLAC fixtures
#[derive(Debug)]
pub struct ToneDecoder {
    pub metadata: AudioMetadata,
}

impl ToneDecoder {
    pub fn new(duration_secs: f64, tags: TrackTags) -> Self {
        Self {
            metadata: AudioMetadata {
                duration_secs,
                sample_rate: 44_100,
                bits_per_sample: 16,
                channels: 2,
                tags,
            },
        }
    }
}

#[async_trait::async_trait]
impl AudioDecoder for ToneDecoder {
    async fn ready(&self) -> Result<(), CodecError> {
        Ok(())
    }

    async fn probe(&self, path: &Path) -> Result<AudioMetadata, CodecError> {
        tokio::fs::metadata(path).await?;
        Ok(self.metadata.clone())
    }

    async fn decode(&self, _source: Bytes) -> Result<PcmAudio, CodecError> {
        let rate = self.metadata.sample_rate as f32;
        let frames = (self.metadata.duration_secs * rate as f64) as usize;
        let samples = (0..frames)
            .flat_map(|i| {
                let v = ((i as f32 * 440.0 * std::f32::consts::TAU / rate).sin() * 8000.0) as i16;
                [v, v]
            })
            .collect();
        Ok(PcmAudio {
            samples,
            channels: 2,
            sample_rate: self.metadata.sample_rate,
        })
    }
}

pub fn tone_codecs(duration_secs: f64, tags: TrackTags) -> CodecSet {
    CodecSet::new(
        Arc::new(ToneDecoder::new(duration_secs, tags)),
        Arc::new(LameEncoder),
    )
}

/// `album/track.flac` plus `notes.txt` in a fresh temp dir
pub fn source_tree() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir(dir.path().join("album")).expect("album dir");
    std::fs::write(dir.path().join("album/track.flac"), b"fLaC placeholder").expect("flac");
    std::fs::write(dir.path().join("notes.txt"), b"liner notes\n").expect("notes");
    dir
}
