//! Audio codec services
//!
//! Transcoders never touch bitstreams directly. Decoding and encoding sit
//! behind two narrow async traits so the filesystem logic can be exercised
//! with fakes and the production codecs can run their CPU-bound work on the
//! blocking pool.
//!
//! # Implementations
//!
//! - [`SymphoniaDecoder`]: FLAC probe + decode via Symphonia
//! - [`LameEncoder`]: MP3 encode via LAME
//! - [`tags`]: ID3v2 tag mapping and serialization

mod decoder;
mod encoder;
pub mod tags;

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use crate::transcoder::OutputSettings;

pub use decoder::SymphoniaDecoder;
pub use encoder::LameEncoder;

/// Errors raised by codec services
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("codec runtime unavailable: {0}")]
    Runtime(String),

    #[error("failed to read source: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported stream: {0}")]
    Unsupported(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("tag serialization failed: {0}")]
    Tag(String),
}

/// Embedded picture carried over from the source tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picture {
    pub mime_type: String,
    pub description: String,
    /// Whether the source marks this picture as the front cover
    pub front_cover: bool,
    pub data: Bytes,
}

/// Tag fields relevant to the transcoded output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub genres: Vec<String>,
    pub date: Option<String>,
    pub track_number: Option<u32>,
    pub track_total: Option<u32>,
    /// Pictures in source order; only the first is carried over
    pub pictures: Vec<Picture>,
    /// Lyrics lines in source order
    pub lyrics: Vec<String>,
}

/// Stream properties and tags probed from a source file
#[derive(Debug, Clone, PartialEq)]
pub struct AudioMetadata {
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub bits_per_sample: u32,
    pub channels: u16,
    pub tags: TrackTags,
}

/// Decoded interleaved PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmAudio {
    pub samples: Vec<i16>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl PcmAudio {
    /// Number of sample frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }
}

/// Decoder capability: probe metadata and decode a whole source to PCM
#[async_trait::async_trait]
pub trait AudioDecoder: std::fmt::Debug + Send + Sync {
    /// Resolve once the decoder runtime is loaded.
    ///
    /// The first call pays the load cost; later calls return the memoized
    /// outcome.
    async fn ready(&self) -> Result<(), CodecError>;

    /// Read stream properties and tags without decoding audio frames
    async fn probe(&self, path: &Path) -> Result<AudioMetadata, CodecError>;

    /// Decode a complete source file held in memory
    async fn decode(&self, source: Bytes) -> Result<PcmAudio, CodecError>;
}

/// Encoder capability: compress PCM into a bare bitstream (no tags)
#[async_trait::async_trait]
pub trait AudioEncoder: std::fmt::Debug + Send + Sync {
    async fn encode(&self, pcm: PcmAudio, output: OutputSettings) -> Result<Vec<u8>, CodecError>;
}

/// The codec services shared by every transcoder in the process
#[derive(Debug, Clone)]
pub struct CodecSet {
    pub decoder: Arc<dyn AudioDecoder>,
    pub encoder: Arc<dyn AudioEncoder>,
}

impl CodecSet {
    pub fn new(decoder: Arc<dyn AudioDecoder>, encoder: Arc<dyn AudioEncoder>) -> Self {
        Self { decoder, encoder }
    }

    /// Symphonia decoding + LAME encoding
    pub fn production() -> Self {
        Self::new(
            Arc::new(SymphoniaDecoder::default()),
            Arc::new(LameEncoder::default()),
        )
    }
}
