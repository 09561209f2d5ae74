//! Fake codec services for exercising transcoders without audio fixtures

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;

use crate::codec::{AudioDecoder, AudioEncoder, AudioMetadata, CodecError, PcmAudio, TrackTags};
use crate::transcoder::OutputSettings;

/// Decoder returning canned metadata, counting every call.
///
/// `probe` still requires the file to exist so missing sources fail the
/// same way they would with a real decoder.
#[derive(Debug)]
pub struct FakeDecoder {
    metadata: AudioMetadata,
    delay: Option<Duration>,
    fail_probe: bool,
    fail_decode: bool,
    probes: AtomicUsize,
    decodes: AtomicUsize,
}

impl Default for FakeDecoder {
    fn default() -> Self {
        Self::new(AudioMetadata {
            duration_secs: 180.0,
            sample_rate: 44_100,
            bits_per_sample: 16,
            channels: 2,
            tags: TrackTags {
                title: Some("Track One".to_string()),
                artist: Some("Artist".to_string()),
                ..Default::default()
            },
        })
    }
}

impl FakeDecoder {
    pub fn new(metadata: AudioMetadata) -> Self {
        Self {
            metadata,
            delay: None,
            fail_probe: false,
            fail_decode: false,
            probes: AtomicUsize::new(0),
            decodes: AtomicUsize::new(0),
        }
    }

    /// Sleep this long inside every `decode`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_probe(mut self) -> Self {
        self.fail_probe = true;
        self
    }

    pub fn failing_decode(mut self) -> Self {
        self.fail_decode = true;
        self
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn decode_count(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AudioDecoder for FakeDecoder {
    async fn ready(&self) -> Result<(), CodecError> {
        Ok(())
    }

    async fn probe(&self, path: &Path) -> Result<AudioMetadata, CodecError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        tokio::fs::metadata(path).await?;
        if self.fail_probe {
            return Err(CodecError::Unsupported("fake probe failure".to_string()));
        }
        Ok(self.metadata.clone())
    }

    async fn decode(&self, source: Bytes) -> Result<PcmAudio, CodecError> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_decode {
            return Err(CodecError::Decode("fake decode failure".to_string()));
        }
        Ok(PcmAudio {
            samples: source.iter().map(|b| *b as i16).collect(),
            channels: self.metadata.channels,
            sample_rate: self.metadata.sample_rate,
        })
    }
}

/// Encoder emitting a fixed-length deterministic byte pattern
#[derive(Debug, Clone)]
pub struct FakeEncoder {
    output_len: usize,
}

impl Default for FakeEncoder {
    fn default() -> Self {
        Self::with_len(64 * 1024)
    }
}

impl FakeEncoder {
    pub fn with_len(output_len: usize) -> Self {
        Self { output_len }
    }

    /// The exact bytes every `encode` call returns
    pub fn expected_output(&self) -> Vec<u8> {
        (0..self.output_len).map(|i| (i % 251) as u8).collect()
    }
}

#[async_trait::async_trait]
impl AudioEncoder for FakeEncoder {
    async fn encode(&self, _pcm: PcmAudio, _output: OutputSettings) -> Result<Vec<u8>, CodecError> {
        Ok(self.expected_output())
    }
}
