use std::path::PathBuf;

use bytes::{Bytes, BytesMut};

use super::{TranscoderConfig, TranscoderError};
use crate::codec::{tags, AudioMetadata, CodecError, CodecSet};
use crate::vpath::PathMapping;

/// FLAC source decoded to PCM and re-encoded as tagged MP3
#[derive(Debug)]
pub struct FlacTranscoder {
    config: TranscoderConfig,
    codecs: CodecSet,
    metadata: Option<AudioMetadata>,
    /// Serialized ID3v2 tag, fixed at initialization so the estimate and the
    /// produced output agree on its length
    tag: Option<Bytes>,
}

impl FlacTranscoder {
    pub fn new(config: TranscoderConfig, codecs: CodecSet) -> Self {
        Self {
            config,
            codecs,
            metadata: None,
            tag: None,
        }
    }

    pub fn config(&self) -> &TranscoderConfig {
        &self.config
    }

    /// Probed source metadata; `None` before initialization
    pub fn metadata(&self) -> Option<&AudioMetadata> {
        self.metadata.as_ref()
    }

    pub fn virtual_path(&self) -> PathBuf {
        let mut name = self.config.real_path().as_os_str().to_owned();
        name.push(PathMapping::FLAC_TO_MP3.virtual_suffix);
        PathBuf::from(name)
    }

    pub(super) async fn initialize(&mut self) -> Result<(), TranscoderError> {
        let path = self.config.real_path().to_path_buf();
        let init_err = |source| TranscoderError::Initialization {
            path: path.clone(),
            source,
        };

        self.codecs.decoder.ready().await.map_err(init_err)?;
        let metadata = self.codecs.decoder.probe(&path).await.map_err(init_err)?;
        let tag = tags::serialize(&tags::build_tag(&metadata)).map_err(init_err)?;

        tracing::debug!(
            path = %path.display(),
            duration_secs = metadata.duration_secs,
            sample_rate = metadata.sample_rate,
            channels = metadata.channels,
            tag_bytes = tag.len(),
            "probed flac source"
        );

        self.metadata = Some(metadata);
        self.tag = Some(Bytes::from(tag));
        Ok(())
    }

    pub(super) fn estimate_output_size(&self) -> u64 {
        let audio = self
            .metadata
            .as_ref()
            .map(|m| self.config.output().audio_bytes(m.duration_secs))
            .unwrap_or(0);
        let tag = self.tag.as_ref().map(|t| t.len() as u64).unwrap_or(0);
        audio + tag
    }

    pub(super) async fn produce(&mut self) -> Result<Bytes, TranscoderError> {
        let path = self.config.real_path().to_path_buf();
        let transcode_err = |source| TranscoderError::Transcode {
            path: path.clone(),
            source,
        };

        let source = tokio::fs::read(&path)
            .await
            .map_err(|e| transcode_err(CodecError::Io(e)))?;
        let pcm = self
            .codecs
            .decoder
            .decode(Bytes::from(source))
            .await
            .map_err(transcode_err)?;
        let mp3 = self
            .codecs
            .encoder
            .encode(pcm, self.config.output())
            .await
            .map_err(transcode_err)?;

        let tag = self.tag.clone().unwrap_or_default();
        let mut out = BytesMut::with_capacity(tag.len() + mp3.len());
        out.extend_from_slice(&tag);
        out.extend_from_slice(&mp3);
        Ok(out.freeze())
    }
}
