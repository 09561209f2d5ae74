use std::io::SeekFrom;
use std::path::Path;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{TranscoderConfig, TranscoderError};
use crate::codec::CodecError;

/// Serves a source file's bytes unmodified
#[derive(Debug)]
pub struct PassthroughTranscoder {
    config: TranscoderConfig,
    size: u64,
}

impl PassthroughTranscoder {
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config, size: 0 }
    }

    pub fn config(&self) -> &TranscoderConfig {
        &self.config
    }

    pub(super) async fn initialize(&mut self) -> Result<(), TranscoderError> {
        let path = self.config.real_path();
        let metadata =
            tokio::fs::metadata(path)
                .await
                .map_err(|e| TranscoderError::Initialization {
                    path: path.to_path_buf(),
                    source: CodecError::Io(e),
                })?;
        self.size = metadata.len();
        Ok(())
    }

    pub(super) fn estimate_output_size(&self) -> u64 {
        self.size
    }

    pub(super) async fn produce(&mut self) -> Result<Bytes, TranscoderError> {
        let path = self.config.real_path();
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| TranscoderError::Transcode {
                path: path.to_path_buf(),
                source: CodecError::Io(e),
            })?;
        Ok(Bytes::from(data))
    }

    /// Positioned read of up to `len` bytes at `offset`.
    ///
    /// Returns fewer bytes near the end of the file and none past it.
    pub async fn read_range(path: &Path, offset: u64, len: usize) -> Result<Bytes, TranscoderError> {
        let io_err = |source| TranscoderError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::File::open(path).await.map_err(io_err)?;
        let file_len = file.metadata().await.map_err(io_err)?.len();
        if offset >= file_len {
            return Ok(Bytes::new());
        }
        let len = len.min((file_len - offset) as usize);

        file.seek(SeekFrom::Start(offset)).await.map_err(io_err)?;
        let mut buf = Vec::with_capacity(len);
        file.take(len as u64)
            .read_to_end(&mut buf)
            .await
            .map_err(io_err)?;
        Ok(Bytes::from(buf))
    }
}
