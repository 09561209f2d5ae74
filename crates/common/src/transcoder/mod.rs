//! Transcoder variants and their lifecycle
//!
//! A [`Transcoder`] turns one real file into the bytes a client sees under its
//! virtual name. Instances are built fresh for every request by the
//! [`TranscoderSelector`] and walk a fixed lifecycle:
//!
//! ```text
//! Uninitialized -> Initializing -> Ready -> Produced
//!                        |           |
//!                        +-> Error <-+
//! ```
//!
//! `initialize` probes the source without producing output, which is enough
//! to answer [`Transcoder::estimate_output_size`]. `produce` runs the full
//! pipeline exactly once.

mod config;
mod flac;
mod passthrough;
mod selector;

use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::codec::CodecError;

pub use config::*;
pub use flac::FlacTranscoder;
pub use passthrough::PassthroughTranscoder;
pub use selector::{TranscoderSelector, TranscoderVariant};

/// Lifecycle position of a single transcoder instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscoderState {
    Uninitialized,
    Initializing,
    Ready,
    Produced,
    Error,
}

impl std::fmt::Display for TranscoderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TranscoderState::Uninitialized => "uninitialized",
            TranscoderState::Initializing => "initializing",
            TranscoderState::Ready => "ready",
            TranscoderState::Produced => "produced",
            TranscoderState::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TranscoderError {
    #[error("failed to initialize transcoder for {}: {source}", path.display())]
    Initialization {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("failed to transcode {}: {source}", path.display())]
    Transcode {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("transcoder is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: TranscoderState,
    },

    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The closed set of transcoding strategies
#[derive(Debug)]
pub enum TranscoderKind {
    /// Serve the source bytes unchanged
    Passthrough(PassthroughTranscoder),
    /// Decode FLAC, encode MP3, prepend an ID3v2 tag
    FlacToMp3(FlacTranscoder),
}

/// One request's transcoder: a strategy plus its lifecycle state
#[derive(Debug)]
pub struct Transcoder {
    kind: TranscoderKind,
    state: TranscoderState,
    output_size: Option<u64>,
}

impl Transcoder {
    pub fn new(kind: TranscoderKind) -> Self {
        Self {
            kind,
            state: TranscoderState::Uninitialized,
            output_size: None,
        }
    }

    pub fn passthrough(config: TranscoderConfig) -> Self {
        Self::new(TranscoderKind::Passthrough(PassthroughTranscoder::new(
            config,
        )))
    }

    pub fn kind(&self) -> &TranscoderKind {
        &self.kind
    }

    pub fn state(&self) -> TranscoderState {
        self.state
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self.kind, TranscoderKind::Passthrough(_))
    }

    pub fn real_path(&self) -> &Path {
        match &self.kind {
            TranscoderKind::Passthrough(t) => t.config().real_path(),
            TranscoderKind::FlacToMp3(t) => t.config().real_path(),
        }
    }

    pub fn virtual_path(&self) -> PathBuf {
        match &self.kind {
            TranscoderKind::Passthrough(t) => t.config().real_path().to_path_buf(),
            TranscoderKind::FlacToMp3(t) => t.virtual_path(),
        }
    }

    /// Exact length of the produced output; `None` until `produce` succeeds
    pub fn output_size(&self) -> Option<u64> {
        self.output_size
    }

    /// Load codec state and probe the source.
    ///
    /// Only valid once, from `Uninitialized`.
    pub async fn initialize(&mut self) -> Result<(), TranscoderError> {
        self.expect(TranscoderState::Uninitialized, "uninitialized")?;
        self.state = TranscoderState::Initializing;

        let result = match &mut self.kind {
            TranscoderKind::Passthrough(t) => t.initialize().await,
            TranscoderKind::FlacToMp3(t) => t.initialize().await,
        };

        self.state = if result.is_ok() {
            TranscoderState::Ready
        } else {
            TranscoderState::Error
        };
        result
    }

    /// Predicted output length, available without producing the output
    pub fn estimate_output_size(&self) -> Result<u64, TranscoderError> {
        match self.state {
            TranscoderState::Ready | TranscoderState::Produced => {}
            actual => {
                return Err(TranscoderError::InvalidState {
                    expected: "ready or produced",
                    actual,
                })
            }
        }
        let estimate = match &self.kind {
            TranscoderKind::Passthrough(t) => t.estimate_output_size(),
            TranscoderKind::FlacToMp3(t) => t.estimate_output_size(),
        };
        Ok(estimate)
    }

    /// Run the full pipeline and return the final bytes.
    ///
    /// Only valid once, from `Ready`. On failure no output is returned and
    /// the instance is unusable.
    pub async fn produce(&mut self) -> Result<Bytes, TranscoderError> {
        self.expect(TranscoderState::Ready, "ready")?;

        let result = match &mut self.kind {
            TranscoderKind::Passthrough(t) => t.produce().await,
            TranscoderKind::FlacToMp3(t) => t.produce().await,
        };

        match result {
            Ok(bytes) => {
                self.output_size = Some(bytes.len() as u64);
                self.state = TranscoderState::Produced;
                tracing::debug!(
                    path = %self.real_path().display(),
                    size = bytes.len(),
                    "transcoder produced output"
                );
                Ok(bytes)
            }
            Err(e) => {
                self.state = TranscoderState::Error;
                Err(e)
            }
        }
    }

    fn expect(
        &self,
        wanted: TranscoderState,
        expected: &'static str,
    ) -> Result<(), TranscoderError> {
        if self.state != wanted {
            return Err(TranscoderError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }
}
