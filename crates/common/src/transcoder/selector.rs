use std::path::Path;

use super::{FlacTranscoder, OutputSettings, Transcoder, TranscoderConfig, TranscoderKind};
use crate::codec::CodecSet;
use crate::vpath::PathMapping;

/// Format-specific transcoders, in match priority order.
///
/// Passthrough is not listed; it is the fallback when nothing here matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscoderVariant {
    FlacToMp3,
}

impl TranscoderVariant {
    pub const ALL: &'static [TranscoderVariant] = &[TranscoderVariant::FlacToMp3];

    /// Name mapping this variant's output is exposed under
    pub fn mapping(&self) -> PathMapping {
        match self {
            TranscoderVariant::FlacToMp3 => PathMapping::FLAC_TO_MP3,
        }
    }

    fn handles(&self, real_path: &Path) -> bool {
        let extension = self.mapping().source_extension.trim_start_matches('.');
        real_path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case(extension))
    }

    fn build(&self, config: TranscoderConfig, codecs: &CodecSet) -> TranscoderKind {
        match self {
            TranscoderVariant::FlacToMp3 => {
                TranscoderKind::FlacToMp3(FlacTranscoder::new(config, codecs.clone()))
            }
        }
    }
}

/// Picks and builds the transcoder for a real path.
///
/// Every call to [`TranscoderSelector::select`] returns a new, independently
/// owned instance; nothing is pooled.
#[derive(Debug, Clone)]
pub struct TranscoderSelector {
    output: OutputSettings,
    codecs: CodecSet,
    registry: Vec<TranscoderVariant>,
}

impl TranscoderSelector {
    pub fn new(output: OutputSettings, codecs: CodecSet) -> Self {
        Self {
            output,
            codecs,
            registry: TranscoderVariant::ALL.to_vec(),
        }
    }

    pub fn output(&self) -> OutputSettings {
        self.output
    }

    /// Source extensions (without the dot) some registered variant handles
    pub fn supported_extensions(&self) -> Vec<&'static str> {
        self.registry
            .iter()
            .map(|v| v.mapping().source_extension.trim_start_matches('.'))
            .collect()
    }

    /// Name mappings of every registered variant, for the path resolver
    pub fn mappings(&self) -> Vec<PathMapping> {
        self.registry.iter().map(|v| v.mapping()).collect()
    }

    pub fn select(&self, real_path: &Path) -> Transcoder {
        let config = TranscoderConfig::new(real_path, self.output);
        match self.registry.iter().find(|v| v.handles(real_path)) {
            Some(variant) => Transcoder::new(variant.build(config, &self.codecs)),
            None => Transcoder::passthrough(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{FakeDecoder, FakeEncoder};
    use crate::transcoder::TranscoderState;

    fn selector() -> TranscoderSelector {
        let codecs = CodecSet::new(
            Arc::new(FakeDecoder::default()),
            Arc::new(FakeEncoder::default()),
        );
        TranscoderSelector::new(OutputSettings::default(), codecs)
    }

    #[test]
    fn test_flac_selects_flac_variant() {
        let selector = selector();
        for path in ["/album/track.flac", "/album/TRACK.FLAC"] {
            let transcoder = selector.select(Path::new(path));
            assert!(matches!(transcoder.kind(), TranscoderKind::FlacToMp3(_)));
            assert_eq!(transcoder.real_path(), Path::new(path));
        }
    }

    #[test]
    fn test_unknown_extension_falls_back_to_passthrough() {
        let selector = selector();
        for path in ["/notes.txt", "/song.mp3", "/no_extension", "/track.flac.bak"] {
            assert!(selector.select(Path::new(path)).is_passthrough(), "{}", path);
        }
    }

    #[tokio::test]
    async fn test_each_select_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.flac");
        std::fs::write(&path, b"fLaC").unwrap();

        let selector = selector();
        let mut first = selector.select(&path);
        first.initialize().await.unwrap();

        let second = selector.select(&path);
        assert_eq!(first.state(), TranscoderState::Ready);
        assert_eq!(second.state(), TranscoderState::Uninitialized);
    }

    #[test]
    fn test_supported_extensions() {
        assert_eq!(selector().supported_extensions(), vec!["flac"]);
        assert_eq!(selector().mappings(), vec![PathMapping::FLAC_TO_MP3]);
    }
}
