//! FLAC probing and decoding backed by Symphonia

use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_FLAC};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey, StandardVisualKey};
use symphonia::core::probe::Hint;
use tokio::sync::OnceCell;

use super::{AudioDecoder, AudioMetadata, CodecError, PcmAudio, Picture, TrackTags};

/// Symphonia-based FLAC decoder.
///
/// One instance is meant to be shared by the whole process so the runtime
/// check in [`AudioDecoder::ready`] runs once.
#[derive(Debug, Default)]
pub struct SymphoniaDecoder {
    runtime: OnceCell<Result<(), String>>,
}

#[async_trait::async_trait]
impl AudioDecoder for SymphoniaDecoder {
    async fn ready(&self) -> Result<(), CodecError> {
        let outcome = self
            .runtime
            .get_or_init(|| async {
                tokio::task::spawn_blocking(load_runtime)
                    .await
                    .map_err(|e| format!("runtime load task failed: {}", e))
                    .and_then(|r| r)
            })
            .await;
        outcome.clone().map_err(CodecError::Runtime)
    }

    async fn probe(&self, path: &Path) -> Result<AudioMetadata, CodecError> {
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || probe_file(&path))
            .await
            .map_err(|e| CodecError::Runtime(format!("probe task failed: {}", e)))?
    }

    async fn decode(&self, source: Bytes) -> Result<PcmAudio, CodecError> {
        tokio::task::spawn_blocking(move || decode_stream(source))
            .await
            .map_err(|e| CodecError::Runtime(format!("decode task failed: {}", e)))?
    }
}

fn load_runtime() -> Result<(), String> {
    // Touching the default registries forces their one-time construction
    if symphonia::default::get_codecs()
        .get_codec(CODEC_TYPE_FLAC)
        .is_none()
    {
        return Err("FLAC codec not registered".to_string());
    }
    let _ = symphonia::default::get_probe();
    tracing::debug!("symphonia runtime loaded");
    Ok(())
}

fn open_format(source: Box<dyn MediaSource>) -> Result<OpenedStream, CodecError> {
    let mss = MediaSourceStream::new(source, Default::default());
    let mut hint = Hint::new();
    hint.with_extension("flac");

    let mut probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(map_symphonia_error)?;

    // Tags found ahead of the container (e.g. a stray ID3v2 block) come first;
    // the container's own revision overrides them.
    let mut tags = TrackTags::default();
    if let Some(revision) = probed.metadata.get().as_ref().and_then(|m| m.current()) {
        apply_revision(&mut tags, revision);
    }
    if let Some(revision) = probed.format.metadata().current() {
        apply_revision(&mut tags, revision);
    }

    Ok(OpenedStream {
        format: probed.format,
        tags,
    })
}

struct OpenedStream {
    format: Box<dyn FormatReader>,
    tags: TrackTags,
}

fn probe_file(path: &Path) -> Result<AudioMetadata, CodecError> {
    let file = File::open(path)?;
    let opened = open_format(Box::new(file))?;

    let track = opened
        .format
        .default_track()
        .ok_or_else(|| CodecError::Unsupported("no audio track".to_string()))?;
    let params = &track.codec_params;

    let sample_rate = params
        .sample_rate
        .ok_or_else(|| CodecError::Unsupported("missing sample rate".to_string()))?;
    let duration_secs = match params.n_frames {
        Some(frames) if sample_rate > 0 => frames as f64 / sample_rate as f64,
        _ => 0.0,
    };

    Ok(AudioMetadata {
        duration_secs,
        sample_rate,
        bits_per_sample: params.bits_per_sample.unwrap_or(16),
        channels: params.channels.map(|c| c.count() as u16).unwrap_or(2),
        tags: opened.tags,
    })
}

fn decode_stream(source: Bytes) -> Result<PcmAudio, CodecError> {
    let mut opened = open_format(Box::new(Cursor::new(source)))?;

    let track = opened
        .format
        .default_track()
        .ok_or_else(|| CodecError::Unsupported("no audio track".to_string()))?;
    let track_id = track.id;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(map_symphonia_error)?;

    let mut samples: Vec<i16> = Vec::new();
    let mut channels: u16 = 0;
    let mut sample_rate: u32 = 0;
    let mut buffer: Option<(usize, SampleBuffer<i16>)> = None;

    loop {
        let packet = match opened.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(e) => return Err(map_symphonia_error(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet).map_err(map_symphonia_error)?;
        let spec = *decoded.spec();
        let capacity = decoded.capacity();
        channels = spec.channels.count() as u16;
        sample_rate = spec.rate;

        if buffer.as_ref().map_or(true, |(cap, _)| *cap < capacity) {
            buffer = Some((capacity, SampleBuffer::<i16>::new(capacity as u64, spec)));
        }
        if let Some((_, buf)) = buffer.as_mut() {
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }
    }

    if channels == 0 {
        return Err(CodecError::Decode("stream contains no audio frames".to_string()));
    }

    Ok(PcmAudio {
        samples,
        channels,
        sample_rate,
    })
}

fn apply_revision(tags: &mut TrackTags, revision: &MetadataRevision) {
    for tag in revision.tags() {
        let Some(key) = tag.std_key else {
            continue;
        };
        let value = tag.value.to_string();
        match key {
            StandardTagKey::TrackTitle => tags.title = Some(value),
            StandardTagKey::Artist => tags.artist = Some(value),
            StandardTagKey::Album => tags.album = Some(value),
            StandardTagKey::AlbumArtist => tags.album_artist = Some(value),
            StandardTagKey::Genre => {
                if !tags.genres.contains(&value) {
                    tags.genres.push(value)
                }
            }
            StandardTagKey::Date => tags.date = Some(value),
            StandardTagKey::TrackNumber => {
                // Some encoders write "3/12" into TRACKNUMBER
                let mut parts = value.splitn(2, '/');
                if let Some(no) = parts.next().and_then(|p| p.trim().parse().ok()) {
                    tags.track_number = Some(no);
                }
                if let Some(total) = parts.next().and_then(|p| p.trim().parse().ok()) {
                    tags.track_total.get_or_insert(total);
                }
            }
            StandardTagKey::TrackTotal => {
                if let Ok(total) = value.trim().parse() {
                    tags.track_total = Some(total);
                }
            }
            StandardTagKey::Lyrics => tags.lyrics.push(value),
            _ => {}
        }
    }

    for visual in revision.visuals() {
        let description = visual
            .tags
            .iter()
            .find(|t| t.key.eq_ignore_ascii_case("description"))
            .map(|t| t.value.to_string())
            .unwrap_or_default();
        tags.pictures.push(Picture {
            mime_type: visual.media_type.clone(),
            description,
            front_cover: matches!(visual.usage, Some(StandardVisualKey::FrontCover)),
            data: Bytes::copy_from_slice(&visual.data),
        });
    }
}

fn map_symphonia_error(err: SymphoniaError) -> CodecError {
    match err {
        SymphoniaError::IoError(e) => CodecError::Io(e),
        SymphoniaError::Unsupported(what) => CodecError::Unsupported(what.to_string()),
        other => CodecError::Decode(other.to_string()),
    }
}
