//! MP3 encoding backed by LAME

use mp3lame_encoder::{Bitrate, Builder, FlushNoGap, InterleavedPcm, MonoPcm, Quality};

use super::{AudioEncoder, CodecError, PcmAudio};
use crate::transcoder::OutputSettings;

/// Sample frames handed to LAME per call
const FRAMES_PER_CHUNK: usize = 1152 * 64;

/// LAME-based constant-bitrate MP3 encoder
#[derive(Debug, Default, Clone, Copy)]
pub struct LameEncoder;

#[async_trait::async_trait]
impl AudioEncoder for LameEncoder {
    async fn encode(&self, pcm: PcmAudio, output: OutputSettings) -> Result<Vec<u8>, CodecError> {
        tokio::task::spawn_blocking(move || encode_pcm(&pcm, output))
            .await
            .map_err(|e| CodecError::Runtime(format!("encode task failed: {}", e)))?
    }
}

fn encode_pcm(pcm: &PcmAudio, output: OutputSettings) -> Result<Vec<u8>, CodecError> {
    if !matches!(pcm.channels, 1 | 2) {
        return Err(CodecError::Unsupported(format!(
            "{} channels (mono or stereo only)",
            pcm.channels
        )));
    }
    let bitrate = lame_bitrate(output.bitrate_kbps()).ok_or_else(|| {
        CodecError::Unsupported(format!("bitrate {} kbps", output.bitrate_kbps()))
    })?;

    let mut builder = Builder::new()
        .ok_or_else(|| CodecError::Runtime("failed to allocate LAME context".to_string()))?;
    builder
        .set_num_channels(pcm.channels as u8)
        .map_err(|e| CodecError::Encode(format!("channels: {:?}", e)))?;
    builder
        .set_sample_rate(pcm.sample_rate)
        .map_err(|e| CodecError::Encode(format!("sample rate: {:?}", e)))?;
    builder
        .set_brate(bitrate)
        .map_err(|e| CodecError::Encode(format!("bitrate: {:?}", e)))?;
    builder
        .set_quality(lame_quality(output.quality()))
        .map_err(|e| CodecError::Encode(format!("quality: {:?}", e)))?;
    let mut encoder = builder
        .build()
        .map_err(|e| CodecError::Encode(format!("init: {:?}", e)))?;

    let channels = pcm.channels as usize;
    let mut mp3 = Vec::with_capacity(mp3lame_encoder::max_required_buffer_size(pcm.frames()));
    for chunk in pcm.samples.chunks(FRAMES_PER_CHUNK * channels) {
        mp3.reserve(mp3lame_encoder::max_required_buffer_size(chunk.len() / channels));
        let written = if channels == 1 {
            encoder.encode_to_vec(MonoPcm(chunk), &mut mp3)
        } else {
            encoder.encode_to_vec(InterleavedPcm(chunk), &mut mp3)
        };
        written.map_err(|e| CodecError::Encode(format!("{:?}", e)))?;
    }

    // LAME needs at most 7200 bytes to drain its internal buffers
    mp3.reserve(7200);
    encoder
        .flush_to_vec::<FlushNoGap>(&mut mp3)
        .map_err(|e| CodecError::Encode(format!("flush: {:?}", e)))?;

    Ok(mp3)
}

fn lame_bitrate(kbps: u32) -> Option<Bitrate> {
    let bitrate = match kbps {
        8 => Bitrate::Kbps8,
        16 => Bitrate::Kbps16,
        24 => Bitrate::Kbps24,
        32 => Bitrate::Kbps32,
        40 => Bitrate::Kbps40,
        48 => Bitrate::Kbps48,
        64 => Bitrate::Kbps64,
        80 => Bitrate::Kbps80,
        96 => Bitrate::Kbps96,
        112 => Bitrate::Kbps112,
        128 => Bitrate::Kbps128,
        160 => Bitrate::Kbps160,
        192 => Bitrate::Kbps192,
        224 => Bitrate::Kbps224,
        256 => Bitrate::Kbps256,
        320 => Bitrate::Kbps320,
        _ => return None,
    };
    Some(bitrate)
}

fn lame_quality(quality: u8) -> Quality {
    match quality {
        0 => Quality::Best,
        1 => Quality::SecondBest,
        2 => Quality::NearBest,
        3 => Quality::VeryNice,
        4 => Quality::Nice,
        5 => Quality::Good,
        6 => Quality::Decent,
        7 => Quality::Ok,
        8 => Quality::SecondWorst,
        _ => Quality::Worst,
    }
}
