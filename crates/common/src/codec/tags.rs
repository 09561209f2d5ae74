//! ID3v2 tag mapping for transcoded MP3 output

use id3::frame::{Lyrics, Picture as Id3Picture, PictureType};
use id3::{Tag, TagLike, Version};

use super::{AudioMetadata, CodecError, TrackTags};

/// ISO-639-2 slot left empty; lyrics carry no language
const EMPTY_LANGUAGE: &str = "\0\0\0";

/// Build the ID3 tag written in front of the encoded stream
pub fn build_tag(metadata: &AudioMetadata) -> Tag {
    let tags = &metadata.tags;
    let mut tag = Tag::new();

    if let Some(title) = &tags.title {
        tag.set_title(title.as_str());
    }
    if let Some(artist) = &tags.artist {
        tag.set_artist(artist.as_str());
    }
    if let Some(album) = &tags.album {
        tag.set_album(album.as_str());
    }
    if !tags.genres.is_empty() {
        tag.set_genre(tags.genres.join(","));
    }
    if let Some(date) = &tags.date {
        tag.set_text("TDRC", date.as_str());
    }
    if metadata.duration_secs > 0.0 {
        let millis = (metadata.duration_secs * 1000.0).round() as u64;
        tag.set_text("TLEN", millis.to_string());
    }
    if let Some(track) = track_number(tags) {
        tag.set_text("TRCK", track);
    }
    if let Some(performer) = tags.album_artist.as_ref().or(tags.artist.as_ref()) {
        tag.set_album_artist(performer.as_str());
    }
    if let Some(picture) = tags.pictures.first() {
        tag.add_frame(Id3Picture {
            mime_type: picture.mime_type.clone(),
            picture_type: if picture.front_cover {
                PictureType::CoverFront
            } else {
                PictureType::Other
            },
            description: picture.description.clone(),
            data: picture.data.to_vec(),
        });
    }
    if !tags.lyrics.is_empty() {
        tag.add_frame(Lyrics {
            lang: EMPTY_LANGUAGE.to_string(),
            description: String::new(),
            text: tags.lyrics.join("\n"),
        });
    }

    tag
}

/// `"<no>"` or `"<no>/<total>"`; nothing without a track number
fn track_number(tags: &TrackTags) -> Option<String> {
    let no = tags.track_number?;
    Some(match tags.track_total {
        Some(total) => format!("{}/{}", no, total),
        None => no.to_string(),
    })
}

/// Serialize a tag as ID3v2.4
pub fn serialize(tag: &Tag) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    tag.write_to(&mut out, Version::Id3v24)
        .map_err(|e| CodecError::Tag(e.to_string()))?;
    Ok(out)
}
