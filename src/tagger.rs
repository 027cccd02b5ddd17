//! Tag Writer (spec.md §4.D): best-effort metadata embedding after a
//! download completes.
//!
//! Mirrors the teacher's own split between the two tagging families it
//! already depends on: `id3` for the ID3v2 family (MP3) and `lofty` for
//! everything else. The teacher's `features/import/metadata.rs` only
//! *reads* tags via `lofty::probe::Probe` + `lofty::tag::Accessor`; the
//! write side here follows the same modular `lofty = "0.22.4"` import
//! paths, mutating in place and publishing through a sibling temp file
//! and rename, the same atomic-publish discipline `stream_tee` uses.
//! Cover artwork is fetched with the teacher's own
//! `"{url}?param={w}y{h}"` convention (`api/ncm_api.rs::download_img`).

use std::path::Path;
use std::time::Duration;

use lofty::config::WriteOptions;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::picture::{MimeType, Picture, PictureType as LoftyPictureType};
use lofty::probe::Probe;
use lofty::tag::{Accessor, Tag};
use tracing::warn;

use crate::error::{CoreError, CoreResult};
use crate::song::{Container, Song};

const COVER_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Embeds `song`'s title/album/artist (and cover, when `cover_url` is
/// set) into the file at `path`. Cover-fetch failures are logged and
/// skipped; the file still ends up with text tags. Failure to write the
/// text tags themselves is the only case that propagates an error.
pub struct TagWriter {
    http: reqwest::Client,
}

impl Default for TagWriter {
    fn default() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl TagWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn tag(&self, path: &Path, song: &Song, container: Container) -> CoreResult<()> {
        let cover = self.fetch_cover(song).await;

        if container.is_id3_family() {
            self.tag_id3(path, song, cover)
        } else {
            self.tag_generic(path, song, container, cover)
        }
    }

    async fn fetch_cover(&self, song: &Song) -> Option<(String, Vec<u8>)> {
        let url = song.cover_url.as_ref()?;
        let image_url = format!("{url}?param=500y500");

        let response = match self
            .http
            .get(&image_url)
            .timeout(COVER_FETCH_TIMEOUT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(song_id = song.id, error = %e, "cover fetch failed, tagging without artwork");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(song_id = song.id, status = %response.status(), "cover fetch returned non-success status");
            return None;
        }

        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();

        match response.bytes().await {
            Ok(bytes) => Some((mime, bytes.to_vec())),
            Err(e) => {
                warn!(song_id = song.id, error = %e, "cover body read failed, tagging without artwork");
                None
            }
        }
    }

    fn tag_id3(&self, path: &Path, song: &Song, cover: Option<(String, Vec<u8>)>) -> CoreResult<()> {
        let mut tag = id3::Tag::read_from_path(path).unwrap_or_default();

        tag.set_title(song.title.clone());
        tag.set_album(song.album.clone());
        tag.set_artist(song.artists_joined());

        if let Some((mime, data)) = cover {
            tag.add_frame(id3::frame::Picture {
                mime_type: mime,
                picture_type: id3::frame::PictureType::Other,
                description: String::new(),
                data,
            });
        }

        tag.write_to_path(path, id3::Version::Id3v24)
            .map_err(|e| CoreError::Io(std::io::Error::other(e.to_string())))
    }

    fn tag_generic(
        &self,
        path: &Path,
        song: &Song,
        container: Container,
        cover: Option<(String, Vec<u8>)>,
    ) -> CoreResult<()> {
        let mut tagged_file = Probe::open(path)
            .map_err(|e| CoreError::Io(std::io::Error::other(e.to_string())))?
            .read()
            .map_err(|e| CoreError::Io(std::io::Error::other(e.to_string())))?;

        if tagged_file.primary_tag().is_none() {
            let tag_type = tagged_file.primary_tag_type();
            tagged_file.insert_tag(Tag::new(tag_type));
        }
        let tag = tagged_file
            .primary_tag_mut()
            .expect("tag inserted above when absent");

        tag.set_title(song.title.clone());
        tag.set_album(song.album.clone());
        tag.set_artist(song.artists_joined());

        if let Some((mime, data)) = cover {
            let pic_type = if container == Container::Flac {
                LoftyPictureType::CoverFront
            } else {
                LoftyPictureType::Other
            };
            let mime_type = parse_mime(&mime);
            tag.push_picture(Picture::new_unchecked(pic_type, mime_type, None, data));
        }

        let temp_path = path.with_extension(format!("{}.tagtmp", container.as_ext()));
        tagged_file
            .save_to_path(&temp_path, WriteOptions::default())
            .map_err(|e| CoreError::Io(std::io::Error::other(e.to_string())))?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }
}

fn parse_mime(mime: &str) -> Option<MimeType> {
    match mime.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => Some(MimeType::Jpeg),
        "image/png" => Some(MimeType::Png),
        "image/bmp" => Some(MimeType::Bmp),
        "image/gif" => Some(MimeType::Gif),
        "image/tiff" => Some(MimeType::Tiff),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song_with_cover(cover_url: Option<&str>) -> Song {
        Song {
            id: 1,
            title: "Test Title".into(),
            artists: vec!["Artist One".into(), "Artist Two".into()],
            album: "Test Album".into(),
            album_artists: vec!["Artist One".into()],
            cover_url: cover_url.map(str::to_string),
            duration_secs: 180,
        }
    }

    #[test]
    fn parse_mime_recognises_common_types() {
        assert_eq!(parse_mime("image/jpeg"), Some(MimeType::Jpeg));
        assert_eq!(parse_mime("image/png"), Some(MimeType::Png));
        assert_eq!(parse_mime("application/octet-stream"), None);
    }

    #[tokio::test]
    async fn fetch_cover_returns_none_without_cover_url() {
        let writer = TagWriter::new();
        let song = song_with_cover(None);
        assert!(writer.fetch_cover(&song).await.is_none());
    }

    #[tokio::test]
    async fn fetch_cover_returns_none_on_unreachable_host() {
        let writer = TagWriter::new();
        let song = song_with_cover(Some("http://127.0.0.1.invalid/cover.jpg"));
        assert!(writer.fetch_cover(&song).await.is_none());
    }
}
