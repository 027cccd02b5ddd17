//! Deterministic filename composition (spec.md §4.A).
//!
//! Template expansion is a small hand-rolled `{token}` substitution — the
//! token set is fixed and tiny (`{title}`, `{artists}`, `{ext}`), so no
//! templating crate is pulled in, matching the teacher's own dependency
//! footprint (it has none either).

use crate::error::{CoreError, CoreResult};
use crate::song::{Container, Song};

#[derive(Debug, Clone)]
pub struct PathPolicy {
    song_template: String,
    lyric_template: String,
    recognised_extensions: Vec<Container>,
}

/// Platform-illegal path separators get mapped to `_`; the result is
/// always a bare basename, never a path.
const ILLEGAL_CHARS: [char; 2] = ['/', '\\'];

impl PathPolicy {
    pub fn new(song_template: impl Into<String>, lyric_template: impl Into<String>) -> CoreResult<Self> {
        let song_template = song_template.into();
        let lyric_template = lyric_template.into();
        validate_template(&song_template, &["title", "artists", "ext"])?;
        validate_template(&lyric_template, &["title", "artists", "ext"])?;
        Ok(Self {
            song_template,
            lyric_template,
            recognised_extensions: Container::ALL.to_vec(),
        })
    }

    pub fn recognised_extensions(&self) -> &[Container] {
        &self.recognised_extensions
    }

    /// Expand the song template with the song's fields and sanitise the
    /// result into a basename.
    pub fn song_name(&self, song: &Song, ext: &str) -> String {
        sanitise(&expand(&self.song_template, song, ext))
    }

    pub fn lyric_name(&self, song: &Song, ext: &str) -> String {
        sanitise(&expand(&self.lyric_template, song, ext))
    }

    /// Candidate download basenames across the recognised extension set,
    /// used to probe the download directory before consulting the cache.
    pub fn candidates(&self, song: &Song) -> Vec<String> {
        self.recognised_extensions
            .iter()
            .map(|c| self.song_name(song, c.as_ext()))
            .collect()
    }
}

fn expand(template: &str, song: &Song, ext: &str) -> String {
    template
        .replace("{title}", &song.title)
        .replace("{artists}", &song.artists_joined())
        .replace("{ext}", ext)
}

fn sanitise(basename: &str) -> String {
    basename.replace(ILLEGAL_CHARS, "_")
}

fn validate_template(template: &str, known_tokens: &[&str]) -> CoreResult<()> {
    if template.is_empty() {
        return Err(CoreError::InvalidInput("empty filename template".into()));
    }
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            return Err(CoreError::InvalidInput(format!(
                "unterminated token in template {template:?}"
            )));
        };
        let token = &rest[open + 1..open + close];
        if !known_tokens.contains(&token) {
            return Err(CoreError::InvalidInput(format!(
                "unknown template token {{{token}}} in {template:?}"
            )));
        }
        rest = &rest[open + close + 1..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(title: &str, artists: &[&str]) -> Song {
        Song {
            id: 1,
            title: title.to_string(),
            artists: artists.iter().map(|s| s.to_string()).collect(),
            album: "Album".into(),
            album_artists: vec![],
            cover_url: None,
            duration_secs: 0,
        }
    }

    #[test]
    fn default_template_composes_basename() {
        let p = PathPolicy::new("{title}-{artists}.{ext}", "{title}-{artists}.lrc").unwrap();
        let s = song("Hello", &["Artist"]);
        assert_eq!(p.song_name(&s, "mp3"), "Hello-Artist.mp3");
    }

    #[test]
    fn illegal_chars_sanitised() {
        let p = PathPolicy::new("{title}-{artists}.{ext}", "{title}.lrc").unwrap();
        let s = song("A/B\\C", &["X"]);
        assert_eq!(p.song_name(&s, "mp3"), "A_B_C-X.mp3");
    }

    #[test]
    fn candidates_cover_recognised_extensions() {
        let p = PathPolicy::new("{title}-{artists}.{ext}", "{title}.lrc").unwrap();
        let s = song("Hello", &["Artist"]);
        let names = p.candidates(&s);
        assert_eq!(names.len(), Container::ALL.len());
        assert!(names.contains(&"Hello-Artist.mp3".to_string()));
        assert!(names.contains(&"Hello-Artist.flac".to_string()));
    }

    #[test]
    fn invalid_template_token_rejected() {
        let err = PathPolicy::new("{bogus}.{ext}", "{title}.lrc").unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }
}
