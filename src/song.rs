//! Song identity and the closed enumerations that key the cache and the
//! download filename composer.

use serde::{Deserialize, Serialize};

/// A song as the core sees it: an opaque stable id plus the descriptive
/// fields needed for tagging and filename composition. Only `id` drives
/// cache and download lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub id: u64,
    pub title: String,
    pub artists: Vec<String>,
    pub album: String,
    pub album_artists: Vec<String>,
    pub cover_url: Option<String>,
    pub duration_secs: u64,
}

impl Song {
    /// Comma-joined artist names, the form used by the filename template.
    pub fn artists_joined(&self) -> String {
        self.artists.join(",")
    }

    pub fn album_artists_joined(&self) -> String {
        self.album_artists.join(",")
    }
}

/// Streaming quality, totally ordered. The discriminant doubles as the
/// cache filename's rank (`"{song_id}-{rank}.{container}"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Standard = 1,
    Higher = 2,
    ExHigh = 3,
    Lossless = 4,
    HiRes = 5,
}

impl Quality {
    pub const ALL: [Quality; 5] = [
        Quality::Standard,
        Quality::Higher,
        Quality::ExHigh,
        Quality::Lossless,
        Quality::HiRes,
    ];

    /// The integer rank 1..=5 written into cache filenames.
    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn from_rank(rank: u8) -> Option<Quality> {
        Quality::ALL.into_iter().find(|q| q.rank() == rank)
    }
}

/// Container type: a short lowercase extension drawn from a fixed,
/// recognised set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp3,
    Flac,
    Wav,
    Ogg,
    M4a,
}

impl Container {
    pub const ALL: [Container; 5] = [
        Container::Mp3,
        Container::Flac,
        Container::Wav,
        Container::Ogg,
        Container::M4a,
    ];

    pub fn as_ext(self) -> &'static str {
        match self {
            Container::Mp3 => "mp3",
            Container::Flac => "flac",
            Container::Wav => "wav",
            Container::Ogg => "ogg",
            Container::M4a => "m4a",
        }
    }

    pub fn from_ext(ext: &str) -> Option<Container> {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" => Some(Container::Mp3),
            "flac" => Some(Container::Flac),
            "wav" => Some(Container::Wav),
            "ogg" => Some(Container::Ogg),
            "m4a" => Some(Container::M4a),
            _ => None,
        }
    }

    /// Whether this container belongs to the ID3v2 tagging family, as
    /// opposed to the generic (lofty-handled) family.
    pub fn is_id3_family(self) -> bool {
        matches!(self, Container::Mp3)
    }
}

impl std::fmt::Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ext())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_ordering_matches_rank() {
        assert!(Quality::Standard < Quality::Higher);
        assert!(Quality::Higher < Quality::ExHigh);
        assert!(Quality::ExHigh < Quality::Lossless);
        assert!(Quality::Lossless < Quality::HiRes);
        assert_eq!(Quality::HiRes.rank(), 5);
    }

    #[test]
    fn container_ext_roundtrip() {
        for c in Container::ALL {
            assert_eq!(Container::from_ext(c.as_ext()), Some(c));
        }
        assert_eq!(Container::from_ext("MP3"), Some(Container::Mp3));
        assert_eq!(Container::from_ext("exe"), None);
    }
}
