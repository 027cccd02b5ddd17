//! The result of a resolve: where the caller should get audio bytes from.

use std::path::PathBuf;

use crate::song::{Container, Quality, Song};

/// Tagged variant telling the caller where to obtain audio bytes. All
/// variants carry the originating song and the resolved container.
#[derive(Debug, Clone)]
pub enum PlayableSource {
    /// A file already sitting in the download directory.
    Downloaded { song: Song, container: Container, path: PathBuf },
    /// A file in the Cache Store.
    Cached { song: Song, container: Container, path: PathBuf },
    /// A remote URL; bytes are obtained on demand by opening it.
    Remote {
        song: Song,
        container: Container,
        url: String,
        quality: Quality,
        byte_size: Option<u64>,
    },
}

impl PlayableSource {
    pub fn song(&self) -> &Song {
        match self {
            PlayableSource::Downloaded { song, .. }
            | PlayableSource::Cached { song, .. }
            | PlayableSource::Remote { song, .. } => song,
        }
    }

    pub fn container(&self) -> Container {
        match self {
            PlayableSource::Downloaded { container, .. }
            | PlayableSource::Cached { container, .. }
            | PlayableSource::Remote { container, .. } => *container,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, PlayableSource::Remote { .. })
    }
}
