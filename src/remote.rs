//! Remote Adapter contract (spec.md §4.B).
//!
//! The core treats the upstream music service as a pure interface; any
//! compliant implementation satisfies it. Shaped the same way
//! `hideselfview-bae`'s `cloud_storage.rs` shapes its `CloudStorage` trait:
//! a small `Send + Sync` async trait around a handful of typed operations,
//! mockable in tests.

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::error::CoreResult;
use crate::song::{Container, Quality};

pub mod http;

/// Result of a remote resolution. `quality` reflects what the server
/// actually granted, which may be lower than what was requested.
#[derive(Debug, Clone)]
pub struct PlayableInfo {
    pub url: String,
    pub container: Container,
    pub quality: Quality,
    pub size: Option<u64>,
}

/// Lyric payload. Missing fields are replaced by sentinel markers by the
/// adapter implementation so downstream parsers always see non-empty
/// strings (spec.md §4.B).
#[derive(Debug, Clone, Default)]
pub struct LyricData {
    pub original: String,
    pub translated: Option<String>,
    pub timed_variant: Option<String>,
}

pub const NO_LYRIC_SENTINEL: &str = "[00:00.00]no lyrics";

#[async_trait]
pub trait RemoteAdapter: Send + Sync {
    /// Resolve a song id + desired quality to a playable URL. Allowed two
    /// internal attempts against two endpoint variants (preferred
    /// high-quality API, then a compatibility endpoint) before surfacing
    /// failure.
    async fn resolve_playable(&self, song_id: u64, quality: Quality) -> CoreResult<PlayableInfo>;

    /// Open a cancellable byte stream for a previously resolved URL.
    /// Non-2xx HTTP status is an error; the stream closes on
    /// cancellation.
    async fn open_stream(
        &self,
        info: &PlayableInfo,
        cancellation: CancellationToken,
    ) -> CoreResult<Box<dyn AsyncRead + Send + Unpin>>;

    /// Fetch lyrics for a song id.
    async fn fetch_lyric(&self, song_id: u64) -> CoreResult<LyricData>;
}
