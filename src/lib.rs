//! Track resolution, request-coalesced streaming, and a bounded on-disk
//! cache for a cloud music client.
//!
//! The crate exposes one entry point, [`manager::Manager`], built from a
//! [`config::CoreConfig`], a [`cache_store::CacheStore`], and a
//! [`remote::RemoteAdapter`] implementation the host provides. Everything
//! else — downloaded-file lookup, cache hits, remote resolution, request
//! coalescing, crash-safe streaming, and tag writing — is handled
//! internally.

pub mod cache_store;
pub mod coalescer;
pub mod config;
pub mod error;
pub mod manager;
pub mod path_policy;
pub mod remote;
pub mod song;
pub mod source;
pub mod stream_tee;
pub mod tagger;

pub use cache_store::{CacheCap, CacheStore};
pub use config::CoreConfig;
pub use error::{CoreError, CoreResult};
pub use manager::Manager;
pub use remote::http::HttpRemoteAdapter;
pub use remote::{LyricData, PlayableInfo, RemoteAdapter};
pub use song::{Container, Quality, Song};
pub use source::PlayableSource;
