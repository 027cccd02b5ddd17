//! Immutable core configuration.
//!
//! The host application loads its own TOML/INI/env configuration and
//! legacy-format migration (out of scope, per spec.md §1/§9) and hands the
//! core a plain value record — the core never sees a map-like config
//! structure.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::song::Quality;

/// Cache cap sentinel values, per spec.md §3/§4.C: 0 disables caching
/// entirely, -1 means unlimited, any other positive value is a byte cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCap {
    Disabled,
    Bounded(u64),
    Unlimited,
}

impl From<i64> for CacheCap {
    fn from(raw: i64) -> Self {
        match raw {
            0 => CacheCap::Disabled,
            n if n < 0 => CacheCap::Unlimited,
            n => CacheCap::Bounded(n as u64),
        }
    }
}

fn default_song_template() -> String {
    "{title}-{artists}.{ext}".to_string()
}

fn default_lyric_template() -> String {
    "{title}-{artists}.lrc".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// i64 so the 0/-1 sentinels of spec.md §6 round-trip through config
    /// loaders that only know integer types.
    pub cache_cap_bytes: i64,
    pub cache_dir: PathBuf,
    pub download_dir: PathBuf,
    pub lyric_dir: PathBuf,
    pub quality: Quality,
    #[serde(default = "default_song_template")]
    pub filename_template_song: String,
    #[serde(default = "default_lyric_template")]
    pub filename_template_lyric: String,
}

impl CoreConfig {
    pub fn cache_cap(&self) -> CacheCap {
        CacheCap::from(self.cache_cap_bytes)
    }

    /// Convenience constructor for tests and examples, using OS-convention
    /// paths the way the teacher's `api/ncm.rs::data_dir`/`cache_dir` do.
    pub fn from_env(app_name: &str) -> Self {
        let base = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            cache_cap_bytes: 1_000_000_000,
            cache_dir: base.join(app_name).join("cache"),
            download_dir: base.join(app_name).join("downloads"),
            lyric_dir: base.join(app_name).join("lyrics"),
            quality: Quality::ExHigh,
            filename_template_song: default_song_template(),
            filename_template_lyric: default_lyric_template(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_cap_sentinels() {
        assert_eq!(CacheCap::from(0), CacheCap::Disabled);
        assert_eq!(CacheCap::from(-1), CacheCap::Unlimited);
        assert_eq!(CacheCap::from(-100), CacheCap::Unlimited);
        assert_eq!(CacheCap::from(500), CacheCap::Bounded(500));
    }
}
