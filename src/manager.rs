//! Resolver/Manager (spec.md §4.F): the public surface tying the other
//! components together under a single, coalesced, tiered lookup.
//!
//! Grounded on the teacher's own `audio/streaming.rs` resolve-then-play
//! flow (probe downloaded file, probe cache, fall back to network) and on
//! `hideselfview-bae`'s chunked-import pipeline for the "open a stream,
//! fork it into a sink" shape reused here for both the foreground download
//! and the background cache warmer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cache_store::CacheStore;
use crate::coalescer::Coalescer;
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::path_policy::PathPolicy;
use crate::remote::{LyricData, PlayableInfo, RemoteAdapter};
use crate::song::{Container, Quality, Song};
use crate::source::PlayableSource;
use crate::stream_tee::{self, Secondary};
use crate::tagger::TagWriter;

pub struct Manager {
    cache: Arc<CacheStore>,
    remote: Arc<dyn RemoteAdapter>,
    tagger: Arc<TagWriter>,
    path_policy: PathPolicy,
    download_dir: PathBuf,
    lyric_dir: PathBuf,
    quality: Quality,
    resolve_coalescer: Coalescer<PlayableSource>,
    download_coalescer: Coalescer<PathBuf>,
    lyric_download_coalescer: Coalescer<PathBuf>,
    lyric_fetch_coalescer: Arc<Coalescer<LyricData>>,
    warm_coalescer: Arc<Coalescer<()>>,
}

impl Manager {
    pub fn new(
        config: &CoreConfig,
        cache: Arc<CacheStore>,
        remote: Arc<dyn RemoteAdapter>,
        tagger: Arc<TagWriter>,
    ) -> CoreResult<Self> {
        let path_policy = PathPolicy::new(
            config.filename_template_song.clone(),
            config.filename_template_lyric.clone(),
        )?;
        Ok(Self {
            cache,
            remote,
            tagger,
            path_policy,
            download_dir: config.download_dir.clone(),
            lyric_dir: config.lyric_dir.clone(),
            quality: config.quality,
            resolve_coalescer: Coalescer::new(),
            download_coalescer: Coalescer::new(),
            lyric_download_coalescer: Coalescer::new(),
            lyric_fetch_coalescer: Arc::new(Coalescer::new()),
            warm_coalescer: Arc::new(Coalescer::new()),
        })
    }

    /// As [`Manager::resolve_playable_source_with`], using a fresh,
    /// never-cancelled token for callers that don't need cooperative
    /// cancellation (spec.md §5/SPEC_FULL.md §12's "convenience wrapper").
    pub async fn resolve_playable_source(&self, song: &Song) -> CoreResult<PlayableSource> {
        self.resolve_playable_source_with(song, CancellationToken::new()).await
    }

    /// Three-tier lookup (spec.md §4.F.1): downloaded file, then cache,
    /// then remote. Coalesced under `resolve-{song.id}`. A `Remote`
    /// result with caching enabled triggers a detached background cache
    /// warmer, tied to a child of `cancellation` (spec.md §5: "Background
    /// cache warming ... tied to a context token supplied by the
    /// caller"), that never influences this call's outcome.
    pub async fn resolve_playable_source_with(
        &self,
        song: &Song,
        cancellation: CancellationToken,
    ) -> CoreResult<PlayableSource> {
        let key = format!("resolve-{}", song.id);
        let cache = self.cache.clone();
        let remote = self.remote.clone();
        let path_policy = self.path_policy.clone();
        let download_dir = self.download_dir.clone();
        let quality = self.quality;
        let song_owned = song.clone();

        let result = self
            .resolve_coalescer
            .run(key, async move {
                resolve_inner(&cache, remote.as_ref(), &path_policy, &download_dir, quality, song_owned).await
            })
            .await?;

        if let PlayableSource::Remote {
            ref container,
            ref quality,
            ref url,
            ..
        } = result
        {
            if !self.cache.is_disabled() {
                self.spawn_cache_warmer(
                    result.song().id,
                    *quality,
                    *container,
                    url.clone(),
                    cancellation.child_token(),
                );
            }
        }

        Ok(result)
    }

    /// As [`Manager::download_song_with`], using a fresh, never-cancelled
    /// token.
    pub async fn download_song(&self, song: &Song) -> CoreResult<PathBuf> {
        self.download_song_with(song, CancellationToken::new()).await
    }

    /// Produces a local playable file for `song` (spec.md §4.F.2).
    /// Rejects `song.id == 0`. Coalesced under `download-{song.id}`.
    /// Cancelling `cancellation` mid-copy removes the partial temp file
    /// (spec.md §5) without leaving the download directory or the cache
    /// (for the concurrently-populated remote case) in a partial state.
    pub async fn download_song_with(&self, song: &Song, cancellation: CancellationToken) -> CoreResult<PathBuf> {
        if song.id == 0 {
            return Err(CoreError::InvalidInput("song id must be non-zero".into()));
        }

        let key = format!("download-{}", song.id);
        let cache = self.cache.clone();
        let remote = self.remote.clone();
        let tagger = self.tagger.clone();
        let path_policy = self.path_policy.clone();
        let download_dir = self.download_dir.clone();
        let quality = self.quality;
        let song_owned = song.clone();

        self.download_coalescer
            .run(key, async move {
                let source = resolve_inner(
                    &cache,
                    remote.as_ref(),
                    &path_policy,
                    &download_dir,
                    quality,
                    song_owned,
                )
                .await?;
                download_dispatch(cache, remote, tagger, &path_policy, &download_dir, source, cancellation).await
            })
            .await
    }

    /// Writes lyrics for `song` under the lyric directory (spec.md
    /// §4.F.3). Coalesced under `lyric-download-{song.id}`.
    pub async fn download_lyric(&self, song: &Song) -> CoreResult<PathBuf> {
        let name = self.path_policy.lyric_name(song, "lrc");
        let final_path = self.lyric_dir.join(&name);
        if tokio::fs::try_exists(&final_path).await.unwrap_or(false) {
            return Err(CoreError::already_exists(final_path));
        }

        let key = format!("lyric-download-{}", song.id);
        let remote = self.remote.clone();
        let lyric_fetch_coalescer = self.lyric_fetch_coalescer.clone();
        let lyric_dir = self.lyric_dir.clone();
        let song_id = song.id;

        self.lyric_download_coalescer
            .run(key, async move {
                let lyric = fetch_lyric_coalesced(lyric_fetch_coalescer, remote, song_id).await?;
                tokio::fs::create_dir_all(&lyric_dir).await?;
                let temp_path = lyric_dir.join(format!("lyric-{song_id}.tmp"));
                tokio::fs::write(&temp_path, lyric.original.as_bytes()).await?;
                tokio::fs::rename(&temp_path, &final_path).await?;
                Ok(final_path)
            })
            .await
    }

    /// Fetches lyrics without writing them (spec.md §4.F.4). Coalesced
    /// under `lyric-fetch-{song_id}`.
    pub async fn get_lyric(&self, song_id: u64) -> CoreResult<LyricData> {
        fetch_lyric_coalesced(self.lyric_fetch_coalescer.clone(), self.remote.clone(), song_id).await
    }

    pub async fn clear_cache(&self) -> CoreResult<()> {
        self.cache.clear().await
    }

    /// Opens a second, independent stream from the same remote source and
    /// pipes it into the Cache Store. Errors are logged only; this never
    /// influences the caller that triggered resolution (spec.md §4.F
    /// "Background cache warmer").
    fn spawn_cache_warmer(
        &self,
        song_id: u64,
        quality: Quality,
        container: Container,
        url: String,
        cancellation: CancellationToken,
    ) {
        let key = format!("cache-{song_id}");
        let cache = self.cache.clone();
        let remote = self.remote.clone();
        let warm_coalescer = self.warm_coalescer.clone();

        tokio::spawn(async move {
            let outcome = warm_coalescer
                .run(key, async move {
                    let info = PlayableInfo {
                        url,
                        container,
                        quality,
                        size: None,
                    };
                    let stream = remote.open_stream(&info, cancellation).await?;
                    cache.put(song_id, quality, container, stream).await
                })
                .await;

            if let Err(e) = outcome {
                warn!(song_id, error = %e, "background cache warm failed");
            }
        });
    }
}

/// The three-tier lookup itself, free of any coalescing so it can be
/// reused by both `resolve_playable_source` and `download_song` (the
/// latter performs its own dedicated download rather than delegating to
/// a warmer).
async fn resolve_inner(
    cache: &CacheStore,
    remote: &dyn RemoteAdapter,
    path_policy: &PathPolicy,
    download_dir: &Path,
    quality: Quality,
    song: Song,
) -> CoreResult<PlayableSource> {
    for container in path_policy.recognised_extensions() {
        let name = path_policy.song_name(&song, container.as_ext());
        let path = download_dir.join(&name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(PlayableSource::Downloaded {
                song,
                container: *container,
                path,
            });
        }
    }

    if !cache.is_disabled() {
        match cache.get_path(song.id, quality).await {
            Ok((path, container)) => return Ok(PlayableSource::Cached { song, container, path }),
            Err(CoreError::NotFound) => {}
            Err(e) => return Err(e),
        }
    }

    let info = remote.resolve_playable(song.id, quality).await?;
    Ok(PlayableSource::Remote {
        song,
        container: info.container,
        url: info.url,
        quality: info.quality,
        byte_size: info.size,
    })
}

async fn download_dispatch(
    cache: Arc<CacheStore>,
    remote: Arc<dyn RemoteAdapter>,
    tagger: Arc<TagWriter>,
    path_policy: &PathPolicy,
    download_dir: &Path,
    source: PlayableSource,
    cancellation: CancellationToken,
) -> CoreResult<PathBuf> {
    match source {
        PlayableSource::Downloaded { path, .. } => Err(CoreError::already_exists(path)),

        PlayableSource::Cached { song, container, path } => {
            let final_path = download_dir.join(path_policy.song_name(&song, container.as_ext()));
            let file = tokio::fs::File::open(&path).await?;
            stream_tee::tee(file, &final_path, None, cancellation).await?;
            tagger.tag(&final_path, &song, container).await?;
            Ok(final_path)
        }

        PlayableSource::Remote {
            song,
            container,
            url,
            quality,
            ..
        } => {
            let final_path = download_dir.join(path_policy.song_name(&song, container.as_ext()));
            let info = PlayableInfo {
                url,
                container,
                quality,
                size: None,
            };
            let stream = remote.open_stream(&info, cancellation.clone()).await?;

            let secondary = if cache.is_disabled() {
                None
            } else {
                Some(Secondary {
                    cache: cache.clone(),
                    song_id: song.id,
                    quality,
                    container,
                })
            };

            stream_tee::tee(stream, &final_path, secondary, cancellation).await?;
            tagger.tag(&final_path, &song, container).await?;
            Ok(final_path)
        }
    }
}

async fn fetch_lyric_coalesced(
    coalescer: Arc<Coalescer<LyricData>>,
    remote: Arc<dyn RemoteAdapter>,
    song_id: u64,
) -> CoreResult<LyricData> {
    let key = format!("lyric-fetch-{song_id}");
    coalescer.run(key, async move { remote.fetch_lyric(song_id).await }).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_store::CacheCap;
    use crate::remote::stub::StubRemoteAdapter;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::tempdir;

    fn body(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 251) as u8).collect()
    }

    fn song(id: u64, title: &str, artists: &[&str]) -> Song {
        Song {
            id,
            title: title.to_string(),
            artists: artists.iter().map(|s| s.to_string()).collect(),
            album: "Album".into(),
            album_artists: vec![],
            cover_url: None,
            duration_secs: 200,
        }
    }

    fn config(download_dir: PathBuf, cache_dir: PathBuf, lyric_dir: PathBuf) -> CoreConfig {
        CoreConfig {
            cache_cap_bytes: 100_000_000,
            cache_dir,
            download_dir,
            lyric_dir,
            quality: Quality::Higher,
            filename_template_song: "{title}-{artists}.{ext}".into(),
            filename_template_lyric: "{title}-{artists}.lrc".into(),
        }
    }

    #[tokio::test]
    async fn cache_miss_remote_resolve_spawns_background_warm() {
        let download_dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        let lyric_dir = tempdir().unwrap();
        let cfg = config(
            download_dir.path().to_path_buf(),
            cache_dir.path().to_path_buf(),
            lyric_dir.path().to_path_buf(),
        );

        let cache = Arc::new(CacheStore::new(cache_dir.path(), CacheCap::Bounded(100_000_000)));
        let info = PlayableInfo {
            url: "https://cdn/x".into(),
            container: Container::Mp3,
            quality: Quality::Higher,
            size: Some(3_000_000),
        };
        let remote = Arc::new(StubRemoteAdapter::new().with_song(42, info, body(3_000_000)));
        let tagger = Arc::new(TagWriter::new());

        let manager = Manager::new(&cfg, cache, remote, tagger).unwrap();
        let result = manager.resolve_playable_source(&song(42, "Hello", &["Artist"])).await.unwrap();

        match result {
            PlayableSource::Remote { url, container, .. } => {
                assert_eq!(url, "https://cdn/x");
                assert_eq!(container, Container::Mp3);
            }
            other => panic!("expected Remote, got {other:?}"),
        }

        // Give the detached background warmer time to finish.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut read_dir = tokio::fs::read_dir(cache_dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["42-2.mp3".to_string()]);
        let bytes = tokio::fs::read(cache_dir.path().join("42-2.mp3")).await.unwrap();
        assert_eq!(bytes.len(), 3_000_000);
    }

    #[tokio::test]
    async fn download_song_rejects_already_existing_file_without_network() {
        let download_dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        let lyric_dir = tempdir().unwrap();
        let existing = download_dir.path().join("Hello-Artist.mp3");
        tokio::fs::write(&existing, b"already here").await.unwrap();

        let cfg = config(
            download_dir.path().to_path_buf(),
            cache_dir.path().to_path_buf(),
            lyric_dir.path().to_path_buf(),
        );

        let cache = Arc::new(CacheStore::new(cache_dir.path(), CacheCap::Bounded(100_000_000)));
        let remote = Arc::new(StubRemoteAdapter::new());
        let resolve_calls = remote.resolve_calls.clone();
        let tagger = Arc::new(TagWriter::new());

        let manager = Manager::new(&cfg, cache, remote, tagger).unwrap();
        let err = manager
            .download_song(&song(1, "Hello", &["Artist"]))
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::AlreadyExists { ref path } if *path == existing));
        assert_eq!(resolve_calls.load(Ordering::SeqCst), 0);

        let mut read_dir = tokio::fs::read_dir(cache_dir.path()).await;
        if let Ok(ref mut rd) = read_dir {
            assert!(rd.next_entry().await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn download_song_rejects_zero_id() {
        let download_dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        let lyric_dir = tempdir().unwrap();
        let cfg = config(
            download_dir.path().to_path_buf(),
            cache_dir.path().to_path_buf(),
            lyric_dir.path().to_path_buf(),
        );
        let cache = Arc::new(CacheStore::new(cache_dir.path(), CacheCap::Bounded(100_000_000)));
        let remote = Arc::new(StubRemoteAdapter::new());
        let tagger = Arc::new(TagWriter::new());
        let manager = Manager::new(&cfg, cache, remote, tagger).unwrap();

        let err = manager.download_song(&song(0, "X", &["Y"])).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn download_song_with_honors_pre_cancelled_token() {
        let download_dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        let lyric_dir = tempdir().unwrap();
        let cfg = config(
            download_dir.path().to_path_buf(),
            cache_dir.path().to_path_buf(),
            lyric_dir.path().to_path_buf(),
        );

        let cache = Arc::new(CacheStore::new(cache_dir.path(), CacheCap::Bounded(100_000_000)));
        let info = PlayableInfo {
            url: "https://cdn/y".into(),
            container: Container::Mp3,
            quality: Quality::Higher,
            size: Some(body(10_000).len() as u64),
        };
        let remote = Arc::new(StubRemoteAdapter::new().with_song(7, info, body(10_000)));
        let tagger = Arc::new(TagWriter::new());
        let manager = Manager::new(&cfg, cache, remote, tagger).unwrap();

        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let err = manager
            .download_song_with(&song(7, "Hello", &["Artist"]), cancellation)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Cancelled));

        let mut read_dir = tokio::fs::read_dir(download_dir.path()).await.unwrap();
        assert!(read_dir.next_entry().await.unwrap().is_none());
    }
}
