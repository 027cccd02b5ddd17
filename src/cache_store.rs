//! Content-addressed Cache Store (spec.md §4.C).
//!
//! Eviction (`prune`) and the oldest-`mtime`-first sweep are a direct
//! generalization of the teacher's `cache.rs` (`collect_entries` +
//! `enforce_cache_limit`), parameterized by one cap and one directory
//! instead of the teacher's four hardcoded asset categories. Orphaned
//! `.tmp` cleanup at construction mirrors the teacher's
//! `cleanup_temp_files()`.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::song::{Container, Quality};

const TEMP_PREFIX: &str = "song-";
const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCap {
    Disabled,
    Bounded(u64),
    Unlimited,
}

impl From<crate::config::CacheCap> for CacheCap {
    fn from(c: crate::config::CacheCap) -> Self {
        match c {
            crate::config::CacheCap::Disabled => CacheCap::Disabled,
            crate::config::CacheCap::Bounded(n) => CacheCap::Bounded(n),
            crate::config::CacheCap::Unlimited => CacheCap::Unlimited,
        }
    }
}

/// A single entry discovered while listing the cache directory.
#[derive(Debug, Clone)]
struct Entry {
    path: PathBuf,
    song_id: u64,
    rank: u8,
    container: Container,
    size: u64,
    modified: SystemTime,
}

pub struct CacheStore {
    root: PathBuf,
    cap: CacheCap,
    guard: RwLock<()>,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>, cap: CacheCap) -> Self {
        Self {
            root: root.into(),
            cap,
            guard: RwLock::new(()),
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self.cap, CacheCap::Disabled)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove orphaned temp files left by a crashed writer. Call once at
    /// startup, before any other operation touches this directory.
    pub async fn cleanup_temp_files(&self) {
        let _guard = self.guard.write().await;
        if !self.root.exists() {
            return;
        }
        let Ok(mut read_dir) = tokio::fs::read_dir(&self.root).await else {
            return;
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let path = entry.path();
            if is_temp_name(&path) {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!("failed to remove orphan temp file {:?}: {}", path, e);
                } else {
                    info!("removed orphan temp file {:?}", path);
                }
            }
        }
    }

    /// Stream `reader` into the cache under `(song.id, quality, container)`.
    /// Drains to nothing and succeeds immediately when the cache is
    /// disabled (spec.md §4.C step 1).
    pub async fn put(
        &self,
        song_id: u64,
        quality: Quality,
        container: Container,
        mut reader: impl AsyncRead + Unpin,
    ) -> CoreResult<()> {
        if self.is_disabled() {
            let mut sink = tokio::io::sink();
            tokio::io::copy(&mut reader, &mut sink).await?;
            return Ok(());
        }

        let _guard = self.guard.write().await;
        tokio::fs::create_dir_all(&self.root).await?;

        let temp_path = self.root.join(format!(
            "{TEMP_PREFIX}{}-{}{TEMP_SUFFIX}",
            song_id,
            uniq_suffix()
        ));
        let final_path = self
            .root
            .join(format!("{}-{}.{}", song_id, quality.rank(), container.as_ext()));

        let result = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;
            Ok::<(), CoreError>(())
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }

        tokio::fs::rename(&temp_path, &final_path).await?;
        debug!("cache put complete: {:?}", final_path);

        // Prune runs under the same write guard we already hold: spec.md
        // §5 requires put-before-prune ordering, which holding the guard
        // for the whole call gives us for free.
        self.prune_locked().await;

        Ok(())
    }

    /// Highest-rank file at or above `min_quality`, if any.
    pub async fn get_path(&self, song_id: u64, min_quality: Quality) -> CoreResult<(PathBuf, Container)> {
        if self.is_disabled() {
            return Err(CoreError::NotFound);
        }
        let _guard = self.guard.read().await;
        let entries = self.list_entries_for(song_id).await;

        entries
            .into_iter()
            .filter(|e| e.rank >= min_quality.rank())
            .max_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.path.cmp(&b.path)))
            .map(|e| (e.path, e.container))
            .ok_or(CoreError::NotFound)
    }

    /// As `get_path`, but opens the file too.
    pub async fn get(
        &self,
        song_id: u64,
        min_quality: Quality,
    ) -> CoreResult<(tokio::fs::File, Container)> {
        let (path, container) = self.get_path(song_id, min_quality).await?;
        let file = tokio::fs::File::open(&path).await?;
        Ok((file, container))
    }

    /// Remove the cache directory recursively and recreate it empty.
    pub async fn clear(&self) -> CoreResult<()> {
        let _guard = self.guard.write().await;
        if self.root.exists() {
            tokio::fs::remove_dir_all(&self.root).await?;
        }
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Internal prune, assumes the write guard is already held by the
    /// caller.
    async fn prune_locked(&self) {
        let cap = match self.cap {
            CacheCap::Disabled => return,
            CacheCap::Unlimited => return,
            CacheCap::Bounded(cap) => cap,
        };

        let mut entries = self.list_all_entries().await;
        let total: u64 = entries.iter().map(|e| e.size).sum();
        if total <= cap {
            return;
        }

        entries.sort_by_key(|e| e.modified);

        let mut freed = 0u64;
        let mut remaining = total;
        for entry in entries {
            if remaining <= cap {
                break;
            }
            match tokio::fs::remove_file(&entry.path).await {
                Ok(()) => {
                    remaining = remaining.saturating_sub(entry.size);
                    freed += entry.size;
                }
                Err(e) => {
                    warn!("prune: failed to remove {:?}: {}", entry.path, e);
                }
            }
        }
        info!("prune freed {} bytes, {} bytes remain", freed, remaining);
    }

    async fn list_all_entries(&self) -> Vec<Entry> {
        self.list_entries(|_| true).await
    }

    async fn list_entries_for(&self, song_id: u64) -> Vec<Entry> {
        self.list_entries(move |id| id == song_id).await
    }

    async fn list_entries(&self, keep: impl Fn(u64) -> bool) -> Vec<Entry> {
        let mut out = Vec::new();
        if !self.root.exists() {
            return out;
        }
        let Ok(mut read_dir) = tokio::fs::read_dir(&self.root).await else {
            return out;
        };
        while let Ok(Some(dir_entry)) = read_dir.next_entry().await {
            let path = dir_entry.path();
            if is_temp_name(&path) {
                continue;
            }
            let Some(basename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match parse_cache_name(basename) {
                Some((song_id, rank, container)) if keep(song_id) => {
                    let Ok(metadata) = dir_entry.metadata().await else {
                        continue;
                    };
                    out.push(Entry {
                        path,
                        song_id,
                        rank,
                        container,
                        size: metadata.len(),
                        modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    });
                }
                Some(_) => {}
                None => {
                    // Parse errors are logged once and the entry is
                    // skipped — never surfaced to callers (spec.md §7).
                    debug!("skipping malformed cache entry name: {}", basename);
                }
            }
        }
        out
    }
}

fn is_temp_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(TEMP_SUFFIX))
        .unwrap_or(false)
}

fn uniq_suffix() -> String {
    // A process-unique, monotonically increasing suffix for temp
    // filenames; concurrent `put` calls for the same song are coalesced
    // away before reaching the store (spec.md §4.F), so this only needs
    // to avoid collisions within one process.
    static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    format!("{}-{n:x}", std::process::id())
}

/// Parse `"{song_id}-{rank}.{ext}"`. The spec pins the rank to a single
/// decimal digit 1..=5 (spec.md §9 open question); anything else is a
/// parse failure, recovered by the caller (skip + log).
fn parse_cache_name(basename: &str) -> Option<(u64, u8, Container)> {
    let (stem, ext) = basename.rsplit_once('.')?;
    let container = Container::from_ext(ext)?;
    let (id_part, rank_part) = stem.rsplit_once('-')?;
    if rank_part.len() != 1 {
        return None;
    }
    let rank: u8 = rank_part.parse().ok()?;
    if !(1..=5).contains(&rank) {
        return None;
    }
    let song_id: u64 = id_part.parse().ok()?;
    Some((song_id, rank, container))
}
