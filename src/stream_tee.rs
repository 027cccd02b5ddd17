//! Stream Tee (spec.md §4.E): a one-shot operator that forks a single
//! upstream byte stream into a temp file (published atomically on
//! success) and, optionally, the Cache Store.
//!
//! Grounded on two teacher patterns combined: the temp-file-then-rename
//! discipline of `audio/streaming.rs::start_buffer_download` (temp file in
//! the destination directory, rename on completion, remove on cancel/
//! error), and the producer/channel-to-consumer-task shape of
//! `hideselfview-bae`'s `import/pipeline/chunk_producer.rs`. The pipe
//! itself is a `tokio::sync::mpsc` channel of fallible byte chunks wrapped
//! as an `AsyncRead` via `tokio_stream::wrappers::ReceiverStream` +
//! `tokio_util::io::StreamReader` — `tokio-stream` is the same dependency
//! `hideselfview-bae`'s import pipeline already uses for this exact
//! channel-to-stream conversion.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cache_store::CacheStore;
use crate::error::{CoreError, CoreResult};
use crate::song::{Container, Quality};

const CHUNK_SIZE: usize = 64 * 1024;
const PIPE_DEPTH: usize = 8;

/// The cache sink half of a tee. Absent when `from_cache` is true (the
/// upstream already came from the cache — spec.md §4.E) or when the
/// caller simply doesn't want cache population.
pub struct Secondary {
    pub cache: Arc<CacheStore>,
    pub song_id: u64,
    pub quality: Quality,
    pub container: Container,
}

/// Copy `upstream` into a temp file in `final_path`'s directory, optionally
/// forking into the Cache Store at the same time, then atomically publish
/// at `final_path`. On any failure — including cancellation via
/// `cancellation` (spec.md §5: "Cancellation during Stream Tee causes the
/// temp file to be removed and the cache-side pipe to be closed with
/// error") — the temp file (and any partial cache write) is removed and no
/// file appears at `final_path`.
pub async fn tee(
    mut upstream: impl AsyncRead + Unpin,
    final_path: &Path,
    secondary: Option<Secondary>,
    cancellation: CancellationToken,
) -> CoreResult<()> {
    let dir = final_path
        .parent()
        .ok_or_else(|| CoreError::InvalidInput("final path has no parent directory".into()))?;
    tokio::fs::create_dir_all(dir).await?;
    let temp_path = dir.join(format!("download-{}.tmp", unique_suffix()));

    let mut temp_file = tokio::fs::File::create(&temp_path).await?;

    let secondary_task = secondary.map(|s| spawn_secondary(s));
    let (chunk_tx, secondary_join) = match secondary_task {
        Some((tx, join)) => (Some(tx), Some(join)),
        None => (None, None),
    };

    let copy_result = copy_loop(&mut upstream, &mut temp_file, chunk_tx, &cancellation).await;

    // Fold a panicking consumer task into `secondary_result` rather than
    // `?`-returning here: an early return would skip the temp-file removal
    // below entirely, leaving a `download-*.tmp` file behind.
    let secondary_result: CoreResult<()> = match secondary_join {
        Some(join) => match join.await {
            Ok(inner) => inner,
            Err(join_err) => Err(CoreError::Io(std::io::Error::other(join_err))),
        },
        None => Ok(()),
    };

    let flush_result = temp_file.flush().await.map_err(CoreError::from);

    // Surface whichever failed first; the copy loop's own error is
    // closest to the root cause, so it takes priority.
    if copy_result.is_err() || secondary_result.is_err() || flush_result.is_err() {
        let _ = tokio::fs::remove_file(&temp_path).await;
        copy_result?;
        secondary_result?;
        flush_result?;
    }

    tokio::fs::rename(&temp_path, final_path).await?;
    Ok(())
}

/// Spawn the cache-populating consumer task. Returns a sender for chunks
/// (closing it signals clean EOF to the consumer) and a join handle
/// yielding the consumer's result.
fn spawn_secondary(
    secondary: Secondary,
) -> (
    tokio::sync::mpsc::Sender<std::io::Result<Bytes>>,
    tokio::task::JoinHandle<CoreResult<()>>,
) {
    let (tx, rx) = tokio::sync::mpsc::channel::<std::io::Result<Bytes>>(PIPE_DEPTH);
    let Secondary {
        cache,
        song_id,
        quality,
        container,
    } = secondary;

    let join = tokio::spawn(async move {
        let stream = ReceiverStream::new(rx);
        let reader = StreamReader::new(stream);
        cache.put(song_id, quality, container, reader).await
    });

    (tx, join)
}

async fn copy_loop(
    upstream: &mut (impl AsyncRead + Unpin + ?Sized),
    temp_file: &mut tokio::fs::File,
    chunk_tx: Option<tokio::sync::mpsc::Sender<std::io::Result<Bytes>>>,
    cancellation: &CancellationToken,
) -> CoreResult<()> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let read_result = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                let err = std::io::Error::new(std::io::ErrorKind::Interrupted, "cancelled");
                if let Some(tx) = &chunk_tx {
                    let _ = tx.send(Err(std::io::Error::new(err.kind(), err.to_string()))).await;
                }
                return Err(CoreError::Cancelled);
            }
            result = upstream.read(&mut buf) => result,
        };

        let n = match read_result {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                if let Some(tx) = &chunk_tx {
                    let _ = tx.send(Err(std::io::Error::new(e.kind(), e.to_string()))).await;
                }
                return Err(CoreError::from(e));
            }
        };

        if let Err(e) = temp_file.write_all(&buf[..n]).await {
            if let Some(tx) = &chunk_tx {
                let _ = tx.send(Err(std::io::Error::new(e.kind(), e.to_string()))).await;
            }
            return Err(CoreError::from(e));
        }

        if let Some(tx) = &chunk_tx {
            let chunk = Bytes::copy_from_slice(&buf[..n]);
            if tx.send(Ok(chunk)).await.is_err() {
                // Secondary consumer already gave up (e.g. cache put
                // failed and the task exited); stop copying.
                warn!("stream tee: secondary sink closed early");
                return Err(CoreError::Io(std::io::Error::other("secondary sink closed")));
            }
        }
    }
    Ok(())
}

fn unique_suffix() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{n:x}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_store::CacheCap;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn body(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn publishes_final_file_without_secondary() {
        let dir = tempdir().unwrap();
        let final_path = dir.path().join("out.mp3");
        let data = body(5000);
        tee(
            std::io::Cursor::new(data.clone()),
            &final_path,
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(final_path.exists());
        let written = tokio::fs::read(&final_path).await.unwrap();
        assert_eq!(written, data);

        let mut read_dir = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(e) = read_dir.next_entry().await.unwrap() {
            names.push(e.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["out.mp3".to_string()]);
    }

    #[tokio::test]
    async fn populates_cache_concurrently_when_secondary_attached() {
        let download_dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        let cache = Arc::new(CacheStore::new(cache_dir.path(), CacheCap::Unlimited));

        let final_path = download_dir.path().join("out.flac");
        let data = body(20_000);

        tee(
            std::io::Cursor::new(data.clone()),
            &final_path,
            Some(Secondary {
                cache: cache.clone(),
                song_id: 55,
                quality: Quality::Lossless,
                container: Container::Flac,
            }),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(final_path.exists());
        assert!(cache_dir.path().join("55-4.flac").exists());
        let cached = tokio::fs::read(cache_dir.path().join("55-4.flac")).await.unwrap();
        assert_eq!(cached, data);
    }

    struct FlakyReader {
        data: Vec<u8>,
        pos: usize,
        fail_after: usize,
    }

    impl AsyncRead for FlakyReader {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            let this = self.get_mut();
            if this.pos >= this.fail_after {
                return std::task::Poll::Ready(Err(std::io::Error::other("simulated failure")));
            }
            let remaining = (this.fail_after - this.pos).min(buf.remaining());
            let end = this.pos + remaining.min(this.data.len() - this.pos);
            buf.put_slice(&this.data[this.pos..end]);
            this.pos = end;
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn copy_failure_leaves_no_final_or_temp_file() {
        let dir = tempdir().unwrap();
        let final_path = dir.path().join("out.mp3");
        let data = body(1_000_000);
        let reader = FlakyReader {
            data,
            pos: 0,
            fail_after: 500_000,
        };

        let result = tee(reader, &final_path, None, CancellationToken::new()).await;
        assert!(result.is_err());
        assert!(!final_path.exists());

        let mut read_dir = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(read_dir.next_entry().await.unwrap().is_none());
    }

    struct PendingForever;

    impl AsyncRead for PendingForever {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Pending
        }
    }

    #[tokio::test]
    async fn cancellation_leaves_no_final_or_temp_file() {
        let dir = tempdir().unwrap();
        let final_path = dir.path().join("out.mp3");
        let cancellation = CancellationToken::new();

        let handle = {
            let cancellation = cancellation.clone();
            tokio::spawn(async move { tee(PendingForever, &final_path, None, cancellation).await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancellation.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(CoreError::Cancelled)));
        assert!(!dir.path().join("out.mp3").exists());

        let mut read_dir = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(read_dir.next_entry().await.unwrap().is_none());
    }
}
