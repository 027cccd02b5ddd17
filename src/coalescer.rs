//! Request coalescing (spec.md §3 "Pending work key", §9 singleflight
//! note).
//!
//! `dashmap` is the concurrent-map idiom `yeipills-Open-Music` reaches for
//! in exactly this situation (`cache/lru_cache.rs`, `bot/mod.rs`: a keyed
//! map mutated from many concurrent async tasks). `futures::future::
//! Shared` is the async analogue of Go's singleflight that spec.md §9
//! explicitly asks for: "a map from key to a completion-future shared
//! reference; on completion the entry is removed."

use std::future::Future;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::error::{CoreError, CoreResult};

type SharedResult<V> = Result<V, Arc<CoreError>>;
type InFlight<V> = Shared<BoxFuture<'static, SharedResult<V>>>;

/// Deduplicates concurrent calls keyed by an arbitrary `String` (the
/// `"{operation}-{song_id}"` keys of spec.md §3). The first caller for a
/// key runs the computation; followers observe its result exactly once.
pub struct Coalescer<V: Clone + Send + Sync + 'static> {
    in_flight: DashMap<String, InFlight<V>>,
}

impl<V: Clone + Send + Sync + 'static> Default for Coalescer<V> {
    fn default() -> Self {
        Self {
            in_flight: DashMap::new(),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Coalescer<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make_future()` under `key`, sharing the result with any other
    /// caller that arrives for the same key while it's in flight.
    pub async fn run<F>(&self, key: impl Into<String>, make_future: F) -> CoreResult<V>
    where
        F: Future<Output = CoreResult<V>> + Send + 'static,
    {
        let key = key.into();

        // `existing` is dropped (releasing the shard guard) before we
        // potentially call `entry()` on the same shard below.
        let existing = self.in_flight.get(&key).map(|r| r.clone());

        // `is_leader` is true only when this call is the one that actually
        // inserted the in-flight entry, as opposed to one that joined an
        // entry another caller (or a racing caller, see below) inserted.
        // Only the leader may remove the entry on completion — a follower
        // that finished awaiting doesn't know whether a *later* caller has
        // since replaced the entry under the same key, so an unconditional
        // removal could delete a fresh leader's entry out from under it.
        let (shared, is_leader) = match existing {
            Some(existing) => (existing, false),
            None => {
                // Map CoreError -> Arc<CoreError> so the Shared future's
                // output is Clone, a requirement of `Shared`.
                let boxed: BoxFuture<'static, SharedResult<V>> =
                    async move { make_future.await.map_err(Arc::new) }.boxed();
                let shared = boxed.shared();
                // `entry` rather than `insert` avoids clobbering a racing
                // leader that won between our `get` miss and here; matching
                // on it directly (rather than `or_insert_with`) tells us
                // whether our future or the racing winner's was the one
                // actually stored.
                match self.in_flight.entry(key.clone()) {
                    Entry::Occupied(occupied) => (occupied.get().clone(), false),
                    Entry::Vacant(vacant) => {
                        vacant.insert(shared.clone());
                        (shared, true)
                    }
                }
            }
        };

        let result = shared.await;
        // Only the leader removes the entry; a new caller arriving after
        // removal starts a fresh computation, exactly as spec.md §9
        // describes.
        if is_leader {
            self.in_flight.remove(&key);
        }
        result.map_err(|arc| arc_to_owned(&arc))
    }
}

/// `CoreError` doesn't implement `Clone` (it wraps `std::io::Error`), so
/// followers reconstruct an owned error from the shared `Arc` by message
/// rather than cloning the original variant structurally.
fn arc_to_owned(err: &Arc<CoreError>) -> CoreError {
    match err.as_ref() {
        CoreError::NotFound => CoreError::NotFound,
        CoreError::AlreadyExists { path } => CoreError::AlreadyExists { path: path.clone() },
        CoreError::RemoteRefused(s) => CoreError::RemoteRefused(s.clone()),
        CoreError::RemoteTransport(s) => CoreError::RemoteTransport(s.clone()),
        CoreError::Io(e) => CoreError::Io(std::io::Error::new(e.kind(), e.to_string())),
        CoreError::Parse(s) => CoreError::Parse(s.clone()),
        CoreError::InvalidInput(s) => CoreError::InvalidInput(s.clone()),
        CoreError::Cancelled => CoreError::Cancelled,
    }
}
