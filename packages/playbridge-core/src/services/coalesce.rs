//! In-flight operation coalescing.
//!
//! A second identical call made while the first is still running joins the
//! first call's future instead of starting its own.

use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::error::PlaybackResult;

type SharedOp<T> = Shared<BoxFuture<'static, PlaybackResult<T>>>;

/// Deduplicates concurrent operations by key.
pub(crate) struct Coalescer<K, T>
where
    K: Eq + Hash,
    T: Clone,
{
    in_flight: DashMap<K, (u64, SharedOp<T>)>,
    next_id: AtomicU64,
}

impl<K, T> Coalescer<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Runs the future built by `make`, or joins the one already running
    /// under `key`. `make` is only called when nothing is in flight.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> PlaybackResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PlaybackResult<T>> + Send + 'static,
    {
        let (id, op) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                log::debug!("[Coalesce] Joining in-flight {:?}", key);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let op = make().boxed().shared();
                entry.insert((id, op.clone()));
                (id, op)
            }
        };

        let result = op.await;
        // Only the entry this call joined is removed; a later call may have
        // already replaced it.
        self.in_flight.remove_if(&key, |_, (entry_id, _)| *entry_id == id);
        result
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}
