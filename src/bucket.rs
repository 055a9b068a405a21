//! A single hash partition: the unit of locking granularity for the whole map.
//!
//! Grounded on `Table`'s per-slot `RwLock<Bucket<K, V>>` in the teacher crate's
//! linear-probing design, generalized so that each partition owns a small map
//! of its own rather than a single slot, and extended with the `initialized`/
//! `frozen` flags the lazy-migration protocol needs.

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

/// Outcome of a write attempt against a bucket.
pub(crate) enum StoreResult {
    /// The bucket was frozen; the caller must re-read the head and retry.
    Frozen,
    /// `check_absent` was set and the key was already present; no write happened.
    Skipped,
    /// The write was committed. `inserted` distinguishes a fresh key from an
    /// overwrite; `bucket_len` is this bucket's size immediately after the
    /// write, for the overflow-growth trigger.
    Committed { inserted: bool, bucket_len: usize },
}

/// Outcome of a delete attempt against a bucket.
pub(crate) enum DeleteResult<V> {
    /// The bucket was frozen; the caller must re-read the head and retry.
    Frozen,
    /// The delete was committed. `Some` carries the removed value out; `None`
    /// means the key was already absent (idempotent, nothing decremented).
    Committed(Option<V>),
}

pub(crate) struct Bucket<K, V, S> {
    /// Set once, with release ordering, after this bucket's share of any
    /// predecessor node has been pulled in. Readers use an acquire load as
    /// the fast path before ever touching the lock.
    initialized: AtomicBool,
    /// Set once, under the write lock, when this bucket becomes an old
    /// bucket mid-migration. Never cleared.
    frozen: AtomicBool,
    entries: RwLock<HashMap<K, V, S>>,
}

impl<K, V, S: Clone> Bucket<K, V, S> {
    pub(crate) fn new(hash_builder: S) -> Self {
        Bucket {
            initialized: AtomicBool::new(false),
            frozen: AtomicBool::new(false),
            entries: RwLock::new(HashMap::with_hasher(hash_builder)),
        }
    }
}

impl<K, V, S> Bucket<K, V, S> {
    #[inline]
    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Begin lazily initializing this bucket. Returns `None` (doing nothing)
    /// if another thread already finished initializing it, under a
    /// double-checked lock: one lock-free peek, then a second check under
    /// the write lock for whichever thread actually wins the race to it.
    ///
    /// The returned guard must eventually be handed to [`finish_init`] —
    /// holding it across the whole pull keeps a second caller blocked on the
    /// same bucket rather than racing a second migration of the same data.
    pub(crate) fn begin_init(&self) -> Option<RwLockWriteGuard<'_, HashMap<K, V, S>>>
    where
        S: BuildHasher,
    {
        if self.initialized.load(Ordering::Acquire) {
            return None;
        }
        let guard = self.entries.write();
        if self.initialized.load(Ordering::Acquire) {
            None
        } else {
            Some(guard)
        }
    }

    /// Commit the entries pulled from the predecessor node and mark this
    /// bucket initialized. `initialized` is stored *before* the write guard
    /// is dropped, so a thread blocked in [`begin_init`] on the same lock
    /// always observes the new state as soon as it acquires the lock —
    /// otherwise a second caller could slip in between the unlock and the
    /// store and re-run the migration pull for this bucket.
    pub(crate) fn finish_init(
        &self,
        mut guard: RwLockWriteGuard<'_, HashMap<K, V, S>>,
        entries: impl IntoIterator<Item = (K, V)>,
    ) where
        K: Eq + Hash,
        S: BuildHasher,
    {
        guard.extend(entries);
        self.initialized.store(true, Ordering::Release);
        drop(guard);
    }

    /// Look up a key, cloning its value out from under the read lock.
    pub(crate) fn try_load<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q> + Eq + Hash,
        Q: Eq + Hash + ?Sized,
        V: Clone,
        S: BuildHasher,
    {
        self.entries.read().get(key).cloned()
    }

    /// Snapshot every entry, cloning both key and value, for `Range` to
    /// iterate outside the lock.
    pub(crate) fn snapshot(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        let guard: RwLockReadGuard<'_, HashMap<K, V, S>> = self.entries.read();
        guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub(crate) fn try_store(&self, check_absent: bool, key: K, value: V) -> StoreResult
    where
        K: Eq + Hash,
        S: BuildHasher,
    {
        let mut guard = self.entries.write();
        if self.frozen.load(Ordering::Acquire) {
            return StoreResult::Frozen;
        }
        if check_absent && guard.contains_key(&key) {
            return StoreResult::Skipped;
        }
        let before = guard.len();
        guard.insert(key, value);
        let bucket_len = guard.len();
        StoreResult::Committed {
            inserted: bucket_len > before,
            bucket_len,
        }
    }

    pub(crate) fn try_delete<Q>(&self, key: &Q) -> DeleteResult<V>
    where
        K: Borrow<Q> + Eq + Hash,
        Q: Eq + Hash + ?Sized,
        S: BuildHasher,
    {
        let mut guard = self.entries.write();
        if self.frozen.load(Ordering::Acquire) {
            return DeleteResult::Frozen;
        }
        DeleteResult::Committed(guard.remove(key))
    }

    /// Freeze the bucket and hand the whole map to `f` under the write lock,
    /// exactly once. A second caller (the growth case's sibling bucket, or
    /// any racer) observes the swap already tripped and gets `None` back
    /// without re-running `f` — by the time it can acquire the lock, the
    /// first caller's `f` has already run and released it, so whatever `f`
    /// stashed for the second caller is already visible.
    pub(crate) fn freeze_with<R>(&self, f: impl FnOnce(&mut HashMap<K, V, S>) -> R) -> Option<R> {
        let mut guard = self.entries.write();
        if self.frozen.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(f(&mut guard))
        }
    }

    pub(crate) fn retain(&self, f: &mut impl FnMut(&K, &V) -> bool) -> usize {
        let mut guard = self.entries.write();
        let before = guard.len();
        guard.retain(|k, v| f(k, v));
        before - guard.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}
