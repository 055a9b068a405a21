//! The public handle: [`Map`].
//!
//! Grounded on `CHashMap<K, V>` in the teacher crate for the overall shape of
//! the façade (a head pointer plus a population counter, with every
//! operation re-reading the head before touching a bucket), generalized to
//! return owned values rather than RAII guards and to trigger lazy rather
//! than eager resizes.

use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::bucket::{DeleteResult, StoreResult};
use crate::migration;
use crate::node::{Node, MIN_SHIFT};

/// A concurrent, dynamically-resizable hash map.
///
/// Reads, writes, and deletes on different keys generally proceed without
/// contending on the same lock: each key hashes to one of many independently
/// locked buckets. The map grows or shrinks its bucket count automatically
/// as entries are added or removed, migrating entries into the new bucket
/// array lazily — a bucket's share of the migration happens the first time
/// that bucket is touched after the resize, rather than all at once.
///
/// `Load`/`LoadAndDelete` return owned clones of stored values rather than
/// guards, so `K` and `V` must be [`Clone`].
pub struct Map<K, V, S = RandomState> {
    head: RwLock<Arc<Node<K, V, S>>>,
    count: AtomicI64,
    hash_builder: S,
}

fn shift_for_capacity(capacity: usize) -> u32 {
    let mut shift = MIN_SHIFT;
    while (1usize << shift) < capacity && shift < crate::node::MAX_SHIFT {
        shift += 1;
    }
    shift
}

impl<K, V> Map<K, V, RandomState> {
    /// Creates an empty map with the default hasher and initial capacity.
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }

    /// Creates an empty map with room for at least `capacity` entries before
    /// its first resize, using the default hasher.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, RandomState::new())
    }
}

impl<K, V, S> Map<K, V, S>
where
    S: BuildHasher + Clone,
{
    /// Creates an empty map with a custom hasher builder.
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(1 << MIN_SHIFT, hash_builder)
    }

    /// Creates an empty map with room for at least `capacity` entries before
    /// its first resize, using a custom hasher builder.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        let shift = shift_for_capacity(capacity);
        let node = Arc::new(Node::new(shift, hash_builder.clone()));
        Map {
            head: RwLock::new(node),
            count: AtomicI64::new(0),
            hash_builder,
        }
    }

    fn current(&self) -> Arc<Node<K, V, S>> {
        self.head.read().clone()
    }
}

impl<K, V, S> Map<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    /// Looks up `key`, returning a clone of its value if present.
    pub fn load<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let node = self.current();
        let hash = node.hash(key);
        node.get_bucket(hash).try_load(key)
    }

    /// Inserts `key` -> `value`, overwriting any existing value for `key`.
    pub fn store(&self, key: K, value: V) {
        loop {
            let node = self.current();
            let hash = node.hash(&key);
            let bucket = node.get_bucket(hash);
            match bucket.try_store(false, key.clone(), value.clone()) {
                StoreResult::Frozen => continue,
                StoreResult::Skipped => unreachable!("store never sets check_absent"),
                StoreResult::Committed { inserted, bucket_len } => {
                    if inserted {
                        self.count.fetch_add(1, Ordering::Release);
                    }
                    migration::maybe_grow(&self.head, &node, &self.count, &self.hash_builder, bucket_len);
                    return;
                }
            }
        }
    }

    /// Inserts `value` for `key` only if `key` is currently absent. Returns
    /// the value now associated with `key` together with `loaded`: `true`
    /// if `key` was already present (the returned value is the pre-existing
    /// one, `value` was discarded), `false` if this call inserted it.
    pub fn load_or_store(&self, key: K, value: V) -> (V, bool) {
        loop {
            let node = self.current();
            let hash = node.hash(&key);
            let bucket = node.get_bucket(hash);
            if let Some(existing) = bucket.try_load(&key) {
                return (existing, true);
            }
            match bucket.try_store(true, key.clone(), value.clone()) {
                StoreResult::Frozen => continue,
                StoreResult::Skipped => continue, // lost the race to another insert; re-check
                StoreResult::Committed { bucket_len, .. } => {
                    self.count.fetch_add(1, Ordering::Release);
                    migration::maybe_grow(&self.head, &node, &self.count, &self.hash_builder, bucket_len);
                    return (value, false);
                }
            }
        }
    }

    /// Removes `key`, if present. Equivalent to discarding the result of
    /// [`Map::load_and_delete`].
    pub fn delete<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.load_and_delete(key);
    }

    /// Removes `key`, if present, returning the value that was removed and
    /// whether the key had been present at all.
    pub fn load_and_delete<Q>(&self, key: &Q) -> (Option<V>, bool)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        loop {
            let node = self.current();
            let hash = node.hash(key);
            let bucket = node.get_bucket(hash);
            if bucket.try_load(key).is_none() {
                return (None, false);
            }
            match bucket.try_delete(key) {
                DeleteResult::Frozen => continue,
                DeleteResult::Committed(Some(removed)) => {
                    self.count.fetch_sub(1, Ordering::Release);
                    migration::maybe_shrink(&self.head, &node, &self.count, &self.hash_builder);
                    return (Some(removed), true);
                }
                DeleteResult::Committed(None) => continue, // raced with another deleter; re-check
            }
        }
    }

    /// Calls `f` for every entry currently reachable through the map's head
    /// node. Entries are snapshotted bucket by bucket, so concurrent writes
    /// during the traversal may or may not be observed, and no consistent
    /// point-in-time view is implied. Stops early if `f` returns `false`.
    pub fn range(&self, mut f: impl FnMut(&K, &V) -> bool) {
        let node = self.current();
        for bucket in node.for_each_bucket() {
            for (k, v) in bucket.snapshot() {
                if !f(&k, &v) {
                    return;
                }
            }
        }
    }

    /// The number of entries currently in the map. Approximate under
    /// concurrent mutation: reflects a population counter updated alongside
    /// (not atomically with) each insert/remove.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire).max(0) as usize
    }

    /// `true` if the map currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry for which `f` returns `false`.
    pub fn retain(&self, mut f: impl FnMut(&K, &V) -> bool) {
        let node = self.current();
        let mut removed_total = 0usize;
        for bucket in node.for_each_bucket() {
            removed_total += bucket.retain(&mut f);
        }
        if removed_total > 0 {
            self.count.fetch_sub(removed_total as i64, Ordering::Release);
        }
    }

    /// Removes every entry, shrinking back toward the map's minimum bucket
    /// count.
    pub fn clear(&self) {
        self.retain(|_, _| false);
        let node = self.current();
        if node.shift > MIN_SHIFT {
            migration::maybe_shrink(&self.head, &node, &self.count, &self.hash_builder);
        }
    }
}

impl<K, V, S> Default for Map<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> fmt::Debug for Map<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + fmt::Debug + 'static,
    V: Clone + Send + Sync + fmt::Debug + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_map();
        self.range(|k, v| {
            dbg.entry(k, v);
            true
        });
        dbg.finish()
    }
}

impl<K, V> FromIterator<(K, V)> for Map<K, V, RandomState>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let into_iter = iter.into_iter();
        let (lower, _) = into_iter.size_hint();
        let map = Map::with_capacity(lower.max(1 << MIN_SHIFT));
        for (k, v) in into_iter {
            map.store(k, v);
        }
        map
    }
}

/// Owned iterator over a [`Map`]'s entries, produced by [`IntoIterator::into_iter`].
///
/// Built from a single [`Map::range`] snapshot rather than draining the map's
/// buckets directly, so it inherits `range`'s "no consistent snapshot across
/// a concurrent resize" caveat.
pub struct IntoIter<K, V> {
    inner: std::vec::IntoIter<(K, V)>,
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V, S> IntoIterator for Map<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        let mut pairs = Vec::with_capacity(self.len());
        self.range(|k, v| {
            pairs.push((k.clone(), v.clone()));
            true
        });
        IntoIter {
            inner: pairs.into_iter(),
        }
    }
}
