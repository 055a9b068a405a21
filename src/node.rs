//! A single generation of the bucket array.
//!
//! Grounded on `Table<K, V>` in the teacher crate, generalized from a flat
//! probe sequence to an array of independently-locked [`Bucket`]s, plus the
//! `old`/`resizing` machinery the lazy migration protocol needs. Where the
//! teacher's `Table::fill` copies a whole predecessor table eagerly under one
//! write lock, this rewrite defers that copy bucket-by-bucket and lets
//! [`crate::migration`] decide when a whole node's worth of copying has
//! finished. The predecessor back-pointer and the map's head pointer both use
//! `parking_lot::RwLock` rather than a lock-free swap type, mirroring the
//! teacher's own `RwLock<Table<K, V>>`-guarded whole-table swap in
//! `CHashMap::reserve`/`shrink_to_fit`.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bucket::Bucket;

/// `B` never goes below this. Matches the source's initial/floor bucket-count
/// shift.
pub(crate) const MIN_SHIFT: u32 = 4;
/// `B` never grows past this — the overflow trigger on an adversarial hash
/// distribution would otherwise grow forever.
pub(crate) const MAX_SHIFT: u32 = 16;

pub(crate) struct Node<K, V, S> {
    pub(crate) shift: u32,
    pub(crate) mask: usize,
    buckets: Box<[Bucket<K, V, S>]>,
    /// The predecessor node, while this one is mid-migration. Cleared once
    /// every bucket has pulled its share.
    old: RwLock<Option<Arc<Node<K, V, S>>>>,
    /// Single-writer gate into [`crate::migration::grow_work`]; CAS'd from
    /// `false` to `true` by whichever thread wins the right to install the
    /// next node, and reset to `false` once [`Node::init_all`] finishes
    /// draining this node's own predecessor, so this node can itself become
    /// a migration source for a later resize.
    resizing: AtomicBool,
    /// Growth-case leftovers: when a new bucket drains a shared old bucket,
    /// the half that belongs to its sibling is parked here, keyed by the old
    /// bucket's index, for the sibling to pick up. Only ever touched during
    /// migration into *this* node.
    stash: Mutex<HashMap<usize, Vec<(K, V)>>>,
    hash_builder: S,
}

impl<K, V, S: Clone> Node<K, V, S> {
    pub(crate) fn new(shift: u32, hash_builder: S) -> Self {
        let len = 1usize << shift;
        let buckets = (0..len)
            .map(|_| Bucket::new(hash_builder.clone()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Node {
            shift,
            mask: len - 1,
            buckets,
            old: RwLock::new(None),
            resizing: AtomicBool::new(false),
            stash: Mutex::new(HashMap::new()),
            hash_builder,
        }
    }

    /// Build the replacement node for a resize: same as `new`, but already
    /// wired to its predecessor and marked as migrating.
    pub(crate) fn succeeding(shift: u32, hash_builder: S, old: Arc<Node<K, V, S>>) -> Self {
        let node = Self::new(shift, hash_builder);
        *node.old.write() = Some(old);
        node.resizing.store(true, Ordering::Release);
        node
    }
}

impl<K, V, S> Node<K, V, S> {
    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn hash<Q: Hash + ?Sized>(&self, key: &Q) -> usize
    where
        S: BuildHasher,
    {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        hasher.finish() as usize
    }

    #[inline]
    pub(crate) fn bucket_index(&self, hash: usize) -> usize {
        hash & self.mask
    }

    pub(crate) fn bucket_at(&self, index: usize) -> &Bucket<K, V, S> {
        &self.buckets[index]
    }

    pub(crate) fn growing(&self) -> bool {
        self.old.read().is_some()
    }

    /// Try to become the thread that installs the next node. Only one
    /// caller per node ever gets `true`.
    pub(crate) fn begin_resize(&self) -> bool {
        self.resizing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Resolve the bucket for `hash`, lazily pulling its share of the
    /// predecessor node in first.
    pub(crate) fn get_bucket(&self, hash: usize) -> &Bucket<K, V, S>
    where
        K: Eq + Hash + Clone,
        S: BuildHasher + Clone,
    {
        let index = self.bucket_index(hash);
        self.init_bucket(index);
        &self.buckets[index]
    }

    /// Force every bucket in this node through [`init_bucket`], then clear
    /// the predecessor link. Safe to call concurrently with ordinary
    /// operations pulling the same buckets in: `init_bucket` is idempotent
    /// per bucket.
    pub(crate) fn init_all(&self)
    where
        K: Eq + Hash + Clone,
        S: BuildHasher + Clone,
    {
        for index in 0..self.buckets.len() {
            self.init_bucket(index);
        }
        *self.old.write() = None;
        self.resizing.store(false, Ordering::Release);
    }

    fn init_bucket(&self, index: usize)
    where
        K: Eq + Hash + Clone,
        S: BuildHasher + Clone,
    {
        let bucket = &self.buckets[index];
        let guard = match bucket.begin_init() {
            Some(guard) => guard,
            None => return,
        };

        let old = self.old.read();
        let entries = match old.as_ref() {
            Some(old_node) if self.shift > old_node.shift => self.pull_growth(index, old_node),
            Some(old_node) if self.shift < old_node.shift => self.pull_shrink(index, old_node),
            Some(_) => Vec::new(), // equal shift never happens per the ±1 invariant
            None => Vec::new(),
        };
        drop(old);

        bucket.finish_init(guard, entries);
    }

    /// Growth: this node has one more bit of shift than `old`. Every new
    /// bucket maps back to exactly one old bucket, shared with exactly one
    /// sibling (the new index with that extra bit flipped). Whichever
    /// sibling gets there first drains and splits the old bucket under its
    /// write lock and parks the other half in `self.stash`; the second
    /// sibling just collects its half from the stash.
    fn pull_growth(&self, index: usize, old_node: &Node<K, V, S>) -> Vec<(K, V)>
    where
        K: Eq + Hash + Clone,
        S: BuildHasher,
    {
        let old_index = index & old_node.mask;
        let new_mask = self.mask;

        let split = old_node.bucket_at(old_index).freeze_with(|map| {
            let mut mine = Vec::new();
            let mut theirs = Vec::new();
            for (k, v) in map.drain() {
                if self.hash(&k) & new_mask == index {
                    mine.push((k, v));
                } else {
                    theirs.push((k, v));
                }
            }
            if !theirs.is_empty() {
                self.stash.lock().insert(old_index, theirs);
            }
            mine
        });

        match split {
            Some(mine) => mine,
            None => self.stash.lock().remove(&old_index).unwrap_or_default(),
        }
    }

    /// Shrink: this node has one fewer bit of shift than `old`. Each new
    /// bucket owns exactly two old buckets outright (no sharing across
    /// different new buckets), so both are drained in full.
    fn pull_shrink(&self, index: usize, old_node: &Node<K, V, S>) -> Vec<(K, V)> {
        let sibling = index + (1 << self.shift);
        let mut entries = Vec::new();
        for idx in [index, sibling] {
            if let Some(drained) = old_node
                .bucket_at(idx)
                .freeze_with(|map| map.drain().collect::<Vec<_>>())
            {
                entries.extend(drained);
            }
        }
        entries
    }

    pub(crate) fn for_each_bucket<'a>(&'a self) -> impl Iterator<Item = &'a Bucket<K, V, S>> {
        self.buckets.iter()
    }
}
