//! Resize triggers and the node hand-off protocol.
//!
//! Grounded on `CHashMap::reserve`/`shrink_to_fit` in the teacher crate: both
//! install a freshly sized table under a write lock after checking a load
//! condition. The lazy variant here installs the new node up front (so no
//! caller pays for a full copy) and drains the predecessor on a background
//! thread, with every bucket able to pull its own share early if it gets
//! touched first.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::node::{Node, MAX_SHIFT, MIN_SHIFT};

/// Grow if either the whole map or the single bucket just written to looks
/// overloaded. Mirrors the teacher's `extra_len` headroom check, generalized
/// to per-bucket granularity since buckets, not slots, are this crate's unit
/// of locking.
pub(crate) fn maybe_grow<K, V, S>(
    head: &RwLock<Arc<Node<K, V, S>>>,
    node: &Arc<Node<K, V, S>>,
    count: &AtomicI64,
    hash_builder: &S,
    bucket_len: usize,
) where
    K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: std::hash::BuildHasher + Clone + Send + Sync + 'static,
{
    let shift = node.shift;
    if shift >= MAX_SHIFT {
        return;
    }

    let current_count = count.load(Ordering::Acquire).max(0) as u64;
    let over_total = current_count >= 1u64 << (2 * shift);
    let over_bucket = bucket_len > (1usize << (shift + 1));

    if over_total || over_bucket {
        grow_work(head, node, hash_builder, shift + 1);
    }
}

/// Shrink if the map has drained well below what the current bucket count
/// warrants. Never shrinks past `MIN_SHIFT`.
pub(crate) fn maybe_shrink<K, V, S>(
    head: &RwLock<Arc<Node<K, V, S>>>,
    node: &Arc<Node<K, V, S>>,
    count: &AtomicI64,
    hash_builder: &S,
) where
    K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: std::hash::BuildHasher + Clone + Send + Sync + 'static,
{
    let shift = node.shift;
    if shift <= MIN_SHIFT + 1 {
        return;
    }

    let current_count = count.load(Ordering::Acquire).max(0) as u64;
    if current_count < 1u64 << (shift - 1) {
        grow_work(head, node, hash_builder, shift - 1);
    }
}

/// Install a replacement node of `new_shift` buckets, wired to `node` as its
/// predecessor, and hand the predecessor off to a background worker that
/// drains it bucket by bucket. Only the thread that wins `node.begin_resize`
/// does any of this; everyone else's trigger check is a no-op.
fn grow_work<K, V, S>(
    head: &RwLock<Arc<Node<K, V, S>>>,
    node: &Arc<Node<K, V, S>>,
    hash_builder: &S,
    new_shift: u32,
) where
    K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: std::hash::BuildHasher + Clone + Send + Sync + 'static,
{
    if node.growing() {
        return;
    }
    if !node.begin_resize() {
        return;
    }

    let new_node = Arc::new(Node::succeeding(new_shift, hash_builder.clone(), Arc::clone(node)));

    {
        let mut guard = head.write();
        if !Arc::ptr_eq(&guard, node) {
            log::error!(
                "migration: head changed out from under the resize winner (shift {} -> {})",
                node.shift,
                new_shift
            );
            panic!("cmap: head pointer invariant violated during resize");
        }
        *guard = Arc::clone(&new_node);
    }

    log::info!(
        "cmap: resizing {} -> {} buckets ({} -> {})",
        node.bucket_count(),
        new_node.bucket_count(),
        node.shift,
        new_shift
    );

    let worker = Arc::clone(&new_node);
    std::thread::spawn(move || {
        worker.init_all();
        log::debug!("cmap: background migration into {}-bucket node finished", worker.bucket_count());
    });
}
