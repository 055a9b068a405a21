//! A concurrent, dynamically-resizable hash map.
//!
//! [`Map`] shards its entries across many independently-locked buckets and
//! resizes its bucket array automatically under load, migrating entries
//! lazily: a bucket's share of a resize is only paid for by whichever
//! operation first touches that bucket afterward, rather than up front by
//! whichever thread triggered the resize.
//!
//! ```
//! use cmap::Map;
//!
//! let map = Map::new();
//! map.store("a", 1);
//! map.store("b", 2);
//! assert_eq!(map.load(&"a"), Some(1));
//! assert_eq!(map.load_and_delete(&"a"), (Some(1), true));
//! assert_eq!(map.len(), 1);
//! ```

mod bucket;
mod map;
mod migration;
mod node;

pub use map::{IntoIter, Map};

#[cfg(test)]
mod tests;
