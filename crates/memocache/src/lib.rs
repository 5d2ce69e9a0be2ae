//! # memocache
//!
//! Bounded, concurrency-safe memoizing cache with LRU eviction.
//!
//! ## Architecture
//! - **Entry table**: AHash map over an index-linked LRU list (O(1) lookup,
//!   refresh and eviction)
//! - **Single-flight**: concurrent misses for the same key run the compute
//!   function exactly once; everyone gets the one result
//! - **Locking**: one parking_lot mutex over the table and in-flight
//!   markers, held only for bookkeeping; compute functions run unlocked
//!
//! ## Example
//! ```
//! use memocache::MemoCache;
//!
//! let cache: MemoCache<String, usize> = MemoCache::with_capacity(1000);
//!
//! let len = cache.get_or_insert_with("hello".to_string(), |k| k.len());
//! assert_eq!(len, 5);
//! assert_eq!(cache.len(), 1);
//! ```

#![warn(missing_docs)]

mod cache;
mod error;
mod lru;
mod stats;

pub use cache::MemoCache;
pub use error::{ComputeError, Error, Result};
pub use stats::CacheStats;
