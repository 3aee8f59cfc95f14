//! In-memory stale-while-revalidate cache.
//!
//! `EntityCache` hands callers whatever it already has for an entity (a
//! seed synthesized by the caller, or the last fetched copy) and then
//! reconciles it with a fresh fetch through the authenticated `ApiClient`.
//!
//! Entries have no TTL and are never evicted; the working set is bounded by
//! the number of entities a session looks at.

pub mod manager;

pub use manager::{CacheEntry, CachedEntity, EntityCache, InterviewCache};
