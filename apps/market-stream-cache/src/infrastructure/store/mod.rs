//! State Store Adapters
//!
//! - [`redis::RedisStore`]: production store (`SET .. EX`, `PUBLISH`).
//! - [`memory::InMemoryStore`]: process-local store for dry runs and tests,
//!   selected with `REDIS_URL=memory://`.

pub mod memory;
pub mod redis;

/// URL scheme that selects the in-memory store.
pub const MEMORY_SCHEME: &str = "memory://";

/// Whether `url` selects the in-memory store.
#[must_use]
pub fn is_memory_url(url: &str) -> bool {
    url.trim().starts_with(MEMORY_SCHEME)
}
