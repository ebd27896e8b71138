//! Application Services
//!
//! - `StateCache`: owns the latest-value table and decides when to flush
//!   snapshots and publish updates through the `StateStore` port.

/// Rate-limited latest-value cache.
pub mod state_cache;
