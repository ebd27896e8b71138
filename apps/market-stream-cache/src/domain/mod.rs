//! Domain Layer - Canonical records and declarative field mapping.
//!
//! Everything here is pure data transformation: no sockets, no clocks
//! other than the ones handed in, no stores.

/// Fixed-interval gates shared by flush and heartbeat scheduling.
pub mod cadence;

/// Declarative mapping tables and the schema mapper.
pub mod mapping;

/// Canonical records and field values.
pub mod record;

/// Latest-value table keyed by channel then market.
pub mod state;

/// Market alias translation.
pub mod translator;
