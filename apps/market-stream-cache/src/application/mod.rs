//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the state cache service and the port interfaces
//! that connect the streaming pipeline to exchanges and stores.

/// Port interfaces for exchange adapters, transports and state stores.
pub mod ports;

/// Application services (the rate-limited state cache).
pub mod services;
