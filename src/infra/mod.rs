//! Infrastructure adapters and runtime bootstrap.

pub mod disk_cache;
pub mod error;
pub mod http;
pub mod network;
pub mod telemetry;
