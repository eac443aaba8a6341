//! Offline caching worker: versioned cache generations, runtime-switchable
//! cache-first or network-first retrieval, and batch prefetch with progress
//! reporting, hosted behind an HTTP surface.

pub mod config;
pub mod error;
pub mod infra;
pub mod worker;
