#![forbid(unsafe_code)]
//! VTFS public API facade.
//!
//! Re-exports the engine from `vtfs-core` through a stable external
//! interface. This is the crate host adapters and the harness depend on.

pub use vtfs_core::*;
