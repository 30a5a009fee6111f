//! Zero-cost abstractions over `std` and `tokio::fs` for the adaptation proxy.
//!
//! | Concern | Trait(s) | Production | Test |
//! |---------|----------|------------|------|
//! | Env vars | [`ReadEnv`] | [`SystemEnv`] | [`InMemoryEnv`]* |
//! | Filesystem | [`CopyFile`] | [`SystemFs`] | [`MemFs`]* |
//!
//! *Available with `#[cfg(test)]` or the `"test-support"` feature.
//!
//! [`InMemoryEnv`] is `RefCell`-backed and therefore not `Sync`; it is meant
//! for synchronous config parsing. [`MemFs`] is `Mutex`-backed so it can be
//! shared with stagers that run inside `#[tokio::test]`.

pub mod env;
pub mod fs;

pub use env::{ReadEnv, SystemEnv};
pub use fs::{CopyFile, SystemFs};
