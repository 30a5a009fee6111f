//! Environment variable access.
//!
//! ```
//! use adaptation_std::env::{ReadEnv, SystemEnv};
//!
//! fn prefix<E: ReadEnv>(env: &E) -> String {
//!     env.var("ADAPTATION_PREFIX")
//!         .unwrap_or_else(|_| "adaptation".to_string())
//! }
//!
//! let _ = prefix(&SystemEnv);
//! ```

mod in_memory;
mod read_env;
mod system;

#[cfg(any(test, feature = "test-support"))]
pub use in_memory::InMemoryEnv;
pub use read_env::ReadEnv;
pub use system::SystemEnv;
