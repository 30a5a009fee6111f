//! Async filesystem operations used to move artifacts in and out of the proxy.
//!
//! ```ignore
//! use adaptation_std::fs::{CopyFile, MemFs};
//! use std::path::Path;
//!
//! let fs = MemFs::new();
//! fs.insert("/in/report.pdf", b"%PDF".to_vec());
//! fs.copy(Path::new("/in/report.pdf"), Path::new("/var/source/abc")).await?;
//! assert_eq!(fs.contents("/var/source/abc").unwrap(), b"%PDF");
//! ```

mod copy_file;
mod mem;
mod system;

pub use copy_file::CopyFile;
#[cfg(any(test, feature = "test-support"))]
pub use mem::MemFs;
pub use system::SystemFs;
