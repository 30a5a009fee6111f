use std::future::Future;
use std::io;
use std::path::Path;

/// Copy a whole file, replacing the destination if it exists.
///
/// Returns the number of bytes copied.
pub trait CopyFile: Send + Sync {
    fn copy(&self, from: &Path, to: &Path) -> impl Future<Output = io::Result<u64>> + Send;
}
