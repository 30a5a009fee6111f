use std::io;
use std::path::Path;

use super::CopyFile;

/// Zero-sized type — delegates to `tokio::fs`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemFs;

impl CopyFile for SystemFs {
    #[inline]
    async fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        tokio::fs::copy(from, to).await
    }
}
