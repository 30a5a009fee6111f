#[cfg(any(test, feature = "test-support"))]
use std::collections::HashMap;
#[cfg(any(test, feature = "test-support"))]
use std::io;
#[cfg(any(test, feature = "test-support"))]
use std::path::{Path, PathBuf};
#[cfg(any(test, feature = "test-support"))]
use std::sync::{Arc, Mutex};

#[cfg(any(test, feature = "test-support"))]
use super::CopyFile;

/// In-memory filesystem. Paths are raw [`PathBuf`] keys with no normalization.
///
/// Clones share the same backing map, so a test can hand one clone to the
/// code under test and inspect the other.
#[cfg(any(test, feature = "test-support"))]
#[derive(Clone, Default)]
pub struct MemFs {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
}

#[cfg(any(test, feature = "test-support"))]
impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .unwrap()
            .insert(path.as_ref().to_path_buf(), content.into());
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path.as_ref()).cloned()
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.files.lock().unwrap().contains_key(path.as_ref())
    }

    pub fn len(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().unwrap().is_empty()
    }
}

#[cfg(any(test, feature = "test-support"))]
impl CopyFile for MemFs {
    async fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        let mut files = self.files.lock().unwrap();
        let bytes = files
            .get(from)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "file not found"))?;
        let len = bytes.len() as u64;
        files.insert(to.to_path_buf(), bytes);
        Ok(len)
    }
}
