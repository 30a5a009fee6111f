//! File stagers: the local filesystem pairing and the JetStream object-store pairing.

use std::io;
use std::path::{Path, PathBuf};

use adaptation_std::CopyFile;
use async_nats::jetstream::{self, object_store};
use tracing::{debug, info};

use crate::identity::RequestIdentity;
use crate::traits::FileStager;

/// Where the service reads the input and where it should write its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedInput {
    pub source_location: String,
    pub rebuilt_location: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("failed to {operation} {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("object store error: {0}")]
    ObjectStore(String),
    #[error("result location '{0}' is outside the rebuilt bucket")]
    ForeignLocation(String),
}

/// Copies the input into `source_dir/{id}` and reads the result back from
/// whatever path the service reports.
#[derive(Debug, Clone)]
pub struct LocalFileStager<F> {
    fs: F,
    source_dir: PathBuf,
    target_dir: PathBuf,
}

impl<F: CopyFile> LocalFileStager<F> {
    pub fn new(fs: F, source_dir: impl Into<PathBuf>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            source_dir: source_dir.into(),
            target_dir: target_dir.into(),
        }
    }
}

impl<F: CopyFile> FileStager for LocalFileStager<F> {
    async fn stage_input(
        &self,
        identity: &RequestIdentity,
        source: &Path,
    ) -> Result<StagedInput, StagingError> {
        let staged = self.source_dir.join(identity.as_str());
        let bytes = self
            .fs
            .copy(source, &staged)
            .await
            .map_err(|source| StagingError::Io {
                operation: "stage input",
                path: staged.clone(),
                source,
            })?;
        debug!(file_id = %identity, bytes, path = %staged.display(), "Staged input");

        Ok(StagedInput {
            source_location: staged.display().to_string(),
            rebuilt_location: self.target_dir.join(identity.as_str()).display().to_string(),
        })
    }

    async fn materialize_output(
        &self,
        result_location: &str,
        destination: &Path,
    ) -> Result<(), StagingError> {
        let bytes = self
            .fs
            .copy(Path::new(result_location), destination)
            .await
            .map_err(|source| StagingError::Io {
                operation: "copy rebuilt file from",
                path: PathBuf::from(result_location),
                source,
            })?;
        info!(bytes, destination = %destination.display(), "Wrote rebuilt file");
        Ok(())
    }
}

/// Uploads the input to one JetStream object store bucket and downloads the
/// result from another. Locations are `{bucket}/{object}`.
pub struct ObjectStoreStager {
    original: object_store::ObjectStore,
    original_bucket: String,
    rebuilt: object_store::ObjectStore,
    rebuilt_bucket: String,
}

impl ObjectStoreStager {
    /// Opens both buckets, creating them if needed.
    pub async fn open(
        jetstream: &jetstream::Context,
        original_bucket: &str,
        rebuilt_bucket: &str,
    ) -> Result<Self, StagingError> {
        Ok(Self {
            original: ensure_bucket(jetstream, original_bucket).await?,
            original_bucket: original_bucket.to_string(),
            rebuilt: ensure_bucket(jetstream, rebuilt_bucket).await?,
            rebuilt_bucket: rebuilt_bucket.to_string(),
        })
    }
}

async fn ensure_bucket(
    jetstream: &jetstream::Context,
    bucket: &str,
) -> Result<object_store::ObjectStore, StagingError> {
    if let Ok(store) = jetstream.get_object_store(bucket).await {
        return Ok(store);
    }
    jetstream
        .create_object_store(object_store::Config {
            bucket: bucket.to_string(),
            ..Default::default()
        })
        .await
        .map_err(|e| StagingError::ObjectStore(e.to_string()))
}

impl FileStager for ObjectStoreStager {
    async fn stage_input(
        &self,
        identity: &RequestIdentity,
        source: &Path,
    ) -> Result<StagedInput, StagingError> {
        let mut file = tokio::fs::File::open(source)
            .await
            .map_err(|source_err| StagingError::Io {
                operation: "open input",
                path: source.to_path_buf(),
                source: source_err,
            })?;
        let info = self
            .original
            .put(identity.as_str(), &mut file)
            .await
            .map_err(|e| StagingError::ObjectStore(e.to_string()))?;
        debug!(file_id = %identity, bytes = info.size, bucket = %self.original_bucket, "Uploaded input");

        Ok(StagedInput {
            source_location: format!("{}/{}", self.original_bucket, identity),
            rebuilt_location: format!("{}/{}", self.rebuilt_bucket, identity),
        })
    }

    async fn materialize_output(
        &self,
        result_location: &str,
        destination: &Path,
    ) -> Result<(), StagingError> {
        let object_name = object_name_in(&self.rebuilt_bucket, result_location)?;

        let mut object = self
            .rebuilt
            .get(object_name)
            .await
            .map_err(|e| StagingError::ObjectStore(e.to_string()))?;
        let bytes = write_replacing(&mut object, destination).await?;
        info!(bytes, destination = %destination.display(), "Wrote rebuilt file");
        Ok(())
    }
}

/// Splits `{bucket}/{name}` and rejects locations in any other bucket.
fn object_name_in<'a>(bucket: &str, location: &'a str) -> Result<&'a str, StagingError> {
    location
        .split_once('/')
        .filter(|(b, name)| *b == bucket && !name.is_empty())
        .map(|(_, name)| name)
        .ok_or_else(|| StagingError::ForeignLocation(location.to_string()))
}

/// Streams `reader` into a `.part` sibling and renames it over `destination`
/// once complete. A failed copy leaves `destination` untouched.
async fn write_replacing<R>(reader: &mut R, destination: &Path) -> Result<u64, StagingError>
where
    R: tokio::io::AsyncRead + Unpin + ?Sized,
{
    let mut partial = destination.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    let io_err = |source| StagingError::Io {
        operation: "write rebuilt file to",
        path: destination.to_path_buf(),
        source,
    };
    let copied = async {
        let mut out = tokio::fs::File::create(&partial).await?;
        let bytes = tokio::io::copy(reader, &mut out).await?;
        out.sync_all().await?;
        Ok::<_, io::Error>(bytes)
    }
    .await;

    let bytes = match copied {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(io_err(e));
        }
    };
    if let Err(e) = tokio::fs::rename(&partial, destination).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(io_err(e));
    }
    Ok(bytes)
}
