//! Storage backends for inputs and outputs.
//!
//! A location is given as a URI: a local path (optionally `file://`),
//! `gs://bucket/prefix`, `s3://bucket/prefix` or `http(s)://host/prefix`.
//! Keys handed to [`Storage`] are relative to that location.

use std::{ops::Range, path::PathBuf, sync::Arc};

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{
    aws::AmazonS3Builder, gcp::GoogleCloudStorageBuilder, http::HttpBuilder,
    local::LocalFileSystem, path::Path, MultipartId, ObjectStore,
};
use tokio::io::AsyncWrite;
use tracing::{debug, instrument, warn};

use crate::error::{PipelineError, PipelineResult};

/// Public ERA5 buckets are readable without credentials through this endpoint.
const GCS_PUBLIC_ENDPOINT: &str = "https://storage.googleapis.com";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    Local(PathBuf),
    Gcs { bucket: String, prefix: String },
    S3 { bucket: String, prefix: String },
    Http { origin: String, prefix: String },
}

impl Location {
    fn parse(uri: &str) -> PipelineResult<Self> {
        let uri = uri.trim_end_matches('/');

        let Some((scheme, rest)) = uri.split_once("://") else {
            return Ok(Location::Local(PathBuf::from(uri)));
        };

        let (host, prefix) = match rest.split_once('/') {
            Some((host, prefix)) => (host.to_string(), prefix.to_string()),
            None => (rest.to_string(), String::new()),
        };

        match scheme {
            "file" => Ok(Location::Local(PathBuf::from(rest))),
            _ if host.is_empty() => Err(PipelineError::fetch(uri, "missing bucket or host")),
            "gs" => Ok(Location::Gcs {
                bucket: host,
                prefix,
            }),
            "s3" => Ok(Location::S3 {
                bucket: host,
                prefix,
            }),
            "http" | "https" => Ok(Location::Http {
                origin: format!("{}://{}", scheme, host),
                prefix,
            }),
            other => Err(PipelineError::fetch(
                uri,
                format!("unsupported scheme `{}`", other),
            )),
        }
    }
}

/// An object store rooted at a URI.
#[derive(Debug, Clone)]
pub struct Storage {
    store: Arc<dyn ObjectStore>,
    root: String,
    base: Path,
    local_dir: Option<PathBuf>,
}

impl Storage {
    /// Opens `uri` for reading. Google Cloud Storage is read anonymously.
    pub fn for_reading(uri: &str) -> PipelineResult<Self> {
        let location = Location::parse(uri)?;
        let fail = |e: object_store::Error| PipelineError::fetch(uri, e);

        let (store, base, local_dir): (Arc<dyn ObjectStore>, String, Option<PathBuf>) =
            match location {
                Location::Local(dir) => (
                    Arc::new(LocalFileSystem::new_with_prefix(&dir).map_err(fail)?),
                    String::new(),
                    Some(dir),
                ),
                Location::Gcs { bucket, prefix } => (
                    Arc::new(
                        HttpBuilder::new()
                            .with_url(format!("{}/{}", GCS_PUBLIC_ENDPOINT, bucket))
                            .build()
                            .map_err(fail)?,
                    ),
                    prefix,
                    None,
                ),
                Location::S3 { bucket, prefix } => (
                    Arc::new(
                        AmazonS3Builder::from_env()
                            .with_bucket_name(bucket)
                            .build()
                            .map_err(fail)?,
                    ),
                    prefix,
                    None,
                ),
                Location::Http { origin, prefix } => (
                    Arc::new(HttpBuilder::new().with_url(origin).build().map_err(fail)?),
                    prefix,
                    None,
                ),
            };

        Ok(Self::new(store, uri, &base, local_dir))
    }

    /// Opens `uri` for writing, creating the directory for local outputs.
    pub fn for_writing(uri: &str) -> PipelineResult<Self> {
        let location = Location::parse(uri)?;
        let fail = |e: object_store::Error| PipelineError::write(uri, e);

        let (store, base, local_dir): (Arc<dyn ObjectStore>, String, Option<PathBuf>) =
            match location {
                Location::Local(dir) => {
                    std::fs::create_dir_all(&dir).map_err(|e| PipelineError::write(uri, e))?;
                    (
                        Arc::new(LocalFileSystem::new_with_prefix(&dir).map_err(fail)?),
                        String::new(),
                        Some(dir),
                    )
                }
                Location::Gcs { bucket, prefix } => (
                    Arc::new(
                        GoogleCloudStorageBuilder::from_env()
                            .with_bucket_name(bucket)
                            .build()
                            .map_err(fail)?,
                    ),
                    prefix,
                    None,
                ),
                Location::S3 { bucket, prefix } => (
                    Arc::new(
                        AmazonS3Builder::from_env()
                            .with_bucket_name(bucket)
                            .build()
                            .map_err(fail)?,
                    ),
                    prefix,
                    None,
                ),
                Location::Http { .. } => {
                    return Err(PipelineError::write(uri, "HTTP locations are read-only"))
                }
            };

        Ok(Self::new(store, uri, &base, local_dir))
    }

    /// Wraps an existing store, e.g. an in-memory one.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        root: &str,
        base: &str,
        local_dir: Option<PathBuf>,
    ) -> Self {
        Storage {
            store,
            root: root.trim_end_matches('/').to_string(),
            base: Path::from(base),
            local_dir,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Directory backing a local store.
    pub fn local_dir(&self) -> Option<&PathBuf> {
        self.local_dir.as_ref()
    }

    /// Full URI of a key, for messages.
    pub fn display(&self, key: &str) -> String {
        format!("{}/{}", self.root, key.trim_start_matches('/'))
    }

    /// Converts a full URI under this root into a relative key.
    pub fn key_for(&self, uri: &str) -> PipelineResult<String> {
        uri.strip_prefix(&self.root)
            .map(|rest| rest.trim_start_matches('/').to_string())
            .ok_or_else(|| {
                PipelineError::fetch(uri, format!("path is outside of `{}`", self.root))
            })
    }

    fn path(&self, key: &str) -> Path {
        if self.base.as_ref().is_empty() {
            Path::from(key)
        } else {
            Path::from(format!("{}/{}", self.base, key))
        }
    }

    /// Reads a whole object.
    #[instrument(skip(self), fields(root = %self.root))]
    pub async fn read(&self, key: &str) -> PipelineResult<Bytes> {
        let location = self.path(key);

        let result = self.store.get(&location).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => PipelineError::Missing(self.display(key)),
            e => PipelineError::fetch(self.display(key), e),
        })?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| PipelineError::fetch(self.display(key), e))?;

        debug!(size = bytes.len(), "Read object");
        Ok(bytes)
    }

    /// Reads `range` bytes of an object.
    pub async fn read_range(&self, key: &str, range: Range<usize>) -> PipelineResult<Bytes> {
        self.store
            .get_range(&self.path(key), range)
            .await
            .map_err(|e| match e {
                object_store::Error::NotFound { .. } => PipelineError::Missing(self.display(key)),
                e => PipelineError::fetch(self.display(key), e),
            })
    }

    /// Size of an object in bytes.
    pub async fn size(&self, key: &str) -> PipelineResult<usize> {
        match self.store.head(&self.path(key)).await {
            Ok(meta) => Ok(meta.size),
            Err(object_store::Error::NotFound { .. }) => Err(PipelineError::Missing(self.display(key))),
            Err(e) => Err(PipelineError::fetch(self.display(key), e)),
        }
    }

    pub async fn exists(&self, key: &str) -> PipelineResult<bool> {
        match self.store.head(&self.path(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(PipelineError::fetch(self.display(key), e)),
        }
    }

    #[instrument(skip(self, data), fields(root = %self.root))]
    pub async fn write(&self, key: &str, data: Bytes) -> PipelineResult<()> {
        debug!(size = data.len(), "Writing object");

        self.store
            .put(&self.path(key), data.into())
            .await
            .map_err(|e| PipelineError::write(self.display(key), e))?;

        Ok(())
    }

    /// Starts a multipart upload. The object appears once the returned
    /// writer is shut down.
    pub async fn upload(
        &self,
        key: &str,
    ) -> PipelineResult<(MultipartId, Box<dyn AsyncWrite + Unpin + Send>)> {
        self.store
            .put_multipart(&self.path(key))
            .await
            .map_err(|e| PipelineError::write(self.display(key), e))
    }

    pub async fn abort_upload(&self, key: &str, id: &MultipartId) {
        if let Err(e) = self.store.abort_multipart(&self.path(key), id).await {
            warn!(key = %self.display(key), error = %e, "Failed to abort upload");
        }
    }

    /// Lists keys below `prefix`, relative to the root.
    pub async fn list(&self, prefix: &str) -> PipelineResult<Vec<String>> {
        let prefix_path = self.path(prefix);

        let metas: Vec<_> = self
            .store
            .list(Some(&prefix_path))
            .try_collect()
            .await
            .map_err(|e| PipelineError::write(self.display(prefix), e))?;

        let mut keys: Vec<String> = metas
            .into_iter()
            .filter_map(|meta| {
                meta.location
                    .prefix_match(&self.base)
                    .map(|parts| parts.map(|p| p.as_ref().to_string()).collect::<Vec<_>>().join("/"))
            })
            .collect();
        keys.sort();

        Ok(keys)
    }

    pub async fn rename(&self, from: &str, to: &str) -> PipelineResult<()> {
        self.store
            .rename(&self.path(from), &self.path(to))
            .await
            .map_err(|e| PipelineError::write(self.display(to), e))
    }

    pub async fn delete(&self, key: &str) -> PipelineResult<()> {
        match self.store.delete(&self.path(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(PipelineError::write(self.display(key), e)),
        }
    }
}

// -- Tests -------------------------------------------------------------------
