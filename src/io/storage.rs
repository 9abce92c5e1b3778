//! Storage backends for source prefetch and artifact upload.
//!
//! Everything above this module speaks in keys relative to a root URI; the
//! backends translate. Remote access goes through `object_store` behind a
//! blocking facade over a private tokio runtime, so the rest of the
//! pipeline stays synchronous.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as StorePath;
use object_store::ObjectStore;
use tracing::debug;

use crate::error::{Error, Result};

pub trait Storage: Send + Sync {
    fn download(&self, key: &str, dest: &Path) -> Result<()>;
    fn upload(&self, src: &Path, key: &str) -> Result<()>;
    fn exists(&self, key: &str) -> Result<bool>;
    /// Keys under a prefix, relative to the storage root.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Split a remote URI into (scheme, bucket, key). `None` for local paths.
pub fn split_remote(uri: &str) -> Option<(&str, &str, &str)> {
    for scheme in ["s3", "gs"] {
        if let Some(rest) = uri.strip_prefix(&format!("{}://", scheme)) {
            let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
            return Some((scheme, bucket, key));
        }
    }
    None
}

/// Build the backend for a root URI: `s3://` and `gs://` go remote, a
/// `file://` URI or plain path goes local.
pub fn from_uri(root: &str) -> Result<Box<dyn Storage>> {
    match split_remote(root) {
        Some((scheme, bucket, prefix)) => Ok(Box::new(ObjectStorage::connect(
            scheme, bucket, prefix,
        )?)),
        None => {
            let path = root.strip_prefix("file://").unwrap_or(root);
            Ok(Box::new(LocalStorage::new(PathBuf::from(path))))
        }
    }
}

/// Fetch an arbitrary source URI to a local file. Local paths are copied so
/// that downstream code always owns its input.
pub fn fetch(uri: &str, dest: &Path) -> Result<()> {
    match split_remote(uri) {
        Some((scheme, bucket, key)) => {
            ObjectStorage::connect(scheme, bucket, "")?.download(key, dest)
        }
        None => {
            let src = uri.strip_prefix("file://").unwrap_or(uri);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(src, dest)?;
            Ok(())
        }
    }
}

pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: PathBuf) -> LocalStorage {
        LocalStorage { root }
    }

    fn walk(&self, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.walk(&path, out)?;
            } else if let Ok(rel) = path.strip_prefix(&self.root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(())
    }
}

impl Storage for LocalStorage {
    fn download(&self, key: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(self.root.join(key), dest)?;
        Ok(())
    }

    fn upload(&self, src: &Path, key: &str) -> Result<()> {
        let dest = self.root.join(key);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(src, &dest)?;
        debug!("stored {:?}", dest);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.root.join(key).exists())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.root.join(prefix);
        let mut out = Vec::new();
        if dir.is_dir() {
            self.walk(&dir, &mut out)?;
        }
        Ok(out)
    }
}

pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    runtime: tokio::runtime::Runtime,
}

impl ObjectStorage {
    pub fn connect(scheme: &str, bucket: &str, prefix: &str) -> Result<ObjectStorage> {
        let store: Arc<dyn ObjectStore> = match scheme {
            "s3" => Arc::new(
                AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .build()
                    .map_err(|e| Error::storage(format!("s3 bucket {}: {}", bucket, e)))?,
            ),
            "gs" => Arc::new(
                GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(bucket)
                    .build()
                    .map_err(|e| Error::storage(format!("gcs bucket {}: {}", bucket, e)))?,
            ),
            other => {
                return Err(Error::storage(format!("unsupported scheme {}://", other)));
            }
        };
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        Ok(ObjectStorage {
            store,
            prefix: prefix.trim_matches('/').to_string(),
            runtime,
        })
    }

    fn full_key(&self, key: &str) -> StorePath {
        if self.prefix.is_empty() {
            StorePath::from(key)
        } else {
            StorePath::from(format!("{}/{}", self.prefix, key.trim_start_matches('/')))
        }
    }
}

impl Storage for ObjectStorage {
    fn download(&self, key: &str, dest: &Path) -> Result<()> {
        let location = self.full_key(key);
        let bytes = self
            .runtime
            .block_on(async {
                let result = self.store.get(&location).await?;
                result.bytes().await
            })
            .map_err(|e| Error::storage(format!("get {}: {}", location, e)))?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, &bytes)?;
        Ok(())
    }

    fn upload(&self, src: &Path, key: &str) -> Result<()> {
        let location = self.full_key(key);
        let bytes = Bytes::from(std::fs::read(src)?);
        self.runtime
            .block_on(self.store.put(&location, bytes))
            .map_err(|e| Error::storage(format!("put {}: {}", location, e)))?;
        debug!("uploaded {}", location);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let location = self.full_key(key);
        match self.runtime.block_on(self.store.head(&location)) {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(Error::storage(format!("head {}: {}", location, e))),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let location = self.full_key(prefix);
        let objects = self
            .runtime
            .block_on(self.store.list(Some(&location)).try_collect::<Vec<_>>())
            .map_err(|e| Error::storage(format!("list {}: {}", location, e)))?;
        let root = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        };
        Ok(objects
            .into_iter()
            .map(|meta| {
                let full = meta.location.to_string();
                full.strip_prefix(&root).map(String::from).unwrap_or(full)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_remote_uris() {
        assert_eq!(
            split_remote("s3://bucket/a/b.tif"),
            Some(("s3", "bucket", "a/b.tif"))
        );
        assert_eq!(split_remote("gs://b/k"), Some(("gs", "b", "k")));
        assert_eq!(split_remote("s3://only-bucket"), Some(("s3", "only-bucket", "")));
        assert_eq!(split_remote("/data/file.tif"), None);
        assert_eq!(split_remote("file:///data/file.tif"), None);
    }

    #[test]
    fn local_storage_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(root.path().to_path_buf());

        let scratch = tempfile::tempdir().unwrap();
        let src = scratch.path().join("tile.tif");
        std::fs::write(&src, b"raster bytes").unwrap();

        let key = "ds/v1/raster/epsg-4326/10/40000/geotiff/00N_000E.tif";
        assert!(!storage.exists(key).unwrap());
        storage.upload(&src, key).unwrap();
        assert!(storage.exists(key).unwrap());

        let listed = storage.list("ds/v1").unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].ends_with("00N_000E.tif"));

        let dest = scratch.path().join("back.tif");
        storage.download(key, &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"raster bytes");
    }

    #[test]
    fn fetch_copies_local_paths() {
        let scratch = tempfile::tempdir().unwrap();
        let src = scratch.path().join("source.tif");
        std::fs::write(&src, b"data").unwrap();

        let dest = scratch.path().join("nested/copy.tif");
        fetch(src.to_str().unwrap(), &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"data");
    }
}
