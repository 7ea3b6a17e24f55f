//! Content-addressed image storage on the local filesystem.
//!
//! An upload is streamed into a file named by a random UUID while its MD5
//! digest is computed, then renamed to the hex digest. Identical content
//! therefore always lands in the same file. There is no reference counting:
//! deleting a key removes the bytes for every note that points at it.

use std::io;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use md5::{Digest, Md5};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ServerError;

/// Resolve `key` to a file directly under `base`.
///
/// Only a single plain path component is accepted, which rules out
/// traversal (`..`), absolute paths and nested directories.
fn ensure_within(base: &Path, key: &str) -> Result<PathBuf, ServerError> {
    let invalid = || ServerError::BadRequest(format!("Invalid blob key: {key:?}"));

    if key.contains('\\') {
        return Err(invalid());
    }

    let mut components = Path::new(key).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => Ok(base.join(name)),
        _ => Err(invalid()),
    }
}

fn storage_error(action: &str, path: &Path, err: io::Error) -> ServerError {
    ServerError::BlobStorage(format!(
        "Failed to {} '{}': {}",
        action,
        path.display(),
        err
    ))
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    base_path: PathBuf,
}

impl BlobStore {
    pub async fn new(base_path: PathBuf) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path)
            .await
            .map_err(|e| storage_error("create blob directory", &base_path, e))?;

        info!(path = %base_path.display(), "Blob store initialized");

        Ok(Self { base_path })
    }

    /// Store the bytes produced by `stream` and return their content key.
    ///
    /// On failure the temporary file is removed on a best-effort basis; the
    /// final key is never left holding partial content.
    pub async fn put<S>(&self, stream: S) -> Result<String, ServerError>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let temp_path = self.base_path.join(Uuid::new_v4().to_string());

        match self.write_and_finalize(stream, &temp_path).await {
            Ok((key, size)) => {
                debug!(key = %key, size, "Stored blob");
                Ok(key)
            }
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(e)
            }
        }
    }

    async fn write_and_finalize<S>(
        &self,
        stream: S,
        temp_path: &Path,
    ) -> Result<(String, u64), ServerError>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        futures::pin_mut!(stream);

        let mut file = File::create(temp_path)
            .await
            .map_err(|e| storage_error("create", temp_path, e))?;
        let mut hasher = Md5::new();
        let mut size = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| ServerError::BlobStorage(format!("Failed to read upload: {}", e)))?;
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| storage_error("write", temp_path, e))?;
            size += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| storage_error("flush", temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| storage_error("sync", temp_path, e))?;
        drop(file);

        let key = hex::encode(hasher.finalize());
        let final_path = self.base_path.join(&key);

        if let Err(e) = fs::rename(temp_path, &final_path).await {
            // The name is the digest, so an existing file already holds
            // exactly these bytes.
            if fs::try_exists(&final_path).await.unwrap_or(false) {
                let _ = fs::remove_file(temp_path).await;
                debug!(key = %key, "Blob already present");
            } else {
                return Err(storage_error("rename", temp_path, e));
            }
        }

        Ok((key, size))
    }

    /// Open a stored blob for reading. A single trailing `/` on the key is
    /// ignored.
    pub async fn open(&self, key: &str) -> Result<File, ServerError> {
        let key = key.strip_suffix('/').unwrap_or(key);
        let path = ensure_within(&self.base_path, key)?;

        File::open(&path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ServerError::BlobNotFound(key.to_string()),
            _ => storage_error("open", &path, e),
        })
    }

    /// Read a whole blob into memory.
    #[cfg(test)]
    pub async fn read(&self, key: &str) -> Result<Vec<u8>, ServerError> {
        use tokio::io::AsyncReadExt;

        let mut file = self.open(key).await?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .await
            .map_err(|e| ServerError::BlobStorage(format!("Failed to read blob {}: {}", key, e)))?;
        Ok(data)
    }

    /// Remove a stored blob. A missing key is reported as a storage error.
    pub async fn delete(&self, key: &str) -> Result<(), ServerError> {
        let path = ensure_within(&self.base_path, key)?;

        fs::remove_file(&path)
            .await
            .map_err(|e| storage_error("delete", &path, e))?;

        debug!(key = %key, "Deleted blob");
        Ok(())
    }
}
