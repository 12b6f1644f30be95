//! Filesystem artifact storage and HTTP artifact fetching.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use tokio::io::AsyncWriteExt;
use url::Url;
use vrd_core::ArtifactKey;

use crate::collaborators::{
    ArtifactFetcher, ArtifactStorage, ByteStream, StoredArtifact, artifact_file_name,
};
use crate::error::{FetchError, StorageError};

/// Stores artifacts as files under one directory.
///
/// Bytes are written to a `.part` file first and renamed into place once the
/// stream is fully drained, so a broken download never leaves a file under
/// the final name.
#[derive(Debug, Clone)]
pub struct FsArtifactStorage {
    root: PathBuf,
}

impl FsArtifactStorage {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn write_stream(path: &Path, mut stream: ByteStream) -> Result<u64, StorageError> {
        let io_err = |source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::create(path).await.map_err(io_err)?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }
        file.sync_all().await.map_err(io_err)?;
        Ok(written)
    }
}

#[async_trait]
impl ArtifactStorage for FsArtifactStorage {
    async fn store(
        &self,
        key: &ArtifactKey,
        stream: ByteStream,
    ) -> Result<StoredArtifact, StorageError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StorageError::Io {
                path: self.root.clone(),
                source,
            })?;

        let final_path = self.root.join(artifact_file_name(key));
        let part_path = final_path.with_extension("part");

        let size_bytes = match Self::write_stream(&part_path, stream).await {
            Ok(size) => size,
            Err(err) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(err);
            }
        };

        tokio::fs::rename(&part_path, &final_path)
            .await
            .map_err(|source| StorageError::Io {
                path: final_path.clone(),
                source,
            })?;

        tracing::debug!(path = %final_path.display(), size_bytes, "Stored artifact");
        Ok(StoredArtifact {
            local_path: final_path,
            size_bytes,
        })
    }

    async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Fetches artifacts over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpArtifactFetcher {
    client: reqwest::Client,
}

impl HttpArtifactFetcher {
    /// Client with a connect timeout; transfers themselves are unbounded.
    ///
    /// # Errors
    /// Returns `FetchError::Http` if the TLS backend cannot be initialised.
    pub fn new(connect_timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("vrd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Http(e.to_string()))?;
        Ok(Self { client })
    }

    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch(&self, url: &Url) -> Result<ByteStream, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotAvailable(url.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        Ok(response
            .bytes_stream()
            .map_err(|e| FetchError::Http(e.to_string()))
            .boxed())
    }
}
