use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{StreamExt, stream};
use parking_lot::RwLock;
use url::Url;
use vrd_core::ArtifactKey;
use vrd_engine::{
    ArtifactFetcher, ArtifactStorage, ByteStream, FetchError, StorageError, StoredArtifact,
    artifact_file_name,
};

const CHUNK_SIZE: usize = 64 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Fetcher
// ─────────────────────────────────────────────────────────────────────────────

/// Serves artifact bytes from memory.
///
/// Unknown URLs answer `NotAvailable`; URLs marked with [`fail`](Self::fail)
/// answer an HTTP error.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    blobs: RwLock<HashMap<Url, Bytes>>,
    failing: RwLock<HashSet<Url>>,
    delay: RwLock<Option<Duration>>,
    fetches: AtomicUsize,
}

impl MemoryFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: Url, bytes: impl Into<Bytes>) {
        self.blobs.write().insert(url, bytes.into());
    }

    /// Serve `size` zero bytes at `url`.
    pub fn serve_size(&self, url: Url, size: u64) {
        let len = usize::try_from(size).expect("test artifact fits in memory");
        self.serve(url, vec![0_u8; len]);
    }

    pub fn fail(&self, url: Url) {
        self.failing.write().insert(url);
    }

    pub fn recover(&self, url: &Url) {
        self.failing.write().remove(url);
    }

    /// Hold every fetch for `delay` before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write() = delay;
    }

    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactFetcher for MemoryFetcher {
    async fn fetch(&self, url: &Url) -> Result<ByteStream, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.read().contains(url) {
            return Err(FetchError::Http(format!("injected failure for {url}")));
        }
        let blob = self
            .blobs
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotAvailable(url.to_string()))?;

        let chunks: Vec<Result<Bytes, FetchError>> = blob
            .chunks(CHUNK_SIZE)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────────────────────────────────────

/// Artifact storage held in memory under a virtual root.
#[derive(Debug)]
pub struct MemoryStorage {
    root: PathBuf,
    files: RwLock<HashMap<PathBuf, Bytes>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new("/memory/redundancy")
    }
}

impl MemoryStorage {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.files.read().contains_key(path)
    }

    #[must_use]
    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.files.read().values().map(|b| b.len() as u64).sum()
    }

    #[must_use]
    pub fn path_for(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(artifact_file_name(key))
    }
}

#[async_trait]
impl ArtifactStorage for MemoryStorage {
    async fn store(
        &self,
        key: &ArtifactKey,
        mut stream: ByteStream,
    ) -> Result<StoredArtifact, StorageError> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }

        let path = self.path_for(key);
        let size_bytes = buffer.len() as u64;
        self.files.write().insert(path.clone(), buffer.freeze());
        Ok(StoredArtifact {
            local_path: path,
            size_bytes,
        })
    }

    async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        self.files.write().remove(path);
        Ok(())
    }
}
