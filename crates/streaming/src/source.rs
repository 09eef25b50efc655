//! # Byte Retrieval Seam
//!
//! The pipeline never fetches bytes itself; the host editor supplies a
//! `ByteProvider`. Failures surface as per-asset `StreamError::Fetch`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::StreamError;

/// Asynchronous byte retrieval for asset locators relative to a project
/// root.
#[async_trait]
pub trait ByteProvider: Send + Sync {
    async fn get_asset_bytes(
        &self,
        project_root: &Path,
        relative_path: &str,
    ) -> Result<Vec<u8>, StreamError>;
}

/// Reads assets straight off the local filesystem.
#[derive(Debug, Default)]
pub struct FsByteProvider;

#[async_trait]
impl ByteProvider for FsByteProvider {
    async fn get_asset_bytes(
        &self,
        project_root: &Path,
        relative_path: &str,
    ) -> Result<Vec<u8>, StreamError> {
        let path: PathBuf = project_root.join(relative_path);
        tokio::fs::read(&path).await.map_err(|e| StreamError::Fetch {
            locator: relative_path.to_string(),
            reason: e.to_string(),
        })
    }
}

/// In-memory provider for tests and headless tooling: scriptable
/// per-locator failures and artificial latency.
#[derive(Default)]
pub struct MemoryByteProvider {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    failures: RwLock<HashMap<String, String>>,
    latency: RwLock<Option<Duration>>,
    fetches: RwLock<HashMap<String, usize>>,
}

impl MemoryByteProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, locator: impl Into<String>, bytes: Vec<u8>) {
        self.entries.write().insert(locator.into(), bytes);
    }

    /// Make fetches of `locator` fail with `reason`.
    pub fn fail(&self, locator: impl Into<String>, reason: impl Into<String>) {
        self.failures.write().insert(locator.into(), reason.into());
    }

    /// Delay every fetch by `latency`. Used to exercise timeouts and the
    /// concurrency bound.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = Some(latency);
    }

    /// How many times `locator` has been fetched, successfully or not.
    pub fn fetch_count(&self, locator: &str) -> usize {
        self.fetches.read().get(locator).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ByteProvider for MemoryByteProvider {
    async fn get_asset_bytes(
        &self,
        _project_root: &Path,
        relative_path: &str,
    ) -> Result<Vec<u8>, StreamError> {
        *self.fetches.write().entry(relative_path.to_string()).or_insert(0) += 1;
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(reason) = self.failures.read().get(relative_path) {
            return Err(StreamError::Fetch {
                locator: relative_path.to_string(),
                reason: reason.clone(),
            });
        }
        self.entries
            .read()
            .get(relative_path)
            .cloned()
            .ok_or_else(|| StreamError::Fetch {
                locator: relative_path.to_string(),
                reason: "not found".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_provider_reads_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("textures")).unwrap();
        std::fs::write(dir.path().join("textures/wall.png"), b"pixels").unwrap();

        let provider = FsByteProvider;
        let bytes = provider
            .get_asset_bytes(dir.path(), "textures/wall.png")
            .await
            .unwrap();
        assert_eq!(bytes, b"pixels");

        let err = provider
            .get_asset_bytes(dir.path(), "textures/missing.png")
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Fetch { .. }));
    }

    #[tokio::test]
    async fn memory_provider_scripted_failure() {
        let provider = MemoryByteProvider::new();
        provider.insert("ok.png", vec![1, 2, 3]);
        provider.fail("bad.png", "network down");

        assert_eq!(
            provider.get_asset_bytes(Path::new("/"), "ok.png").await.unwrap(),
            vec![1, 2, 3]
        );
        let err = provider.get_asset_bytes(Path::new("/"), "bad.png").await.unwrap_err();
        assert!(err.to_string().contains("network down"));
    }
}
