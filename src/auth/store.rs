//! Persistence for sealed credential envelopes.
//!
//! Stores only ever see ciphertext; sealing happens in
//! [`CredentialCipher`](super::crypto::CredentialCipher).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::{Result, TillitError};

/// Key-value storage of sealed credentials, keyed by shop.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, shop: &str) -> Result<Option<Vec<u8>>>;
    async fn save(&self, shop: &str, sealed: &[u8]) -> Result<()>;
    async fn remove(&self, shop: &str) -> Result<()>;
}

/// Process-local store; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, shop: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(shop).cloned())
    }

    async fn save(&self, shop: &str, sealed: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(shop.to_string(), sealed.to_vec());
        Ok(())
    }

    async fn remove(&self, shop: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(shop);
        Ok(())
    }
}

/// One file per shop under a directory, written via tmp + rename.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<data dir>/tillit/credentials`, if the platform has a data dir.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("tillit").join("credentials"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the envelope for `shop`. Anything outside `[a-z0-9.-]` maps
    /// to `_`, so a shop name can never escape the directory.
    pub fn path_for(&self, shop: &str) -> PathBuf {
        let mut name: String = shop
            .to_ascii_lowercase()
            .chars()
            .map(|c| match c {
                'a'..='z' | '0'..='9' | '-' | '.' => c,
                _ => '_',
            })
            .collect();
        if name.is_empty() || name.starts_with('.') {
            name.insert(0, '_');
        }
        self.dir.join(format!("{name}.cred"))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, shop: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(shop);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TillitError::Storage(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn save(&self, shop: &str, sealed: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            TillitError::Storage(format!(
                "failed to create credential dir {}: {e}",
                self.dir.display()
            ))
        })?;

        let path = self.path_for(shop);
        let tmp_path = path.with_extension("cred.tmp");
        // A leftover tmp file may carry looser permissions; start clean.
        match tokio::fs::remove_file(&tmp_path).await {
            Ok(()) => debug!(path = %tmp_path.display(), "removed stale temp file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(TillitError::Storage(format!(
                    "failed to remove stale {}: {e}",
                    tmp_path.display()
                )));
            }
        }

        // Owner-only from the moment the file exists.
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);
        let write_err = |e: std::io::Error| {
            TillitError::Storage(format!("failed to write {}: {e}", tmp_path.display()))
        };
        let mut file = options.open(&tmp_path).await.map_err(write_err)?;
        file.write_all(sealed).await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);

        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
            TillitError::Storage(format!(
                "failed to rename {} → {}: {e}",
                tmp_path.display(),
                path.display()
            ))
        })?;

        debug!(path = %path.display(), "saved credentials");
        Ok(())
    }

    async fn remove(&self, shop: &str) -> Result<()> {
        let path = self.path_for(shop);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TillitError::Storage(format!(
                "failed to remove {}: {e}",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_is_sanitized() {
        let store = FileCredentialStore::new("/tmp/creds");
        assert_eq!(
            store.path_for("Shop.Example.com"),
            PathBuf::from("/tmp/creds/shop.example.com.cred")
        );
        assert_eq!(
            store.path_for("../../etc/passwd"),
            PathBuf::from("/tmp/creds/_.._.._etc_passwd.cred")
        );
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryCredentialStore::new();
        assert!(store.load("a").await.unwrap().is_none());
        store.save("a", b"sealed").await.unwrap();
        assert_eq!(store.load("a").await.unwrap().unwrap(), b"sealed");
        store.remove("a").await.unwrap();
        assert!(store.load("a").await.unwrap().is_none());
    }
}
