//! Local filesystem storage
//!
//! Every write that must survive a crash goes through a temporary sibling
//! file that is synced and then linked into place, so a key is either
//! absent or complete. Linking never replaces an existing key: the first
//! writer to finish owns it.

use std::convert::Infallible;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use axum::body::Bytes;
use futures::{pin_mut, Stream, StreamExt};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::error::{AppError, Result};

/// Outcome of a write-once store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The payload now backs the key; carries the bytes written
    Stored(u64),
    /// Another writer stored the key first and its bytes were kept
    AlreadyExists,
}

/// Storage rooted at a local directory
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root directory if it does not exist yet
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a relative key to a path under the root.
    ///
    /// Keys made of anything other than plain components (`..`, absolute
    /// prefixes, `.`) are rejected.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let only_normal = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !only_normal {
            return Err(AppError::Internal(format!("Invalid storage key: {}", key)));
        }
        Ok(self.root.join(relative))
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    pub async fn create_dir(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        fs::create_dir_all(&path).await?;
        Ok(())
    }

    /// Stream `payload` into `key` atomically, refusing more than `max_bytes`.
    ///
    /// An existing key is never replaced, even when it appears while the
    /// payload is still streaming.
    pub async fn put_stream<S, E>(
        &self,
        key: &str,
        payload: S,
        max_bytes: usize,
    ) -> Result<PutOutcome>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        let target = self.resolve(key)?;
        let parent = target
            .parent()
            .ok_or_else(|| AppError::Internal(format!("Storage key has no parent: {}", key)))?
            .to_path_buf();
        fs::create_dir_all(&parent).await?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        let written = match write_synced(&temp, payload, max_bytes).await {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&temp).await;
                return Err(e);
            }
        };

        let linked = fs::hard_link(&temp, &target).await;
        if let Err(e) = fs::remove_file(&temp).await {
            warn!("Failed to remove temporary file {}: {}", temp.display(), e);
        }
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("Key {} already stored, discarding {} bytes", key, written);
                return Ok(PutOutcome::AlreadyExists);
            }
            Err(e) => return Err(e.into()),
        }
        sync_dir(&parent).await;

        debug!("Stored {} bytes at {}", written, key);
        Ok(PutOutcome::Stored(written))
    }

    /// Atomically write a small in-memory value unless `key` already exists.
    ///
    /// Returns `false` when an existing value was kept.
    pub async fn put_bytes(&self, key: &str, data: &[u8]) -> Result<bool> {
        let bytes = Bytes::copy_from_slice(data);
        let payload = futures::stream::once(async move { Ok::<_, Infallible>(bytes) });
        let outcome = self.put_stream(key, payload, usize::MAX).await?;
        Ok(outcome != PutOutcome::AlreadyExists)
    }

    /// Read a small value, `None` when the key is absent
    pub async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Open `key` for appending, creating it and its parents when needed
    pub async fn open_append(&self, key: &str) -> Result<File> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(file)
    }

    /// Stream the whole of `key` into `dest` without buffering it in memory
    pub async fn copy_into(&self, key: &str, dest: &mut File) -> Result<u64> {
        let path = self.resolve(key)?;
        let mut source = File::open(&path).await?;
        let copied = tokio::io::copy(&mut source, dest).await?;
        Ok(copied)
    }

    pub async fn size(&self, key: &str) -> Result<u64> {
        let path = self.resolve(key)?;
        Ok(fs::metadata(&path).await?.len())
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from_path = self.resolve(from)?;
        let to_path = self.resolve(to)?;
        fs::rename(&from_path, &to_path).await?;
        if let Some(parent) = to_path.parent() {
            sync_dir(parent).await;
        }
        Ok(())
    }

    /// Delete a single object. Returns `false` when it was already gone.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a directory and everything below it. Returns `false` when absent.
    pub async fn delete_dir(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        match fs::remove_dir_all(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Names of the entries directly under `key` (empty when absent)
    pub async fn list_dir(&self, key: &str) -> Result<Vec<String>> {
        let path = self.resolve(key)?;
        let mut dir = match fs::read_dir(&path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    /// Last modification time, `None` when the key is absent
    pub async fn modified(&self, key: &str) -> Result<Option<SystemTime>> {
        let path = self.resolve(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(Some(meta.modified()?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

async fn write_synced<S, E>(path: &Path, payload: S, max_bytes: usize) -> Result<u64>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: std::fmt::Display,
{
    pin_mut!(payload);
    let mut file = File::create(path).await?;
    let mut written: u64 = 0;

    while let Some(item) = payload.next().await {
        let bytes =
            item.map_err(|e| AppError::BadRequest(format!("Failed to read payload: {}", e)))?;
        written += bytes.len() as u64;
        if written > max_bytes as u64 {
            return Err(AppError::PayloadTooLarge(format!(
                "Payload exceeds maximum size of {} bytes",
                max_bytes
            )));
        }
        file.write_all(&bytes).await?;
    }

    file.sync_all().await?;
    Ok(written)
}

/// Persist directory entries (renames) where the platform supports it
async fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        let result = match File::open(dir).await {
            Ok(handle) => handle.sync_all().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Failed to sync directory {}: {}", dir.display(), e);
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage() -> (TempDir, LocalStorage) {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        (dir, storage)
    }

    fn chunks(
        parts: &[&'static [u8]],
    ) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> {
        let items: Vec<_> = parts
            .iter()
            .map(|p| Ok::<_, Infallible>(Bytes::from_static(p)))
            .collect();
        futures::stream::iter(items)
    }

    #[tokio::test]
    async fn test_put_stream_writes_and_leaves_no_temp_files() {
        let (dir, storage) = storage();
        let written = storage
            .put_stream("uploads/s1/0.chunk", chunks(&[b"Hello", b" World"]), 1024)
            .await
            .unwrap();

        assert_eq!(written, PutOutcome::Stored(11));
        let data = std::fs::read(dir.path().join("uploads/s1/0.chunk")).unwrap();
        assert_eq!(&data, b"Hello World");
        assert_eq!(
            storage.list_dir("uploads/s1").await.unwrap(),
            vec!["0.chunk"]
        );
    }

    #[tokio::test]
    async fn test_put_stream_keeps_existing_key() {
        let (_dir, storage) = storage();
        let first = storage.put_bytes("uploads/s1/0.chunk", b"first").await;
        assert!(first.unwrap());

        let outcome = storage
            .put_stream("uploads/s1/0.chunk", chunks(&[b"second!"]), 1024)
            .await
            .unwrap();

        assert_eq!(outcome, PutOutcome::AlreadyExists);
        assert_eq!(
            storage.read("uploads/s1/0.chunk").await.unwrap().unwrap(),
            b"first".to_vec()
        );
        assert_eq!(
            storage.list_dir("uploads/s1").await.unwrap(),
            vec!["0.chunk"]
        );
    }

    #[tokio::test]
    async fn test_put_stream_over_limit_leaves_nothing() {
        let (_dir, storage) = storage();
        let result = storage
            .put_stream("uploads/s1/0.chunk", chunks(&[b"12345", b"67890"]), 8)
            .await;

        assert!(matches!(result, Err(AppError::PayloadTooLarge(_))));
        assert!(!storage.exists("uploads/s1/0.chunk").await.unwrap());
        assert!(storage.list_dir("uploads/s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_traversal_keys_rejected() {
        let (_dir, storage) = storage();
        assert!(storage.exists("../escape").await.is_err());
        assert!(storage.put_bytes("/tmp/abs", b"x").await.is_err());
        assert!(storage.delete("uploads/../../x").await.is_err());
        assert!(storage.read("").await.is_err());
    }

    #[tokio::test]
    async fn test_append_copy_and_delete() {
        let (_dir, storage) = storage();
        storage
            .put_bytes("uploads/s1/0.chunk", b"abc")
            .await
            .unwrap();
        storage
            .put_bytes("uploads/s1/1.chunk", b"def")
            .await
            .unwrap();

        let mut out = storage.open_append("files/artifact.part").await.unwrap();
        assert_eq!(
            storage
                .copy_into("uploads/s1/0.chunk", &mut out)
                .await
                .unwrap(),
            3
        );
        assert_eq!(
            storage
                .copy_into("uploads/s1/1.chunk", &mut out)
                .await
                .unwrap(),
            3
        );
        out.sync_all().await.unwrap();
        drop(out);

        storage
            .rename("files/artifact.part", "files/artifact")
            .await
            .unwrap();
        assert_eq!(storage.size("files/artifact").await.unwrap(), 6);
        assert_eq!(
            storage.read("files/artifact").await.unwrap().unwrap(),
            b"abcdef".to_vec()
        );

        assert!(storage.delete("uploads/s1/0.chunk").await.unwrap());
        assert!(!storage.delete("uploads/s1/0.chunk").await.unwrap());
        assert!(storage.delete_dir("uploads/s1").await.unwrap());
        assert!(!storage.delete_dir("uploads/s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_keys() {
        let (_dir, storage) = storage();
        assert!(storage
            .read("uploads/none/session.json")
            .await
            .unwrap()
            .is_none());
        assert!(storage.modified("uploads/none").await.unwrap().is_none());
        assert!(storage.list_dir("uploads").await.unwrap().is_empty());
    }
}
