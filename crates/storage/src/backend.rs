//! Key-value backends for artifact documents

use crate::{StorageError, StorageResult};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Artifact document storage
///
/// Keys are `/`-separated relative paths such as `"<video_id>/captions.json"`.
/// `put` must be atomic: a reader sees either the previous document or the
/// complete new one, never a partial write.
#[async_trait::async_trait]
pub trait ArtifactBackend: Send + Sync {
    /// Store a document, replacing any previous version
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Retrieve a document, `None` if absent
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Delete a document (absent keys are not an error)
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Check whether a document exists
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// List document names directly under `prefix`
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Filesystem backend: write to a temp file, then rename into place
#[derive(Debug, Clone)]
pub struct LocalArtifactBackend {
    root: PathBuf,
}

impl LocalArtifactBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let well_formed = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !well_formed {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn is_temp_name(name: &str) -> bool {
        name.starts_with('.') && name.contains(".tmp-")
    }
}

#[async_trait::async_trait]
impl ArtifactBackend for LocalArtifactBackend {
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.resolve(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;
        tokio::fs::create_dir_all(parent).await?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;
        let temp_path = parent.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

        let write = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&temp_path, &path).await
        };

        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!("Committed {} ({} bytes)", key, data.len());
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let dir = self.resolve(prefix.trim_end_matches('/'))?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !Self::is_temp_name(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalArtifactBackend::new(dir.path());

        assert!(backend.get("v1/doc.json").await.unwrap().is_none());
        backend.put("v1/doc.json", b"{\"a\":1}").await.unwrap();
        assert_eq!(
            backend.get("v1/doc.json").await.unwrap().unwrap(),
            b"{\"a\":1}"
        );
        assert!(backend.exists("v1/doc.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_overwrites_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalArtifactBackend::new(dir.path());

        backend.put("v1/doc.json", b"first").await.unwrap();
        backend.put("v1/doc.json", b"second").await.unwrap();

        assert_eq!(backend.get("v1/doc.json").await.unwrap().unwrap(), b"second");
        let on_disk: Vec<_> = std::fs::read_dir(dir.path().join("v1"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(on_disk, vec!["doc.json".to_string()]);
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalArtifactBackend::new(dir.path());

        for key in ["../outside.json", "/etc/passwd", "", "v1/../../x"] {
            assert!(
                matches!(backend.put(key, b"x").await, Err(StorageError::InvalidKey(_))),
                "key {key:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalArtifactBackend::new(dir.path());

        backend.put("v1/b.json", b"b").await.unwrap();
        backend.put("v1/a.json", b"a").await.unwrap();
        assert_eq!(backend.list("v1/").await.unwrap(), vec!["a.json", "b.json"]);

        backend.delete("v1/a.json").await.unwrap();
        backend.delete("v1/a.json").await.unwrap();
        assert_eq!(backend.list("v1").await.unwrap(), vec!["b.json"]);
        assert!(backend.list("missing").await.unwrap().is_empty());
    }
}
