//! Per-video persistence of sources, frames and stage artifacts
//!
//! Layout under the store root:
//!
//! ```text
//! <video_id>/<video_id>.<ext>                 uploaded source
//! <video_id>/asset.json                       admitted VideoAsset
//! <video_id>/frames/<rate>ms/frame_0000.jpg   extracted frames
//! <video_id>/frames/<rate>ms/manifest.json    FrameSet
//! <video_id>/{detections,actions,captions}.json
//! ```
//!
//! Media (source and frames) always lives on the local filesystem because the
//! decoder needs paths. JSON documents go through the [`ArtifactBackend`].

use crate::backend::{ArtifactBackend, LocalArtifactBackend};
use crate::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info, warn};
use video_grounding_common::{FrameSet, StageKind, VideoAsset, VideoFormat};

/// Document name of the admitted asset record
pub const ASSET_DOCUMENT: &str = "asset.json";

const FRAMES_DIR: &str = "frames";
const FRAME_MANIFEST: &str = "manifest.json";

/// Owner of every locator in the pipeline
#[derive(Clone)]
pub struct AssetStore {
    root: PathBuf,
    backend: Arc<dyn ArtifactBackend>,
}

/// Frames being written for a not-yet-committed frame set
#[derive(Debug)]
pub struct FrameStaging {
    dir: PathBuf,
    target: PathBuf,
}

impl FrameStaging {
    /// Directory the frames of this set must be written into
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl AssetStore {
    pub fn new(root: impl Into<PathBuf>, backend: Arc<dyn ArtifactBackend>) -> Self {
        Self {
            root: root.into(),
            backend,
        }
    }

    /// Store with documents kept next to the media on the local filesystem
    pub fn local(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let backend = Arc::new(LocalArtifactBackend::new(root.clone()));
        Self::new(root, backend)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Identifiers are generated by admission; anything else is refused
    pub fn validate_id(video_id: &str) -> StorageResult<()> {
        let valid = !video_id.is_empty()
            && video_id.len() <= 64
            && video_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(())
        } else {
            Err(StorageError::InvalidKey(video_id.to_string()))
        }
    }

    fn video_dir(&self, video_id: &str) -> StorageResult<PathBuf> {
        Self::validate_id(video_id)?;
        Ok(self.root.join(video_id))
    }

    fn document_key(video_id: &str, name: &str) -> StorageResult<String> {
        Self::validate_id(video_id)?;
        Ok(format!("{video_id}/{name}"))
    }

    /// Locator of the stored source; the id is embedded in the file name
    #[must_use]
    pub fn source_locator(video_id: &str, format: VideoFormat) -> String {
        format!("{video_id}/{video_id}.{}", format.extension())
    }

    /// Filesystem path for a locator handed out by this store
    #[must_use]
    pub fn resolve(&self, locator: &str) -> PathBuf {
        self.root.join(locator)
    }

    /// Stream an upload into stable storage, returning its locator and size
    pub async fn write_source<R>(
        &self,
        video_id: &str,
        format: VideoFormat,
        reader: &mut R,
    ) -> StorageResult<(String, u64)>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let dir = self.video_dir(video_id)?;
        tokio::fs::create_dir_all(&dir).await?;

        let locator = Self::source_locator(video_id, format);
        let path = self.resolve(&locator);
        let partial = dir.join(format!(".{video_id}.{}.part", format.extension()));

        let write = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            let bytes = tokio::io::copy(reader, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&partial, &path).await?;
            Ok::<u64, std::io::Error>(bytes)
        };

        match write.await {
            Ok(bytes) => {
                debug!("Stored source {} ({} bytes)", locator, bytes);
                Ok((locator, bytes))
            }
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&dir).await;
                Err(e.into())
            }
        }
    }

    /// Delete everything stored for a video
    pub async fn remove_video(&self, video_id: &str) -> StorageResult<()> {
        let dir = self.video_dir(video_id)?;

        self.backend
            .delete(&Self::document_key(video_id, ASSET_DOCUMENT)?)
            .await?;
        for kind in [StageKind::Detection, StageKind::Actions, StageKind::Captions] {
            self.delete_artifact(video_id, kind).await?;
        }

        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!("Removed video {}", video_id);
        Ok(())
    }

    async fn put_document<T: Serialize + Sync + ?Sized>(
        &self,
        video_id: &str,
        name: &str,
        value: &T,
    ) -> StorageResult<()> {
        let key = Self::document_key(video_id, name)?;
        let data = serde_json::to_vec_pretty(value)?;
        self.backend.put(&key, &data).await
    }

    async fn get_document<T: DeserializeOwned>(
        &self,
        video_id: &str,
        name: &str,
    ) -> StorageResult<Option<T>> {
        let key = Self::document_key(video_id, name)?;
        match self.backend.get(&key).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    pub async fn save_asset(&self, asset: &VideoAsset) -> StorageResult<()> {
        self.put_document(&asset.id, ASSET_DOCUMENT, asset).await
    }

    pub async fn load_asset(&self, video_id: &str) -> StorageResult<Option<VideoAsset>> {
        self.get_document(video_id, ASSET_DOCUMENT).await
    }

    /// Load an asset, failing with `NotFound` when it was never admitted
    pub async fn require_asset(&self, video_id: &str) -> StorageResult<VideoAsset> {
        self.load_asset(video_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("video {video_id}")))
    }

    /// Commit a complete stage artifact in one operation
    pub async fn store_artifact<T: Serialize + Sync>(
        &self,
        video_id: &str,
        kind: StageKind,
        artifact: &T,
    ) -> StorageResult<()> {
        self.put_document(video_id, kind.artifact_name(), artifact)
            .await
    }

    pub async fn load_artifact<T: DeserializeOwned>(
        &self,
        video_id: &str,
        kind: StageKind,
    ) -> StorageResult<Option<T>> {
        self.get_document(video_id, kind.artifact_name()).await
    }

    pub async fn delete_artifact(&self, video_id: &str, kind: StageKind) -> StorageResult<()> {
        let key = Self::document_key(video_id, kind.artifact_name())?;
        self.backend.delete(&key).await
    }

    /// Names of the documents stored for a video
    pub async fn list_artifacts(&self, video_id: &str) -> StorageResult<Vec<String>> {
        Self::validate_id(video_id)?;
        self.backend.list(video_id).await
    }

    /// Directory name for a sample rate: whole milliseconds
    #[must_use]
    pub fn rate_key(sample_rate_seconds: f64) -> String {
        let millis = (sample_rate_seconds * 1000.0).round().max(1.0) as u64;
        format!("{millis}ms")
    }

    fn frames_root(&self, video_id: &str) -> StorageResult<PathBuf> {
        Ok(self.video_dir(video_id)?.join(FRAMES_DIR))
    }

    fn frames_dir(&self, video_id: &str, sample_rate_seconds: f64) -> StorageResult<PathBuf> {
        Ok(self
            .frames_root(video_id)?
            .join(Self::rate_key(sample_rate_seconds)))
    }

    /// Path of a committed frame
    pub fn frame_path(&self, frame_set: &FrameSet, name: &str) -> StorageResult<PathBuf> {
        Ok(self
            .frames_dir(&frame_set.video_id, frame_set.sample_rate_seconds)?
            .join(name))
    }

    /// Open a fresh staging directory for a frame set
    pub async fn begin_frames(
        &self,
        video_id: &str,
        sample_rate_seconds: f64,
    ) -> StorageResult<FrameStaging> {
        let root = self.frames_root(video_id)?;
        let dir = root.join(format!(".staging-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(FrameStaging {
            dir,
            target: self.frames_dir(video_id, sample_rate_seconds)?,
        })
    }

    /// Write the manifest and swap the staged frames into place
    pub async fn commit_frames(
        &self,
        staging: &FrameStaging,
        frame_set: &FrameSet,
    ) -> StorageResult<()> {
        let manifest = serde_json::to_vec_pretty(frame_set)?;
        tokio::fs::write(staging.dir.join(FRAME_MANIFEST), manifest).await?;

        let previous = match tokio::fs::try_exists(&staging.target).await? {
            true => {
                let parked = staging
                    .dir
                    .with_file_name(format!(".replaced-{}", uuid::Uuid::new_v4()));
                tokio::fs::rename(&staging.target, &parked).await?;
                Some(parked)
            }
            false => None,
        };

        tokio::fs::rename(&staging.dir, &staging.target).await?;

        if let Some(parked) = previous {
            if let Err(e) = tokio::fs::remove_dir_all(&parked).await {
                warn!("Failed to remove replaced frames {:?}: {}", parked, e);
            }
        }

        info!(
            "Committed {} frames for video {} at {}",
            frame_set.frames.len(),
            frame_set.video_id,
            Self::rate_key(frame_set.sample_rate_seconds)
        );
        Ok(())
    }

    /// Drop a staging directory and everything written into it
    pub async fn abort_frames(&self, staging: FrameStaging) {
        if let Err(e) = tokio::fs::remove_dir_all(&staging.dir).await {
            warn!("Failed to clean up staged frames {:?}: {}", staging.dir, e);
        }
    }

    pub async fn load_frame_set(
        &self,
        video_id: &str,
        sample_rate_seconds: f64,
    ) -> StorageResult<Option<FrameSet>> {
        let manifest = self
            .frames_dir(video_id, sample_rate_seconds)?
            .join(FRAME_MANIFEST);
        match tokio::fs::read(&manifest).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use video_grounding_common::FrameRef;

    fn frame_set(video_id: &str, count: u32) -> FrameSet {
        FrameSet {
            video_id: video_id.to_string(),
            sample_rate_seconds: 1.0,
            source_fps: 30.0,
            interval: 30,
            frames: (0..count)
                .map(|index| FrameRef {
                    index,
                    name: FrameSet::frame_file_name(index),
                    source_frame: u64::from(index) * 30,
                    timestamp_seconds: f64::from(index),
                })
                .collect(),
        }
    }

    #[test]
    fn test_rate_key() {
        assert_eq!(AssetStore::rate_key(1.0), "1000ms");
        assert_eq!(AssetStore::rate_key(0.5), "500ms");
        assert_eq!(AssetStore::rate_key(0.0001), "1ms");
    }

    #[test]
    fn test_validate_id() {
        assert!(AssetStore::validate_id("6f1c0b7e-2a7d-4c55-9d0e-2f1d3c4b5a69").is_ok());
        assert!(AssetStore::validate_id("../etc").is_err());
        assert!(AssetStore::validate_id("a/b").is_err());
        assert!(AssetStore::validate_id("").is_err());
    }

    #[tokio::test]
    async fn test_write_source_embeds_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = AssetStore::local(dir.path());

        let mut data: &[u8] = b"video bytes";
        let (locator, bytes) = store
            .write_source("abc", VideoFormat::Mov, &mut data)
            .await
            .unwrap();

        assert_eq!(locator, "abc/abc.mov");
        assert_eq!(bytes, 11);
        assert_eq!(std::fs::read(store.resolve(&locator)).unwrap(), b"video bytes");
    }

    #[tokio::test]
    async fn test_commit_frames_replaces_previous_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = AssetStore::local(dir.path());

        for count in [3u32, 2] {
            let staging = store.begin_frames("vid", 1.0).await.unwrap();
            let set = frame_set("vid", count);
            for frame in &set.frames {
                std::fs::write(staging.dir().join(&frame.name), b"jpeg").unwrap();
            }
            store.commit_frames(&staging, &set).await.unwrap();
        }

        let loaded = store.load_frame_set("vid", 1.0).await.unwrap().unwrap();
        assert_eq!(loaded.frames.len(), 2);
        let on_disk = std::fs::read_dir(dir.path().join("vid/frames/1000ms"))
            .unwrap()
            .count();
        assert_eq!(on_disk, 3, "two frames plus the manifest");
        let leftovers = std::fs::read_dir(dir.path().join("vid/frames")).unwrap().count();
        assert_eq!(leftovers, 1, "no staging or replaced directories remain");
    }

    #[tokio::test]
    async fn test_abort_frames_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = AssetStore::local(dir.path());

        let staging = store.begin_frames("vid", 1.0).await.unwrap();
        std::fs::write(staging.dir().join("frame_0000.jpg"), b"jpeg").unwrap();
        store.abort_frames(staging).await;

        assert!(store.load_frame_set("vid", 1.0).await.unwrap().is_none());
        assert_eq!(std::fs::read_dir(dir.path().join("vid/frames")).unwrap().count(), 0);
    }
}
