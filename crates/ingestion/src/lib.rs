//! Admission control: the gate every upload passes before entering the pipeline

use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};
use video_grounding_common::{PipelineError, Result, VideoAsset, VideoFormat};
use video_grounding_decoder::{ProbeInfo, VideoSource};
use video_grounding_storage::AssetStore;

/// Limits applied at admission
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionPolicy {
    /// Inclusive ceiling on the probed duration
    pub max_duration_seconds: f64,
    /// Reject videos whose metadata cannot be read instead of admitting them
    /// with an unknown (zero) duration
    pub reject_unreadable: bool,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            max_duration_seconds: 120.0,
            reject_unreadable: false,
        }
    }
}

/// Validates and stores uploads, producing [`VideoAsset`]s
#[derive(Clone)]
pub struct AdmissionControl {
    store: AssetStore,
    source: Arc<dyn VideoSource>,
    policy: AdmissionPolicy,
}

impl AdmissionControl {
    pub fn new(store: AssetStore, source: Arc<dyn VideoSource>, policy: AdmissionPolicy) -> Self {
        Self {
            store,
            source,
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    /// Admit an upload
    ///
    /// The extension is checked before anything is written. The bytes are
    /// then persisted, probed, and deleted again when the probe rejects them.
    pub async fn admit<R>(&self, reader: &mut R, declared_filename: &str) -> Result<VideoAsset>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let format = VideoFormat::from_filename(declared_filename)
            .ok_or_else(|| PipelineError::RejectedFormat(declared_filename.to_string()))?;

        let id = uuid::Uuid::new_v4().to_string();
        let (stored_path, bytes) = self.store.write_source(&id, format, reader).await?;
        debug!(
            "Stored upload {:?} as {} ({} bytes)",
            declared_filename, stored_path, bytes
        );

        match self.validate(&id, &stored_path).await {
            Ok(probe) => {
                let asset = VideoAsset {
                    id: id.clone(),
                    original_name: declared_filename.to_string(),
                    stored_path,
                    duration_seconds: probe.duration_seconds(),
                    format,
                    frame_rate: probe.fps,
                    created_at: chrono::Utc::now(),
                };
                if let Err(e) = self.store.save_asset(&asset).await {
                    self.discard(&id).await;
                    return Err(e.into());
                }
                info!(
                    "Admitted video {} ({:?}, {:.2}s at {:.2} fps)",
                    asset.id, asset.original_name, asset.duration_seconds, asset.frame_rate
                );
                Ok(asset)
            }
            Err(e) => {
                self.discard(&id).await;
                Err(e)
            }
        }
    }

    /// Probe the stored file and apply the duration ceiling
    async fn validate(&self, id: &str, stored_path: &str) -> Result<ProbeInfo> {
        let path = self.store.resolve(stored_path);
        let source = self.source.clone();
        let probed = tokio::task::spawn_blocking(move || source.probe(&path))
            .await
            .map_err(|e| PipelineError::Internal(format!("probe task failed: {e}")))?;

        let probe = match probed {
            Ok(probe) => probe,
            Err(PipelineError::UnreadableVideo(reason)) if !self.policy.reject_unreadable => {
                warn!(
                    "Admitting video {} with unknown duration, metadata unreadable: {}",
                    id, reason
                );
                ProbeInfo {
                    fps: 0.0,
                    frame_count: 0,
                    width: 0,
                    height: 0,
                }
            }
            Err(e) => return Err(e),
        };

        let duration = probe.duration_seconds();
        if probe.fps <= 0.0 {
            warn!("Video {} reports no frame rate, duration treated as 0", id);
        }
        if duration > self.policy.max_duration_seconds {
            return Err(PipelineError::DurationExceeded {
                duration,
                max: self.policy.max_duration_seconds,
            });
        }
        Ok(probe)
    }

    async fn discard(&self, id: &str) {
        if let Err(e) = self.store.remove_video(id).await {
            warn!("Failed to remove rejected video {}: {}", id, e);
        }
    }
}
