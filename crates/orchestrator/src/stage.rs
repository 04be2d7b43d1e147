//! Cached, re-entrant execution of a derivation stage
//!
//! A [`Stage`] plans its units of work and processes one unit at a time.
//! [`StageRunner`] wraps that in the caching and locking discipline every
//! stage shares:
//!
//! 1. take the video's lock (held until the artifact is persisted)
//! 2. return the stored artifact if its parameter fingerprint matches
//! 3. otherwise process every unit under the call policy, counting failed and
//!    skipped units instead of aborting
//! 4. persist the complete artifact in one write
//!
//! The whole computation runs under the stage deadline; when it expires
//! nothing is persisted.

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use video_grounding_common::{
    PipelineError, Result, StageArtifact, StageEntry, StageKind, VideoAsset,
};
use video_grounding_inference::{CallPolicy, CapabilityError};
use video_grounding_storage::{AssetStore, KeyedLocks};

/// Bumped when a stage's output format changes so old artifacts are recomputed
const ARTIFACT_VERSION: u32 = 1;

/// Why one unit produced no record
#[derive(Debug, Error)]
pub enum UnitFailure {
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Result of processing one unit
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome<R> {
    Done(R),
    /// Deliberately not processed (e.g. a tail clip that is too short)
    Skipped(String),
}

/// One derivation step producing a keyed artifact
#[async_trait]
pub trait Stage: Send + Sync {
    type Unit: Send + Sync;
    type Record: Serialize + DeserializeOwned + Send + Sync;

    fn kind(&self) -> StageKind;

    /// Everything the result depends on besides the video itself
    fn params(&self) -> serde_json::Value;

    /// Units of work in output order; fails when a prerequisite is missing
    async fn plan(&self, asset: &VideoAsset) -> Result<Vec<Self::Unit>>;

    /// Identifier the unit's record is stored under
    fn unit_key(&self, unit: &Self::Unit) -> String;

    async fn process(
        &self,
        asset: &VideoAsset,
        unit: &Self::Unit,
        calls: &CallPolicy,
    ) -> std::result::Result<UnitOutcome<Self::Record>, UnitFailure>;
}

/// blake3 fingerprint of a stage's kind and parameters
pub fn fingerprint<S: Stage + ?Sized>(stage: &S) -> Result<String> {
    let material = serde_json::to_vec(&serde_json::json!({
        "stage": stage.kind(),
        "version": ARTIFACT_VERSION,
        "params": stage.params(),
    }))?;
    Ok(blake3::hash(&material).to_hex().to_string())
}

/// Runs stages with per-video exclusion and artifact caching
#[derive(Clone)]
pub struct StageRunner {
    store: AssetStore,
    locks: KeyedLocks,
    calls: CallPolicy,
    stage_timeout: Duration,
}

impl StageRunner {
    pub fn new(
        store: AssetStore,
        locks: KeyedLocks,
        calls: CallPolicy,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            store,
            locks,
            calls,
            stage_timeout,
        }
    }

    /// Stored artifact for `stage` if it is current, else compute and store it
    pub async fn run<S: Stage>(
        &self,
        stage: &S,
        asset: &VideoAsset,
    ) -> Result<StageArtifact<S::Record>> {
        let kind = stage.kind();
        let fingerprint = fingerprint(stage)?;
        let _guard = self.locks.lock(&asset.id).await;

        match self
            .store
            .load_artifact::<StageArtifact<S::Record>>(&asset.id, kind)
            .await
        {
            Ok(Some(existing)) if existing.params_fingerprint == fingerprint => {
                debug!("Cache hit for {} of video {}", kind, asset.id);
                return Ok(existing);
            }
            Ok(Some(_)) => {
                info!(
                    "Parameters of {} changed for video {}, recomputing",
                    kind, asset.id
                );
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    "Unreadable {} artifact for video {} ({}), recomputing",
                    kind, asset.id, e
                );
            }
        }

        let artifact = tokio::time::timeout(
            self.stage_timeout,
            self.compute(stage, asset, fingerprint),
        )
        .await
        .map_err(|_| PipelineError::StageTimeout {
            stage: kind.name().to_string(),
            seconds: self.stage_timeout.as_secs(),
        })??;

        self.store.store_artifact(&asset.id, kind, &artifact).await?;
        info!(
            "Stage {} finished for video {}: {}/{} units succeeded, {} failed, {} skipped",
            kind,
            asset.id,
            artifact.units_succeeded,
            artifact.units_planned,
            artifact.units_failed,
            artifact.units_skipped
        );
        Ok(artifact)
    }

    async fn compute<S: Stage>(
        &self,
        stage: &S,
        asset: &VideoAsset,
        fingerprint: String,
    ) -> Result<StageArtifact<S::Record>> {
        let kind = stage.kind();
        let units = stage.plan(asset).await?;
        info!("Running {} over {} units of video {}", kind, units.len(), asset.id);

        let mut artifact = StageArtifact {
            video_id: asset.id.clone(),
            stage: kind,
            params_fingerprint: fingerprint,
            created_at: Utc::now(),
            units_planned: units.len(),
            units_succeeded: 0,
            units_failed: 0,
            units_skipped: 0,
            entries: Vec::with_capacity(units.len()),
        };

        for unit in &units {
            let key = stage.unit_key(unit);
            match stage.process(asset, unit, &self.calls).await {
                Ok(UnitOutcome::Done(value)) => {
                    debug!("{} unit {} of video {} done", kind, key, asset.id);
                    artifact.units_succeeded += 1;
                    artifact.entries.push(StageEntry { key, value });
                }
                Ok(UnitOutcome::Skipped(reason)) => {
                    debug!("{} unit {} skipped: {}", kind, key, reason);
                    artifact.units_skipped += 1;
                }
                Err(e) => {
                    warn!("{} unit {} of video {} failed: {}", kind, key, asset.id, e);
                    artifact.units_failed += 1;
                }
            }
        }

        artifact.created_at = Utc::now();
        Ok(artifact)
    }
}
