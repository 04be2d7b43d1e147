//! Pipeline configuration
//!
//! Defaults, then an optional YAML file named by `VIDEO_GROUNDING_CONFIG`,
//! then individual `VIDEO_GROUNDING_*` environment overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use video_grounding_inference::CallPolicy;
use video_grounding_ingestion::AdmissionPolicy;
use video_grounding_storage::{AssetStore, S3ArtifactBackend, S3Config};

/// Environment variable naming the YAML config file
pub const CONFIG_PATH_ENV: &str = "VIDEO_GROUNDING_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Detections below this confidence are dropped
    pub confidence_threshold: f32,
    /// Process every Nth frame of the frame set
    pub frame_stride: usize,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            frame_stride: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionSettings {
    pub frame_stride: usize,
}

impl Default for CaptionSettings {
    fn default() -> Self {
        Self { frame_stride: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionSettings {
    /// Frames per clip; shorter tail clips are skipped
    pub clip_length: usize,
    /// Seconds between clip starts
    pub interval_seconds: u32,
    /// Square edge clips are resized to
    pub clip_size: u32,
}

impl Default for ActionSettings {
    fn default() -> Self {
        Self {
            clip_length: 16,
            interval_seconds: 3,
            clip_size: 224,
        }
    }
}

/// Bounds on every external capability call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallSettings {
    pub timeout_secs: u64,
    pub retries: u32,
    pub backoff_ms: u64,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            retries: 1,
            backoff_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub storage_root: PathBuf,
    /// Inclusive admission ceiling
    pub max_duration_seconds: f64,
    pub reject_unreadable: bool,
    /// Sampling rate of the eager frame extraction, also the frame set the
    /// detection and captioning stages read
    pub frame_rate_seconds: f64,
    pub detection: DetectionSettings,
    pub captioning: CaptionSettings,
    pub actions: ActionSettings,
    pub calls: CallSettings,
    /// Deadline for a whole stage run
    pub stage_timeout_secs: u64,
    /// Detections echoed back in the upload response
    pub upload_preview_limit: usize,
    /// Keep artifact documents in S3/MinIO instead of next to the media
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Config>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("uploads"),
            max_duration_seconds: 120.0,
            reject_unreadable: false,
            frame_rate_seconds: 1.0,
            detection: DetectionSettings::default(),
            captioning: CaptionSettings::default(),
            actions: ActionSettings::default(),
            calls: CallSettings::default(),
            stage_timeout_secs: 1800,
            upload_preview_limit: 20,
            s3: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults, overlaid with the file in `VIDEO_GROUNDING_CONFIG` and the
    /// process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Same as [`load`](Self::load) over an arbitrary variable source
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup(CONFIG_PATH_ENV).filter(|p| !p.trim().is_empty()) {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Missing keys keep their defaults
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Apply `VIDEO_GROUNDING_*` overrides
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(root) = var("VIDEO_GROUNDING_STORAGE_ROOT") {
            self.storage_root = PathBuf::from(root);
        }
        override_parsed(&var, "VIDEO_GROUNDING_MAX_DURATION", &mut self.max_duration_seconds)?;
        override_parsed(&var, "VIDEO_GROUNDING_REJECT_UNREADABLE", &mut self.reject_unreadable)?;
        override_parsed(&var, "VIDEO_GROUNDING_FRAME_RATE", &mut self.frame_rate_seconds)?;
        override_parsed(
            &var,
            "VIDEO_GROUNDING_DETECTION_THRESHOLD",
            &mut self.detection.confidence_threshold,
        )?;
        override_parsed(
            &var,
            "VIDEO_GROUNDING_DETECTION_STRIDE",
            &mut self.detection.frame_stride,
        )?;
        override_parsed(
            &var,
            "VIDEO_GROUNDING_CAPTION_STRIDE",
            &mut self.captioning.frame_stride,
        )?;
        override_parsed(
            &var,
            "VIDEO_GROUNDING_ACTION_INTERVAL",
            &mut self.actions.interval_seconds,
        )?;
        override_parsed(&var, "VIDEO_GROUNDING_CALL_TIMEOUT", &mut self.calls.timeout_secs)?;
        override_parsed(&var, "VIDEO_GROUNDING_CALL_RETRIES", &mut self.calls.retries)?;
        override_parsed(&var, "VIDEO_GROUNDING_STAGE_TIMEOUT", &mut self.stage_timeout_secs)?;
        override_parsed(
            &var,
            "VIDEO_GROUNDING_PREVIEW_LIMIT",
            &mut self.upload_preview_limit,
        )?;

        if let Some(bucket) = var("VIDEO_GROUNDING_S3_BUCKET") {
            self.s3.get_or_insert_with(S3Config::default).bucket = bucket;
        }
        if let Some(s3) = self.s3.as_mut() {
            if let Some(endpoint) = var("VIDEO_GROUNDING_S3_ENDPOINT") {
                s3.endpoint = Some(endpoint);
            }
            if let Some(region) = var("VIDEO_GROUNDING_S3_REGION") {
                s3.region = region;
            }
            if let Some(prefix) = var("VIDEO_GROUNDING_S3_PREFIX") {
                s3.prefix = prefix;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if !(self.frame_rate_seconds.is_finite() && self.frame_rate_seconds > 0.0) {
            return invalid("frame_rate_seconds must be positive");
        }
        if !(self.max_duration_seconds.is_finite() && self.max_duration_seconds >= 0.0) {
            return invalid("max_duration_seconds must not be negative");
        }
        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return invalid("detection.confidence_threshold must lie in [0, 1]");
        }
        if self.detection.frame_stride == 0 || self.captioning.frame_stride == 0 {
            return invalid("frame strides must be at least 1");
        }
        if self.actions.clip_length == 0
            || self.actions.interval_seconds == 0
            || self.actions.clip_size == 0
        {
            return invalid("actions.clip_length, interval_seconds and clip_size must be at least 1");
        }
        if self.calls.timeout_secs == 0 || self.stage_timeout_secs == 0 {
            return invalid("timeouts must be at least one second");
        }
        if self.s3.as_ref().is_some_and(|s3| s3.bucket.trim().is_empty()) {
            return invalid("s3.bucket must not be empty");
        }
        Ok(())
    }

    /// Asset store rooted at `storage_root`, with documents in S3 when configured
    #[must_use]
    pub fn asset_store(&self) -> AssetStore {
        match &self.s3 {
            Some(s3) => AssetStore::new(
                &self.storage_root,
                Arc::new(S3ArtifactBackend::new(s3.clone())),
            ),
            None => AssetStore::local(&self.storage_root),
        }
    }

    #[must_use]
    pub fn admission_policy(&self) -> AdmissionPolicy {
        AdmissionPolicy {
            max_duration_seconds: self.max_duration_seconds,
            reject_unreadable: self.reject_unreadable,
        }
    }

    #[must_use]
    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_secs(self.calls.timeout_secs),
            retries: self.calls.retries,
            backoff: Duration::from_millis(self.calls.backoff_ms),
        }
    }

    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

fn override_parsed<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = var(key) {
        *target = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.storage_root, PathBuf::from("uploads"));
        assert_eq!(config.max_duration_seconds, 120.0);
        assert!(!config.reject_unreadable);
        assert_eq!(config.detection.confidence_threshold, 0.5);
        assert_eq!(config.detection.frame_stride, 10);
        assert_eq!(config.captioning.frame_stride, 5);
        assert_eq!(config.actions.clip_length, 16);
        assert_eq!(config.actions.interval_seconds, 3);
        assert_eq!(config.upload_preview_limit, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = PipelineConfig::from_yaml_str(
            "storage_root: /data/videos\ndetection:\n  frame_stride: 2\ncalls:\n  retries: 0\n",
        )
        .unwrap();
        assert_eq!(config.storage_root, PathBuf::from("/data/videos"));
        assert_eq!(config.detection.frame_stride, 2);
        assert_eq!(config.detection.confidence_threshold, 0.5);
        assert_eq!(config.calls.retries, 0);
        assert_eq!(config.calls.timeout_secs, 120);
        assert_eq!(config.captioning.frame_stride, 5);
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        std::fs::write(&path, "max_duration_seconds: 60\nframe_rate_seconds: 2.0\n").unwrap();
        let path = path.to_string_lossy().to_string();

        let config = PipelineConfig::load_with(lookup(&[
            (CONFIG_PATH_ENV, &path),
            ("VIDEO_GROUNDING_MAX_DURATION", "90.5"),
            ("VIDEO_GROUNDING_REJECT_UNREADABLE", "true"),
        ]))
        .unwrap();

        assert_eq!(config.max_duration_seconds, 90.5);
        assert_eq!(config.frame_rate_seconds, 2.0);
        assert!(config.reject_unreadable);
    }

    #[test]
    fn test_bad_override_is_reported() {
        let err = PipelineConfig::load_with(lookup(&[("VIDEO_GROUNDING_DETECTION_STRIDE", "ten")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "VIDEO_GROUNDING_DETECTION_STRIDE"));
    }

    #[test]
    fn test_validation() {
        let mut config = PipelineConfig::default();
        config.detection.frame_stride = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.frame_rate_seconds = 0.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.detection.confidence_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_s3_selected_by_bucket() {
        let config = PipelineConfig::load_with(lookup(&[])).unwrap();
        assert_eq!(config.s3, None);

        let config = PipelineConfig::load_with(lookup(&[
            ("VIDEO_GROUNDING_S3_BUCKET", "clips"),
            ("VIDEO_GROUNDING_S3_ENDPOINT", "http://minio:9000"),
            ("VIDEO_GROUNDING_S3_REGION", "us-east-1"),
        ]))
        .unwrap();
        let s3 = config.s3.unwrap();
        assert_eq!(s3.bucket, "clips");
        assert_eq!(s3.endpoint.as_deref(), Some("http://minio:9000"));
        assert_eq!(s3.region, "us-east-1");
        assert_eq!(s3.prefix, "");
    }

    #[test]
    fn test_s3_from_yaml() {
        let config = PipelineConfig::from_yaml_str(
            "s3:\n  bucket: clips\n  endpoint: http://localhost:9000\n  prefix: grounding/\n",
        )
        .unwrap();
        let s3 = config.s3.as_ref().unwrap();
        assert_eq!(s3.prefix, "grounding/");
        assert_eq!(s3.region, "us-west-2");
        assert!(config.validate().is_ok());

        let mut config = config;
        config.s3 = Some(S3Config {
            bucket: " ".to_string(),
            ..S3Config::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policies() {
        let config = PipelineConfig::default();
        assert_eq!(config.call_policy(), CallPolicy::default());
        assert_eq!(config.admission_policy(), AdmissionPolicy::default());
        assert_eq!(config.stage_timeout(), Duration::from_secs(1800));
    }
}
