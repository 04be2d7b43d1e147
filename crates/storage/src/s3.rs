//! S3/MinIO artifact backend
//!
//! A single `PutObject` replaces an object atomically, which is exactly the
//! commit semantics artifact documents need.

use crate::backend::ArtifactBackend;
use crate::{StorageError, StorageResult};
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    operation::{get_object::GetObjectError, head_object::HeadObjectError},
    primitives::ByteStream,
    Client,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// S3/MinIO configuration
///
/// Missing keys take their defaults; credentials default to the standard AWS
/// environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub bucket: String,

    /// AWS region, or "us-east-1" for `MinIO`
    pub region: String,

    /// Custom endpoint for `MinIO` (None for AWS S3)
    pub endpoint: Option<String>,

    pub access_key_id: String,

    pub secret_access_key: String,

    /// Path prefix for all objects (e.g., "video-grounding/")
    pub prefix: String,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: "video-grounding".to_string(),
            region: "us-west-2".to_string(),
            endpoint: None,
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_default(),
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default(),
            prefix: String::new(),
        }
    }
}

fn s3_error(e: impl std::error::Error) -> StorageError {
    StorageError::S3Error(DisplayErrorContext(e).to_string())
}

/// Artifact documents stored as S3 objects
pub struct S3ArtifactBackend {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3ArtifactBackend {
    #[must_use]
    pub fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "video-grounding-storage",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .behavior_version_latest();

        if let Some(endpoint) = config.endpoint {
            // MinIO needs path-style addressing
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        info!("S3 artifact backend: bucket={}, prefix={:?}", config.bucket, config.prefix);

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
            prefix: config.prefix,
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait::async_trait]
impl ArtifactBackend for S3ArtifactBackend {
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .body(ByteStream::from(data.to_vec()))
            .content_type("application/json")
            .send()
            .await
            .map_err(s3_error)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.as_service_error().is_some_and(GetObjectError::is_no_such_key) => {
                return Ok(None)
            }
            Err(e) => return Err(s3_error(e)),
        };

        let bytes = response
            .body
            .collect()
            .await
            .map_err(s3_error)?;
        Ok(Some(bytes.to_vec()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(s3_error)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            // HEAD responses carry no body, so a bare 404 is also a miss
            Err(e)
                if e.as_service_error().is_some_and(HeadObjectError::is_not_found)
                    || e.raw_response().is_some_and(|r| r.status().as_u16() == 404) =>
            {
                Ok(false)
            }
            Err(e) => Err(s3_error(e)),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        let full_prefix = self.full_key(&dir);

        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&full_prefix)
            .delimiter("/")
            .send()
            .await
            .map_err(s3_error)?;

        let mut names: Vec<String> = response
            .contents()
            .iter()
            .filter_map(|obj| obj.key())
            .filter_map(|k| k.strip_prefix(full_prefix.as_str()))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_config_default() {
        let config = S3Config::default();
        assert_eq!(config.bucket, "video-grounding");
        assert_eq!(config.region, "us-west-2");
        assert_eq!(config.endpoint, None);
    }

    #[test]
    fn test_full_key_prefixing() {
        let backend = S3ArtifactBackend::new(S3Config {
            prefix: "artifacts/".to_string(),
            endpoint: Some("http://localhost:9000".to_string()),
            ..Default::default()
        });
        assert_eq!(backend.full_key("v1/captions.json"), "artifacts/v1/captions.json");

        let bare = S3ArtifactBackend::new(S3Config::default());
        assert_eq!(bare.full_key("v1/captions.json"), "v1/captions.json");
    }
}
