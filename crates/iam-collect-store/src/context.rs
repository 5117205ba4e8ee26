//! Shared AWS configuration context
//!
//! Provides `AwsContext` for loading AWS SDK configuration once and
//! building the S3 client used by the object-store backend.

use crate::config::S3StorageConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use std::sync::Arc;
use std::time::Duration;

/// Shared AWS configuration context for creating service clients.
///
/// Cheap to clone; every clone shares the loaded config.
#[derive(Clone)]
pub struct AwsContext {
    config: Arc<SdkConfig>,
}

impl AwsContext {
    /// Load AWS configuration from the environment, optionally pinning the
    /// region and named profile.
    pub async fn new(region: Option<&str>, profile: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }

        Self {
            config: Arc::new(loader.load().await),
        }
    }

    /// Wrap an already-loaded SDK config
    pub fn from_sdk_config(config: SdkConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Get the underlying SDK config for direct client construction.
    pub fn sdk_config(&self) -> &SdkConfig {
        &self.config
    }

    /// Region resolved by the loader, if any
    pub fn region(&self) -> Option<&str> {
        self.config.region().map(|r| r.as_ref())
    }

    /// Create an S3 client with the overrides from a storage config applied.
    pub fn s3_client(&self, storage: &S3StorageConfig) -> aws_sdk_s3::Client {
        let mut builder = aws_sdk_s3::config::Builder::from(self.sdk_config());

        if let Some(region) = &storage.region {
            builder = builder.region(Region::new(region.clone()));
        }

        // LocalStack/MinIO
        if let Some(endpoint) = &storage.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        if let Some(max_retries) = storage.max_retries {
            // SDK counts the initial attempt
            let max_attempts = max_retries.saturating_add(1);
            builder = builder.retry_config(RetryConfig::standard().with_max_attempts(max_attempts));
        }

        if let Some(timeout_ms) = storage.timeout_ms {
            builder = builder.timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(Duration::from_millis(timeout_ms))
                    .build(),
            );
        }

        aws_sdk_s3::Client::from_conf(builder.build())
    }
}

impl std::fmt::Debug for AwsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsContext")
            .field("region", &self.region())
            .finish_non_exhaustive()
    }
}
