//! Storage configuration
//!
//! The storage section of the application config selects and tunes one
//! backend. It deserializes from JSON tagged by `type`:
//!
//! ```json
//! { "type": "s3", "bucket": "iam-data", "prefix": "collect", "region": "us-east-1" }
//! { "type": "file", "path": "./iam-data" }
//! { "type": "sqlite", "path": "./iam-data.db" }
//! { "type": "memory" }
//! ```
//!
//! Validation is done via `garde::Validate` before any backend is opened.

use crate::adapter::{FileSystemAdapter, InMemoryPathAdapter, S3PathAdapter};
use crate::context::AwsContext;
use crate::error::{Result, StoreError};
use crate::store::{PathBasedStore, SqliteStore, Store};
use garde::Validate;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Backend selection for the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    File(#[garde(dive)] FileStorageConfig),
    S3(#[garde(dive)] S3StorageConfig),
    Sqlite(#[garde(dive)] SqliteStorageConfig),
    Memory,
}

/// Local directory backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct FileStorageConfig {
    /// Root directory; created on first write
    #[garde(length(min = 1))]
    pub path: String,
}

/// S3 bucket backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct S3StorageConfig {
    #[garde(length(min = 1))]
    pub bucket: String,

    /// Key prefix inside the bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub prefix: Option<String>,

    /// Bucket region; defaults to the environment's region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(min = 1))]
    pub region: Option<String>,

    /// Endpoint override (LocalStack, MinIO)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(min = 1))]
    pub endpoint: Option<String>,

    /// Per-operation timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(range(min = 1))]
    pub timeout_ms: Option<u64>,

    /// SDK retries after the first attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub max_retries: Option<u32>,
}

/// SQLite database backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct SqliteStorageConfig {
    /// Database file; created if missing
    #[garde(length(min = 1))]
    pub path: String,
}

impl StorageConfig {
    /// Run the garde rules, mapping the report to a validation error
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|report| StoreError::validation(format!("storage config: {report}")))
    }

    /// Short backend name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            StorageConfig::File(_) => "file",
            StorageConfig::S3(_) => "s3",
            StorageConfig::Sqlite(_) => "sqlite",
            StorageConfig::Memory => "memory",
        }
    }
}

/// Validate `config` and open the backend it selects for `partition`.
pub async fn open_store(config: &StorageConfig, partition: &str) -> Result<Store> {
    config.check()?;
    if partition.trim().is_empty() {
        return Err(StoreError::validation("partition is required"));
    }

    info!(backend = config.kind(), partition = %partition, "Opening store");

    let store = match config {
        StorageConfig::File(file) => {
            Store::File(PathBasedStore::new(FileSystemAdapter::new(&file.path), partition))
        }
        StorageConfig::S3(s3) => {
            let aws = AwsContext::new(s3.region.as_deref(), None).await;
            let adapter = S3PathAdapter::new(&aws, s3)?;
            Store::S3(PathBasedStore::new(adapter, partition))
        }
        StorageConfig::Sqlite(sqlite) => {
            Store::Sqlite(SqliteStore::open(&sqlite.path, partition).await?)
        }
        StorageConfig::Memory => {
            Store::Memory(PathBasedStore::new(InMemoryPathAdapter::new(), partition))
        }
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_each_backend() {
        let file: StorageConfig =
            serde_json::from_value(json!({"type": "file", "path": "./data"})).unwrap();
        assert_eq!(
            file,
            StorageConfig::File(FileStorageConfig {
                path: "./data".into()
            })
        );

        let s3: StorageConfig = serde_json::from_value(json!({
            "type": "s3",
            "bucket": "iam-data",
            "prefix": "collect",
            "timeout_ms": 5000
        }))
        .unwrap();
        let StorageConfig::S3(s3) = s3 else {
            panic!("expected s3 config");
        };
        assert_eq!(s3.bucket, "iam-data");
        assert_eq!(s3.prefix.as_deref(), Some("collect"));
        assert_eq!(s3.timeout_ms, Some(5000));
        assert_eq!(s3.region, None);

        let sqlite: StorageConfig =
            serde_json::from_value(json!({"type": "sqlite", "path": "iam.db"})).unwrap();
        assert_eq!(sqlite.kind(), "sqlite");

        let memory: StorageConfig = serde_json::from_value(json!({"type": "memory"})).unwrap();
        assert_eq!(memory, StorageConfig::Memory);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let result = serde_json::from_value::<StorageConfig>(json!({"type": "dynamodb"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_validation() {
        assert!(
            StorageConfig::S3(S3StorageConfig::default())
                .check()
                .unwrap_err()
                .is_validation()
        );
        assert!(
            StorageConfig::File(FileStorageConfig {
                path: String::new()
            })
            .check()
            .is_err()
        );
        assert!(
            StorageConfig::S3(S3StorageConfig {
                bucket: "b".into(),
                timeout_ms: Some(0),
                ..Default::default()
            })
            .check()
            .is_err()
        );
        assert!(StorageConfig::Memory.check().is_ok());
    }

    #[tokio::test]
    async fn test_open_store_requires_partition() {
        let err = open_store(&StorageConfig::Memory, " ").await.unwrap_err();
        assert!(err.is_validation());
        assert!(open_store(&StorageConfig::Memory, "aws").await.is_ok());
    }
}
