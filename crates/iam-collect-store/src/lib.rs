//! iam-collect-store - Persistence and derived indexes for collected AWS data
//!
//! ## Modules
//!
//! - [`adapter`]: Primitive path storage over a directory, an S3 bucket or memory
//! - [`config`]: Typed, validated storage configuration and [`open_store`]
//! - [`context`]: Shared AWS SDK configuration
//! - [`error`]: The [`StoreError`] taxonomy and S3 error classification
//! - [`indexing`]: Optimistically locked cross-account indexes
//! - [`paths`]: Storage path layout for the path-based backends
//! - [`reconcile`]: Set-difference pruning of stale resources
//! - [`store`]: The [`AwsIamStore`] facade and its backends

pub mod adapter;
pub mod config;
pub mod context;
pub mod error;
pub mod indexing;
pub mod paths;
pub mod reconcile;
pub mod store;

pub use config::{StorageConfig, open_store};
pub use context::AwsContext;
pub use error::{Result, StoreError};
pub use indexing::{IndexJob, Indexer, run_index_jobs, update_index};
pub use store::{AwsIamStore, PathBasedStore, ScopedResource, SqliteStore, Store};

pub use iam_collect_common::{
    ANY_REGION, Arn, OrganizationPolicyType, Payload, PayloadShape, ResourceScope,
};
