//! The `AwsIamStore` facade
//!
//! One storage contract over every backend:
//! - [`PathBasedStore`]: files, S3 objects or an in-memory map, addressed by
//!   the layout in [`crate::paths`]
//! - [`SqliteStore`]: the same contract over a normalized SQLite schema
//!
//! [`Store`] selects one of them at runtime from a
//! [`StorageConfig`](crate::config::StorageConfig).

mod path_store;
mod sqlite;

pub use path_store::PathBasedStore;
pub use sqlite::SqliteStore;

use crate::adapter::{FileSystemAdapter, InMemoryPathAdapter, S3PathAdapter};
use crate::error::Result;
use crate::reconcile::{stale_ram_resources, stale_resources};
use iam_collect_common::{Arn, OrganizationPolicyType, Payload, ResourceKey, ResourceScope};
use serde_json::Value;
use std::future::Future;
use tracing::info;

/// A resource found at a scope
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedResource {
    /// The `arn` field of the `metadata` record when it names this resource,
    /// otherwise the lower-cased ARN rebuilt from the storage key
    pub arn: String,
    /// The `metadata` record, if the resource has one
    pub metadata: Option<Value>,
}

/// Domain-level storage operations shared by every backend.
///
/// ARNs are passed as strings and parsed by the store; a malformed ARN is a
/// validation error. Saving an empty [`Payload`] deletes the record.
pub trait AwsIamStore: Send + Sync {
    // Resources

    fn save_resource_metadata(
        &self,
        account_id: &str,
        arn: &str,
        metadata_type: &str,
        payload: Payload,
    ) -> impl Future<Output = Result<()>> + Send;

    fn get_resource_metadata(
        &self,
        account_id: &str,
        arn: &str,
        metadata_type: &str,
    ) -> impl Future<Output = Result<Option<Value>>> + Send;

    fn delete_resource_metadata(
        &self,
        account_id: &str,
        arn: &str,
        metadata_type: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Metadata types stored for one resource, sorted
    fn list_resource_metadata(
        &self,
        account_id: &str,
        arn: &str,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Delete every metadata record of a resource
    fn delete_resource(&self, account_id: &str, arn: &str)
    -> impl Future<Output = Result<()>> + Send;

    /// Every resource exactly at `scope` holding at least one record,
    /// sorted by ARN.
    ///
    /// Identity comes from where the records are stored. With a field
    /// filter, resources without a `metadata` record are left out.
    fn find_resources(
        &self,
        account_id: &str,
        scope: &ResourceScope,
    ) -> impl Future<Output = Result<Vec<ScopedResource>>> + Send;

    /// `metadata` records of every resource exactly at `scope`
    fn find_resource_metadata(
        &self,
        account_id: &str,
        scope: &ResourceScope,
    ) -> impl Future<Output = Result<Vec<Value>>> + Send {
        async move {
            Ok(self
                .find_resources(account_id, scope)
                .await?
                .into_iter()
                .filter_map(|resource| resource.metadata)
                .collect())
        }
    }

    /// ARNs of every resource exactly at `scope`, sorted
    fn list_resources(
        &self,
        account_id: &str,
        scope: &ResourceScope,
    ) -> impl Future<Output = Result<Vec<String>>> + Send {
        async move {
            let mut arns: Vec<String> = self
                .find_resources(account_id, scope)
                .await?
                .into_iter()
                .map(|resource| resource.arn)
                .collect();
            arns.sort();
            Ok(arns)
        }
    }

    /// Delete every resource at `scope` that is not in `desired_arns`.
    ///
    /// Desired ARNs are parsed before anything is deleted.
    fn sync_resource_list(
        &self,
        account_id: &str,
        scope: &ResourceScope,
        desired_arns: &[String],
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            let existing = self.list_resources(account_id, scope).await?;
            let stale = stale_resources(&existing, desired_arns)?;
            if !stale.is_empty() {
                info!(
                    account_id = %account_id,
                    service = %scope.service,
                    region = ?scope.region,
                    resource_type = ?scope.resource_type,
                    count = stale.len(),
                    "Removing stale resources"
                );
            }
            for arn in &stale {
                self.delete_resource(account_id, arn).await?;
            }
            Ok(())
        }
    }

    // Accounts

    fn save_account_metadata(
        &self,
        account_id: &str,
        metadata_type: &str,
        payload: Payload,
    ) -> impl Future<Output = Result<()>> + Send;

    fn get_account_metadata(
        &self,
        account_id: &str,
        metadata_type: &str,
    ) -> impl Future<Output = Result<Option<Value>>> + Send;

    fn delete_account_metadata(
        &self,
        account_id: &str,
        metadata_type: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Accounts holding at least one account-level record, sorted
    fn list_account_ids(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

    // Organizations

    fn save_organization_metadata(
        &self,
        organization_id: &str,
        metadata_type: &str,
        payload: Payload,
    ) -> impl Future<Output = Result<()>> + Send;

    fn get_organization_metadata(
        &self,
        organization_id: &str,
        metadata_type: &str,
    ) -> impl Future<Output = Result<Option<Value>>> + Send;

    fn delete_organization_metadata(
        &self,
        organization_id: &str,
        metadata_type: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn save_organizational_unit_metadata(
        &self,
        organization_id: &str,
        ou_id: &str,
        metadata_type: &str,
        payload: Payload,
    ) -> impl Future<Output = Result<()>> + Send;

    fn get_organizational_unit_metadata(
        &self,
        organization_id: &str,
        ou_id: &str,
        metadata_type: &str,
    ) -> impl Future<Output = Result<Option<Value>>> + Send;

    /// Delete every record of one OU
    fn delete_organizational_unit(
        &self,
        organization_id: &str,
        ou_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// OU ids holding at least one record, sorted
    fn list_organizational_units(
        &self,
        organization_id: &str,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn save_organization_policy_metadata(
        &self,
        organization_id: &str,
        policy_type: OrganizationPolicyType,
        policy_id: &str,
        metadata_type: &str,
        payload: Payload,
    ) -> impl Future<Output = Result<()>> + Send;

    fn get_organization_policy_metadata(
        &self,
        organization_id: &str,
        policy_type: OrganizationPolicyType,
        policy_id: &str,
        metadata_type: &str,
    ) -> impl Future<Output = Result<Option<Value>>> + Send;

    /// Delete every record of one SCP or RCP
    fn delete_organization_policy(
        &self,
        organization_id: &str,
        policy_type: OrganizationPolicyType,
        policy_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Policy ids of one type holding at least one record, sorted
    fn list_organization_policies(
        &self,
        organization_id: &str,
        policy_type: OrganizationPolicyType,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    // RAM

    fn save_ram_resource(
        &self,
        account_id: &str,
        arn: &str,
        payload: Payload,
    ) -> impl Future<Output = Result<()>> + Send;

    fn get_ram_resource(
        &self,
        account_id: &str,
        arn: &str,
    ) -> impl Future<Output = Result<Option<Value>>> + Send;

    fn delete_ram_resource(
        &self,
        account_id: &str,
        arn: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Lower-cased ARNs of the RAM records in one account and region
    /// (`None` for global), sorted
    fn list_ram_resources(
        &self,
        account_id: &str,
        region: Option<&str>,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Delete RAM records in one account and region whose ARN is not desired.
    /// ARNs compare case-insensitively.
    fn sync_ram_resources(
        &self,
        account_id: &str,
        region: Option<&str>,
        desired_arns: &[String],
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            let existing = self.list_ram_resources(account_id, region).await?;
            let stale = stale_ram_resources(&existing, desired_arns);
            if !stale.is_empty() {
                info!(
                    account_id = %account_id,
                    region = ?region,
                    count = stale.len(),
                    "Removing stale RAM resources"
                );
            }
            for arn in &stale {
                self.delete_ram_resource(account_id, arn).await?;
            }
            Ok(())
        }
    }

    // Indexes

    /// Current value of an index and its lock token.
    ///
    /// A missing index yields `default` and an empty token.
    fn get_index(
        &self,
        name: &str,
        default: Value,
    ) -> impl Future<Output = Result<(Value, String)>> + Send;

    /// Write an index only if it is unchanged since `lock_token` was read.
    ///
    /// Returns `false` when another writer got there first.
    fn save_index(
        &self,
        name: &str,
        value: &Value,
        lock_token: &str,
    ) -> impl Future<Output = Result<bool>> + Send;
}

/// The `arn` field of a `metadata` record
fn record_arn(record: &Value) -> Option<&str> {
    record.get("arn").and_then(Value::as_str)
}

/// Listing entry for the resource stored under `key`, or `None` when the
/// scope's field filter rejects it.
///
/// The `metadata` record's own `arn` is kept only when it parses to `key`.
pub(crate) fn scoped_resource(
    scope: &ResourceScope,
    key: &ResourceKey,
    partition: &str,
    account_id: &str,
    metadata: Option<Value>,
) -> Option<ScopedResource> {
    let passes = match &metadata {
        Some(record) => scope.matches_metadata(record),
        None => scope.metadata.is_none(),
    };
    if !passes {
        return None;
    }
    let arn = metadata
        .as_ref()
        .and_then(record_arn)
        .filter(|arn| Arn::parse(arn).is_ok_and(|arn| arn.key() == *key))
        .map(str::to_string)
        .unwrap_or_else(|| key.to_arn(partition, account_id));
    Some(ScopedResource { arn, metadata })
}

/// Sort a listing by ARN
pub(crate) fn sort_resources(resources: &mut [ScopedResource]) {
    resources.sort_by(|a, b| a.arn.cmp(&b.arn));
}

/// Store selected at runtime
#[derive(Debug, Clone)]
pub enum Store {
    File(PathBasedStore<FileSystemAdapter>),
    S3(PathBasedStore<S3PathAdapter>),
    Memory(PathBasedStore<InMemoryPathAdapter>),
    Sqlite(SqliteStore),
}

macro_rules! dispatch {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            Store::File($store) => $call,
            Store::S3($store) => $call,
            Store::Memory($store) => $call,
            Store::Sqlite($store) => $call,
        }
    };
}

impl AwsIamStore for Store {
    async fn save_resource_metadata(
        &self,
        account_id: &str,
        arn: &str,
        metadata_type: &str,
        payload: Payload,
    ) -> Result<()> {
        dispatch!(self, s => s.save_resource_metadata(account_id, arn, metadata_type, payload).await)
    }

    async fn get_resource_metadata(
        &self,
        account_id: &str,
        arn: &str,
        metadata_type: &str,
    ) -> Result<Option<Value>> {
        dispatch!(self, s => s.get_resource_metadata(account_id, arn, metadata_type).await)
    }

    async fn delete_resource_metadata(
        &self,
        account_id: &str,
        arn: &str,
        metadata_type: &str,
    ) -> Result<()> {
        dispatch!(self, s => s.delete_resource_metadata(account_id, arn, metadata_type).await)
    }

    async fn list_resource_metadata(&self, account_id: &str, arn: &str) -> Result<Vec<String>> {
        dispatch!(self, s => s.list_resource_metadata(account_id, arn).await)
    }

    async fn delete_resource(&self, account_id: &str, arn: &str) -> Result<()> {
        dispatch!(self, s => s.delete_resource(account_id, arn).await)
    }

    async fn find_resources(
        &self,
        account_id: &str,
        scope: &ResourceScope,
    ) -> Result<Vec<ScopedResource>> {
        dispatch!(self, s => s.find_resources(account_id, scope).await)
    }

    async fn find_resource_metadata(
        &self,
        account_id: &str,
        scope: &ResourceScope,
    ) -> Result<Vec<Value>> {
        dispatch!(self, s => s.find_resource_metadata(account_id, scope).await)
    }

    async fn list_resources(&self, account_id: &str, scope: &ResourceScope) -> Result<Vec<String>> {
        dispatch!(self, s => s.list_resources(account_id, scope).await)
    }

    async fn sync_resource_list(
        &self,
        account_id: &str,
        scope: &ResourceScope,
        desired_arns: &[String],
    ) -> Result<()> {
        dispatch!(self, s => s.sync_resource_list(account_id, scope, desired_arns).await)
    }

    async fn save_account_metadata(
        &self,
        account_id: &str,
        metadata_type: &str,
        payload: Payload,
    ) -> Result<()> {
        dispatch!(self, s => s.save_account_metadata(account_id, metadata_type, payload).await)
    }

    async fn get_account_metadata(
        &self,
        account_id: &str,
        metadata_type: &str,
    ) -> Result<Option<Value>> {
        dispatch!(self, s => s.get_account_metadata(account_id, metadata_type).await)
    }

    async fn delete_account_metadata(&self, account_id: &str, metadata_type: &str) -> Result<()> {
        dispatch!(self, s => s.delete_account_metadata(account_id, metadata_type).await)
    }

    async fn list_account_ids(&self) -> Result<Vec<String>> {
        dispatch!(self, s => s.list_account_ids().await)
    }

    async fn save_organization_metadata(
        &self,
        organization_id: &str,
        metadata_type: &str,
        payload: Payload,
    ) -> Result<()> {
        dispatch!(self, s => s.save_organization_metadata(organization_id, metadata_type, payload).await)
    }

    async fn get_organization_metadata(
        &self,
        organization_id: &str,
        metadata_type: &str,
    ) -> Result<Option<Value>> {
        dispatch!(self, s => s.get_organization_metadata(organization_id, metadata_type).await)
    }

    async fn delete_organization_metadata(
        &self,
        organization_id: &str,
        metadata_type: &str,
    ) -> Result<()> {
        dispatch!(self, s => s.delete_organization_metadata(organization_id, metadata_type).await)
    }

    async fn save_organizational_unit_metadata(
        &self,
        organization_id: &str,
        ou_id: &str,
        metadata_type: &str,
        payload: Payload,
    ) -> Result<()> {
        dispatch!(self, s => {
            s.save_organizational_unit_metadata(organization_id, ou_id, metadata_type, payload)
                .await
        })
    }

    async fn get_organizational_unit_metadata(
        &self,
        organization_id: &str,
        ou_id: &str,
        metadata_type: &str,
    ) -> Result<Option<Value>> {
        dispatch!(self, s => {
            s.get_organizational_unit_metadata(organization_id, ou_id, metadata_type)
                .await
        })
    }

    async fn delete_organizational_unit(&self, organization_id: &str, ou_id: &str) -> Result<()> {
        dispatch!(self, s => s.delete_organizational_unit(organization_id, ou_id).await)
    }

    async fn list_organizational_units(&self, organization_id: &str) -> Result<Vec<String>> {
        dispatch!(self, s => s.list_organizational_units(organization_id).await)
    }

    async fn save_organization_policy_metadata(
        &self,
        organization_id: &str,
        policy_type: OrganizationPolicyType,
        policy_id: &str,
        metadata_type: &str,
        payload: Payload,
    ) -> Result<()> {
        dispatch!(self, s => {
            s.save_organization_policy_metadata(
                organization_id,
                policy_type,
                policy_id,
                metadata_type,
                payload,
            )
            .await
        })
    }

    async fn get_organization_policy_metadata(
        &self,
        organization_id: &str,
        policy_type: OrganizationPolicyType,
        policy_id: &str,
        metadata_type: &str,
    ) -> Result<Option<Value>> {
        dispatch!(self, s => {
            s.get_organization_policy_metadata(organization_id, policy_type, policy_id, metadata_type)
                .await
        })
    }

    async fn delete_organization_policy(
        &self,
        organization_id: &str,
        policy_type: OrganizationPolicyType,
        policy_id: &str,
    ) -> Result<()> {
        dispatch!(self, s => s.delete_organization_policy(organization_id, policy_type, policy_id).await)
    }

    async fn list_organization_policies(
        &self,
        organization_id: &str,
        policy_type: OrganizationPolicyType,
    ) -> Result<Vec<String>> {
        dispatch!(self, s => s.list_organization_policies(organization_id, policy_type).await)
    }

    async fn save_ram_resource(&self, account_id: &str, arn: &str, payload: Payload) -> Result<()> {
        dispatch!(self, s => s.save_ram_resource(account_id, arn, payload).await)
    }

    async fn get_ram_resource(&self, account_id: &str, arn: &str) -> Result<Option<Value>> {
        dispatch!(self, s => s.get_ram_resource(account_id, arn).await)
    }

    async fn delete_ram_resource(&self, account_id: &str, arn: &str) -> Result<()> {
        dispatch!(self, s => s.delete_ram_resource(account_id, arn).await)
    }

    async fn list_ram_resources(
        &self,
        account_id: &str,
        region: Option<&str>,
    ) -> Result<Vec<String>> {
        dispatch!(self, s => s.list_ram_resources(account_id, region).await)
    }

    async fn sync_ram_resources(
        &self,
        account_id: &str,
        region: Option<&str>,
        desired_arns: &[String],
    ) -> Result<()> {
        dispatch!(self, s => s.sync_ram_resources(account_id, region, desired_arns).await)
    }

    async fn get_index(&self, name: &str, default: Value) -> Result<(Value, String)> {
        dispatch!(self, s => s.get_index(name, default).await)
    }

    async fn save_index(&self, name: &str, value: &Value, lock_token: &str) -> Result<bool> {
        dispatch!(self, s => s.save_index(name, value, lock_token).await)
    }
}
