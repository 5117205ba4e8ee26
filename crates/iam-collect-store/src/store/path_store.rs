//! `AwsIamStore` over a path-based persistence adapter

use super::{AwsIamStore, ScopedResource, scoped_resource, sort_resources};
use crate::adapter::PersistenceAdapter;
use crate::error::Result;
use crate::paths::{StorePaths, join_path, ram_arn_from_file_name};
use futures::{StreamExt, TryStreamExt};
use iam_collect_common::defaults::{
    AWS_OWNER, FIND_READ_CONCURRENCY, JSON_EXTENSION, METADATA_FILE,
};
use iam_collect_common::{Arn, OrganizationPolicyType, Payload, ResourceScope};
use serde_json::Value;
use tracing::debug;

/// Store that maps every record to a file-like path under one partition.
///
/// Works identically over the filesystem, S3 and in-memory adapters.
#[derive(Debug, Clone)]
pub struct PathBasedStore<A> {
    adapter: A,
    paths: StorePaths,
}

impl<A: PersistenceAdapter> PathBasedStore<A> {
    pub fn new(adapter: A, partition: &str) -> Self {
        Self {
            adapter,
            paths: StorePaths::new(partition),
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Write a payload, or delete the record when the payload is empty
    async fn save_or_delete(&self, path: &str, payload: Payload) -> Result<()> {
        if payload.is_empty() {
            debug!(path = %path, shape = ?payload.shape(), "Empty payload, deleting record");
            return self.adapter.delete_file(path).await;
        }
        self.adapter
            .write_file(path, &payload.to_storage_string()?)
            .await
    }

    async fn read_json(&self, path: &str) -> Result<Option<Value>> {
        match self.adapter.read_file(path).await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// Children of `dir` that hold at least one JSON record directly.
    ///
    /// Directories emptied by single-record deletes may survive on some
    /// backends; they are not reported.
    async fn populated_children(&self, dir: &str) -> Result<Vec<String>> {
        let mut populated = Vec::new();
        for child in self.adapter.list_directory(dir).await? {
            if child.ends_with(JSON_EXTENSION) {
                continue;
            }
            let entries = self
                .adapter
                .list_directory(&join_path(&[dir, child.as_str()]))
                .await?;
            if entries.iter().any(|e| e.ends_with(JSON_EXTENSION)) {
                populated.push(child);
            }
        }
        Ok(populated)
    }

    /// The resource stored in `dir`, a directory matched by the scope's
    /// pattern. `None` when it holds no record or fails the field filter.
    async fn resource_at(
        &self,
        scope: &ResourceScope,
        base: &str,
        account: &str,
        dir: String,
    ) -> Result<Option<ScopedResource>> {
        let Some(key) = StorePaths::resource_key_at(scope, base, &dir) else {
            return Ok(None);
        };
        let records = self.adapter.list_directory(&dir).await?;
        if !records.iter().any(|name| name.ends_with(JSON_EXTENSION)) {
            return Ok(None);
        }
        let metadata = if records.iter().any(|name| name == METADATA_FILE) {
            self.read_json(&join_path(&[dir.as_str(), METADATA_FILE]))
                .await?
        } else {
            None
        };
        Ok(scoped_resource(
            scope,
            &key,
            self.paths.partition(),
            account,
            metadata,
        ))
    }

    /// JSON record names directly under `dir`, without the extension
    async fn record_names(&self, dir: &str) -> Result<Vec<String>> {
        Ok(self
            .adapter
            .list_directory(dir)
            .await?
            .into_iter()
            .filter_map(|name| name.strip_suffix(JSON_EXTENSION).map(str::to_string))
            .collect())
    }
}

impl<A: PersistenceAdapter> AwsIamStore for PathBasedStore<A> {
    async fn save_resource_metadata(
        &self,
        account_id: &str,
        arn: &str,
        metadata_type: &str,
        payload: Payload,
    ) -> Result<()> {
        let arn = Arn::parse(arn)?;
        let path = self.paths.resource_metadata(account_id, &arn, metadata_type);
        self.save_or_delete(&path, payload).await
    }

    async fn get_resource_metadata(
        &self,
        account_id: &str,
        arn: &str,
        metadata_type: &str,
    ) -> Result<Option<Value>> {
        let arn = Arn::parse(arn)?;
        self.read_json(&self.paths.resource_metadata(account_id, &arn, metadata_type))
            .await
    }

    async fn delete_resource_metadata(
        &self,
        account_id: &str,
        arn: &str,
        metadata_type: &str,
    ) -> Result<()> {
        let arn = Arn::parse(arn)?;
        self.adapter
            .delete_file(&self.paths.resource_metadata(account_id, &arn, metadata_type))
            .await
    }

    async fn list_resource_metadata(&self, account_id: &str, arn: &str) -> Result<Vec<String>> {
        let arn = Arn::parse(arn)?;
        self.record_names(&self.paths.resource_prefix(account_id, &arn))
            .await
    }

    async fn delete_resource(&self, account_id: &str, arn: &str) -> Result<()> {
        let arn = Arn::parse(arn)?;
        let prefix = self.paths.resource_prefix(account_id, &arn);
        debug!(arn = %arn, prefix = %prefix, "Deleting resource");
        self.adapter.delete_directory(&prefix).await
    }

    async fn find_resources(
        &self,
        account_id: &str,
        scope: &ResourceScope,
    ) -> Result<Vec<ScopedResource>> {
        let (base, pattern) = self.paths.resource_type_pattern(account_id, scope);
        let segments: Vec<&str> = pattern.iter().map(String::as_str).collect();
        let dirs = self
            .adapter
            .expand_pattern(&base, &segments, METADATA_FILE)
            .await?;
        let account = scope.storage_account(account_id);

        let found: Vec<Option<ScopedResource>> = futures::stream::iter(dirs)
            .map(|dir| self.resource_at(scope, &base, &account, dir))
            .buffered(FIND_READ_CONCURRENCY)
            .try_collect()
            .await?;

        let mut resources: Vec<ScopedResource> = found.into_iter().flatten().collect();
        sort_resources(&mut resources);
        Ok(resources)
    }

    async fn save_account_metadata(
        &self,
        account_id: &str,
        metadata_type: &str,
        payload: Payload,
    ) -> Result<()> {
        let path = self.paths.account_metadata(account_id, metadata_type);
        self.save_or_delete(&path, payload).await
    }

    async fn get_account_metadata(
        &self,
        account_id: &str,
        metadata_type: &str,
    ) -> Result<Option<Value>> {
        self.read_json(&self.paths.account_metadata(account_id, metadata_type))
            .await
    }

    async fn delete_account_metadata(&self, account_id: &str, metadata_type: &str) -> Result<()> {
        self.adapter
            .delete_file(&self.paths.account_metadata(account_id, metadata_type))
            .await
    }

    async fn list_account_ids(&self) -> Result<Vec<String>> {
        let mut accounts = self.populated_children(&self.paths.accounts_root()).await?;
        accounts.retain(|a| a != AWS_OWNER);
        Ok(accounts)
    }

    async fn save_organization_metadata(
        &self,
        organization_id: &str,
        metadata_type: &str,
        payload: Payload,
    ) -> Result<()> {
        let path = self
            .paths
            .organization_metadata(organization_id, metadata_type);
        self.save_or_delete(&path, payload).await
    }

    async fn get_organization_metadata(
        &self,
        organization_id: &str,
        metadata_type: &str,
    ) -> Result<Option<Value>> {
        self.read_json(
            &self
                .paths
                .organization_metadata(organization_id, metadata_type),
        )
        .await
    }

    async fn delete_organization_metadata(
        &self,
        organization_id: &str,
        metadata_type: &str,
    ) -> Result<()> {
        self.adapter
            .delete_file(
                &self
                    .paths
                    .organization_metadata(organization_id, metadata_type),
            )
            .await
    }

    async fn save_organizational_unit_metadata(
        &self,
        organization_id: &str,
        ou_id: &str,
        metadata_type: &str,
        payload: Payload,
    ) -> Result<()> {
        let path = self
            .paths
            .organizational_unit_metadata(organization_id, ou_id, metadata_type);
        self.save_or_delete(&path, payload).await
    }

    async fn get_organizational_unit_metadata(
        &self,
        organization_id: &str,
        ou_id: &str,
        metadata_type: &str,
    ) -> Result<Option<Value>> {
        self.read_json(
            &self
                .paths
                .organizational_unit_metadata(organization_id, ou_id, metadata_type),
        )
        .await
    }

    async fn delete_organizational_unit(&self, organization_id: &str, ou_id: &str) -> Result<()> {
        self.adapter
            .delete_directory(&self.paths.organizational_unit_dir(organization_id, ou_id))
            .await
    }

    async fn list_organizational_units(&self, organization_id: &str) -> Result<Vec<String>> {
        self.populated_children(&self.paths.organizational_units_dir(organization_id))
            .await
    }

    async fn save_organization_policy_metadata(
        &self,
        organization_id: &str,
        policy_type: OrganizationPolicyType,
        policy_id: &str,
        metadata_type: &str,
        payload: Payload,
    ) -> Result<()> {
        let path = self.paths.organization_policy_metadata(
            organization_id,
            policy_type,
            policy_id,
            metadata_type,
        );
        self.save_or_delete(&path, payload).await
    }

    async fn get_organization_policy_metadata(
        &self,
        organization_id: &str,
        policy_type: OrganizationPolicyType,
        policy_id: &str,
        metadata_type: &str,
    ) -> Result<Option<Value>> {
        self.read_json(&self.paths.organization_policy_metadata(
            organization_id,
            policy_type,
            policy_id,
            metadata_type,
        ))
        .await
    }

    async fn delete_organization_policy(
        &self,
        organization_id: &str,
        policy_type: OrganizationPolicyType,
        policy_id: &str,
    ) -> Result<()> {
        self.adapter
            .delete_directory(&self.paths.organization_policy_dir(
                organization_id,
                policy_type,
                policy_id,
            ))
            .await
    }

    async fn list_organization_policies(
        &self,
        organization_id: &str,
        policy_type: OrganizationPolicyType,
    ) -> Result<Vec<String>> {
        self.populated_children(
            &self
                .paths
                .organization_policies_dir(organization_id, policy_type),
        )
        .await
    }

    async fn save_ram_resource(&self, account_id: &str, arn: &str, payload: Payload) -> Result<()> {
        let arn = Arn::parse(arn)?;
        let path = self.paths.ram_resource(account_id, &arn);
        self.save_or_delete(&path, payload).await
    }

    async fn get_ram_resource(&self, account_id: &str, arn: &str) -> Result<Option<Value>> {
        let arn = Arn::parse(arn)?;
        self.read_json(&self.paths.ram_resource(account_id, &arn))
            .await
    }

    async fn delete_ram_resource(&self, account_id: &str, arn: &str) -> Result<()> {
        let arn = Arn::parse(arn)?;
        self.adapter
            .delete_file(&self.paths.ram_resource(account_id, &arn))
            .await
    }

    async fn list_ram_resources(
        &self,
        account_id: &str,
        region: Option<&str>,
    ) -> Result<Vec<String>> {
        let mut arns: Vec<String> = self
            .adapter
            .list_directory(&self.paths.ram_dir(account_id, region))
            .await?
            .iter()
            .filter_map(|name| ram_arn_from_file_name(name))
            .collect();
        arns.sort();
        Ok(arns)
    }

    async fn get_index(&self, name: &str, default: Value) -> Result<(Value, String)> {
        match self
            .adapter
            .read_file_with_hash(&self.paths.index(name))
            .await?
        {
            Some((text, token)) => Ok((serde_json::from_str(&text)?, token)),
            None => Ok((default, String::new())),
        }
    }

    async fn save_index(&self, name: &str, value: &Value, lock_token: &str) -> Result<bool> {
        let data = serde_json::to_string_pretty(value)?;
        self.adapter
            .write_with_optimistic_lock(&self.paths.index(name), &data, lock_token)
            .await
    }
}
