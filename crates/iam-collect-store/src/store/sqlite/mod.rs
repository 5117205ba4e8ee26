//! `AwsIamStore` over a SQLite database
//!
//! Same contract as the path-based stores, directly in SQL. Keys are
//! lower-cased the same way the paths are; resource rows are keyed by the
//! shared [`ResourceKey`](iam_collect_common::ResourceKey) storage key. Only
//! the `indexes` table uses optimistic locking, through a stored content
//! hash compared on write.

mod schema;

use super::{AwsIamStore, ScopedResource, scoped_resource, sort_resources};
use crate::adapter::content_hash;
use crate::error::{Result, StoreError};
use iam_collect_common::defaults::{AWS_OWNER, GLOBAL_REGION, METADATA_TYPE};
use iam_collect_common::{
    ANY_REGION, Arn, OrganizationPolicyType, Payload, ResourceKey, ResourceScope,
};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Store backed by a SQLite connection pool
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    partition: String,
}

fn parse_data(data: Option<String>) -> Result<Option<Value>> {
    data.map(|text| serde_json::from_str(&text).map_err(StoreError::from))
        .transpose()
}

fn ram_region(region: Option<&str>) -> String {
    region
        .filter(|r| !r.trim().is_empty())
        .unwrap_or(GLOBAL_REGION)
        .to_lowercase()
}

impl SqliteStore {
    /// Open (creating if needed) the database file at `path`
    pub async fn open(path: &str, partition: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent.display().to_string(), e))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!(path = %path, partition = %partition, "Opened SQLite store");
        Self::from_pool(pool, partition).await
    }

    /// Use an existing pool, creating the schema if missing
    pub async fn from_pool(pool: SqlitePool, partition: &str) -> Result<Self> {
        schema::setup_schema(&pool).await?;
        Ok(Self {
            pool,
            partition: partition.to_lowercase(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }
}

impl AwsIamStore for SqliteStore {
    async fn save_resource_metadata(
        &self,
        account_id: &str,
        arn: &str,
        metadata_type: &str,
        payload: Payload,
    ) -> Result<()> {
        if payload.is_empty() {
            return self
                .delete_resource_metadata(account_id, arn, metadata_type)
                .await;
        }

        let arn = Arn::parse(arn)?;
        let key = arn.key();
        let data = payload.to_storage_string()?;

        sqlx::query(
            "INSERT INTO resource_metadata
                (partition, account_id, service, region, aws_owned, resource_type,
                 resource_key, arn, metadata_type, data)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(partition, account_id, resource_key, metadata_type)
             DO UPDATE SET arn = excluded.arn, data = excluded.data",
        )
        .bind(&self.partition)
        .bind(arn.storage_account(account_id))
        .bind(&key.service)
        .bind(key.region.as_deref().unwrap_or(""))
        .bind(key.aws_owned)
        .bind(key.resource_type.as_deref().unwrap_or(""))
        .bind(key.storage_key())
        .bind(arn.as_str())
        .bind(metadata_type.to_lowercase())
        .bind(&data)
        .execute(&self.pool)
        .await?;

        debug!(arn = %arn, metadata_type = %metadata_type, "Saved resource metadata");
        Ok(())
    }

    async fn get_resource_metadata(
        &self,
        account_id: &str,
        arn: &str,
        metadata_type: &str,
    ) -> Result<Option<Value>> {
        let arn = Arn::parse(arn)?;
        let data: Option<String> = sqlx::query_scalar(
            "SELECT data FROM resource_metadata
             WHERE partition = ? AND account_id = ? AND resource_key = ? AND metadata_type = ?",
        )
        .bind(&self.partition)
        .bind(arn.storage_account(account_id))
        .bind(arn.key().storage_key())
        .bind(metadata_type.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        parse_data(data)
    }

    async fn delete_resource_metadata(
        &self,
        account_id: &str,
        arn: &str,
        metadata_type: &str,
    ) -> Result<()> {
        let arn = Arn::parse(arn)?;
        sqlx::query(
            "DELETE FROM resource_metadata
             WHERE partition = ? AND account_id = ? AND resource_key = ? AND metadata_type = ?",
        )
        .bind(&self.partition)
        .bind(arn.storage_account(account_id))
        .bind(arn.key().storage_key())
        .bind(metadata_type.to_lowercase())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_resource_metadata(&self, account_id: &str, arn: &str) -> Result<Vec<String>> {
        let arn = Arn::parse(arn)?;
        let types: Vec<String> = sqlx::query_scalar(
            "SELECT metadata_type FROM resource_metadata
             WHERE partition = ? AND account_id = ? AND resource_key = ?
             ORDER BY metadata_type",
        )
        .bind(&self.partition)
        .bind(arn.storage_account(account_id))
        .bind(arn.key().storage_key())
        .fetch_all(&self.pool)
        .await?;
        Ok(types)
    }

    async fn delete_resource(&self, account_id: &str, arn: &str) -> Result<()> {
        let arn = Arn::parse(arn)?;
        let result = sqlx::query(
            "DELETE FROM resource_metadata
             WHERE partition = ? AND account_id = ? AND resource_key = ?",
        )
        .bind(&self.partition)
        .bind(arn.storage_account(account_id))
        .bind(arn.key().storage_key())
        .execute(&self.pool)
        .await?;

        debug!(arn = %arn, rows = result.rows_affected(), "Deleted resource");
        Ok(())
    }

    async fn find_resources(
        &self,
        account_id: &str,
        scope: &ResourceScope,
    ) -> Result<Vec<ScopedResource>> {
        let region = if scope.is_any_region() {
            ANY_REGION.to_string()
        } else {
            scope.concrete_region().unwrap_or_default()
        };

        let rows: Vec<(String, String, Option<String>)> = sqlx::query_as(
            "SELECT resource_key, arn, CASE WHEN metadata_type = ? THEN data END
             FROM resource_metadata
             WHERE partition = ? AND account_id = ? AND service = ? AND aws_owned = ?
               AND resource_type = ?
               AND ((? = '*' AND region <> '') OR region = ?)
             ORDER BY resource_key",
        )
        .bind(METADATA_TYPE)
        .bind(&self.partition)
        .bind(scope.storage_account(account_id))
        .bind(scope.service.to_lowercase())
        .bind(scope.is_aws_owned())
        .bind(scope.resource_type_key().unwrap_or_default())
        .bind(&region)
        .bind(&region)
        .fetch_all(&self.pool)
        .await?;

        // One entry per stored resource; any of its rows carries the ARN
        let mut found: BTreeMap<String, (ResourceKey, Option<Value>)> = BTreeMap::new();
        for (resource_key, arn, metadata) in rows {
            let metadata = parse_data(metadata)?;
            match found.get_mut(&resource_key) {
                Some((_, existing)) => {
                    if metadata.is_some() {
                        *existing = metadata;
                    }
                }
                None => {
                    let key = Arn::parse(&arn)?.key();
                    found.insert(resource_key, (key, metadata));
                }
            }
        }

        let account = scope.storage_account(account_id);
        let mut resources: Vec<ScopedResource> = found
            .into_values()
            .filter_map(|(key, metadata)| {
                scoped_resource(scope, &key, &self.partition, &account, metadata)
            })
            .collect();
        sort_resources(&mut resources);
        Ok(resources)
    }

    async fn save_account_metadata(
        &self,
        account_id: &str,
        metadata_type: &str,
        payload: Payload,
    ) -> Result<()> {
        if payload.is_empty() {
            return self.delete_account_metadata(account_id, metadata_type).await;
        }
        sqlx::query(
            "INSERT INTO account_metadata (partition, account_id, metadata_type, data)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(partition, account_id, metadata_type) DO UPDATE SET data = excluded.data",
        )
        .bind(&self.partition)
        .bind(account_id.to_lowercase())
        .bind(metadata_type.to_lowercase())
        .bind(payload.to_storage_string()?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_account_metadata(
        &self,
        account_id: &str,
        metadata_type: &str,
    ) -> Result<Option<Value>> {
        let data: Option<String> = sqlx::query_scalar(
            "SELECT data FROM account_metadata
             WHERE partition = ? AND account_id = ? AND metadata_type = ?",
        )
        .bind(&self.partition)
        .bind(account_id.to_lowercase())
        .bind(metadata_type.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        parse_data(data)
    }

    async fn delete_account_metadata(&self, account_id: &str, metadata_type: &str) -> Result<()> {
        sqlx::query(
            "DELETE FROM account_metadata
             WHERE partition = ? AND account_id = ? AND metadata_type = ?",
        )
        .bind(&self.partition)
        .bind(account_id.to_lowercase())
        .bind(metadata_type.to_lowercase())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_account_ids(&self) -> Result<Vec<String>> {
        let accounts: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT account_id FROM account_metadata
             WHERE partition = ? AND account_id <> ?
             ORDER BY account_id",
        )
        .bind(&self.partition)
        .bind(AWS_OWNER)
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    async fn save_organization_metadata(
        &self,
        organization_id: &str,
        metadata_type: &str,
        payload: Payload,
    ) -> Result<()> {
        if payload.is_empty() {
            return self
                .delete_organization_metadata(organization_id, metadata_type)
                .await;
        }
        sqlx::query(
            "INSERT INTO organization_metadata (partition, organization_id, metadata_type, data)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(partition, organization_id, metadata_type)
             DO UPDATE SET data = excluded.data",
        )
        .bind(&self.partition)
        .bind(organization_id.to_lowercase())
        .bind(metadata_type.to_lowercase())
        .bind(payload.to_storage_string()?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_organization_metadata(
        &self,
        organization_id: &str,
        metadata_type: &str,
    ) -> Result<Option<Value>> {
        let data: Option<String> = sqlx::query_scalar(
            "SELECT data FROM organization_metadata
             WHERE partition = ? AND organization_id = ? AND metadata_type = ?",
        )
        .bind(&self.partition)
        .bind(organization_id.to_lowercase())
        .bind(metadata_type.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        parse_data(data)
    }

    async fn delete_organization_metadata(
        &self,
        organization_id: &str,
        metadata_type: &str,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM organization_metadata
             WHERE partition = ? AND organization_id = ? AND metadata_type = ?",
        )
        .bind(&self.partition)
        .bind(organization_id.to_lowercase())
        .bind(metadata_type.to_lowercase())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_organizational_unit_metadata(
        &self,
        organization_id: &str,
        ou_id: &str,
        metadata_type: &str,
        payload: Payload,
    ) -> Result<()> {
        if payload.is_empty() {
            sqlx::query(
                "DELETE FROM organizational_unit_metadata
                 WHERE partition = ? AND organization_id = ? AND ou_id = ? AND metadata_type = ?",
            )
            .bind(&self.partition)
            .bind(organization_id.to_lowercase())
            .bind(ou_id.to_lowercase())
            .bind(metadata_type.to_lowercase())
            .execute(&self.pool)
            .await?;
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO organizational_unit_metadata
                (partition, organization_id, ou_id, metadata_type, data)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(partition, organization_id, ou_id, metadata_type)
             DO UPDATE SET data = excluded.data",
        )
        .bind(&self.partition)
        .bind(organization_id.to_lowercase())
        .bind(ou_id.to_lowercase())
        .bind(metadata_type.to_lowercase())
        .bind(payload.to_storage_string()?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_organizational_unit_metadata(
        &self,
        organization_id: &str,
        ou_id: &str,
        metadata_type: &str,
    ) -> Result<Option<Value>> {
        let data: Option<String> = sqlx::query_scalar(
            "SELECT data FROM organizational_unit_metadata
             WHERE partition = ? AND organization_id = ? AND ou_id = ? AND metadata_type = ?",
        )
        .bind(&self.partition)
        .bind(organization_id.to_lowercase())
        .bind(ou_id.to_lowercase())
        .bind(metadata_type.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        parse_data(data)
    }

    async fn delete_organizational_unit(&self, organization_id: &str, ou_id: &str) -> Result<()> {
        sqlx::query(
            "DELETE FROM organizational_unit_metadata
             WHERE partition = ? AND organization_id = ? AND ou_id = ?",
        )
        .bind(&self.partition)
        .bind(organization_id.to_lowercase())
        .bind(ou_id.to_lowercase())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_organizational_units(&self, organization_id: &str) -> Result<Vec<String>> {
        let ous: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT ou_id FROM organizational_unit_metadata
             WHERE partition = ? AND organization_id = ?
             ORDER BY ou_id",
        )
        .bind(&self.partition)
        .bind(organization_id.to_lowercase())
        .fetch_all(&self.pool)
        .await?;
        Ok(ous)
    }

    async fn save_organization_policy_metadata(
        &self,
        organization_id: &str,
        policy_type: OrganizationPolicyType,
        policy_id: &str,
        metadata_type: &str,
        payload: Payload,
    ) -> Result<()> {
        if payload.is_empty() {
            sqlx::query(
                "DELETE FROM organization_policy_metadata
                 WHERE partition = ? AND organization_id = ? AND policy_type = ?
                   AND policy_id = ? AND metadata_type = ?",
            )
            .bind(&self.partition)
            .bind(organization_id.to_lowercase())
            .bind(policy_type.as_str())
            .bind(policy_id.to_lowercase())
            .bind(metadata_type.to_lowercase())
            .execute(&self.pool)
            .await?;
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO organization_policy_metadata
                (partition, organization_id, policy_type, policy_id, metadata_type, data)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(partition, organization_id, policy_type, policy_id, metadata_type)
             DO UPDATE SET data = excluded.data",
        )
        .bind(&self.partition)
        .bind(organization_id.to_lowercase())
        .bind(policy_type.as_str())
        .bind(policy_id.to_lowercase())
        .bind(metadata_type.to_lowercase())
        .bind(payload.to_storage_string()?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_organization_policy_metadata(
        &self,
        organization_id: &str,
        policy_type: OrganizationPolicyType,
        policy_id: &str,
        metadata_type: &str,
    ) -> Result<Option<Value>> {
        let data: Option<String> = sqlx::query_scalar(
            "SELECT data FROM organization_policy_metadata
             WHERE partition = ? AND organization_id = ? AND policy_type = ?
               AND policy_id = ? AND metadata_type = ?",
        )
        .bind(&self.partition)
        .bind(organization_id.to_lowercase())
        .bind(policy_type.as_str())
        .bind(policy_id.to_lowercase())
        .bind(metadata_type.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        parse_data(data)
    }

    async fn delete_organization_policy(
        &self,
        organization_id: &str,
        policy_type: OrganizationPolicyType,
        policy_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM organization_policy_metadata
             WHERE partition = ? AND organization_id = ? AND policy_type = ? AND policy_id = ?",
        )
        .bind(&self.partition)
        .bind(organization_id.to_lowercase())
        .bind(policy_type.as_str())
        .bind(policy_id.to_lowercase())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_organization_policies(
        &self,
        organization_id: &str,
        policy_type: OrganizationPolicyType,
    ) -> Result<Vec<String>> {
        let policies: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT policy_id FROM organization_policy_metadata
             WHERE partition = ? AND organization_id = ? AND policy_type = ?
             ORDER BY policy_id",
        )
        .bind(&self.partition)
        .bind(organization_id.to_lowercase())
        .bind(policy_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(policies)
    }

    async fn save_ram_resource(&self, account_id: &str, arn: &str, payload: Payload) -> Result<()> {
        if payload.is_empty() {
            return self.delete_ram_resource(account_id, arn).await;
        }
        let arn = Arn::parse(arn)?;
        sqlx::query(
            "INSERT INTO ram_resources (partition, account_id, region, arn, data)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(partition, account_id, region, arn) DO UPDATE SET data = excluded.data",
        )
        .bind(&self.partition)
        .bind(account_id.to_lowercase())
        .bind(ram_region(arn.region()))
        .bind(arn.as_str().to_lowercase())
        .bind(payload.to_storage_string()?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_ram_resource(&self, account_id: &str, arn: &str) -> Result<Option<Value>> {
        let arn = Arn::parse(arn)?;
        let data: Option<String> = sqlx::query_scalar(
            "SELECT data FROM ram_resources
             WHERE partition = ? AND account_id = ? AND region = ? AND arn = ?",
        )
        .bind(&self.partition)
        .bind(account_id.to_lowercase())
        .bind(ram_region(arn.region()))
        .bind(arn.as_str().to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        parse_data(data)
    }

    async fn delete_ram_resource(&self, account_id: &str, arn: &str) -> Result<()> {
        let arn = Arn::parse(arn)?;
        sqlx::query(
            "DELETE FROM ram_resources
             WHERE partition = ? AND account_id = ? AND region = ? AND arn = ?",
        )
        .bind(&self.partition)
        .bind(account_id.to_lowercase())
        .bind(ram_region(arn.region()))
        .bind(arn.as_str().to_lowercase())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_ram_resources(
        &self,
        account_id: &str,
        region: Option<&str>,
    ) -> Result<Vec<String>> {
        let arns: Vec<String> = sqlx::query_scalar(
            "SELECT arn FROM ram_resources
             WHERE partition = ? AND account_id = ? AND region = ?
             ORDER BY arn",
        )
        .bind(&self.partition)
        .bind(account_id.to_lowercase())
        .bind(ram_region(region))
        .fetch_all(&self.pool)
        .await?;
        Ok(arns)
    }

    async fn get_index(&self, name: &str, default: Value) -> Result<(Value, String)> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT data, hash FROM indexes WHERE partition = ? AND name = ?")
                .bind(&self.partition)
                .bind(name.to_lowercase())
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((data, hash)) => Ok((serde_json::from_str(&data)?, hash)),
            None => Ok((default, String::new())),
        }
    }

    async fn save_index(&self, name: &str, value: &Value, lock_token: &str) -> Result<bool> {
        let data = serde_json::to_string_pretty(value)?;
        let hash = content_hash(&data);

        // Inserts when absent; otherwise updates only if the stored hash
        // still equals the caller's token. Stored hashes are never empty.
        let result = sqlx::query(
            "INSERT INTO indexes (partition, name, data, hash) VALUES (?, ?, ?, ?)
             ON CONFLICT(partition, name)
             DO UPDATE SET data = excluded.data, hash = excluded.hash
             WHERE indexes.hash = ?",
        )
        .bind(&self.partition)
        .bind(name.to_lowercase())
        .bind(&data)
        .bind(&hash)
        .bind(lock_token)
        .execute(&self.pool)
        .await?;

        let written = result.rows_affected() == 1;
        debug!(index = %name, written, "Conditional index write");
        Ok(written)
    }
}
