//! Database schema management

use crate::error::{Result, StoreError};
use iam_collect_common::defaults::SQLITE_SCHEMA_VERSION;
use sqlx::SqlitePool;
use tracing::info;

/// Tables keyed by the same tuples as the path layout; every one carries
/// `partition` so one file can hold several partitions.
const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS resource_metadata (
        partition TEXT NOT NULL,
        account_id TEXT NOT NULL,
        service TEXT NOT NULL,
        region TEXT NOT NULL DEFAULT '',
        aws_owned INTEGER NOT NULL DEFAULT 0,
        resource_type TEXT NOT NULL DEFAULT '',
        resource_key TEXT NOT NULL,
        arn TEXT NOT NULL,
        metadata_type TEXT NOT NULL,
        data TEXT NOT NULL,
        PRIMARY KEY (partition, account_id, resource_key, metadata_type)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS account_metadata (
        partition TEXT NOT NULL,
        account_id TEXT NOT NULL,
        metadata_type TEXT NOT NULL,
        data TEXT NOT NULL,
        PRIMARY KEY (partition, account_id, metadata_type)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS organization_metadata (
        partition TEXT NOT NULL,
        organization_id TEXT NOT NULL,
        metadata_type TEXT NOT NULL,
        data TEXT NOT NULL,
        PRIMARY KEY (partition, organization_id, metadata_type)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS organizational_unit_metadata (
        partition TEXT NOT NULL,
        organization_id TEXT NOT NULL,
        ou_id TEXT NOT NULL,
        metadata_type TEXT NOT NULL,
        data TEXT NOT NULL,
        PRIMARY KEY (partition, organization_id, ou_id, metadata_type)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS organization_policy_metadata (
        partition TEXT NOT NULL,
        organization_id TEXT NOT NULL,
        policy_type TEXT NOT NULL,
        policy_id TEXT NOT NULL,
        metadata_type TEXT NOT NULL,
        data TEXT NOT NULL,
        PRIMARY KEY (partition, organization_id, policy_type, policy_id, metadata_type)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ram_resources (
        partition TEXT NOT NULL,
        account_id TEXT NOT NULL,
        region TEXT NOT NULL,
        arn TEXT NOT NULL,
        data TEXT NOT NULL,
        PRIMARY KEY (partition, account_id, region, arn)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS indexes (
        partition TEXT NOT NULL,
        name TEXT NOT NULL,
        data TEXT NOT NULL,
        hash TEXT NOT NULL,
        PRIMARY KEY (partition, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_resource_scope ON resource_metadata(partition, account_id, service, resource_type, metadata_type)",
];

/// Create tables if missing and record the schema and writer versions.
///
/// A database written with a different schema version is rejected.
pub(super) async fn setup_schema(pool: &SqlitePool) -> Result<()> {
    let tables_exist: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='metadata'",
    )
    .fetch_one(pool)
    .await?;

    if tables_exist {
        let version: Option<String> =
            sqlx::query_scalar("SELECT value FROM metadata WHERE key = 'schema_version'")
                .fetch_optional(pool)
                .await?;
        if let Some(version) = version.filter(|v| v != SQLITE_SCHEMA_VERSION) {
            return Err(StoreError::validation(format!(
                "unsupported SQLite schema version {version}, expected {SQLITE_SCHEMA_VERSION}"
            )));
        }
    } else {
        info!(schema_version = SQLITE_SCHEMA_VERSION, "Creating SQLite schema");
    }

    for statement in TABLES.iter().chain(INDEXES) {
        sqlx::query(statement).execute(pool).await?;
    }

    for (key, value) in [
        ("schema_version", SQLITE_SCHEMA_VERSION),
        ("writer_version", env!("CARGO_PKG_VERSION")),
    ] {
        sqlx::query(
            "INSERT INTO metadata (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
    }

    Ok(())
}
