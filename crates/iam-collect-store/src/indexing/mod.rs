//! Cross-account derived indexes
//!
//! An index is one JSON document per partition that many accounts
//! contribute to (e.g. bucket name to owning account). Each update runs
//!
//! ```text
//! fetch (value, lock token) -> mutate in memory -> conditional save
//! ```
//!
//! and restarts from a fresh fetch when another writer committed first. A
//! cycle that loses every one of its attempts fails with
//! [`StoreError::IndexConflict`].
//!
//! Mutation is delete-then-reinsert: every entry owned by the account and
//! regions being indexed is dropped, then rebuilt from what the store holds
//! for that scope. Entries of other accounts and regions are never touched.

mod buckets;
mod vpc_endpoints;
mod vpcs;

pub use buckets::{BucketEntry, BucketsToAccountsIndexer};
pub use vpc_endpoints::{VpcEndpointEntry, VpcEndpointsIndexer};
pub use vpcs::{VpcEntry, VpcsIndexer};

use crate::error::{Result, StoreError};
use crate::store::AwsIamStore;
use anyhow::Context;
use backon::{ExponentialBuilder, Retryable};
use iam_collect_common::defaults::{
    INDEX_RETRY_MAX_DELAY_MS, INDEX_RETRY_MIN_DELAY_MS, MAX_INDEX_SAVE_ATTEMPTS,
};
use iam_collect_common::{ANY_REGION, Arn, ResourceScope};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Maintains one named index.
pub trait Indexer: Send + Sync {
    /// In-memory form of the whole index
    type Data: Serialize + DeserializeOwned + Default + Send + Sync;

    fn index_name(&self) -> &'static str;

    /// Fetch the index and its lock token; a missing index is empty
    fn get_cache<S: AwsIamStore>(
        &self,
        store: &S,
    ) -> impl Future<Output = Result<(Self::Data, String)>> + Send {
        async move {
            let default = serde_json::to_value(Self::Data::default())?;
            let (value, lock_id) = store.get_index(self.index_name(), default).await?;
            Ok((serde_json::from_value(value)?, lock_id))
        }
    }

    /// Replace every entry owned by `account_id` in `regions` (all regions
    /// when empty) with what the store currently holds for that scope
    fn update_cache<S: AwsIamStore>(
        &self,
        cache: &mut Self::Data,
        account_id: &str,
        regions: &[String],
        store: &S,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Conditionally write the index; `false` means another writer won
    fn save_cache<S: AwsIamStore>(
        &self,
        store: &S,
        cache: &Self::Data,
        lock_id: &str,
    ) -> impl Future<Output = Result<bool>> + Send {
        async move {
            let value = serde_json::to_value(cache)?;
            store.save_index(self.index_name(), &value, lock_id).await
        }
    }
}

/// One account's contribution to one index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexJob {
    pub index_name: String,
    pub account_id: String,
    /// Regions to re-index; empty means all
    pub regions: Vec<String>,
}

impl IndexJob {
    pub fn new(index_name: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
            account_id: account_id.into(),
            regions: Vec::new(),
        }
    }

    pub fn with_regions<I, R>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.regions = regions.into_iter().map(Into::into).collect();
        self
    }
}

/// Run one fetch/mutate/save cycle for `jobs`, retrying on conflict.
///
/// All jobs are applied to the same fetched value so they commit together.
pub async fn update_index<S, I>(store: &S, indexer: &I, jobs: &[IndexJob]) -> Result<()>
where
    S: AwsIamStore,
    I: Indexer,
{
    let index_name = indexer.index_name();
    let attempts = AtomicUsize::new(0);

    (|| async {
        let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let (mut cache, lock_id) = indexer.get_cache(store).await?;
        for job in jobs {
            indexer
                .update_cache(&mut cache, &job.account_id, &job.regions, store)
                .await?;
        }

        if indexer.save_cache(store, &cache, &lock_id).await? {
            Ok(())
        } else {
            Err(StoreError::IndexConflict {
                index: index_name.to_string(),
                attempts: attempt,
            })
        }
    })
    .retry(
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(INDEX_RETRY_MIN_DELAY_MS))
            .with_max_delay(Duration::from_millis(INDEX_RETRY_MAX_DELAY_MS))
            .with_max_times(MAX_INDEX_SAVE_ATTEMPTS - 1),
    )
    .when(StoreError::is_conflict)
    .notify(|e, dur| {
        warn!(
            index = %index_name,
            delay = ?dur,
            error = %e,
            "Index changed underneath us, retrying from a fresh copy"
        );
    })
    .await?;

    info!(
        index = %index_name,
        jobs = jobs.len(),
        attempts = attempts.load(Ordering::Relaxed),
        "Index committed"
    );
    Ok(())
}

/// Indexers known by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownIndexer {
    BucketsToAccounts,
    Vpcs,
    VpcEndpoints,
}

impl KnownIndexer {
    pub const ALL: [KnownIndexer; 3] = [
        KnownIndexer::BucketsToAccounts,
        KnownIndexer::Vpcs,
        KnownIndexer::VpcEndpoints,
    ];

    pub fn name(self) -> &'static str {
        match self {
            KnownIndexer::BucketsToAccounts => BucketsToAccountsIndexer.index_name(),
            KnownIndexer::Vpcs => VpcsIndexer.index_name(),
            KnownIndexer::VpcEndpoints => VpcEndpointsIndexer.index_name(),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    async fn run<S: AwsIamStore>(self, store: &S, jobs: &[IndexJob]) -> Result<()> {
        match self {
            KnownIndexer::BucketsToAccounts => {
                update_index(store, &BucketsToAccountsIndexer, jobs).await
            }
            KnownIndexer::Vpcs => update_index(store, &VpcsIndexer, jobs).await,
            KnownIndexer::VpcEndpoints => update_index(store, &VpcEndpointsIndexer, jobs).await,
        }
    }
}

/// Run every job, coalescing jobs for the same index into one cycle.
///
/// Indexes are processed in name order; the first failure stops the run.
pub async fn run_index_jobs<S: AwsIamStore>(store: &S, jobs: Vec<IndexJob>) -> anyhow::Result<()> {
    let mut by_index: BTreeMap<String, Vec<IndexJob>> = BTreeMap::new();
    for job in jobs {
        by_index.entry(job.index_name.clone()).or_default().push(job);
    }

    for (name, jobs) in by_index {
        let indexer = KnownIndexer::from_name(&name)
            .ok_or_else(|| StoreError::validation(format!("unknown index '{name}'")))?;
        indexer
            .run(store, &jobs)
            .await
            .with_context(|| format!("Failed to update index '{name}' for {} jobs", jobs.len()))?;
    }
    Ok(())
}

/// An index entry owned by one account and, optionally, one region
pub trait ScopedEntry {
    fn account_id(&self) -> &str;

    /// `None` for global resources
    fn region(&self) -> Option<&str>;
}

/// Drop every entry owned by `account_id` in `regions` (all when empty).
///
/// Global entries of the account are always dropped.
pub fn remove_scope<E: ScopedEntry>(
    cache: &mut BTreeMap<String, E>,
    account_id: &str,
    regions: &[String],
) {
    cache.retain(|_, entry| {
        let owned = entry.account_id().eq_ignore_ascii_case(account_id);
        let in_regions = match entry.region() {
            None => true,
            Some(region) => {
                regions.is_empty() || regions.iter().any(|r| r.eq_ignore_ascii_case(region))
            }
        };
        !(owned && in_regions)
    });
}

/// Resources of one regional resource type with their parsed ARNs and
/// `metadata` records (`null` when a resource has none)
pub(crate) async fn regional_records<S: AwsIamStore>(
    store: &S,
    account_id: &str,
    regions: &[String],
    service: &str,
    resource_type: &str,
) -> Result<Vec<(Arn, Value)>> {
    let base = ResourceScope::service(service).with_resource_type(resource_type);
    let scopes: Vec<ResourceScope> = if regions.is_empty() {
        vec![base.with_region(ANY_REGION)]
    } else {
        regions
            .iter()
            .map(|region| base.clone().with_region(region.as_str()))
            .collect()
    };

    let mut records = Vec::new();
    for scope in &scopes {
        for resource in store.find_resources(account_id, scope).await? {
            let arn = Arn::parse(&resource.arn)?;
            records.push((arn, resource.metadata.unwrap_or(Value::Null)));
        }
    }
    Ok(records)
}
