//! Bucket name to owning account

use super::{Indexer, ScopedEntry, remove_scope};
use crate::error::Result;
use crate::store::AwsIamStore;
use iam_collect_common::{Arn, ResourceScope};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketEntry {
    pub account_id: String,
}

impl ScopedEntry for BucketEntry {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    // Bucket names are global
    fn region(&self) -> Option<&str> {
        None
    }
}

/// Maintains `buckets-to-accounts`: bucket name to `{ accountId }`.
///
/// Regions are ignored; every bucket of the account is re-indexed.
#[derive(Debug, Clone, Copy, Default)]
pub struct BucketsToAccountsIndexer;

impl Indexer for BucketsToAccountsIndexer {
    type Data = BTreeMap<String, BucketEntry>;

    fn index_name(&self) -> &'static str {
        "buckets-to-accounts"
    }

    async fn update_cache<S: AwsIamStore>(
        &self,
        cache: &mut Self::Data,
        account_id: &str,
        _regions: &[String],
        store: &S,
    ) -> Result<()> {
        remove_scope(cache, account_id, &[]);

        let buckets = store
            .list_resources(account_id, &ResourceScope::service("s3"))
            .await?;
        for arn in buckets {
            let arn = Arn::parse(&arn)?;
            cache.insert(
                arn.resource_path.clone(),
                BucketEntry {
                    account_id: account_id.to_string(),
                },
            );
        }
        Ok(())
    }
}
