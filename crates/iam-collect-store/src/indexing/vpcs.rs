//! VPC id to owning account and region

use super::{Indexer, ScopedEntry, regional_records, remove_scope};
use crate::error::Result;
use crate::store::AwsIamStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcEntry {
    pub arn: String,
    pub account_id: String,
    pub region: String,
}

impl ScopedEntry for VpcEntry {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    fn region(&self) -> Option<&str> {
        Some(&self.region)
    }
}

/// Maintains `vpcs`: VPC id to `{ arn, accountId, region }`.
#[derive(Debug, Clone, Copy, Default)]
pub struct VpcsIndexer;

impl Indexer for VpcsIndexer {
    type Data = BTreeMap<String, VpcEntry>;

    fn index_name(&self) -> &'static str {
        "vpcs"
    }

    async fn update_cache<S: AwsIamStore>(
        &self,
        cache: &mut Self::Data,
        account_id: &str,
        regions: &[String],
        store: &S,
    ) -> Result<()> {
        remove_scope(cache, account_id, regions);

        for (arn, _) in regional_records(store, account_id, regions, "ec2", "vpc").await? {
            let Some(region) = arn.region() else {
                continue;
            };
            cache.insert(
                arn.resource_path.clone(),
                VpcEntry {
                    arn: arn.as_str().to_string(),
                    account_id: account_id.to_string(),
                    region: region.to_string(),
                },
            );
        }
        Ok(())
    }
}
