//! VPC endpoint id to owning account, region and VPC

use super::{Indexer, ScopedEntry, regional_records, remove_scope};
use crate::error::Result;
use crate::store::AwsIamStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcEndpointEntry {
    pub arn: String,
    pub account_id: String,
    pub region: String,
    pub vpc: String,
}

impl ScopedEntry for VpcEndpointEntry {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    fn region(&self) -> Option<&str> {
        Some(&self.region)
    }
}

/// Maintains `vpc-endpoints`: endpoint id to `{ arn, accountId, region, vpc }`.
///
/// The VPC comes from the `vpcId` field of the endpoint's `metadata` record;
/// endpoints without one are not indexed.
#[derive(Debug, Clone, Copy, Default)]
pub struct VpcEndpointsIndexer;

impl Indexer for VpcEndpointsIndexer {
    type Data = BTreeMap<String, VpcEndpointEntry>;

    fn index_name(&self) -> &'static str {
        "vpc-endpoints"
    }

    async fn update_cache<S: AwsIamStore>(
        &self,
        cache: &mut Self::Data,
        account_id: &str,
        regions: &[String],
        store: &S,
    ) -> Result<()> {
        remove_scope(cache, account_id, regions);

        let records = regional_records(store, account_id, regions, "ec2", "vpc-endpoint").await?;
        for (arn, record) in records {
            let (Some(region), Some(vpc)) = (
                arn.region(),
                record.get("vpcId").and_then(Value::as_str),
            ) else {
                debug!(arn = %arn, "Skipping VPC endpoint without region or vpcId");
                continue;
            };
            cache.insert(
                arn.resource_path.clone(),
                VpcEndpointEntry {
                    arn: arn.as_str().to_string(),
                    account_id: account_id.to_string(),
                    region: region.to_string(),
                    vpc: vpc.to_string(),
                },
            );
        }
        Ok(())
    }
}
