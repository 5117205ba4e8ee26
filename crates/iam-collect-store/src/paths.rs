//! Path layout for the path-based backends
//!
//! ```text
//! <partition>/accounts/<account>/<metadataType>.json
//! <partition>/accounts/<account>/<service>/<region?>/[aws]/<type?>/<encoded-path>/<metadataType>.json
//! <partition>/accounts/<account>/ram/<region|global>/<encoded-arn>.json
//! <partition>/organizations/<org>/<metadataType>.json
//! <partition>/organizations/<org>/ous/<ou>/<metadataType>.json
//! <partition>/organizations/<org>/<scps|rcps>/<policy>/<metadataType>.json
//! <partition>/indexes/<name>.json
//! ```
//!
//! Every segment is lower-cased and blank segments are dropped. Adapters
//! resolve these relative paths against their own root (directory, bucket
//! prefix or map).

use iam_collect_common::defaults::{GLOBAL_REGION, JSON_EXTENSION};
use iam_collect_common::{
    Arn, OrganizationPolicyType, ResourceKey, ResourceScope, decode_segment, encode_segment,
};

/// Join segments with `/`, skipping blank ones
pub fn join_path<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .map(|s| s.as_ref().trim_matches('/'))
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn json_file(name: &str) -> String {
    format!("{}{}", name.to_lowercase(), JSON_EXTENSION)
}

/// Builds every storage path for one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    partition: String,
}

impl StorePaths {
    pub fn new(partition: &str) -> Self {
        Self {
            partition: partition.to_lowercase(),
        }
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// `<partition>/accounts`
    pub fn accounts_root(&self) -> String {
        join_path(&[self.partition.as_str(), "accounts"])
    }

    /// `<partition>/accounts/<account>`
    pub fn account_dir(&self, account_id: &str) -> String {
        join_path(&[self.accounts_root(), account_id.to_lowercase()])
    }

    pub fn account_metadata(&self, account_id: &str, metadata_type: &str) -> String {
        join_path(&[self.account_dir(account_id), json_file(metadata_type)])
    }

    /// Directory holding every metadata record of one resource
    pub fn resource_prefix(&self, account_id: &str, arn: &Arn) -> String {
        let mut segments = vec![self.account_dir(&arn.storage_account(account_id))];
        segments.extend(arn.key().segments());
        join_path(&segments)
    }

    pub fn resource_metadata(&self, account_id: &str, arn: &Arn, metadata_type: &str) -> String {
        join_path(&[self.resource_prefix(account_id, arn), json_file(metadata_type)])
    }

    /// Directory holding every resource of a scope, without the resource path.
    ///
    /// A wildcard region is rendered as `*`; callers expand it through
    /// [`StorePaths::resource_type_pattern`].
    pub fn resource_type_prefix(&self, account_id: &str, scope: &ResourceScope) -> String {
        let mut segments = vec![self.account_dir(&scope.storage_account(account_id))];
        segments.extend(scope.type_segments());
        join_path(&segments)
    }

    /// Literal base plus wildcard segments that reach each resource directory
    /// of a scope.
    pub fn resource_type_pattern(
        &self,
        account_id: &str,
        scope: &ResourceScope,
    ) -> (String, Vec<String>) {
        let mut base = vec![self.account_dir(&scope.storage_account(account_id))];
        let mut pattern = Vec::new();
        for segment in scope.type_segments() {
            if pattern.is_empty() && segment != "*" {
                base.push(segment);
            } else {
                pattern.push(segment);
            }
        }
        pattern.push("*".to_string());
        (join_path(&base), pattern)
    }

    /// Key of the resource stored in `dir`, one of the directories reached
    /// by expanding [`StorePaths::resource_type_pattern`] from `base`.
    ///
    /// The region comes from the first expanded segment when the scope spans
    /// every region; the resource path is the decoded last segment.
    pub fn resource_key_at(scope: &ResourceScope, base: &str, dir: &str) -> Option<ResourceKey> {
        let relative = dir.strip_prefix(base)?.trim_start_matches('/');
        let segments: Vec<&str> = relative.split('/').collect();
        let resource_path = decode_segment(segments.last().filter(|s| !s.is_empty())?)?;
        let region = if scope.is_any_region() {
            Some(segments.first().filter(|_| segments.len() > 1)?.to_string())
        } else {
            scope.concrete_region()
        };
        Some(ResourceKey {
            service: scope.service.to_lowercase(),
            region,
            aws_owned: scope.is_aws_owned(),
            resource_type: scope.resource_type_key(),
            resource_path,
        })
    }

    /// `<account>/ram/<region|global>`
    pub fn ram_dir(&self, account_id: &str, region: Option<&str>) -> String {
        let region = region
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(GLOBAL_REGION);
        join_path(&[self.account_dir(account_id), "ram".to_string(), region.to_lowercase()])
    }

    pub fn ram_resource(&self, account_id: &str, arn: &Arn) -> String {
        join_path(&[
            self.ram_dir(account_id, arn.region()),
            ram_file_name(arn.as_str()),
        ])
    }

    /// `<partition>/organizations/<org>`
    pub fn organization_dir(&self, organization_id: &str) -> String {
        join_path(&[
            self.partition.as_str(),
            "organizations",
            organization_id.to_lowercase().as_str(),
        ])
    }

    pub fn organization_metadata(&self, organization_id: &str, metadata_type: &str) -> String {
        join_path(&[self.organization_dir(organization_id), json_file(metadata_type)])
    }

    pub fn organizational_units_dir(&self, organization_id: &str) -> String {
        join_path(&[self.organization_dir(organization_id), "ous".to_string()])
    }

    pub fn organizational_unit_dir(&self, organization_id: &str, ou_id: &str) -> String {
        join_path(&[
            self.organizational_units_dir(organization_id),
            ou_id.to_lowercase(),
        ])
    }

    pub fn organizational_unit_metadata(
        &self,
        organization_id: &str,
        ou_id: &str,
        metadata_type: &str,
    ) -> String {
        join_path(&[
            self.organizational_unit_dir(organization_id, ou_id),
            json_file(metadata_type),
        ])
    }

    pub fn organization_policies_dir(
        &self,
        organization_id: &str,
        policy_type: OrganizationPolicyType,
    ) -> String {
        join_path(&[
            self.organization_dir(organization_id),
            policy_type.as_str().to_string(),
        ])
    }

    pub fn organization_policy_dir(
        &self,
        organization_id: &str,
        policy_type: OrganizationPolicyType,
        policy_id: &str,
    ) -> String {
        join_path(&[
            self.organization_policies_dir(organization_id, policy_type),
            policy_id.to_lowercase(),
        ])
    }

    pub fn organization_policy_metadata(
        &self,
        organization_id: &str,
        policy_type: OrganizationPolicyType,
        policy_id: &str,
        metadata_type: &str,
    ) -> String {
        join_path(&[
            self.organization_policy_dir(organization_id, policy_type, policy_id),
            json_file(metadata_type),
        ])
    }

    pub fn index(&self, index_name: &str) -> String {
        join_path(&[self.partition.as_str(), "indexes", json_file(index_name).as_str()])
    }
}

/// File name of a RAM resource record: the encoded, lower-cased ARN
pub fn ram_file_name(arn: &str) -> String {
    format!("{}{}", encode_segment(arn), JSON_EXTENSION)
}

/// Recover the lower-cased ARN from a RAM record file name
pub fn ram_arn_from_file_name(name: &str) -> Option<String> {
    decode_segment(name.strip_suffix(JSON_EXTENSION)?)
}
