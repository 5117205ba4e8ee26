//! Resource-type scopes
//!
//! A [`ResourceScope`] names one level of the resource hierarchy
//! (`service / region? / [aws] / resource_type?`) for listing and
//! reconciliation. Several logically distinct resource groups can share one
//! physical prefix, so a scope may also carry an equality filter over fields
//! of each resource's `metadata` record.

use crate::arn::{ResourceKey, type_segments};
use crate::defaults::AWS_OWNER;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Region wildcard: matches every resource that has a non-empty region
pub const ANY_REGION: &str = "*";

/// Scope of a resource-type listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceScope {
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    /// Owning account; `Some("aws")` selects AWS-owned resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// Top-level `metadata` fields that must equal the given strings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl ResourceScope {
    /// Scope covering every resource of a service with no region and no type
    pub fn service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Default::default()
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Add an equality condition on a field of the `metadata` record
    pub fn with_metadata(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(field.into(), value.into());
        self
    }

    /// Whether the scope selects AWS-owned resources
    pub fn is_aws_owned(&self) -> bool {
        self.account
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case(AWS_OWNER))
    }

    /// Whether the region is the [`ANY_REGION`] wildcard
    pub fn is_any_region(&self) -> bool {
        self.region.as_deref() == Some(ANY_REGION)
    }

    /// Lower-cased region, `None` when absent, blank or the wildcard
    pub fn concrete_region(&self) -> Option<String> {
        self.region
            .as_deref()
            .filter(|r| !r.trim().is_empty() && *r != ANY_REGION)
            .map(str::to_lowercase)
    }

    /// Lower-cased resource type, `None` when absent or blank
    pub fn resource_type_key(&self) -> Option<String> {
        self.resource_type
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(str::to_lowercase)
    }

    /// Account directory the scope lists under
    pub fn storage_account(&self, caller_account_id: &str) -> String {
        if self.is_aws_owned() {
            AWS_OWNER.to_string()
        } else {
            caller_account_id.to_ascii_lowercase()
        }
    }

    /// Type-level segments, with `*` in place of a wildcard region
    pub fn type_segments(&self) -> Vec<String> {
        let region = if self.is_any_region() {
            Some(ANY_REGION.to_string())
        } else {
            self.concrete_region()
        };
        type_segments(
            &self.service,
            region.as_deref(),
            self.is_aws_owned(),
            self.resource_type_key().as_deref(),
        )
    }

    /// Whether a resource key sits exactly at this scope's level.
    ///
    /// Buckets and access points share the `s3` prefix; comparing the full
    /// type-level key keeps them apart.
    pub fn matches_key(&self, key: &ResourceKey) -> bool {
        let region_matches = if self.is_any_region() {
            key.region.is_some()
        } else {
            key.region == self.concrete_region()
        };
        region_matches
            && key.service == self.service.to_lowercase()
            && key.aws_owned == self.is_aws_owned()
            && key.resource_type == self.resource_type_key()
    }

    /// Whether a `metadata` record passes the scope's field filter.
    ///
    /// String fields compare as-is; other scalar fields compare by their JSON
    /// text. A missing field never matches.
    pub fn matches_metadata(&self, metadata: &Value) -> bool {
        let Some(filter) = &self.metadata else {
            return true;
        };
        filter.iter().all(|(field, expected)| {
            match metadata.get(field) {
                Some(Value::String(actual)) => actual == expected,
                Some(Value::Null) | None => false,
                Some(other) => other.to_string() == *expected,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Arn;
    use serde_json::json;

    #[test]
    fn test_type_segments() {
        let scope = ResourceScope::service("S3")
            .with_region("US-EAST-1")
            .with_resource_type("AccessPoint");
        assert_eq!(scope.type_segments(), vec!["s3", "us-east-1", "accesspoint"]);

        let buckets = ResourceScope::service("s3");
        assert_eq!(buckets.type_segments(), vec!["s3"]);
    }

    #[test]
    fn test_aws_owned_scope() {
        let scope = ResourceScope::service("iam")
            .with_resource_type("policy")
            .with_account("AWS");
        assert!(scope.is_aws_owned());
        assert_eq!(scope.storage_account("123456789012"), "aws");
        assert_eq!(scope.type_segments(), vec!["iam", "aws", "policy"]);
    }

    #[test]
    fn test_any_region() {
        let scope = ResourceScope::service("ec2")
            .with_region(ANY_REGION)
            .with_resource_type("vpc");
        assert!(scope.is_any_region());
        assert_eq!(scope.concrete_region(), None);
        assert_eq!(scope.type_segments(), vec!["ec2", "*", "vpc"]);
    }

    #[test]
    fn test_matches_key() {
        let bucket = Arn::parse("arn:aws:s3:::b1").unwrap().key();
        let ap = Arn::parse("arn:aws:s3:us-east-1:123456789012:accesspoint/ap1")
            .unwrap()
            .key();

        let buckets = ResourceScope::service("s3");
        assert!(buckets.matches_key(&bucket));
        assert!(!buckets.matches_key(&ap));

        let access_points = ResourceScope::service("s3")
            .with_region("us-east-1")
            .with_resource_type("accesspoint");
        assert!(access_points.matches_key(&ap));
        assert!(!access_points.matches_key(&bucket));

        let any = ResourceScope::service("S3")
            .with_region(ANY_REGION)
            .with_resource_type("AccessPoint");
        assert!(any.matches_key(&ap));

        let managed = Arn::parse("arn:aws:iam::aws:policy/ReadOnlyAccess").unwrap().key();
        let policies = ResourceScope::service("iam").with_resource_type("policy");
        assert!(!policies.matches_key(&managed));
        assert!(policies.with_account("aws").matches_key(&managed));
    }

    #[test]
    fn test_metadata_filter() {
        let scope = ResourceScope::service("s3").with_metadata("kind", "directory");
        assert!(scope.matches_metadata(&json!({"kind": "directory", "name": "b"})));
        assert!(!scope.matches_metadata(&json!({"kind": "general"})));
        assert!(!scope.matches_metadata(&json!({"name": "b"})));

        let numeric = ResourceScope::service("x").with_metadata("count", "3");
        assert!(numeric.matches_metadata(&json!({"count": 3})));

        assert!(ResourceScope::service("s3").matches_metadata(&json!({})));
    }
}
