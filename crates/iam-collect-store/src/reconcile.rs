//! Set-difference reconciliation
//!
//! Sync routines hand over the complete set of resources they observed;
//! whatever is stored but not observed is stale. Nothing is ever merged.

use crate::error::Result;
use iam_collect_common::{Arn, ResourceKey};
use std::collections::HashSet;

/// Existing ARNs whose storage key no desired ARN maps to.
///
/// Keys are compared rather than raw strings, so case differences in the
/// desired ARNs do not cause deletes. A malformed desired ARN is an error;
/// an existing ARN that fails to parse is left alone.
pub fn stale_resources(existing: &[String], desired: &[String]) -> Result<Vec<String>> {
    let desired_keys = desired
        .iter()
        .map(|arn| Arn::parse(arn).map(|arn| arn.key()))
        .collect::<std::result::Result<HashSet<ResourceKey>, _>>()?;

    Ok(existing
        .iter()
        .filter(|arn| {
            Arn::parse(arn)
                .map(|arn| !desired_keys.contains(&arn.key()))
                .unwrap_or(false)
        })
        .cloned()
        .collect())
}

/// Existing RAM ARNs missing from the desired set, compared case-insensitively
pub fn stale_ram_resources(existing: &[String], desired: &[String]) -> Vec<String> {
    let desired: HashSet<String> = desired.iter().map(|arn| arn.to_lowercase()).collect();
    existing
        .iter()
        .filter(|arn| !desired.contains(&arn.to_lowercase()))
        .cloned()
        .collect()
}
