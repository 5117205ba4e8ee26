//! AWS Organizations policy kinds

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of organization policies persisted per organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrganizationPolicyType {
    /// Service control policies
    Scps,
    /// Resource control policies
    Rcps,
}

impl OrganizationPolicyType {
    /// Storage segment / column value for this policy type
    pub fn as_str(&self) -> &'static str {
        match self {
            OrganizationPolicyType::Scps => "scps",
            OrganizationPolicyType::Rcps => "rcps",
        }
    }

    /// Parse a policy type, accepting either case
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "scps" => Some(OrganizationPolicyType::Scps),
            "rcps" => Some(OrganizationPolicyType::Rcps),
            _ => None,
        }
    }
}

impl fmt::Display for OrganizationPolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(
            OrganizationPolicyType::parse("SCPS"),
            Some(OrganizationPolicyType::Scps)
        );
        assert_eq!(
            OrganizationPolicyType::parse("rcps"),
            Some(OrganizationPolicyType::Rcps)
        );
        assert_eq!(OrganizationPolicyType::parse("tag-policies"), None);
    }

    #[test]
    fn test_serde_uses_storage_names() {
        let json = serde_json::to_string(&OrganizationPolicyType::Rcps).unwrap();
        assert_eq!(json, "\"rcps\"");
    }
}
