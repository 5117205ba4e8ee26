//! ARN parsing and storage key derivation
//!
//! An [`Arn`] keeps the original casing of every field so it can be echoed
//! back inside stored payloads. A [`ResourceKey`] is the lower-cased,
//! percent-encoded form used to address storage. Both the path-based
//! backends and SQLite derive their keys from the same [`ResourceKey`], so
//! addressing is identical regardless of backend.

use crate::defaults::AWS_OWNER;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Characters escaped in a key segment.
///
/// Matches `encodeURIComponent`: everything except ASCII alphanumerics and
/// `- _ . ! ~ * ' ( )`.
const SEGMENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Errors produced while parsing an ARN
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArnError {
    #[error("ARN must start with 'arn:': '{0}'")]
    MissingPrefix(String),

    #[error("ARN must have six ':'-separated fields: '{0}'")]
    TooFewFields(String),

    #[error("ARN has an empty {field}: '{arn}'")]
    EmptyField { field: &'static str, arn: String },
}

/// A parsed Amazon Resource Name
///
/// Fields keep their original casing; use [`Arn::key`] for storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Arn {
    raw: String,
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account_id: String,
    pub resource_type: String,
    pub resource_path: String,
}

impl Arn {
    /// Parse an ARN of the form `arn:partition:service:region:account:resource`.
    pub fn parse(arn: &str) -> Result<Self, ArnError> {
        let mut fields = arn.splitn(6, ':');
        if fields.next() != Some("arn") {
            return Err(ArnError::MissingPrefix(arn.to_string()));
        }

        let (Some(partition), Some(service), Some(region), Some(account_id), Some(resource)) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) else {
            return Err(ArnError::TooFewFields(arn.to_string()));
        };

        for (field, value) in [
            ("partition", partition),
            ("service", service),
            ("resource", resource),
        ] {
            if value.trim().is_empty() {
                return Err(ArnError::EmptyField {
                    field,
                    arn: arn.to_string(),
                });
            }
        }

        let (resource_type, resource_path) = split_resource(service, region, account_id, resource);

        Ok(Self {
            raw: arn.to_string(),
            partition: partition.to_string(),
            service: service.to_string(),
            region: region.to_string(),
            account_id: account_id.to_string(),
            resource_type: resource_type.to_string(),
            resource_path: resource_path.to_string(),
        })
    }

    /// The ARN exactly as it was supplied
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the resource belongs to AWS itself (e.g. managed policies)
    pub fn is_aws_owned(&self) -> bool {
        self.account_id.eq_ignore_ascii_case(AWS_OWNER)
    }

    /// Region of the resource, `None` for global resources
    pub fn region(&self) -> Option<&str> {
        non_blank(&self.region)
    }

    /// Lower-cased storage key for this resource
    pub fn key(&self) -> ResourceKey {
        ResourceKey::from(self)
    }

    /// Account directory the resource is filed under.
    ///
    /// AWS-owned resources always land under [`AWS_OWNER`] so they are stored
    /// once no matter which account observed them.
    pub fn storage_account(&self, caller_account_id: &str) -> String {
        if self.is_aws_owned() {
            AWS_OWNER.to_string()
        } else {
            caller_account_id.to_ascii_lowercase()
        }
    }
}

impl FromStr for Arn {
    type Err = ArnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Arn::parse(s)
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Split the resource field into `(resource_type, resource_path)`.
///
/// S3 bucket and object ARNs carry no region or account and have no type.
fn split_resource<'a>(
    service: &str,
    region: &str,
    account_id: &str,
    resource: &'a str,
) -> (&'a str, &'a str) {
    if service.eq_ignore_ascii_case("s3") && region.is_empty() && account_id.is_empty() {
        return ("", resource);
    }

    match resource.find(['/', ':']) {
        Some(idx) => (&resource[..idx], &resource[idx + 1..]),
        None => ("", resource),
    }
}

fn non_blank(s: &str) -> Option<&str> {
    if s.trim().is_empty() { None } else { Some(s) }
}

/// Percent-encode and lower-case a single key segment
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(&segment.to_lowercase(), SEGMENT_ENCODE_SET)
        .to_string()
        .to_lowercase()
}

/// Reverse [`encode_segment`]; `None` if the segment is not valid UTF-8
/// once decoded
pub fn decode_segment(segment: &str) -> Option<String> {
    percent_decode_str(segment)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}

/// Lower-cased storage key of a resource, relative to its account directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub service: String,
    pub region: Option<String>,
    pub aws_owned: bool,
    pub resource_type: Option<String>,
    pub resource_path: String,
}

impl ResourceKey {
    /// Segments down to the resource type, with blank segments omitted
    pub fn type_segments(&self) -> Vec<String> {
        type_segments(
            &self.service,
            self.region.as_deref(),
            self.aws_owned,
            self.resource_type.as_deref(),
        )
    }

    /// Full list of segments, ending with the encoded resource path
    pub fn segments(&self) -> Vec<String> {
        let mut segments = self.type_segments();
        segments.push(encode_segment(&self.resource_path));
        segments
    }

    /// The segments joined with `/`
    pub fn storage_key(&self) -> String {
        self.segments().join("/")
    }

    /// Lower-cased ARN that parses back to this key.
    ///
    /// Keys do not keep the original casing or the separator between type
    /// and path, so the result uses `/`.
    pub fn to_arn(&self, partition: &str, account_id: &str) -> String {
        let region = self.region.as_deref().unwrap_or_default();
        let account = if self.aws_owned {
            AWS_OWNER.to_string()
        } else {
            account_id.to_ascii_lowercase()
        };
        let resource = match &self.resource_type {
            Some(resource_type) => format!("{resource_type}/{}", self.resource_path),
            None => self.resource_path.clone(),
        };
        if self.service == "s3" && self.region.is_none() && self.resource_type.is_none() {
            return format!("arn:{}:s3:::{resource}", partition.to_lowercase());
        }
        format!(
            "arn:{}:{}:{region}:{account}:{resource}",
            partition.to_lowercase(),
            self.service
        )
    }
}

impl From<&Arn> for ResourceKey {
    fn from(arn: &Arn) -> Self {
        Self {
            service: arn.service.to_lowercase(),
            region: arn.region().map(str::to_lowercase),
            aws_owned: arn.is_aws_owned(),
            resource_type: non_blank(&arn.resource_type).map(str::to_lowercase),
            resource_path: arn.resource_path.to_lowercase(),
        }
    }
}

/// Build the lower-cased type-level segments, skipping blank parts
pub(crate) fn type_segments(
    service: &str,
    region: Option<&str>,
    aws_owned: bool,
    resource_type: Option<&str>,
) -> Vec<String> {
    let mut segments = vec![service.to_lowercase()];
    if let Some(region) = region.and_then(non_blank) {
        segments.push(region.to_lowercase());
    }
    if aws_owned {
        segments.push(AWS_OWNER.to_string());
    }
    if let Some(resource_type) = resource_type.and_then(non_blank) {
        segments.push(resource_type.to_lowercase());
    }
    segments
}
