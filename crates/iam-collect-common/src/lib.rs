//! iam-collect-common - Shared types for the iam-collect storage core
//!
//! This crate holds the pure, I/O-free pieces used by every storage backend,
//! without any AWS SDK or database dependencies to keep it lightweight.
//!
//! ## Modules
//!
//! - [`arn`]: ARN parsing and the lower-cased storage key derived from it
//! - [`defaults`]: Shared constants (metadata names, retry budget, schema version)
//! - [`organization`]: Organization policy kinds (SCPs and RCPs)
//! - [`payload`]: Metadata payloads and the tombstone emptiness predicate
//! - [`scope`]: Resource-type scopes used for listing and reconciliation

pub mod arn;
pub mod defaults;
pub mod organization;
pub mod payload;
pub mod scope;

// Re-export commonly used types
pub use arn::{Arn, ArnError, ResourceKey, decode_segment, encode_segment};
pub use organization::OrganizationPolicyType;
pub use payload::{Payload, PayloadShape};
pub use scope::{ANY_REGION, ResourceScope};
