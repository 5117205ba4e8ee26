//! Default values shared by every storage backend
//!
//! These constants keep the path layout, the SQLite schema and the indexer
//! retry policy in agreement across crates.

/// Metadata type holding the canonical description of a resource.
///
/// Listing filters by its fields and prefers its `arn` field for display.
pub const METADATA_TYPE: &str = "metadata";

/// File name of the canonical metadata record inside a resource directory
pub const METADATA_FILE: &str = "metadata.json";

/// Extension appended to every stored JSON document
pub const JSON_EXTENSION: &str = ".json";

/// Owner segment used for resources that belong to AWS itself
pub const AWS_OWNER: &str = "aws";

/// Region segment used for RAM resources whose ARN carries no region
pub const GLOBAL_REGION: &str = "global";

/// Maximum fetch/mutate/save attempts for one index update cycle
pub const MAX_INDEX_SAVE_ATTEMPTS: usize = 3;

/// Initial backoff between index save attempts in milliseconds
pub const INDEX_RETRY_MIN_DELAY_MS: u64 = 50;

/// Maximum backoff between index save attempts in milliseconds
pub const INDEX_RETRY_MAX_DELAY_MS: u64 = 1000;

/// Age in seconds after which a file-backend lock is considered abandoned
pub const FILE_LOCK_STALE_SECS: u64 = 30;

/// Number of leaf reads issued concurrently by pattern searches
pub const FIND_READ_CONCURRENCY: usize = 16;

/// Current SQLite schema version recorded in the `metadata` table
pub const SQLITE_SCHEMA_VERSION: &str = "1";
