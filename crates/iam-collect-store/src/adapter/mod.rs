//! Persistence adapters for the path-based store
//!
//! An adapter knows nothing about ARNs or accounts; it reads and writes
//! opaque `/`-separated paths relative to its own root:
//! - [`FileSystemAdapter`]: a local directory
//! - [`S3PathAdapter`]: a bucket and optional key prefix
//! - [`InMemoryPathAdapter`]: a shared map, for tests and embedding
//!
//! Lock tokens are backend-specific and must only be compared with tokens
//! from the same adapter type.

mod file;
mod memory;
mod s3;

pub use file::FileSystemAdapter;
pub use memory::InMemoryPathAdapter;
pub use s3::S3PathAdapter;

use crate::error::Result;
use crate::paths::join_path;
use futures::{StreamExt, TryStreamExt};
use iam_collect_common::defaults::FIND_READ_CONCURRENCY;
use sha2::{Digest, Sha256};
use std::future::Future;
use tracing::debug;

/// Primitive storage operations over opaque paths.
pub trait PersistenceAdapter: Send + Sync {
    /// Overwrite `path` unconditionally, creating parents as needed
    fn write_file(&self, path: &str, data: &str) -> impl Future<Output = Result<()>> + Send;

    /// Write `path` only if it is absent or its current token equals
    /// `lock_token`.
    ///
    /// Returns `Ok(false)` on a lost race and leaves the object untouched.
    fn write_with_optimistic_lock(
        &self,
        path: &str,
        data: &str,
        lock_token: &str,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Read `path`, `None` if absent
    fn read_file(&self, path: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Read `path` together with its current lock token, `None` if absent
    fn read_file_with_hash(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Option<(String, String)>>> + Send;

    /// Delete `path`; absent paths are not an error
    fn delete_file(&self, path: &str) -> impl Future<Output = Result<()>> + Send;

    /// Delete everything under `prefix`; absent prefixes are not an error
    fn delete_directory(&self, prefix: &str) -> impl Future<Output = Result<()>> + Send;

    /// Names of the immediate children of `prefix`, sorted
    fn list_directory(&self, prefix: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Directories reached by expanding `segments` under `base`, in path
    /// order.
    ///
    /// A `*` segment expands to every immediate child except one named
    /// `skip`. Expansion is breadth-first and stops early once nothing is
    /// left to expand.
    fn expand_pattern(
        &self,
        base: &str,
        segments: &[&str],
        skip: &str,
    ) -> impl Future<Output = Result<Vec<String>>> + Send {
        async move {
            let mut frontier = vec![base.to_string()];
            for segment in segments {
                let mut next = Vec::new();
                for dir in &frontier {
                    if *segment == "*" {
                        for child in self.list_directory(dir).await? {
                            if child != skip {
                                next.push(join_path(&[dir.as_str(), child.as_str()]));
                            }
                        }
                    } else {
                        next.push(join_path(&[dir.as_str(), *segment]));
                    }
                }
                if next.is_empty() {
                    return Ok(Vec::new());
                }
                frontier = next;
            }
            Ok(frontier)
        }
    }

    /// Expand `segments` under `base` and read `filename` at every leaf.
    ///
    /// Wildcards never expand to `filename` itself; leaves without
    /// `filename` are skipped. Contents are returned in path order.
    fn find_with_pattern(
        &self,
        base: &str,
        segments: &[&str],
        filename: &str,
    ) -> impl Future<Output = Result<Vec<String>>> + Send {
        async move {
            let frontier = self.expand_pattern(base, segments, filename).await?;

            debug!(base = %base, leaves = frontier.len(), filename = %filename, "Reading pattern leaves");

            let leaves: Vec<String> = frontier
                .iter()
                .map(|dir| join_path(&[dir.as_str(), filename]))
                .collect();
            let contents: Vec<Option<String>> = futures::stream::iter(leaves)
                .map(|path| async move { self.read_file(&path).await })
                .buffered(FIND_READ_CONCURRENCY)
                .try_collect()
                .await?;

            Ok(contents.into_iter().flatten().collect())
        }
    }
}

/// Content-derived lock token used by the file and in-memory adapters
pub fn content_hash(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}
