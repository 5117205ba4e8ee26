//! S3 persistence adapter
//!
//! Paths map to object keys under an optional prefix. Directories are
//! emulated with `/`-delimited listings. Optimistic writes use S3
//! conditional puts (`If-Match` / `If-None-Match`), with the object's ETag
//! as the lock token.

use super::PersistenceAdapter;
use crate::config::S3StorageConfig;
use crate::context::AwsContext;
use crate::error::{Result, S3ErrorKind, StoreError, classify_s3_error};
use crate::paths::join_path;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use std::collections::BTreeSet;
use tracing::debug;

/// `DeleteObjects` accepts at most this many keys per request
const DELETE_BATCH_SIZE: usize = 1000;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Adapter over one bucket and optional key prefix
#[derive(Debug, Clone)]
pub struct S3PathAdapter {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl S3PathAdapter {
    /// Build an adapter from a shared AWS context and the storage config
    pub fn new(aws: &AwsContext, config: &S3StorageConfig) -> Result<Self> {
        Self::from_client(aws.s3_client(config), &config.bucket, config.prefix.as_deref())
    }

    /// Build an adapter around an existing client
    pub fn from_client(client: Client, bucket: &str, prefix: Option<&str>) -> Result<Self> {
        if bucket.trim().is_empty() {
            return Err(StoreError::validation("S3 bucket name is required"));
        }
        let prefix = prefix
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            prefix,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Object key for a store-relative path
    fn key(&self, path: &str) -> String {
        match &self.prefix {
            Some(prefix) => join_path(&[prefix.as_str(), path]),
            None => join_path(&[path]),
        }
    }

    /// Key prefix for listing the children of a directory
    fn dir_key(&self, path: &str) -> String {
        let key = self.key(path);
        if key.is_empty() { key } else { format!("{key}/") }
    }

    async fn get(&self, key: &str) -> Result<Option<(String, String)>> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let (kind, error) = map_s3_error(e, key);
                return match kind {
                    S3ErrorKind::NotFound => Ok(None),
                    _ => Err(error),
                };
            }
        };

        let etag = response.e_tag().map(normalize_etag).unwrap_or_default();
        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| s3_error(key, format!("Failed to read S3 body: {e}")))?
            .into_bytes();
        let data = String::from_utf8(bytes.to_vec())
            .map_err(|e| s3_error(key, format!("Object is not UTF-8: {e}")))?;

        debug!(bucket = %self.bucket, key = %key, bytes = data.len(), "Read object");
        Ok(Some((data, etag)))
    }

    /// Conditional put; `None` as `if_match` means "only if absent"
    async fn put_conditional(&self, key: &str, data: &str, if_match: Option<&str>) -> Result<bool> {
        let mut if_match = if_match;
        loop {
            let request = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .content_type(JSON_CONTENT_TYPE)
                .body(ByteStream::from(data.as_bytes().to_vec()));
            let request = match if_match {
                Some(etag) => request.if_match(quote_etag(etag)),
                None => request.if_none_match("*"),
            };

            match request.send().await {
                Ok(_) => return Ok(true),
                Err(e) => {
                    let (kind, error) = map_s3_error(e, key);
                    match kind {
                        S3ErrorKind::PreconditionFailed => return Ok(false),
                        // If-Match against a missing object: absence accepts any token
                        S3ErrorKind::NotFound if if_match.is_some() => if_match = None,
                        _ => return Err(error),
                    }
                }
            }
        }
    }

    /// Every object key under `prefix`, across all pages
    async fn list_all_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| map_s3_error(e, prefix).1)?;
            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match response.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(keys)
    }

    async fn delete_batch(&self, keys: &[String]) -> Result<()> {
        let objects = keys
            .iter()
            .map(|key| {
                ObjectIdentifier::builder()
                    .key(key)
                    .build()
                    .map_err(|e| s3_error(key, e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| s3_error(&self.bucket, e.to_string()))?;

        let output = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| map_s3_error(e, &self.bucket).1)?;

        if let Some(failed) = output.errors().first() {
            return Err(StoreError::S3 {
                key: failed.key().unwrap_or_default().to_string(),
                code: failed.code().map(str::to_string),
                status: None,
                message: failed.message().unwrap_or("delete failed").to_string(),
            });
        }
        Ok(())
    }
}

impl PersistenceAdapter for S3PathAdapter {
    async fn write_file(&self, path: &str, data: &str) -> Result<()> {
        let key = self.key(path);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(JSON_CONTENT_TYPE)
            .body(ByteStream::from(data.as_bytes().to_vec()))
            .send()
            .await
            .map_err(|e| map_s3_error(e, &key).1)?;

        debug!(bucket = %self.bucket, key = %key, bytes = data.len(), "Wrote object");
        Ok(())
    }

    async fn write_with_optimistic_lock(
        &self,
        path: &str,
        data: &str,
        lock_token: &str,
    ) -> Result<bool> {
        let key = self.key(path);
        let if_match = Some(lock_token).filter(|t| !t.is_empty());
        let written = self.put_conditional(&key, data, if_match).await?;
        debug!(bucket = %self.bucket, key = %key, written, "Conditional write");
        Ok(written)
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>> {
        Ok(self.get(&self.key(path)).await?.map(|(data, _)| data))
    }

    async fn read_file_with_hash(&self, path: &str) -> Result<Option<(String, String)>> {
        self.get(&self.key(path)).await
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let key = self.key(path);
        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => {
                debug!(bucket = %self.bucket, key = %key, "Deleted object");
                Ok(())
            }
            Err(e) => match map_s3_error(e, &key) {
                (S3ErrorKind::NotFound, _) => Ok(()),
                (_, error) => Err(error),
            },
        }
    }

    async fn delete_directory(&self, prefix: &str) -> Result<()> {
        let dir = self.dir_key(prefix);
        if dir.is_empty() {
            return Err(StoreError::validation(
                "Refusing to delete the whole bucket root",
            ));
        }

        let keys = self.list_all_keys(&dir).await?;
        for batch in keys.chunks(DELETE_BATCH_SIZE) {
            self.delete_batch(batch).await?;
        }

        debug!(bucket = %self.bucket, prefix = %dir, deleted = keys.len(), "Deleted prefix");
        Ok(())
    }

    async fn list_directory(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.dir_key(prefix);
        let mut names = BTreeSet::new();
        let mut continuation_token = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&dir)
                .delimiter("/");
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| map_s3_error(e, &dir).1)?;

            for common in response.common_prefixes() {
                if let Some(name) = common.prefix().and_then(|p| child_name(&dir, p)) {
                    names.insert(name);
                }
            }
            for object in response.contents() {
                if let Some(name) = object.key().and_then(|k| child_name(&dir, k)) {
                    names.insert(name);
                }
            }

            match response.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(names.into_iter().collect())
    }
}

/// Strip the surrounding quotes S3 puts on ETags
pub fn normalize_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

/// S3 expects `If-Match` values quoted
fn quote_etag(etag: &str) -> String {
    if etag.starts_with('"') {
        etag.to_string()
    } else {
        format!("\"{etag}\"")
    }
}

/// Name of the immediate child of `dir` that `key` points into
fn child_name(dir: &str, key: &str) -> Option<String> {
    let rest = key.strip_prefix(dir)?.trim_end_matches('/');
    let name = rest.split('/').next()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn s3_error(key: &str, message: String) -> StoreError {
    StoreError::S3 {
        key: key.to_string(),
        code: None,
        status: None,
        message,
    }
}

/// Classify an SDK error by code and HTTP status and convert it
fn map_s3_error<E>(err: SdkError<E>, key: &str) -> (S3ErrorKind, StoreError)
where
    E: ProvideErrorMetadata + std::fmt::Debug,
{
    let status = match &err {
        SdkError::ServiceError(service_err) => Some(service_err.raw().status().as_u16()),
        _ => None,
    };
    let code = err.code().map(str::to_string);
    let kind = classify_s3_error(code.as_deref(), status);
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{err:?}"));

    (
        kind,
        StoreError::S3 {
            key: key.to_string(),
            code,
            status,
            message,
        },
    )
}
