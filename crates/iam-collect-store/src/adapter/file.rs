//! Local filesystem persistence adapter

use super::{PersistenceAdapter, content_hash};
use crate::error::{Result, StoreError};
use iam_collect_common::defaults::FILE_LOCK_STALE_SECS;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

const LOCK_SUFFIX: &str = ".lock";
const TEMP_SUFFIX: &str = ".tmp";

/// Hex digits in the uuid that tags each temp file
const TEMP_TAG_LEN: usize = 32;

/// Adapter rooted at a local directory.
///
/// Every write lands in a uniquely named sibling temp file first and is
/// renamed into place, so readers never see a partially written file.
#[derive(Debug, Clone)]
pub struct FileSystemAdapter {
    root: PathBuf,
}

impl FileSystemAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a store-relative path, rejecting absolute paths and `..`
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if relative.is_absolute()
            || relative.components().any(|c| {
                matches!(
                    c,
                    Component::ParentDir | Component::RootDir | Component::Prefix(_)
                )
            })
        {
            return Err(StoreError::validation(format!(
                "Invalid storage path '{path}': must be relative without '..'"
            )));
        }
        Ok(self.root.join(relative))
    }

    async fn ensure_parent(target: &Path) -> Result<()> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent.display().to_string(), e))?;
        }
        Ok(())
    }

    /// Write through a temp file and rename over `target`
    async fn write_atomic(target: &Path, data: &str) -> Result<()> {
        Self::ensure_parent(target).await?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = target.with_file_name(format!(
            "{file_name}.{}{TEMP_SUFFIX}",
            uuid::Uuid::new_v4().simple()
        ));

        if let Err(e) = tokio::fs::write(&temp, data).await {
            return Err(StoreError::io(temp.display().to_string(), e));
        }
        if let Err(e) = tokio::fs::rename(&temp, target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(StoreError::io(target.display().to_string(), e));
        }
        Ok(())
    }

    async fn read_optional(target: &Path) -> Result<Option<String>> {
        match tokio::fs::read_to_string(target).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if is_absent(&e) => Ok(None),
            Err(e) => Err(StoreError::io(target.display().to_string(), e)),
        }
    }

    /// Compare the current content against `lock_token` and write on a match.
    /// Caller must hold the sibling lock file.
    async fn compare_and_write(target: &Path, data: &str, lock_token: &str) -> Result<bool> {
        if let Some(current) = Self::read_optional(target).await? {
            if content_hash(&current) != lock_token {
                return Ok(false);
            }
        }
        Self::write_atomic(target, data).await?;
        Ok(true)
    }
}

/// NotFound, or a path component that is a file rather than a directory
fn is_absent(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

/// Whether a file name is one of this adapter's own lock or temp files:
/// `<name>.lock` or `<name>.<32 hex>.tmp`
fn is_write_artifact(name: &str) -> bool {
    if name
        .strip_suffix(LOCK_SUFFIX)
        .is_some_and(|target| !target.is_empty())
    {
        return true;
    }
    name.strip_suffix(TEMP_SUFFIX)
        .and_then(|stem| stem.rsplit_once('.'))
        .is_some_and(|(target, tag)| {
            !target.is_empty()
                && tag.len() == TEMP_TAG_LEN
                && tag.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        })
}

/// An exclusive lock file, removed on drop if not released first
#[derive(Debug)]
struct LockGuard {
    path: Option<PathBuf>,
}

impl LockGuard {
    /// Create the lock file, `None` if another writer holds it.
    ///
    /// A lock older than [`FILE_LOCK_STALE_SECS`] belongs to a writer that
    /// died holding it and is reclaimed once.
    async fn acquire(path: PathBuf) -> Result<Option<Self>> {
        for reclaimed in [false, true] {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok(Some(Self { path: Some(path) })),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if reclaimed || !Self::is_stale(&path).await {
                        return Ok(None);
                    }
                    warn!(path = %path.display(), "Reclaiming stale lock");
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(StoreError::io(path.display().to_string(), e)),
                    }
                }
                Err(e) => return Err(StoreError::io(path.display().to_string(), e)),
            }
        }
        Ok(None)
    }

    async fn is_stale(path: &Path) -> bool {
        let Ok(metadata) = tokio::fs::metadata(path).await else {
            return false;
        };
        metadata
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > Duration::from_secs(FILE_LOCK_STALE_SECS))
    }

    async fn release(mut self) -> Result<()> {
        let Some(path) = self.path.take() else {
            return Ok(());
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path.display().to_string(), e)),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl PersistenceAdapter for FileSystemAdapter {
    async fn write_file(&self, path: &str, data: &str) -> Result<()> {
        let target = self.resolve(path)?;
        debug!(path = %target.display(), bytes = data.len(), "Writing file");
        Self::write_atomic(&target, data).await
    }

    async fn write_with_optimistic_lock(
        &self,
        path: &str,
        data: &str,
        lock_token: &str,
    ) -> Result<bool> {
        let target = self.resolve(path)?;
        Self::ensure_parent(&target).await?;

        let lock = with_suffix(&target, LOCK_SUFFIX);
        let Some(guard) = LockGuard::acquire(lock).await? else {
            debug!(path = %target.display(), "Lock held by another writer");
            return Ok(false);
        };

        let result = Self::compare_and_write(&target, data, lock_token).await;
        guard.release().await?;

        let written = result?;
        debug!(path = %target.display(), written, "Optimistic write");
        Ok(written)
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>> {
        let target = self.resolve(path)?;
        Self::read_optional(&target).await
    }

    async fn read_file_with_hash(&self, path: &str) -> Result<Option<(String, String)>> {
        let target = self.resolve(path)?;
        Ok(Self::read_optional(&target).await?.map(|data| {
            let hash = content_hash(&data);
            (data, hash)
        }))
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {
                debug!(path = %target.display(), "Deleted file");
                Ok(())
            }
            Err(e) if is_absent(&e) => Ok(()),
            Err(e) => Err(StoreError::io(target.display().to_string(), e)),
        }
    }

    async fn delete_directory(&self, prefix: &str) -> Result<()> {
        let target = self.resolve(prefix)?;
        match tokio::fs::remove_dir_all(&target).await {
            Ok(()) => {
                debug!(path = %target.display(), "Deleted directory");
                Ok(())
            }
            Err(e) if is_absent(&e) => Ok(()),
            Err(e) => Err(StoreError::io(target.display().to_string(), e)),
        }
    }

    async fn list_directory(&self, prefix: &str) -> Result<Vec<String>> {
        let target = self.resolve(prefix)?;
        let mut entries = match tokio::fs::read_dir(&target).await {
            Ok(entries) => entries,
            Err(e) if is_absent(&e) => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(target.display().to_string(), e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(target.display().to_string(), e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_write_artifact(&name) {
                let is_file = entry
                    .file_type()
                    .await
                    .map_err(|e| StoreError::io(entry.path().display().to_string(), e))?
                    .is_file();
                if is_file {
                    continue;
                }
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> (tempfile::TempDir, FileSystemAdapter) {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FileSystemAdapter::new(dir.path());
        (dir, adapter)
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_reads_back() {
        let (_dir, adapter) = adapter();
        adapter.write_file("a/b/c.json", "{\"x\":1}").await.unwrap();
        assert_eq!(
            adapter.read_file("a/b/c.json").await.unwrap().as_deref(),
            Some("{\"x\":1}")
        );
        assert_eq!(adapter.read_file("a/missing.json").await.unwrap(), None);
        // A file standing where a directory is expected reads as absent
        assert_eq!(adapter.read_file("a/b/c.json/d.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let (_dir, adapter) = adapter();
        let err = adapter.write_file("../escape.json", "1").await.unwrap_err();
        assert!(err.is_validation());
        let err = adapter.read_file("/etc/passwd").await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_deletes_are_idempotent() {
        let (dir, adapter) = adapter();
        adapter.write_file("p/r/metadata.json", "1").await.unwrap();
        adapter.write_file("p/r/tags.json", "2").await.unwrap();

        adapter.delete_file("p/r/tags.json").await.unwrap();
        adapter.delete_file("p/r/tags.json").await.unwrap();
        assert!(dir.path().join("p/r").is_dir());

        adapter.delete_directory("p/r").await.unwrap();
        adapter.delete_directory("p/r").await.unwrap();
        assert!(!dir.path().join("p/r").exists());
    }

    #[tokio::test]
    async fn test_list_directory_hides_lock_and_temp_files() {
        let (dir, adapter) = adapter();
        adapter.write_file("idx/b.json", "1").await.unwrap();
        adapter.write_file("idx/a/x.json", "2").await.unwrap();
        std::fs::write(dir.path().join("idx/b.json.lock"), "").unwrap();
        std::fs::write(
            dir.path().join("idx/b.json.0f3c2a9e8d7b6c5a4f3e2d1c0b9a8f7e.tmp"),
            "",
        )
        .unwrap();

        assert_eq!(adapter.list_directory("idx").await.unwrap(), vec!["a", "b.json"]);
        assert!(adapter.list_directory("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_directory_keeps_names_that_only_look_like_artifacts() {
        let (dir, adapter) = adapter();
        for bucket in ["logs.tmp", "backups.lock", "x.0f3c2a9e8d7b6c5a4f3e2d1c0b9a8f7e.tmp"] {
            adapter
                .write_file(&format!("s3/{bucket}/metadata.json"), "{}")
                .await
                .unwrap();
        }
        // Files whose suffix is not a temp tag
        std::fs::write(dir.path().join("s3/notes.v2.tmp"), "").unwrap();
        std::fs::write(dir.path().join("s3/.tmp"), "").unwrap();

        assert_eq!(
            adapter.list_directory("s3").await.unwrap(),
            vec![
                ".tmp",
                "backups.lock",
                "logs.tmp",
                "notes.v2.tmp",
                "x.0f3c2a9e8d7b6c5a4f3e2d1c0b9a8f7e.tmp",
            ]
        );
    }

    #[test]
    fn test_is_write_artifact() {
        assert!(is_write_artifact("i.json.lock"));
        assert!(is_write_artifact("i.json.0123456789abcdef0123456789abcdef.tmp"));
        assert!(!is_write_artifact(".lock"));
        assert!(!is_write_artifact("logs.tmp"));
        assert!(!is_write_artifact("i.json.0123456789ABCDEF0123456789ABCDEF.tmp"));
        assert!(!is_write_artifact("i.json.123.tmp"));
    }

    #[tokio::test]
    async fn test_optimistic_lock() {
        let (dir, adapter) = adapter();

        assert!(
            adapter
                .write_with_optimistic_lock("indexes/i.json", "v1", "")
                .await
                .unwrap()
        );
        let (data, token) = adapter
            .read_file_with_hash("indexes/i.json")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data, "v1");
        assert_eq!(token, content_hash("v1"));

        assert!(
            adapter
                .write_with_optimistic_lock("indexes/i.json", "v2", &token)
                .await
                .unwrap()
        );
        assert!(
            !adapter
                .write_with_optimistic_lock("indexes/i.json", "v3", &token)
                .await
                .unwrap()
        );
        assert_eq!(
            adapter.read_file("indexes/i.json").await.unwrap().as_deref(),
            Some("v2")
        );
        assert!(!dir.path().join("indexes/i.json.lock").exists());
    }

    #[tokio::test]
    async fn test_held_lock_reports_conflict() {
        let (dir, adapter) = adapter();
        adapter.write_file("indexes/i.json", "v1").await.unwrap();
        std::fs::write(dir.path().join("indexes/i.json.lock"), "").unwrap();

        let written = adapter
            .write_with_optimistic_lock("indexes/i.json", "v2", &content_hash("v1"))
            .await
            .unwrap();
        assert!(!written);
        assert_eq!(
            adapter.read_file("indexes/i.json").await.unwrap().as_deref(),
            Some("v1")
        );
    }

    fn age_file(path: &Path, age: Duration) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[tokio::test]
    async fn test_stale_lock_is_reclaimed() {
        let (dir, adapter) = adapter();
        adapter.write_file("indexes/i.json", "v1").await.unwrap();
        let lock = dir.path().join("indexes/i.json.lock");
        std::fs::write(&lock, "").unwrap();
        age_file(&lock, Duration::from_secs(FILE_LOCK_STALE_SECS * 4));

        let written = adapter
            .write_with_optimistic_lock("indexes/i.json", "v2", &content_hash("v1"))
            .await
            .unwrap();
        assert!(written);
        assert_eq!(
            adapter.read_file("indexes/i.json").await.unwrap().as_deref(),
            Some("v2")
        );
        assert!(!lock.exists());
    }

    #[tokio::test]
    async fn test_lock_removed_when_write_fails() {
        let (dir, adapter) = adapter();
        // A directory where the index file belongs makes the read fail
        std::fs::create_dir_all(dir.path().join("indexes/i.json/child")).unwrap();

        let result = adapter
            .write_with_optimistic_lock("indexes/i.json", "v1", "")
            .await;
        assert!(result.is_err());
        assert!(!dir.path().join("indexes/i.json.lock").exists());
    }

    #[tokio::test]
    async fn test_dropped_lock_guard_removes_lock() {
        let (dir, _adapter) = adapter();
        let lock = dir.path().join("i.json.lock");

        let guard = LockGuard::acquire(lock.clone()).await.unwrap().unwrap();
        assert!(lock.exists());
        assert!(LockGuard::acquire(lock.clone()).await.unwrap().is_none());

        drop(guard);
        assert!(!lock.exists());
        assert!(LockGuard::acquire(lock.clone()).await.unwrap().is_some());
    }
}
