//! In-memory persistence adapter

use super::{PersistenceAdapter, content_hash};
use crate::error::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Adapter backed by a shared ordered map.
///
/// Clones share the same data, so several store handles can observe each
/// other's writes like separate processes sharing a disk.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPathAdapter {
    data: Arc<RwLock<BTreeMap<String, String>>>,
}

impl InMemoryPathAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored path, sorted
    pub async fn paths(&self) -> Vec<String> {
        self.data.read().await.keys().cloned().collect()
    }
}

fn dir_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

impl PersistenceAdapter for InMemoryPathAdapter {
    async fn write_file(&self, path: &str, data: &str) -> Result<()> {
        self.data
            .write()
            .await
            .insert(path.to_string(), data.to_string());
        Ok(())
    }

    async fn write_with_optimistic_lock(
        &self,
        path: &str,
        data: &str,
        lock_token: &str,
    ) -> Result<bool> {
        let mut map = self.data.write().await;
        if let Some(current) = map.get(path) {
            if content_hash(current) != lock_token {
                return Ok(false);
            }
        }
        map.insert(path.to_string(), data.to_string());
        Ok(true)
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>> {
        Ok(self.data.read().await.get(path).cloned())
    }

    async fn read_file_with_hash(&self, path: &str) -> Result<Option<(String, String)>> {
        Ok(self.data.read().await.get(path).map(|data| {
            let hash = content_hash(data);
            (data.clone(), hash)
        }))
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.data.write().await.remove(path);
        Ok(())
    }

    async fn delete_directory(&self, prefix: &str) -> Result<()> {
        let dir = dir_prefix(prefix);
        self.data
            .write()
            .await
            .retain(|key, _| !key.starts_with(&dir));
        Ok(())
    }

    async fn list_directory(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = dir_prefix(prefix);
        let map = self.data.read().await;
        let children: BTreeSet<String> = map
            .range(dir.clone()..)
            .take_while(|(key, _)| key.starts_with(&dir))
            .filter_map(|(key, _)| key[dir.len()..].split('/').next())
            .filter(|child| !child.is_empty())
            .map(str::to_string)
            .collect();
        Ok(children.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_write_delete() {
        let adapter = InMemoryPathAdapter::new();
        assert_eq!(adapter.read_file("a/b.json").await.unwrap(), None);

        adapter.write_file("a/b.json", "{}").await.unwrap();
        assert_eq!(
            adapter.read_file("a/b.json").await.unwrap().as_deref(),
            Some("{}")
        );

        adapter.delete_file("a/b.json").await.unwrap();
        adapter.delete_file("a/b.json").await.unwrap();
        assert_eq!(adapter.read_file("a/b.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_directory_is_one_level() {
        let adapter = InMemoryPathAdapter::new();
        adapter.write_file("p/a/deep/x.json", "1").await.unwrap();
        adapter.write_file("p/b.json", "2").await.unwrap();
        adapter.write_file("p/a/y.json", "3").await.unwrap();
        adapter.write_file("pq/z.json", "4").await.unwrap();

        assert_eq!(adapter.list_directory("p").await.unwrap(), vec!["a", "b.json"]);
        assert_eq!(adapter.list_directory("p/").await.unwrap(), vec!["a", "b.json"]);
        assert!(adapter.list_directory("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_directory_respects_segment_boundary() {
        let adapter = InMemoryPathAdapter::new();
        adapter.write_file("p/a/x.json", "1").await.unwrap();
        adapter.write_file("p/ab/x.json", "2").await.unwrap();

        adapter.delete_directory("p/a").await.unwrap();
        adapter.delete_directory("p/a").await.unwrap();

        assert_eq!(adapter.paths().await, vec!["p/ab/x.json"]);
    }

    #[tokio::test]
    async fn test_optimistic_lock() {
        let adapter = InMemoryPathAdapter::new();

        // Any token succeeds against an absent object
        assert!(
            adapter
                .write_with_optimistic_lock("i.json", "v1", "bogus")
                .await
                .unwrap()
        );

        let (_, token) = adapter.read_file_with_hash("i.json").await.unwrap().unwrap();
        assert!(
            adapter
                .write_with_optimistic_lock("i.json", "v2", &token)
                .await
                .unwrap()
        );

        // Stale token loses and leaves the object unchanged
        assert!(
            !adapter
                .write_with_optimistic_lock("i.json", "v3", &token)
                .await
                .unwrap()
        );
        assert_eq!(
            adapter.read_file("i.json").await.unwrap().as_deref(),
            Some("v2")
        );
    }
}
