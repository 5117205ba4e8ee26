//! Backend fixtures shared by the behavioural tests
//!
//! Every contract test runs against each local backend: the in-memory map,
//! a temp directory and an in-memory SQLite database.

#![allow(dead_code)]

use iam_collect_store::adapter::{FileSystemAdapter, InMemoryPathAdapter};
use iam_collect_store::{PathBasedStore, SqliteStore, Store};
use iam_collect_test_utils::{init_test_tracing, open_test_db};
use tempfile::TempDir;

pub const PARTITION: &str = "aws";
pub const ACCOUNT_A: &str = "111111111111";
pub const ACCOUNT_B: &str = "222222222222";

/// A store plus whatever keeps its backing storage alive
pub struct Fixture {
    pub name: &'static str,
    pub store: Store,
    _dir: Option<TempDir>,
}

impl Fixture {
    pub async fn memory() -> Self {
        Self {
            name: "memory",
            store: Store::Memory(PathBasedStore::new(InMemoryPathAdapter::new(), PARTITION)),
            _dir: None,
        }
    }

    pub async fn file() -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self {
            name: "file",
            store: Store::File(PathBasedStore::new(
                FileSystemAdapter::new(dir.path()),
                PARTITION,
            )),
            _dir: Some(dir),
        }
    }

    pub async fn sqlite() -> Self {
        let pool = open_test_db().await.unwrap();
        Self {
            name: "sqlite",
            store: Store::Sqlite(SqliteStore::from_pool(pool, PARTITION).await.unwrap()),
            _dir: None,
        }
    }

    /// Two independent handles over the same storage, like two processes
    pub async fn shared_pair(name: &'static str) -> (Self, Store) {
        init_test_tracing();
        match name {
            "memory" => {
                let fixture = Self::memory().await;
                let other = fixture.store.clone();
                (fixture, other)
            }
            "file" => {
                let fixture = Self::file().await;
                let root = match &fixture.store {
                    Store::File(store) => store.adapter().root().to_path_buf(),
                    _ => unreachable!(),
                };
                let other = Store::File(PathBasedStore::new(FileSystemAdapter::new(root), PARTITION));
                (fixture, other)
            }
            "sqlite" => {
                let dir = tempfile::tempdir().unwrap();
                let path = dir.path().join("iam.db").display().to_string();
                let first = SqliteStore::open(&path, PARTITION).await.unwrap();
                let second = SqliteStore::open(&path, PARTITION).await.unwrap();
                let fixture = Self {
                    name: "sqlite",
                    store: Store::Sqlite(first),
                    _dir: Some(dir),
                };
                (fixture, Store::Sqlite(second))
            }
            other => panic!("unknown backend {other}"),
        }
    }
}

/// One fixture per local backend
pub async fn fixtures() -> Vec<Fixture> {
    init_test_tracing();
    vec![
        Fixture::memory().await,
        Fixture::file().await,
        Fixture::sqlite().await,
    ]
}

pub const BACKENDS: [&str; 3] = ["memory", "file", "sqlite"];

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
