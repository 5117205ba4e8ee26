//! Pruning stale resources after a collection pass

mod common;

use common::{ACCOUNT_A, fixtures, strings};
use iam_collect_store::adapter::PersistenceAdapter;
use iam_collect_store::{Arn, AwsIamStore, PathBasedStore, ResourceScope, Store};
use serde_json::json;

const ROLES: [&str; 3] = [
    "arn:aws:iam::111111111111:role/keep-me",
    "arn:aws:iam::111111111111:role/drop-me",
    "arn:aws:iam::111111111111:role/Also-Keep",
];

fn roles() -> ResourceScope {
    ResourceScope::service("iam").with_resource_type("role")
}

async fn seed(store: &Store) {
    for arn in ROLES {
        store
            .save_resource_metadata(ACCOUNT_A, arn, "metadata", json!({"arn": arn}).into())
            .await
            .unwrap();
        store
            .save_resource_metadata(ACCOUNT_A, arn, "trust-policy", json!({"Statement": [arn]}).into())
            .await
            .unwrap();
    }
}

async fn lock_token<A: PersistenceAdapter>(store: &PathBasedStore<A>, arn: &str) -> Option<String> {
    let arn = Arn::parse(arn).unwrap();
    let path = store.paths().resource_metadata(ACCOUNT_A, &arn, "trust-policy");
    store
        .adapter()
        .read_file_with_hash(&path)
        .await
        .unwrap()
        .map(|(_, token)| token)
}

async fn raw_token(store: &Store, arn: &str) -> Option<String> {
    match store {
        Store::Memory(s) => lock_token(s, arn).await,
        Store::File(s) => lock_token(s, arn).await,
        _ => None,
    }
}

#[tokio::test]
async fn test_sync_deletes_only_stale_resources() {
    for f in fixtures().await {
        let store = &f.store;
        seed(store).await;

        let kept_before = raw_token(store, ROLES[0]).await;
        let policy_before = store
            .get_resource_metadata(ACCOUNT_A, ROLES[0], "trust-policy")
            .await
            .unwrap();

        // Desired ARNs match regardless of case
        let desired = strings(&[ROLES[0], "arn:aws:iam::111111111111:role/also-keep"]);
        store.sync_resource_list(ACCOUNT_A, &roles(), &desired).await.unwrap();

        let remaining = store.list_resources(ACCOUNT_A, &roles()).await.unwrap();
        assert_eq!(remaining, strings(&[ROLES[2], ROLES[0]]), "{}", f.name);

        // Every record of the stale resource is gone
        assert!(
            store.list_resource_metadata(ACCOUNT_A, ROLES[1]).await.unwrap().is_empty(),
            "{}",
            f.name
        );

        // Survivors are untouched
        assert_eq!(
            store
                .get_resource_metadata(ACCOUNT_A, ROLES[0], "trust-policy")
                .await
                .unwrap(),
            policy_before,
            "{}",
            f.name
        );
        assert_eq!(raw_token(store, ROLES[0]).await, kept_before, "{}", f.name);
    }
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    for f in fixtures().await {
        seed(&f.store).await;
        let desired = strings(&[ROLES[0]]);
        for _ in 0..2 {
            f.store
                .sync_resource_list(ACCOUNT_A, &roles(), &desired)
                .await
                .unwrap();
        }
        assert_eq!(
            f.store.list_resources(ACCOUNT_A, &roles()).await.unwrap(),
            desired,
            "{}",
            f.name
        );
    }
}

#[tokio::test]
async fn test_sync_with_invalid_desired_arn_deletes_nothing() {
    for f in fixtures().await {
        seed(&f.store).await;
        let err = f
            .store
            .sync_resource_list(ACCOUNT_A, &roles(), &strings(&["role/keep-me"]))
            .await
            .unwrap_err();
        assert!(err.is_validation(), "{}: {err}", f.name);
        assert_eq!(
            f.store.list_resources(ACCOUNT_A, &roles()).await.unwrap().len(),
            3,
            "{}",
            f.name
        );
    }
}

#[tokio::test]
async fn test_sync_of_empty_scope_is_a_no_op() {
    for f in fixtures().await {
        f.store
            .sync_resource_list(ACCOUNT_A, &roles(), &strings(&[ROLES[0]]))
            .await
            .unwrap();
        assert!(f.store.list_resources(ACCOUNT_A, &roles()).await.unwrap().is_empty());
    }
}
