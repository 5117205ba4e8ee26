//! Optimistically locked index updates

mod common;

use common::{ACCOUNT_A, ACCOUNT_B, BACKENDS, Fixture, fixtures};
use iam_collect_store::indexing::{
    BucketEntry, BucketsToAccountsIndexer, VpcEndpointsIndexer, VpcEntry, VpcsIndexer,
};
use iam_collect_store::{
    AwsIamStore, IndexJob, Indexer, Result, Store, StoreError, run_index_jobs, update_index,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

async fn save_vpc(store: &Store, account: &str, region: &str, id: &str) {
    let arn = format!("arn:aws:ec2:{region}:{account}:vpc/{id}");
    store
        .save_resource_metadata(account, &arn, "metadata", json!({"arn": arn, "id": id}).into())
        .await
        .unwrap();
}

async fn vpcs_index(store: &Store) -> BTreeMap<String, VpcEntry> {
    VpcsIndexer.get_cache(store).await.unwrap().0
}

#[tokio::test]
async fn test_index_lock_tokens() {
    for f in fixtures().await {
        let store = &f.store;

        let (value, token) = store.get_index("things", json!({})).await.unwrap();
        assert_eq!(value, json!({}), "{}", f.name);
        assert_eq!(token, "", "{}", f.name);

        assert!(store.save_index("things", &json!({"a": 1}), &token).await.unwrap());
        let (value, first) = store.get_index("things", json!({})).await.unwrap();
        assert_eq!(value, json!({"a": 1}), "{}", f.name);
        assert!(!first.is_empty(), "{}", f.name);

        // A writer holding the current token wins
        assert!(store.save_index("things", &json!({"a": 2}), &first).await.unwrap());

        // A writer holding the old token loses and changes nothing
        assert!(
            !store.save_index("things", &json!({"a": 3}), &first).await.unwrap(),
            "{}",
            f.name
        );
        let (value, second) = store.get_index("things", json!({})).await.unwrap();
        assert_eq!(value, json!({"a": 2}), "{}", f.name);
        assert_ne!(first, second, "{}", f.name);

        // Creating over an existing index needs its token
        assert!(!store.save_index("things", &json!({"a": 4}), "").await.unwrap());
    }
}

#[tokio::test]
async fn test_vpcs_index_is_idempotent() {
    for f in fixtures().await {
        let store = &f.store;
        save_vpc(store, ACCOUNT_A, "us-east-1", "vpc-1").await;
        save_vpc(store, ACCOUNT_A, "us-west-2", "vpc-2").await;

        let jobs = [IndexJob::new("vpcs", ACCOUNT_A)];
        update_index(store, &VpcsIndexer, &jobs).await.unwrap();
        let (first, first_token) = store.get_index("vpcs", json!({})).await.unwrap();

        update_index(store, &VpcsIndexer, &jobs).await.unwrap();
        let (second, second_token) = store.get_index("vpcs", json!({})).await.unwrap();

        assert_eq!(first, second, "{}", f.name);
        assert_eq!(first_token, second_token, "{}", f.name);
        assert_eq!(
            first["vpc-1"],
            json!({
                "arn": "arn:aws:ec2:us-east-1:111111111111:vpc/vpc-1",
                "accountId": ACCOUNT_A,
                "region": "us-east-1",
            }),
            "{}",
            f.name
        );
    }
}

#[tokio::test]
async fn test_regional_reindex_keeps_other_regions() {
    for f in fixtures().await {
        let store = &f.store;
        save_vpc(store, ACCOUNT_A, "us-east-1", "vpc-1").await;
        save_vpc(store, ACCOUNT_A, "us-west-2", "vpc-2").await;
        update_index(store, &VpcsIndexer, &[IndexJob::new("vpcs", ACCOUNT_A)])
            .await
            .unwrap();

        // vpc-1 disappears from us-east-1; only that region is re-indexed
        store
            .delete_resource(ACCOUNT_A, "arn:aws:ec2:us-east-1:111111111111:vpc/vpc-1")
            .await
            .unwrap();
        save_vpc(store, ACCOUNT_A, "us-east-1", "vpc-3").await;
        let job = IndexJob::new("vpcs", ACCOUNT_A).with_regions(["us-east-1"]);
        update_index(store, &VpcsIndexer, &[job]).await.unwrap();

        let index = vpcs_index(store).await;
        let ids: Vec<&str> = index.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["vpc-2", "vpc-3"], "{}", f.name);
    }
}

#[tokio::test]
async fn test_two_writers_contribute_to_one_index() {
    for backend in BACKENDS {
        let (first, second) = Fixture::shared_pair(backend).await;
        save_vpc(&first.store, ACCOUNT_A, "us-east-1", "vpc-a").await;
        save_vpc(&second, ACCOUNT_B, "eu-west-1", "vpc-b").await;

        update_index(&first.store, &VpcsIndexer, &[IndexJob::new("vpcs", ACCOUNT_A)])
            .await
            .unwrap();
        update_index(&second, &VpcsIndexer, &[IndexJob::new("vpcs", ACCOUNT_B)])
            .await
            .unwrap();

        for store in [&first.store, &second] {
            let index = vpcs_index(store).await;
            assert_eq!(index["vpc-a"].account_id, ACCOUNT_A, "{backend}");
            assert_eq!(index["vpc-b"].account_id, ACCOUNT_B, "{backend}");
            assert_eq!(index["vpc-b"].region, "eu-west-1", "{backend}");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_both_commit() {
    for backend in BACKENDS {
        let (first, second) = Fixture::shared_pair(backend).await;
        save_vpc(&first.store, ACCOUNT_A, "us-east-1", "vpc-a").await;
        save_vpc(&second, ACCOUNT_B, "us-east-1", "vpc-b").await;

        let a = first.store.clone();
        let b = second.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move {
                update_index(&a, &VpcsIndexer, &[IndexJob::new("vpcs", ACCOUNT_A)]).await
            }),
            tokio::spawn(async move {
                update_index(&b, &VpcsIndexer, &[IndexJob::new("vpcs", ACCOUNT_B)]).await
            }),
        );
        ra.unwrap().unwrap();
        rb.unwrap().unwrap();

        let index = vpcs_index(&first.store).await;
        assert_eq!(index.len(), 2, "{backend}: {index:?}");
    }
}

/// Commits a rival write to its own index during every update, so its
/// conditional save can never succeed
struct InterferingIndexer {
    rival_writes: AtomicU64,
}

impl Indexer for InterferingIndexer {
    type Data = BTreeMap<String, u64>;

    fn index_name(&self) -> &'static str {
        "contended"
    }

    async fn update_cache<S: AwsIamStore>(
        &self,
        cache: &mut Self::Data,
        account_id: &str,
        _regions: &[String],
        store: &S,
    ) -> Result<()> {
        let n = self.rival_writes.fetch_add(1, Ordering::SeqCst) + 1;
        let (mut current, token) = store.get_index(self.index_name(), json!({})).await?;
        current["rival"] = json!(n);
        assert!(store.save_index(self.index_name(), &current, &token).await?);

        cache.insert(account_id.to_string(), n);
        Ok(())
    }
}

#[tokio::test]
async fn test_index_conflict_after_three_attempts() {
    for f in fixtures().await {
        let indexer = InterferingIndexer {
            rival_writes: AtomicU64::new(0),
        };
        let err = update_index(&f.store, &indexer, &[IndexJob::new("contended", ACCOUNT_A)])
            .await
            .unwrap_err();

        match err {
            StoreError::IndexConflict { index, attempts } => {
                assert_eq!(index, "contended", "{}", f.name);
                assert_eq!(attempts, 3, "{}", f.name);
            }
            other => panic!("{}: expected IndexConflict, got {other}", f.name),
        }
        assert_eq!(indexer.rival_writes.load(Ordering::SeqCst), 3, "{}", f.name);

        // Only the rival's writes landed
        let (value, _) = f.store.get_index("contended", json!({})).await.unwrap();
        assert_eq!(value, json!({"rival": 3}), "{}", f.name);
    }
}

#[tokio::test]
async fn test_buckets_index() {
    for f in fixtures().await {
        let store = &f.store;
        for (account, bucket) in [(ACCOUNT_A, "alpha"), (ACCOUNT_B, "beta")] {
            let arn = format!("arn:aws:s3:::{bucket}");
            store
                .save_resource_metadata(account, &arn, "metadata", json!({"arn": arn}).into())
                .await
                .unwrap();
        }
        // Access points must not show up as buckets
        let ap = "arn:aws:s3:us-east-1:111111111111:accesspoint/alpha-ap";
        store
            .save_resource_metadata(ACCOUNT_A, ap, "metadata", json!({"arn": ap}).into())
            .await
            .unwrap();

        update_index(
            store,
            &BucketsToAccountsIndexer,
            &[
                IndexJob::new("buckets-to-accounts", ACCOUNT_A),
                IndexJob::new("buckets-to-accounts", ACCOUNT_B),
            ],
        )
        .await
        .unwrap();

        let (index, _) = BucketsToAccountsIndexer.get_cache(store).await.unwrap();
        assert_eq!(
            index,
            BTreeMap::from([
                ("alpha".to_string(), BucketEntry { account_id: ACCOUNT_A.into() }),
                ("beta".to_string(), BucketEntry { account_id: ACCOUNT_B.into() }),
            ]),
            "{}",
            f.name
        );
    }
}

#[tokio::test]
async fn test_vpc_endpoints_index() {
    let with_vpc = "arn:aws:ec2:us-east-1:111111111111:vpc-endpoint/vpce-1";
    let without_vpc = "arn:aws:ec2:us-east-1:111111111111:vpc-endpoint/vpce-2";

    for f in fixtures().await {
        let store = &f.store;
        store
            .save_resource_metadata(
                ACCOUNT_A,
                with_vpc,
                "metadata",
                json!({"arn": with_vpc, "vpcId": "vpc-1"}).into(),
            )
            .await
            .unwrap();
        store
            .save_resource_metadata(ACCOUNT_A, without_vpc, "metadata", json!({"arn": without_vpc}).into())
            .await
            .unwrap();

        update_index(store, &VpcEndpointsIndexer, &[IndexJob::new("vpc-endpoints", ACCOUNT_A)])
            .await
            .unwrap();

        let (index, _) = store.get_index("vpc-endpoints", json!({})).await.unwrap();
        assert_eq!(
            index,
            json!({
                "vpce-1": {
                    "arn": with_vpc,
                    "accountId": ACCOUNT_A,
                    "region": "us-east-1",
                    "vpc": "vpc-1",
                }
            }),
            "{}",
            f.name
        );
    }
}

#[tokio::test]
async fn test_run_index_jobs() {
    for f in fixtures().await {
        save_vpc(&f.store, ACCOUNT_A, "us-east-1", "vpc-1").await;
        save_vpc(&f.store, ACCOUNT_B, "us-east-1", "vpc-2").await;

        run_index_jobs(
            &f.store,
            vec![
                IndexJob::new("vpcs", ACCOUNT_A),
                IndexJob::new("buckets-to-accounts", ACCOUNT_A),
                IndexJob::new("vpcs", ACCOUNT_B),
            ],
        )
        .await
        .unwrap();

        assert_eq!(vpcs_index(&f.store).await.len(), 2, "{}", f.name);
        let (buckets, token) = f.store.get_index("buckets-to-accounts", Value::Null).await.unwrap();
        assert_eq!(buckets, json!({}), "{}", f.name);
        assert!(!token.is_empty(), "{}", f.name);
    }
}

#[tokio::test]
async fn test_run_index_jobs_rejects_unknown_index() {
    let f = Fixture::memory().await;
    let err = run_index_jobs(&f.store, vec![IndexJob::new("nope", ACCOUNT_A)])
        .await
        .unwrap_err();

    let store_err = err.downcast_ref::<StoreError>().unwrap();
    assert!(store_err.is_validation(), "{store_err}");
}
