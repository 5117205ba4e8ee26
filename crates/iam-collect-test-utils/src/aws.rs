//! AWS test utilities
//!
//! Provides region detection and unique names for S3 integration tests.

use chrono::Utc;

/// Get the AWS region for tests.
///
/// Checks `AWS_REGION`, then `AWS_DEFAULT_REGION`, then falls back to
/// `us-east-1`.
pub fn get_test_region() -> String {
    std::env::var("AWS_REGION")
        .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        .unwrap_or_else(|_| "us-east-1".to_string())
}

/// Generate a unique run ID for test resources.
///
/// Format: `test-{timestamp_ms}-{counter}`, unique even when tests start
/// simultaneously in one process.
pub fn test_run_id() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let ts = Utc::now().timestamp_millis();
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("test-{}-{}", ts, counter)
}

/// Bucket for S3 integration tests.
///
/// `IAM_COLLECT_TEST_BUCKET` wins when set (tests then share one bucket and
/// isolate themselves by [`test_prefix`]); otherwise a fresh
/// `iam-collect-test-{timestamp}-{counter}` name.
pub fn test_bucket_name() -> String {
    std::env::var("IAM_COLLECT_TEST_BUCKET")
        .unwrap_or_else(|_| format!("iam-collect-{}", test_run_id()))
}

/// Unique key prefix so concurrent test runs never see each other's objects
pub fn test_prefix() -> String {
    format!("iam-collect-tests/{}", test_run_id())
}
