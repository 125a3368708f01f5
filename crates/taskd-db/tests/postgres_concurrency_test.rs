//! Concurrency tests for the PostgreSQL adapter's atomic claim.
//!
//! These require a PostgreSQL instance: either set `TASKD_TEST_PG_URL`
//! (pointed at a running server's maintenance database), or let
//! `taskd-test-utils` start a disposable container via `testcontainers`.
//! Each test creates its own temporary database so tests are fully isolated
//! and may run concurrently with each other.

use std::sync::Arc;

use futures::future::join_all;
use taskd_db::{NewTask, TaskStatus, TaskType};

#[tokio::test]
async fn concurrent_claims_never_return_the_same_row() {
    let (adapter, db_name) = taskd_test_utils::create_pg_test_db().await;
    let adapter: Arc<dyn taskd_db::StorageAdapter> = Arc::from(adapter);

    let now = chrono::Utc::now().timestamp();
    for i in 0..20 {
        adapter
            .insert(&NewTask {
                name: format!("job-{i}"),
                task_type: TaskType::Async,
                priority: 0,
                payload: serde_json::json!({}),
                cron_expr: None,
                next_run_time: now,
                timeout: 60,
                max_retries: 3,
                retry_interval: 0,
                created_at: now,
            })
            .await
            .expect("insert should succeed");
    }

    // Ten workers race to claim two rows each; SKIP LOCKED must partition
    // the twenty pending rows across them with no overlap.
    let claims = join_all((0..10).map(|_| {
        let adapter = Arc::clone(&adapter);
        tokio::spawn(async move {
            adapter
                .claim_ready(now, 2)
                .await
                .expect("claim_ready should succeed")
        })
    }))
    .await;

    let mut claimed_ids = Vec::new();
    for result in claims {
        let tasks = result.expect("claim task should not panic");
        claimed_ids.extend(tasks.into_iter().map(|t| t.id));
    }

    let mut unique = claimed_ids.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(
        unique.len(),
        claimed_ids.len(),
        "every claimed row must be claimed exactly once"
    );
    assert_eq!(claimed_ids.len(), 20, "all twenty rows should be claimed");

    for id in claimed_ids {
        let task = adapter
            .get_by_id(id)
            .await
            .unwrap()
            .expect("claimed task should exist");
        assert_eq!(task.status, TaskStatus::Running);
    }

    taskd_test_utils::drop_pg_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_ready_orders_by_next_run_time_then_priority_then_id() {
    let (adapter, db_name) = taskd_test_utils::create_pg_test_db().await;

    let now = chrono::Utc::now().timestamp();
    let specs = [
        ("late_low", now + 10, 0),
        ("early_low", now, 0),
        ("early_high", now, 5),
    ];
    for (name, next_run_time, priority) in specs {
        adapter
            .insert(&NewTask {
                name: name.to_string(),
                task_type: TaskType::Async,
                priority,
                payload: serde_json::json!({}),
                cron_expr: None,
                next_run_time,
                timeout: 60,
                max_retries: 3,
                retry_interval: 0,
                created_at: now,
            })
            .await
            .unwrap();
    }

    let claimed = adapter.claim_ready(now, 10).await.unwrap();
    let names: Vec<&str> = claimed.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["early_high", "early_low"]);

    taskd_test_utils::drop_pg_test_db(&db_name).await;
}
