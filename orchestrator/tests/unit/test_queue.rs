//! Job queue claim tests

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;

use clawd::deploy::{ClaimOutcome, JobQueue};
use clawd::models::job::{JobPayload, JobStatus, JobType};
use clawd::models::tenant::Tenant;
use clawd::store::{MemoryStore, SqliteStore, Store};

use crate::support::BOT_TOKEN;

const CLAIMERS: usize = 16;

async fn race_claims(store: Arc<dyn Store>) {
    store.insert_tenant(&Tenant::new("t-1", BOT_TOKEN)).await.unwrap();
    let queue = JobQueue::new(store.clone());
    let job = queue
        .enqueue(JobType::Deploy, "t-1", &JobPayload::default())
        .await
        .unwrap();

    let attempts = (0..CLAIMERS).map(|_| {
        let store = store.clone();
        let id = job.id.clone();
        tokio::spawn(async move { store.try_claim_job(&id, Utc::now()).await.unwrap() })
    });
    let wins = join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(wins, 1);

    let stored = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Running);
    assert_eq!(stored.attempt, 1);
    assert!(stored.started_at.is_some());
}

async fn race_claim_next(store: Arc<dyn Store>) {
    store.insert_tenant(&Tenant::new("t-1", BOT_TOKEN)).await.unwrap();
    let queue = JobQueue::new(store.clone());
    queue.enqueue_stop("t-1").await.unwrap();

    let attempts = (0..CLAIMERS).map(|_| {
        let queue = queue.clone();
        tokio::spawn(async move { queue.claim_next().await.unwrap() })
    });
    let outcomes: Vec<ClaimOutcome> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    let claimed = outcomes
        .iter()
        .filter(|o| matches!(o, ClaimOutcome::Claimed(_)))
        .count();
    assert_eq!(claimed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_store_single_winner() {
    race_claims(Arc::new(MemoryStore::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_store_claim_next_single_winner() {
    race_claim_next(Arc::new(MemoryStore::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_store_single_winner() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("jobs.db").display());
    let store = SqliteStore::connect(&url, 4).await.unwrap();
    race_claims(Arc::new(store.clone())).await;
    store.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_store_claim_next_single_winner() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("jobs.db").display());
    let store = SqliteStore::connect(&url, 4).await.unwrap();
    race_claim_next(Arc::new(store.clone())).await;
    store.close().await;
}

#[tokio::test]
async fn test_claimed_job_is_not_claimed_again() {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().await.unwrap());
    store.insert_tenant(&Tenant::new("t-1", BOT_TOKEN)).await.unwrap();
    let queue = JobQueue::new(store.clone());
    let job = queue.enqueue_stop("t-1").await.unwrap();

    match queue.claim_next().await.unwrap() {
        ClaimOutcome::Claimed(claimed) => {
            assert_eq!(claimed.id, job.id);
            assert_eq!(claimed.status, JobStatus::Running);
            assert_eq!(claimed.attempt, 1);
        }
        other => panic!("expected a claim, got {:?}", other),
    }

    assert!(!store.try_claim_job(&job.id, Utc::now()).await.unwrap());
    assert!(matches!(queue.claim_next().await.unwrap(), ClaimOutcome::Empty));
}

#[tokio::test]
async fn test_sqlite_logs_append_and_finish() {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().await.unwrap());
    store.insert_tenant(&Tenant::new("t-1", BOT_TOKEN)).await.unwrap();
    let queue = JobQueue::new(store.clone());
    let job = queue.enqueue_stop("t-1").await.unwrap();

    assert!(store.try_claim_job(&job.id, Utc::now()).await.unwrap());
    store.append_job_log(&job.id, "first").await.unwrap();
    store.append_job_log(&job.id, "second").await.unwrap();
    store
        .finish_job(&job.id, JobStatus::Failed, Some("boom"), Utc::now())
        .await
        .unwrap();

    let stored = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.logs, "Queued stop job\nfirst\nsecond\n");
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.error.as_deref(), Some("boom"));
    assert!(stored.finished_at.is_some());

    // Unknown ids are ignored
    store.append_job_log("missing", "line").await.unwrap();
    store.append_deployment_log("missing", "line").await.unwrap();
}
