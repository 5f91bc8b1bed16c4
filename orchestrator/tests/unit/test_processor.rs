//! Job processor unit tests

use std::sync::atomic::Ordering;

use clawd::deploy::ports::PortRange;
use clawd::models::deployment::DeploymentStatus;
use clawd::models::job::{DeploymentJob, JobPayload, JobStatus, JobType};
use clawd::models::tenant::{RuntimeStatus, TenantStatus};
use clawd::store::Store;

use crate::support::{Harness, BOT_TOKEN};

const KEY: &str = "sk-test-0123456789";

#[tokio::test]
async fn test_deploy_success() {
    let h = Harness::new();
    h.seed_tenant("clx9f8a7b6c5d4e3f2g1h0i9j8k7l6", "gpt", None).await;
    let (deployment, job) = h.queue_deploy("clx9f8a7b6c5d4e3f2g1h0i9j8k7l6", "gpt", Some(KEY)).await;

    let processed = h.processor.process_queue(1).await.unwrap();
    assert_eq!(processed, vec![job.id.clone()]);

    let tenant = h.tenant("clx9f8a7b6c5d4e3f2g1h0i9j8k7l6").await;
    assert_eq!(tenant.status, TenantStatus::Live);
    assert_eq!(tenant.runtime_status, RuntimeStatus::Live);
    assert_eq!(tenant.runtime_port, Some(19000));
    assert_eq!(tenant.container_name.as_deref(), Some("sc-clx9f8a7b6c5d4e3f2g1h0i9"));
    assert!(tenant.container_id.is_some());
    assert_eq!(tenant.webhook_secret.as_ref().map(String::len), Some(48));
    assert!(tenant.webhook_url.is_none());
    assert!(tenant.last_heartbeat_at.is_some());

    let deployment = h.deployment(&deployment.id).await;
    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert!(deployment.logs.contains("Container runtime started successfully"));
    assert!(deployment.logs.contains("Port: 19000"));
    assert!(deployment.logs.contains("Model: openai/gpt-4.1"));
    assert!(deployment.logs.contains("Telegram mode: long-polling"));

    let job = h.job(&job.id).await;
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.attempt, 1);
    assert!(job.started_at.is_some());
    assert!(job.finished_at.is_some());
    assert!(job.logs.starts_with("Queued deployment job\n"));
    assert!(job.logs.contains("Using per-tenant API key"));
    assert!(job.logs.ends_with("Deployment completed\n"));

    // Canary ran once with the job's key, webhook cleared once
    assert_eq!(h.canary.calls(), 1);
    assert_eq!(h.canary.seen_keys.lock().unwrap().as_slice(), [KEY.to_string()]);
    assert_eq!(h.channel.cleared.lock().unwrap().as_slice(), [BOT_TOKEN.to_string()]);

    // Config lands in the tenant directory with the provider override
    let config_path = h
        .tenant_root
        .path()
        .join("clx9f8a7b6c5d4e3f2g1h0i9j8k7l6")
        .join("openclaw.json");
    let config: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(config_path).unwrap()).unwrap();
    assert_eq!(config["gateway"]["auth"]["token"], tenant.webhook_secret.unwrap().as_str());
    assert_eq!(config["channels"]["telegram"]["botToken"], BOT_TOKEN);
    assert_eq!(config["models"]["providers"]["openai"]["apiKey"], KEY);

    // The run command never carries credentials
    let run = h.runtime.with(|s| s.runs[0].clone());
    assert_eq!(run.host_port, 19000);
    assert!(!format!("{:?}", run).contains(KEY));
}

#[tokio::test]
async fn test_deploy_secrets_never_reach_logs() {
    let h = Harness::new();
    h.seed_tenant("t-1", "gpt", None).await;
    let (deployment, job) = h.queue_deploy("t-1", "gpt", Some(KEY)).await;

    h.processor.process_queue(1).await.unwrap();

    let job = h.job(&job.id).await;
    let deployment = h.deployment(&deployment.id).await;
    for text in [&job.logs, &deployment.logs] {
        assert!(!text.contains(KEY));
        assert!(!text.contains(BOT_TOKEN));
    }
}

#[tokio::test]
async fn test_deploy_retries_on_port_conflict() {
    let h = Harness::new();
    h.runtime.with(|s| {
        s.conflict_ports.insert(19000);
    });
    h.seed_tenant("t-1", "gpt", None).await;
    let (deployment, job) = h.queue_deploy("t-1", "gpt", Some(KEY)).await;

    h.processor.process_queue(1).await.unwrap();

    let job = h.job(&job.id).await;
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.logs.matches("was allocated concurrently").count(), 1);
    assert!(job
        .logs
        .contains("Port 19000 was allocated concurrently. Retrying with a new port..."));

    assert_eq!(h.tenant("t-1").await.runtime_port, Some(19001));
    assert_eq!(h.deployment(&deployment.id).await.status, DeploymentStatus::Success);
    assert_eq!(h.runtime.run_count(), 2);
}

#[tokio::test]
async fn test_deploy_gives_up_after_repeated_conflicts() {
    let h = Harness::with_options(|o| o.start_attempts = 3);
    h.runtime.with(|s| s.always_conflict = true);
    h.seed_tenant("t-1", "gpt", None).await;
    let (deployment, job) = h.queue_deploy("t-1", "gpt", Some(KEY)).await;

    h.processor.process_queue(1).await.unwrap();

    let job = h.job(&job.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.logs.matches("Retrying with a new port").count(), 2);
    assert!(job.error.unwrap().starts_with("Port 19002 was allocated concurrently"));
    assert_eq!(h.runtime.run_count(), 3);

    let tenant = h.tenant("t-1").await;
    assert_eq!(tenant.status, TenantStatus::Error);
    assert_eq!(tenant.runtime_status, RuntimeStatus::Error);
    assert_eq!(h.deployment(&deployment.id).await.status, DeploymentStatus::Failed);
}

#[tokio::test]
async fn test_runtime_canary_failure_removes_container() {
    let h = Harness::new();
    h.canary.reject("invalid x-api-key");
    h.seed_tenant("t-1", "claude", None).await;
    let (deployment, job) = h.queue_deploy("t-1", "claude", Some(KEY)).await;

    h.processor.process_queue(1).await.unwrap();

    // Container was started, then torn down
    assert_eq!(h.runtime.run_count(), 1);
    assert!(h.runtime.container("sc-t1").is_none());
    assert_eq!(h.runtime.with(|s| s.removed.clone()), vec!["sc-t1".to_string()]);

    let tenant = h.tenant("t-1").await;
    assert_eq!(tenant.status, TenantStatus::Error);
    assert_eq!(tenant.runtime_status, RuntimeStatus::Error);
    assert!(tenant.container_name.is_none());

    let deployment = h.deployment(&deployment.id).await;
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert!(deployment.error.unwrap().contains("invalid x-api-key"));
    assert!(deployment.logs.contains("Runtime canary failed: Anthropic key rejected"));
    assert!(deployment.logs.contains("FAILED: "));

    let job = h.job(&job.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.finished_at.is_some());
}

#[tokio::test]
async fn test_known_model_without_key_fails_after_start() {
    let h = Harness::new();
    h.seed_tenant("t-1", "gemini", None).await;
    let (_, job) = h.queue_deploy("t-1", "gemini", None).await;

    h.processor.process_queue(1).await.unwrap();

    let job = h.job(&job.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.logs.contains("No API key provided for deployment"));
    assert!(job.error.unwrap().contains("No API key available for Gemini runtime canary."));
    assert_eq!(h.canary.calls(), 0);
    assert!(h.runtime.container("sc-t1").is_none());
}

#[tokio::test]
async fn test_unknown_model_skips_canary() {
    let h = Harness::new();
    h.seed_tenant("t-1", "mistral-large", None).await;
    let (_, job) = h.queue_deploy("t-1", "mistral-large", None).await;

    h.processor.process_queue(1).await.unwrap();

    let job = h.job(&job.id).await;
    assert_eq!(job.status, JobStatus::Success);
    assert!(job.logs.contains("Skipped runtime canary (unknown provider)."));
    assert!(job.logs.contains("Model resolved to mistral-large"));
    assert_eq!(h.canary.calls(), 0);
    assert_eq!(h.tenant("t-1").await.status, TenantStatus::Live);
}

#[tokio::test]
async fn test_deploy_falls_back_to_tenant_values() {
    let h = Harness::new();
    h.seed_tenant("t-1", "claude", Some("sk-ant-stored")).await;
    let job = h
        .processor
        .queue()
        .enqueue(JobType::Deploy, "t-1", &JobPayload::default())
        .await
        .unwrap();

    h.processor.process_queue(1).await.unwrap();

    assert_eq!(h.job(&job.id).await.status, JobStatus::Success);
    assert_eq!(h.canary.seen_keys.lock().unwrap().as_slice(), ["sk-ant-stored".to_string()]);
    assert!(h.job(&job.id).await.logs.contains("Model resolved to anthropic/claude-sonnet-4"));
}

#[tokio::test]
async fn test_malformed_payload_is_treated_as_empty() {
    let h = Harness::new();
    h.seed_tenant("t-1", "mistral-large", None).await;

    let mut job = DeploymentJob::new(JobType::Deploy, "t-1", &JobPayload::default());
    job.payload = Some("{not json".to_string());
    h.store.insert_job(&job).await.unwrap();

    h.processor.process_queue(1).await.unwrap();

    assert_eq!(h.job(&job.id).await.status, JobStatus::Success);
}

#[tokio::test]
async fn test_webhook_failure_does_not_fail_deploy() {
    let h = Harness::new();
    *h.channel.fail.lock().unwrap() = true;
    h.seed_tenant("t-1", "gpt", None).await;
    let (_, job) = h.queue_deploy("t-1", "gpt", Some(KEY)).await;

    h.processor.process_queue(1).await.unwrap();

    let job = h.job(&job.id).await;
    assert_eq!(job.status, JobStatus::Success);
    assert!(job.logs.contains("clear webhook failed (ignored): connection reset"));
}

#[tokio::test]
async fn test_container_that_exits_fails_with_redacted_logs() {
    let h = Harness::new();
    h.runtime.with(|s| {
        s.crash_on_start = true;
        s.crash_logs = format!("fatal: telegram rejected token {}", BOT_TOKEN);
    });
    h.seed_tenant("t-1", "gpt", None).await;
    let (deployment, job) = h.queue_deploy("t-1", "gpt", Some(KEY)).await;

    h.processor.process_queue(1).await.unwrap();

    let job = h.job(&job.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert!(error.contains("Container failed to start (exited|false)"));
    assert!(error.contains("telegram rejected token ***"));
    assert!(!error.contains(BOT_TOKEN));
    assert!(!h.deployment(&deployment.id).await.logs.contains(BOT_TOKEN));

    // Crashed container is not left behind, and the canary never ran
    assert!(h.runtime.container("sc-t1").is_none());
    assert_eq!(h.canary.calls(), 0);
}

#[tokio::test]
async fn test_runtime_unavailable() {
    let h = Harness::new();
    h.runtime.with(|s| s.unavailable = true);
    h.seed_tenant("t-1", "gpt", None).await;
    let (_, job) = h.queue_deploy("t-1", "gpt", Some(KEY)).await;

    h.processor.process_queue(1).await.unwrap();

    let job = h.job(&job.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().starts_with("Container runtime unavailable"));
    assert_eq!(h.runtime.run_count(), 0);
}

#[tokio::test]
async fn test_port_exhaustion() {
    let h = Harness::with_options(|o| o.port_range = PortRange { start: 19000, end: 19002 });
    h.runtime.with(|s| s.foreign_ports.extend([19000, 19001, 19002]));
    h.seed_tenant("t-1", "gpt", None).await;
    let (deployment, job) = h.queue_deploy("t-1", "gpt", Some(KEY)).await;

    h.processor.process_queue(1).await.unwrap();

    let job = h.job(&job.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error.as_deref(),
        Some("No free runtime port available in range 19000-19002")
    );
    assert_eq!(h.runtime.run_count(), 0);
    assert_eq!(h.deployment(&deployment.id).await.status, DeploymentStatus::Failed);
    assert_eq!(h.tenant("t-1").await.status, TenantStatus::Error);
}

#[tokio::test]
async fn test_port_skips_unbindable() {
    let h = Harness::new();
    h.runtime.with(|s| {
        s.foreign_ports.insert(19000);
    });
    h.probe.busy.lock().unwrap().insert(19001);
    h.seed_tenant("t-1", "gpt", None).await;
    h.queue_deploy("t-1", "gpt", Some(KEY)).await;

    h.processor.process_queue(1).await.unwrap();

    assert_eq!(h.tenant("t-1").await.runtime_port, Some(19002));
}

#[tokio::test]
async fn test_redeploy_reuses_previous_port() {
    let h = Harness::new();
    h.seed_tenant("t-1", "gpt", None).await;
    h.queue_deploy("t-1", "gpt", Some(KEY)).await;
    h.processor.process_queue(1).await.unwrap();
    let first = h.tenant("t-1").await;
    assert_eq!(first.runtime_port, Some(19000));

    let (_, job) = h.queue_deploy("t-1", "gpt", Some(KEY)).await;
    h.processor.process_queue(1).await.unwrap();

    let job = h.job(&job.id).await;
    assert_eq!(job.status, JobStatus::Success);
    assert!(job.logs.contains("Removing previous container sc-t1"));

    let second = h.tenant("t-1").await;
    assert_eq!(second.runtime_port, Some(19000));
    assert_ne!(second.webhook_secret, first.webhook_secret);
    assert_ne!(second.container_id, first.container_id);
}

#[tokio::test]
async fn test_stop_without_container() {
    let h = Harness::new();
    h.seed_tenant("t-1", "gpt", None).await;
    let job = h.processor.queue().enqueue_stop("t-1").await.unwrap();

    h.processor.process_queue(1).await.unwrap();

    let job = h.job(&job.id).await;
    assert_eq!(job.status, JobStatus::Success);
    assert!(job.logs.contains("Stopping runtime for t-1"));
    assert!(job.logs.ends_with("Runtime stopped\n"));

    let tenant = h.tenant("t-1").await;
    assert_eq!(tenant.status, TenantStatus::Stopped);
    assert_eq!(tenant.runtime_status, RuntimeStatus::Stopped);
    assert!(tenant.container_name.is_none());
    assert!(h.runtime.with(|s| s.removed.is_empty()));
}

#[tokio::test]
async fn test_stop_removes_running_container() {
    let h = Harness::new();
    h.seed_tenant("t-1", "gpt", None).await;
    h.queue_deploy("t-1", "gpt", Some(KEY)).await;
    h.processor.process_queue(1).await.unwrap();

    h.processor.queue().enqueue_stop("t-1").await.unwrap();
    h.processor.process_queue(1).await.unwrap();

    assert!(h.runtime.container("sc-t1").is_none());
    let tenant = h.tenant("t-1").await;
    assert_eq!(tenant.status, TenantStatus::Stopped);
    assert!(tenant.container_name.is_none());
    assert!(tenant.container_id.is_none());
    assert!(tenant.runtime_port.is_none());
    assert!(tenant.webhook_secret.is_none());
}

#[tokio::test]
async fn test_missing_tenant_fails_job_without_aborting_batch() {
    let h = Harness::new();
    h.seed_tenant("t-2", "gpt", None).await;
    let orphan = h.processor.queue().enqueue_stop("ghost").await.unwrap();
    let stop = h.processor.queue().enqueue_stop("t-2").await.unwrap();

    let processed = h.processor.process_queue(5).await.unwrap();
    assert_eq!(processed, vec![orphan.id.clone(), stop.id.clone()]);

    let orphan = h.job(&orphan.id).await;
    assert_eq!(orphan.status, JobStatus::Failed);
    assert!(orphan.logs.contains("FAILED: Not found: Tenant ghost"));
    assert_eq!(h.job(&stop.id).await.status, JobStatus::Success);
}

#[tokio::test]
async fn test_process_queue_stops_when_empty() {
    let h = Harness::new();
    assert!(h.processor.process_queue(5).await.unwrap().is_empty());

    h.seed_tenant("t-1", "gpt", None).await;
    h.processor.queue().enqueue_stop("t-1").await.unwrap();
    h.processor.queue().enqueue_stop("t-1").await.unwrap();

    assert_eq!(h.processor.process_queue(5).await.unwrap().len(), 2);
    assert!(h.processor.process_queue(5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_jobs_are_processed_in_fifo_order() {
    let h = Harness::new();
    h.seed_tenant("t-a", "gpt", None).await;
    h.seed_tenant("t-b", "gpt", None).await;
    let first = h.processor.queue().enqueue_stop("t-a").await.unwrap();
    let second = h.processor.queue().enqueue_stop("t-b").await.unwrap();

    assert_eq!(h.processor.process_queue(1).await.unwrap(), vec![first.id.clone()]);
    assert_eq!(h.job(&second.id).await.status, JobStatus::Queued);
    assert_eq!(h.processor.process_queue(1).await.unwrap(), vec![second.id]);
}

#[tokio::test]
async fn test_failed_live_save_removes_container() {
    let h = Harness::new();
    h.faults.live_save.store(true, Ordering::SeqCst);
    h.seed_tenant("t-1", "gpt", None).await;
    let (deployment, job) = h.queue_deploy("t-1", "gpt", Some(KEY)).await;

    h.processor.process_queue(1).await.unwrap();

    assert_eq!(h.runtime.run_count(), 1);
    assert!(h.runtime.container("sc-t1").is_none());
    assert!(h.runtime.with(|s| s.removed.contains(&"sc-t1".to_string())));

    let job = h.job(&job.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("database is locked"));

    let tenant = h.tenant("t-1").await;
    assert_eq!(tenant.status, TenantStatus::Error);
    assert!(tenant.container_name.is_none());
    assert_eq!(h.deployment(&deployment.id).await.status, DeploymentStatus::Failed);
}

#[tokio::test]
async fn test_failure_recorded_when_job_finish_fails() {
    let h = Harness::new();
    h.runtime.with(|s| s.unavailable = true);
    h.faults.finish_job.store(true, Ordering::SeqCst);
    h.seed_tenant("t-1", "gpt", None).await;
    let (deployment, job) = h.queue_deploy("t-1", "gpt", Some(KEY)).await;

    let processed = h.processor.process_queue(1).await.unwrap();
    assert_eq!(processed, vec![job.id.clone()]);

    // The job row could not be finished, everything else still was
    let job = h.job(&job.id).await;
    assert_eq!(job.status, JobStatus::Running);
    assert!(job.logs.contains("FAILED: Container runtime unavailable"));

    let deployment = h.deployment(&deployment.id).await;
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert!(deployment.error.unwrap().contains("Container runtime unavailable"));

    let tenant = h.tenant("t-1").await;
    assert_eq!(tenant.status, TenantStatus::Error);
    assert_eq!(tenant.runtime_status, RuntimeStatus::Error);
}

#[tokio::test]
async fn test_failed_run_leaves_no_created_container() {
    let h = Harness::new();
    h.runtime.with(|s| s.always_conflict = true);
    h.seed_tenant("t-1", "gpt", None).await;
    let (_, job) = h.queue_deploy("t-1", "gpt", Some(KEY)).await;

    h.processor.process_queue(1).await.unwrap();

    assert_eq!(h.job(&job.id).await.status, JobStatus::Failed);
    assert!(h.runtime.with(|s| s.created.is_empty()));
    assert!(h.runtime.with(|s| s.removed.contains(&"sc-t1".to_string())));
}
