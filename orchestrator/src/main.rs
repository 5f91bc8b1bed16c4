//! clawd - Entry Point
//!
//! Per-tenant agent runtime deployment orchestrator. Runs as a service that
//! drains the deployment queue, or as a one-shot command against the store.

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clawd::app::options::AppOptions;
use clawd::app::run::run_with_state;
use clawd::app::state::AppState;
use clawd::deploy::requests::{clamp_limit, DeployRequest, TenantUpdate};
use clawd::errors::DeployError;
use clawd::logs::{init_logging, LogOptions};
use clawd::redact::redact;
use clawd::storage::settings::Settings;
use clawd::utils::version_info;

use serde_json::{json, Value};
use tracing::{error, info, warn};

const USAGE: &str = "\
usage: clawd [--settings=<file>] <command>

commands:
  --serve                                   run the tick server and optional ticker (default)
  --register --tenant=<id> --bot-token=<t> [--model=] [--channel=] [--api-key=]
  --update --tenant=<id> [--model=] [--channel=] [--api-key=]   (empty --api-key= clears it)
  --delete --tenant=<id>
  --test-key --provider=<gemini|gpt|claude> --api-key=<key>
  --deploy --tenant=<id> [--model=] [--channel=] [--api-key=]
  --stop --tenant=<id>
  --status --tenant=<id>
  --process [--limit=<n>]
  --version";

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        print_json(&json!(version_info()));
        return ExitCode::SUCCESS;
    }
    if cli_args.contains_key("help") {
        println!("{}", USAGE);
        return ExitCode::SUCCESS;
    }

    // Retrieve the settings
    let settings = match Settings::load(cli_args.get("settings").map(Path::new)).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to load settings: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = settings.validate() {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
    };
    if let Err(e) = init_logging(log_options) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let options = AppOptions::from_settings(&settings);
    let state = match AppState::init(&options).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to initialize: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = if cli_args.contains_key("register") {
        register(&state, &cli_args).await
    } else if cli_args.contains_key("update") {
        update(&state, &cli_args).await
    } else if cli_args.contains_key("delete") {
        delete(&state, &cli_args).await
    } else if cli_args.contains_key("test-key") {
        test_key(&state, &cli_args).await
    } else if cli_args.contains_key("deploy") {
        deploy(&state, &cli_args).await
    } else if cli_args.contains_key("stop") {
        stop(&state, &cli_args).await
    } else if cli_args.contains_key("status") {
        status(&state, &cli_args).await
    } else if cli_args.contains_key("process") {
        process(&state, &cli_args).await
    } else {
        // The service loop shuts the state down itself
        info!("Running clawd with options: {:?}", options);
        return match run_with_state(options, state, await_shutdown_signal()).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Failed to run clawd: {}", e);
                ExitCode::FAILURE
            }
        };
    };

    if let Err(e) = state.shutdown().await {
        warn!("Shutdown failed: {}", e);
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", redact(&e.to_string()));
            ExitCode::FAILURE
        }
    }
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Unable to render output: {e}"),
    }
}

fn required<'a>(cli_args: &'a HashMap<String, String>, key: &str) -> Result<&'a str, DeployError> {
    cli_args
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty() && *v != "true")
        .ok_or_else(|| DeployError::ValidationError(format!("--{}=<value> is required\n{}", key, USAGE)))
}

/// Best-effort follow-up so a queued job does not wait for the next tick
async fn process_one(state: &AppState) {
    match state.processor.process_queue(1).await {
        Ok(ids) => info!(processed = ids.len(), "Immediate processing complete"),
        Err(e) => warn!("Immediate processing failed: {}", redact(&e.to_string())),
    }
}

async fn register(state: &AppState, cli_args: &HashMap<String, String>) -> Result<(), DeployError> {
    let get = |key: &str| cli_args.get(key).map(String::as_str);
    let tenant = state
        .provisioner
        .register_tenant(
            required(cli_args, "tenant")?,
            required(cli_args, "bot-token")?,
            get("model"),
            get("channel"),
            get("api-key"),
        )
        .await?;

    print_json(&json!({
        "id": tenant.id,
        "status": tenant.status,
        "model": tenant.model,
        "channel": tenant.channel,
    }));
    Ok(())
}

async fn update(state: &AppState, cli_args: &HashMap<String, String>) -> Result<(), DeployError> {
    let tenant = state
        .provisioner
        .update_tenant(
            required(cli_args, "tenant")?,
            TenantUpdate {
                model: cli_args.get("model").cloned(),
                channel: cli_args.get("channel").cloned(),
                api_key: cli_args.get("api-key").cloned(),
            },
        )
        .await?;

    print_json(&json!({
        "id": tenant.id,
        "status": tenant.status,
        "model": tenant.model,
        "channel": tenant.channel,
        "hasApiKey": tenant.api_key.is_some(),
    }));
    Ok(())
}

async fn delete(state: &AppState, cli_args: &HashMap<String, String>) -> Result<(), DeployError> {
    let deletion = state.provisioner.delete_tenant(required(cli_args, "tenant")?).await?;

    print_json(&json!({
        "success": true,
        "stoppedRuntime": deletion.stopped_runtime,
        "warnings": deletion.warnings,
    }));
    Ok(())
}

async fn test_key(state: &AppState, cli_args: &HashMap<String, String>) -> Result<(), DeployError> {
    let message = state
        .provisioner
        .test_key(required(cli_args, "provider")?, required(cli_args, "api-key")?)
        .await?;

    print_json(&json!({ "ok": true, "message": message }));
    Ok(())
}

async fn deploy(state: &AppState, cli_args: &HashMap<String, String>) -> Result<(), DeployError> {
    let queued = state
        .provisioner
        .request_deploy(DeployRequest {
            tenant_id: required(cli_args, "tenant")?.to_string(),
            model: cli_args.get("model").cloned(),
            channel: cli_args.get("channel").cloned(),
            api_key: cli_args.get("api-key").cloned(),
        })
        .await?;

    print_json(&json!({
        "success": true,
        "queued": true,
        "deployment": { "id": queued.deployment.id, "status": queued.deployment.status },
        "job": { "id": queued.job.id, "status": queued.job.status },
    }));

    process_one(state).await;
    Ok(())
}

async fn stop(state: &AppState, cli_args: &HashMap<String, String>) -> Result<(), DeployError> {
    let job = state.provisioner.request_stop(required(cli_args, "tenant")?).await?;

    print_json(&json!({
        "success": true,
        "queued": true,
        "job": { "id": job.id, "status": job.status },
    }));

    process_one(state).await;
    Ok(())
}

async fn status(state: &AppState, cli_args: &HashMap<String, String>) -> Result<(), DeployError> {
    let tenant_id = required(cli_args, "tenant")?;
    let tenant = state
        .store
        .get_tenant(tenant_id)
        .await?
        .ok_or_else(|| DeployError::NotFound(format!("Tenant {}", tenant_id)))?;

    let deployments: Vec<Value> = state
        .store
        .tenant_deployments(tenant_id)
        .await?
        .into_iter()
        .take(5)
        .map(|d| json!({ "id": d.id, "status": d.status, "error": d.error, "logs": d.logs }))
        .collect();

    // Job payloads carry API keys and are never printed
    let jobs: Vec<Value> = state
        .store
        .tenant_jobs(tenant_id)
        .await?
        .into_iter()
        .take(10)
        .map(|j| {
            json!({
                "id": j.id,
                "type": j.job_type,
                "status": j.status,
                "attempt": j.attempt,
                "error": j.error,
                "logs": j.logs,
            })
        })
        .collect();

    print_json(&json!({
        "tenant": {
            "id": tenant.id,
            "status": tenant.status,
            "runtimeStatus": tenant.runtime_status,
            "containerName": tenant.container_name,
            "runtimePort": tenant.runtime_port,
            "lastHeartbeatAt": tenant.last_heartbeat_at,
        },
        "deployments": deployments,
        "jobs": jobs,
    }));
    Ok(())
}

async fn process(state: &AppState, cli_args: &HashMap<String, String>) -> Result<(), DeployError> {
    let limit = clamp_limit(cli_args.get("limit").and_then(|l| l.parse().ok()));
    let job_ids = state.processor.process_queue(limit).await?;

    print_json(&json!({
        "success": true,
        "processed": job_ids.len(),
        "jobIds": job_ids,
    }));
    Ok(())
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to listen for SIGTERM");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to listen for SIGINT");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Ctrl+C received, shutting down...");
    }
}
