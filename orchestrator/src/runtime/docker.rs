//! Docker CLI runtime

use std::collections::HashSet;
use std::process::{Output, Stdio};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use crate::errors::DeployError;
use crate::redact::{redact, redact_args};
use crate::runtime::{ContainerRuntime, ContainerState, RunSpec};

/// Host side of a published mapping: `[addr:]port[-port]->`
static PUBLISHED_PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)(?:-(\d+))?->").expect("static regex"));

/// Runtime driven through the `docker` command line
#[derive(Debug, Clone)]
pub struct DockerCli {
    bin: String,
}

impl DockerCli {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    async fn output(&self, args: &[String]) -> Result<Output, DeployError> {
        debug!("{}", redact_args(&self.bin, args));
        Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                DeployError::RuntimeUnavailable(format!("Failed to run {}: {}", self.bin, e))
            })
    }

    /// Run a command and return its trimmed stdout
    async fn exec(&self, args: &[String]) -> Result<String, DeployError> {
        let output = self.output(args).await?;
        if !output.status.success() {
            return Err(self.command_error(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn command_error(&self, args: &[String], output: &Output) -> DeployError {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = match stderr.trim() {
            "" => "Unknown docker error".to_string(),
            s => s.to_string(),
        };
        DeployError::Runtime {
            command: redact_args(&self.bin, args),
            stderr: redact(&stderr),
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Build the `docker run` argument list for a tenant container.
///
/// No `-e` flags are ever emitted: the container only sees its mounted config.
pub fn run_args(spec: &RunSpec) -> Vec<String> {
    vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--restart".to_string(),
        "unless-stopped".to_string(),
        "--network".to_string(),
        spec.network.clone(),
        "-p".to_string(),
        format!("{}:{}", spec.host_port, spec.container_port),
        "-v".to_string(),
        format!("{}:{}", spec.mount_source.display(), spec.mount_target),
        spec.image.clone(),
    ]
}

/// Parse the host ports out of `docker ps --format {{.Ports}}` output.
///
/// Handles `0.0.0.0:19000->18789/tcp`, `[::]:19000->18789/tcp`,
/// `:::19000->18789/tcp`, bare `19000->18789/tcp` and published ranges.
pub fn parse_published_ports(output: &str) -> HashSet<u16> {
    let mut ports = HashSet::new();

    for caps in PUBLISHED_PORT.captures_iter(output) {
        let Ok(first) = caps[1].parse::<u16>() else {
            continue;
        };
        let last = caps
            .get(2)
            .and_then(|m| m.as_str().parse::<u16>().ok())
            .unwrap_or(first);

        for port in first..=last.max(first) {
            if port > 0 {
                ports.insert(port);
            }
        }
    }

    ports
}

fn parse_state(output: &str) -> ContainerState {
    let (status, running) = output.trim().split_once('|').unwrap_or((output.trim(), "false"));
    ContainerState {
        status: status.to_string(),
        running: running.trim() == "true",
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn ping(&self) -> Result<(), DeployError> {
        self.exec(&args(["info", "--format", "{{.ServerVersion}}"]))
            .await
            .map(|_| ())
            .map_err(|e| DeployError::RuntimeUnavailable(e.to_string()))
    }

    async fn network_exists(&self, name: &str) -> Result<bool, DeployError> {
        let filter = format!("name=^{}$", name);
        let out = self
            .exec(&args(["network", "ls", "--filter", &filter, "--format", "{{.Name}}"]))
            .await?;
        Ok(out.lines().any(|line| line.trim() == name))
    }

    async fn create_network(&self, name: &str) -> Result<(), DeployError> {
        match self.exec(&args(["network", "create", name])).await {
            Ok(_) => Ok(()),
            // Lost a creation race with another orchestrator
            Err(DeployError::Runtime { stderr, .. }) if stderr.contains("already exists") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn published_host_ports(&self) -> Result<HashSet<u16>, DeployError> {
        let out = self.exec(&args(["ps", "--format", "{{.Ports}}"])).await?;
        Ok(parse_published_ports(&out))
    }

    async fn remove_container(&self, name: &str) -> Result<(), DeployError> {
        match self.exec(&args(["rm", "-f", name])).await {
            Ok(_) => Ok(()),
            Err(DeployError::Runtime { stderr, .. }) if stderr.contains("No such container") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn run_container(&self, spec: &RunSpec) -> Result<String, DeployError> {
        let out = self.exec(&run_args(spec)).await?;
        // Pull progress can precede the id when the image is fetched on demand
        out.lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| DeployError::Runtime {
                command: redact_args(&self.bin, &run_args(spec)),
                stderr: "no container id returned".to_string(),
            })
    }

    async fn container_state(&self, id: &str) -> Result<ContainerState, DeployError> {
        let out = self
            .exec(&args([
                "inspect",
                id,
                "--format",
                "{{.State.Status}}|{{.State.Running}}",
            ]))
            .await?;
        Ok(parse_state(&out))
    }

    async fn container_logs(&self, id: &str, tail: usize) -> Result<String, DeployError> {
        let tail = tail.to_string();
        let cmd = args(["logs", "--tail", &tail, id]);
        let output = self.output(&cmd).await?;
        if !output.status.success() {
            return Err(self.command_error(&cmd, &output));
        }

        // Containers write diagnostics to both streams
        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs.trim().to_string())
    }
}
