/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! External asset optimizer.
//!
//! The optimizer is a black box run as a subprocess over an unpacked bundle.
//! Only lines starting with `[Error] ` are kept from its output.

use async_trait::async_trait;
use common::consts::{OPTIMIZER_BUILD_DIR, OPTIMIZER_ERROR_PREFIX};
use common::error::{JobError, JobResult};
use common::types::Cli;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizerOutcome {
    /// The optimizer exited. `errors` holds its user-facing error lines.
    Completed { errors: Vec<String> },
    /// The optimizer exited with a non-zero status.
    Crashed { status: String, errors: Vec<String> },
    TimedOut,
}

/// Builds the optimizer command. Tests substitute a deterministic script.
#[async_trait]
pub trait OptimizerFactory: Send + Sync + fmt::Debug {
    fn command(&self, container: &str, src: &Path, domains: &[String]) -> Command;

    /// Called after a timeout, once the process group has been killed.
    async fn cleanup(&self, _container: &str) {}
}

#[derive(Debug, Clone)]
pub struct DockerOptimizer {
    binpath_docker: String,
    image: String,
}

impl DockerOptimizer {
    pub fn new(cli: &Cli) -> Self {
        Self {
            binpath_docker: cli.binpath_docker.clone(),
            image: cli.optimizer_image.clone(),
        }
    }
}

#[async_trait]
impl OptimizerFactory for DockerOptimizer {
    fn command(&self, container: &str, src: &Path, domains: &[String]) -> Command {
        let mut cmd = Command::new(&self.binpath_docker);
        cmd.arg("run")
            .arg("--name")
            .arg(container)
            .arg("-v")
            .arg(format!("{}:{}", src.display(), OPTIMIZER_BUILD_DIR))
            .arg("-e")
            .arg(format!("DOMAIN_NAMES_WITH_PROTOCOL={}", domains.join(",")))
            .arg("--rm")
            .arg(&self.image);
        cmd
    }

    async fn cleanup(&self, container: &str) {
        match Command::new(&self.binpath_docker)
            .args(["rm", "-f", container])
            .output()
            .await
        {
            Ok(output) if !output.status.success() => {
                warn!(
                    container,
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "Failed to remove optimizer container"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(container, error = %e, "Failed to run docker rm"),
        }
    }
}

/// Runs `sh -c <script>` in the bundle directory instead of the optimizer.
#[derive(Debug, Clone)]
pub struct ScriptedOptimizer {
    pub script: String,
}

impl ScriptedOptimizer {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

#[async_trait]
impl OptimizerFactory for ScriptedOptimizer {
    fn command(&self, _container: &str, src: &Path, domains: &[String]) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.script)
            .current_dir(src)
            .env("DOMAIN_NAMES_WITH_PROTOCOL", domains.join(","));
        cmd
    }
}

async fn scan_errors<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<Vec<String>> {
    let Some(reader) = reader else {
        return Ok(Vec::new());
    };

    let mut lines = BufReader::new(reader).lines();
    let mut errors = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if let Some(message) = line.strip_prefix(OPTIMIZER_ERROR_PREFIX) {
            errors.push(message.to_string());
        }
    }

    Ok(errors)
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "Optimizer pid out of range");
        return;
    };

    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        warn!(pid, error = %e, "Failed to kill optimizer process group");
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

/// Runs the optimizer over `src` with a wall-clock `timeout`. On timeout the
/// whole process group is killed and the factory cleans up after it.
pub async fn run(
    factory: &dyn OptimizerFactory,
    container: &str,
    src: &Path,
    domains: &[String],
    timeout: Duration,
) -> JobResult<OptimizerOutcome> {
    let mut cmd = factory.command(container, src, domains);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| JobError::transient(format!("Failed to start optimizer: {}", e)))?;
    let pid = child.id();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let work = async {
        let (out, err, status) = tokio::join!(scan_errors(stdout), scan_errors(stderr), child.wait());
        (out, err, status)
    };

    let (out, err, status) = match tokio::time::timeout(timeout, work).await {
        Ok(finished) => finished,
        Err(_) => {
            warn!(container, ?pid, "Optimizer timed out");
            if let Some(pid) = pid {
                kill_group(pid);
            }
            factory.cleanup(container).await;
            return Ok(OptimizerOutcome::TimedOut);
        }
    };

    let status =
        status.map_err(|e| JobError::transient(format!("Failed to wait for optimizer: {}", e)))?;
    let mut errors = out.map_err(|e| JobError::transient(e.to_string()))?;
    errors.extend(err.map_err(|e| JobError::transient(e.to_string()))?);

    if !status.success() {
        warn!(container, %status, "Optimizer exited unsuccessfully");
        return Ok(OptimizerOutcome::Crashed {
            status: status.to_string(),
            errors,
        });
    }

    debug!(container, errors = errors.len(), "Optimizer finished");
    Ok(OptimizerOutcome::Completed { errors })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collects_error_lines() {
        let dir = tempfile::tempdir().unwrap();
        let optimizer = ScriptedOptimizer::new(
            "echo 'minified 3 files'; echo '[Error] bad.css: unexpected }'; echo '[Error] x.js' >&2",
        );

        let outcome = run(
            &optimizer,
            "c1",
            dir.path(),
            &["http://foo.pubstormapp.com".to_string()],
            Duration::from_secs(10),
        )
        .await
        .unwrap();

        match outcome {
            OptimizerOutcome::Completed { mut errors } => {
                errors.sort();
                assert_eq!(errors, vec!["bad.css: unexpected }", "x.js"]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_passes_domains_and_works_in_bundle_dir() {
        let dir = tempfile::tempdir().unwrap();
        let optimizer = ScriptedOptimizer::new("echo \"$DOMAIN_NAMES_WITH_PROTOCOL\" > domains.txt");

        let outcome = run(
            &optimizer,
            "c2",
            dir.path(),
            &[
                "https://foo.pubstormapp.com".to_string(),
                "http://www.foo.com".to_string(),
            ],
            Duration::from_secs(10),
        )
        .await
        .unwrap();

        assert_eq!(outcome, OptimizerOutcome::Completed { errors: vec![] });
        let written = std::fs::read_to_string(dir.path().join("domains.txt")).unwrap();
        assert_eq!(written.trim(), "https://foo.pubstormapp.com,http://www.foo.com");
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let optimizer = ScriptedOptimizer::new("sleep 30");

        let started = std::time::Instant::now();
        let outcome = run(&optimizer, "c3", dir.path(), &[], Duration::from_millis(200))
            .await
            .unwrap();

        assert_eq!(outcome, OptimizerOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let optimizer = ScriptedOptimizer::new("echo '[Error] out of memory'; exit 3");

        let outcome = run(&optimizer, "c4", dir.path(), &[], Duration::from_secs(10))
            .await
            .unwrap();

        match outcome {
            OptimizerOutcome::Crashed { status, errors } => {
                assert!(status.contains('3'));
                assert_eq!(errors, vec!["out of memory"]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let optimizer = ScriptedOptimizer::new("(sleep 1; touch late.txt) & wait");

        let outcome = run(&optimizer, "c5", dir.path(), &[], Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(outcome, OptimizerOutcome::TimedOut);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dir.path().join("late.txt").exists());
    }

    #[test]
    fn test_docker_command() {
        let optimizer = DockerOptimizer {
            binpath_docker: "docker".to_string(),
            image: "quay.io/nitrous/pubstorm-optimizer".to_string(),
        };
        let cmd = optimizer.command(
            "a1b2-5-1700000000",
            Path::new("/tmp/a1b2-5"),
            &["https://foo.pubstormapp.com".to_string()],
        );
        let args = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect::<Vec<_>>();

        assert_eq!(
            args,
            vec![
                "run",
                "--name",
                "a1b2-5-1700000000",
                "-v",
                "/tmp/a1b2-5:/tmp/optimizer/build",
                "-e",
                "DOMAIN_NAMES_WITH_PROTOCOL=https://foo.pubstormapp.com",
                "--rm",
                "quay.io/nitrous/pubstorm-optimizer",
            ]
        );
    }
}
