use anyhow::{Context, Result};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use super::rtt::parse_rtt;
use super::types::ProbeOutcome;

/// Raw report of one invocation of the probe facility
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    /// The facility considered the target reachable
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Something that sends echo requests to an address and reports back
#[async_trait::async_trait]
pub trait ProbeFacility: Send + Sync {
    /// Send `attempts` sequential echo requests, waiting at most
    /// `timeout_per_attempt` for each reply.
    async fn echo(&self, address: &str, attempts: u32, timeout_per_attempt: Duration) -> Result<ProbeReport>;
}

/// The system `ping` program
pub struct SystemPing {
    program: String,
}

impl SystemPing {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }
}

impl Default for SystemPing {
    fn default() -> Self {
        Self::new("ping")
    }
}

#[async_trait::async_trait]
impl ProbeFacility for SystemPing {
    async fn echo(&self, address: &str, attempts: u32, timeout_per_attempt: Duration) -> Result<ProbeReport> {
        let timeout_seconds = timeout_per_attempt.as_secs().max(1);

        let output = Command::new(&self.program)
            .arg("-c")
            .arg(attempts.to_string())
            .arg("-W")
            .arg(timeout_seconds.to_string())
            .arg(address)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.program))?;

        Ok(ProbeReport {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Turns probe facility reports into outcomes
pub struct Prober {
    facility: Arc<dyn ProbeFacility>,
    attempts: u32,
    timeout_per_attempt: Duration,
}

impl Prober {
    pub fn new(facility: Arc<dyn ProbeFacility>, attempts: u32, timeout_per_attempt: Duration) -> Self {
        Self { facility, attempts, timeout_per_attempt }
    }

    /// Probe one address. Never fails, an unreachable target is an outcome.
    pub async fn probe(&self, address: &str) -> ProbeOutcome {
        let report = match self.facility.echo(address, self.attempts, self.timeout_per_attempt).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Ping to {} could not be started: {:#}", address, e);
                return ProbeOutcome::failure();
            }
        };

        if !report.success {
            tracing::error!(
                "Ping to {} failed.\nStdout:\n{}\nStderr:\n{}",
                address,
                report.stdout,
                report.stderr
            );
            return ProbeOutcome::failure();
        }

        match parse_rtt(&report.stdout) {
            Ok(rtt) => {
                tracing::debug!("Ping to {} succeeded: {}", address, rtt);
                ProbeOutcome::success(rtt)
            }
            Err(e) => {
                tracing::error!("Could not parse the ping output for {}: {}", address, e);
                ProbeOutcome::failure()
            }
        }
    }
}
