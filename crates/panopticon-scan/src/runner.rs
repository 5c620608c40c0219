//! Scan execution backends.
//!
//! [`NmapRunner`] drives the real nmap binary through
//! `tokio::process::Command`. [`MockRunner`] produces synthetic results for
//! environments without nmap or raw-socket privileges.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::error::{Result, ScanError};

/// How a scan was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    Scheduled,
    Manual,
}

/// One fully-resolved scan invocation.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub kind: ScanKind,
    /// Complete nmap argument list, including `-oX <output_path>`.
    pub args: Vec<String>,
    pub output_path: PathBuf,
}

/// What a runner produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// An XML report was written and must be ingested.
    Snapshot(PathBuf),
    /// Counts reported without any report on disk.
    Synthetic { devices: u32, ports: u32 },
}

#[async_trait]
pub trait ScanRunner: Send + Sync {
    async fn run(&self, request: &ScanRequest) -> Result<RunOutcome>;
}

/// Wrapper around the nmap binary.
pub struct NmapRunner {
    nmap_path: String,
}

impl NmapRunner {
    pub fn new(nmap_path: &str) -> Self {
        Self {
            nmap_path: nmap_path.to_string(),
        }
    }

    /// Verify nmap is installed and accessible.
    pub async fn verify_installation(&self) -> Result<String> {
        let output = Command::new(&self.nmap_path)
            .arg("--version")
            .output()
            .await
            .map_err(|_| ScanError::ToolNotFound {
                path: self.nmap_path.clone(),
            })?;

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ScanRunner for NmapRunner {
    async fn run(&self, request: &ScanRequest) -> Result<RunOutcome> {
        tracing::debug!(command = %request.args.join(" "), "Executing nmap command");

        let mut child = Command::new(&self.nmap_path)
            .args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScanError::ToolNotFound {
                path: format!("{}: {e}", self.nmap_path),
            })?;

        // Drain both pipes concurrently so a chatty child never blocks on a
        // full pipe buffer.
        let stdout = child.stdout.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut out) = stdout {
                if let Err(e) = out.read_to_end(&mut buf).await {
                    tracing::warn!(error = %e, "Failed to read nmap stdout");
                }
            }
            if !buf.is_empty() {
                tracing::debug!(stdout = %String::from_utf8_lossy(&buf), "nmap output");
            }
        });

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut err) = stderr {
                if let Err(e) = err.read_to_end(&mut buf).await {
                    tracing::warn!(error = %e, "Failed to read nmap stderr");
                }
            }
            let text = String::from_utf8_lossy(&buf).into_owned();
            if !text.trim().is_empty() {
                tracing::warn!(stderr = %text.trim(), "nmap error output");
            }
            text
        });

        let status = child.wait().await?;
        stdout_task.await?;
        let stderr = stderr_task.await?;

        if !status.success() {
            return Err(ScanError::ToolFailed {
                code: status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(RunOutcome::Snapshot(request.output_path.clone()))
    }
}

/// Runner that never touches the network.
///
/// Reports 5 devices / 15 ports for scheduled scans and 3 / 10 for manual
/// ones after a short delay.
pub struct MockRunner {
    delay: Duration,
}

impl MockRunner {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[async_trait]
impl ScanRunner for MockRunner {
    async fn run(&self, request: &ScanRequest) -> Result<RunOutcome> {
        tracing::info!(kind = ?request.kind, "Running mock scan");
        tokio::time::sleep(self.delay).await;
        let (devices, ports) = match request.kind {
            ScanKind::Scheduled => (5, 15),
            ScanKind::Manual => (3, 10),
        };
        Ok(RunOutcome::Synthetic { devices, ports })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: ScanKind) -> ScanRequest {
        ScanRequest {
            kind,
            args: Vec::new(),
            output_path: PathBuf::from("unused.xml"),
        }
    }

    #[tokio::test]
    async fn mock_counts_depend_on_kind() {
        let runner = MockRunner::new(Duration::ZERO);
        assert_eq!(
            runner.run(&request(ScanKind::Scheduled)).await.unwrap(),
            RunOutcome::Synthetic { devices: 5, ports: 15 }
        );
        assert_eq!(
            runner.run(&request(ScanKind::Manual)).await.unwrap(),
            RunOutcome::Synthetic { devices: 3, ports: 10 }
        );
    }

    #[tokio::test]
    async fn missing_binary_is_tool_not_found() {
        let runner = NmapRunner::new("/nonexistent/panopticon-nmap");
        let err = runner.run(&request(ScanKind::Manual)).await.unwrap_err();
        assert!(matches!(err, ScanError::ToolNotFound { .. }));
        assert!(matches!(
            runner.verify_installation().await,
            Err(ScanError::ToolNotFound { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_tool_failed() {
        // `sh -c '...'` stands in for nmap: the request args follow the binary.
        let runner = NmapRunner::new("sh");
        let req = ScanRequest {
            kind: ScanKind::Manual,
            args: vec!["-c".into(), "echo boom >&2; exit 3".into()],
            output_path: PathBuf::from("unused.xml"),
        };
        match runner.run(&req).await {
            Err(ScanError::ToolFailed { code, stderr }) => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected ToolFailed, got {other:?}"),
        }
    }
}
