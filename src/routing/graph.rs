//! Port graph backends
//!
//! The capture engine never links ports itself; it drives an external
//! utility (`pw-link` by default) as a subprocess and reports its failures
//! as text.

use crate::utils::error::{CaptureError, CaptureResult};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

/// Operations the capture engine needs from the routing graph
#[async_trait]
pub trait PortGraph: Send + Sync {
    /// All named ports currently in the graph, duplicates included
    async fn list_ports(&self) -> CaptureResult<Vec<String>>;

    /// Link an output port to an input port
    async fn connect(&self, source: &str, dest: &str) -> CaptureResult<()>;

    /// Remove the link between two ports
    async fn disconnect(&self, source: &str, dest: &str) -> CaptureResult<()>;
}

/// PipeWire graph accessed through the `pw-link` command line tool
#[derive(Debug, Clone)]
pub struct PwLink {
    program: String,
}

impl PwLink {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> CaptureResult<std::process::Output> {
        Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| CaptureError::Routing(format!("failed to run {}: {}", self.program, e)))
    }

    async fn run_link(&self, args: &[&str], action: &str) -> CaptureResult<()> {
        let output = self.run(args).await?;
        if !output.status.success() {
            let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(stderr.trim());
            }
            return Err(CaptureError::Routing(format!(
                "failed to {} ports: {} (output: {})",
                action, output.status, text
            )));
        }
        Ok(())
    }
}

impl Default for PwLink {
    fn default() -> Self {
        Self::new("pw-link")
    }
}

/// Port names from `pw-link -io` output, section headers skipped
pub fn parse_port_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty()
                && !line.starts_with("Input ports:")
                && !line.starts_with("Output ports:")
        })
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl PortGraph for PwLink {
    async fn list_ports(&self) -> CaptureResult<Vec<String>> {
        let output = self.run(&["-io"]).await?;
        if !output.status.success() {
            return Err(CaptureError::Routing(format!(
                "failed to list ports: {} ({})",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_port_list(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn connect(&self, source: &str, dest: &str) -> CaptureResult<()> {
        self.run_link(&[source, dest], "connect").await?;
        tracing::debug!("Linked {} -> {}", source, dest);
        Ok(())
    }

    async fn disconnect(&self, source: &str, dest: &str) -> CaptureResult<()> {
        self.run_link(&["-d", source, dest], "disconnect").await?;
        tracing::debug!("Unlinked {} -> {}", source, dest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_list_skips_headers() {
        let output = "Output ports:\n  system:capture_1\nFirefox:output_FL\n\nInput ports:\n  jamcapture_guitar:input_1\n";
        assert_eq!(
            parse_port_list(output),
            vec![
                "system:capture_1",
                "Firefox:output_FL",
                "jamcapture_guitar:input_1"
            ]
        );
    }

    #[test]
    fn test_parse_keeps_repeated_ports() {
        let ports = parse_port_list("A:1\nA:1\nA-2:1\n");
        assert_eq!(ports.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_program_is_routing_error() {
        let graph = PwLink::new("/nonexistent/pw-link-for-tests");
        let err = graph.list_ports().await.unwrap_err();
        assert!(matches!(err, CaptureError::Routing(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_link_reports_output() {
        // `false` ignores its arguments and exits 1
        let graph = PwLink::new("false");
        let err = graph.connect("a:1", "b:1").await.unwrap_err();
        assert!(err.to_string().contains("failed to connect ports"));
    }
}
