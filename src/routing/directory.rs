//! Port directory
//!
//! Answers existence and duplicate questions about named ports. A port name
//! registered more than once means a second application is producing the
//! same port, which must block recording.

use super::graph::PortGraph;
use crate::utils::error::{CaptureError, CaptureResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// How a single source port looks in the graph right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Missing,
    Present,
    /// Registered this many times (always more than one)
    Duplicated(usize),
}

/// Number of exact-string matches of `name` in `ports`
pub fn count_occurrences(ports: &[String], name: &str) -> usize {
    ports.iter().filter(|port| port.as_str() == name).count()
}

/// The port list at one instant; all questions within a scan use one snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortSnapshot {
    ports: Vec<String>,
}

impl PortSnapshot {
    pub fn new(ports: Vec<String>) -> Self {
        Self { ports }
    }

    pub fn ports(&self) -> &[String] {
        &self.ports
    }

    pub fn occurrences(&self, name: &str) -> usize {
        count_occurrences(&self.ports, name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ports.iter().any(|port| port == name)
    }

    pub fn source_state(&self, name: &str) -> SourceState {
        match self.occurrences(name) {
            0 => SourceState::Missing,
            1 => SourceState::Present,
            n => SourceState::Duplicated(n),
        }
    }
}

/// Read-side view of the routing graph
#[derive(Clone)]
pub struct PortDirectory {
    graph: Arc<dyn PortGraph>,
}

impl PortDirectory {
    pub fn new(graph: Arc<dyn PortGraph>) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &Arc<dyn PortGraph> {
        &self.graph
    }

    pub async fn snapshot(&self) -> CaptureResult<PortSnapshot> {
        Ok(PortSnapshot::new(self.graph.list_ports().await?))
    }

    /// Treats an unreachable graph as "not there"
    pub async fn port_exists(&self, name: &str) -> bool {
        match self.graph.list_ports().await {
            Ok(ports) => ports.iter().any(|port| port == name),
            Err(e) => {
                tracing::debug!("Failed to check port existence for {}: {}", name, e);
                false
            }
        }
    }

    /// Poll until `name` shows up or `timeout` elapses
    pub async fn wait_for_port(
        &self,
        name: &str,
        timeout: Duration,
        poll: Duration,
    ) -> CaptureResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.port_exists(name).await {
                tracing::debug!("Port found: {}", name);
                return Ok(());
            }
            if Instant::now() + poll > deadline {
                return Err(CaptureError::PortTimeout {
                    port: name.to_string(),
                    waited: timeout,
                });
            }
            tokio::time::sleep(poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::memory::MemoryGraph;

    fn ports(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_duplicate_counting_is_exact() {
        let list = ports(&["A:1", "A:1", "A-2:1"]);
        assert_eq!(count_occurrences(&list, "A:1"), 2);
        assert_eq!(count_occurrences(&list, "A-2:1"), 1);
        assert_eq!(count_occurrences(&list, "A"), 0);
    }

    #[test]
    fn test_source_state() {
        let snapshot = PortSnapshot::new(ports(&["A:1", "A:1", "A-2:1"]));
        assert_eq!(snapshot.source_state("A:1"), SourceState::Duplicated(2));
        assert_eq!(snapshot.source_state("A-2:1"), SourceState::Present);
        assert_eq!(snapshot.source_state("B:1"), SourceState::Missing);
    }

    #[tokio::test]
    async fn test_directory_queries() {
        let directory = PortDirectory::new(Arc::new(MemoryGraph::with_ports(["A:1", "A:1"])));
        assert!(directory.port_exists("A:1").await);
        assert!(!directory.port_exists("A:2").await);
        assert_eq!(directory.snapshot().await.unwrap().occurrences("A:1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_port_times_out() {
        let directory = PortDirectory::new(Arc::new(MemoryGraph::new()));
        let start = Instant::now();
        let err = directory
            .wait_for_port("enc:input_1", Duration::from_secs(5), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::PortTimeout { .. }));
        assert!(start.elapsed() <= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_port_sees_late_port() {
        let graph = Arc::new(MemoryGraph::new());
        let directory = PortDirectory::new(graph.clone());

        let late = graph.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(750)).await;
            late.add_port("enc:input_1");
        });

        directory
            .wait_for_port("enc:input_1", Duration::from_secs(5), Duration::from_millis(100))
            .await
            .unwrap();
    }
}
