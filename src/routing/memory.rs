//! In-process port graph
//!
//! Behaves like the real graph from the engine's point of view: ports can
//! appear, disappear and be registered twice, and link attempts can be made
//! to fail. Used for dry runs and tests.

use super::graph::PortGraph;
use crate::utils::error::{CaptureError, CaptureResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct MemoryGraph {
    ports: Mutex<Vec<String>>,
    links: Mutex<Vec<(String, String)>>,
    pending_connect_failures: AtomicUsize,
    unavailable: AtomicBool,
    list_calls: AtomicUsize,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ports<I, S>(ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let graph = Self::new();
        for port in ports {
            graph.add_port(port);
        }
        graph
    }

    /// Register a port; registering the same name twice creates a duplicate
    pub fn add_port(&self, name: impl Into<String>) {
        self.ports.lock().push(name.into());
    }

    /// Remove one registration of `name`; returns false if absent
    pub fn remove_port(&self, name: &str) -> bool {
        let mut ports = self.ports.lock();
        match ports.iter().position(|p| p == name) {
            Some(index) => {
                ports.remove(index);
                true
            }
            None => false,
        }
    }

    /// Make the next `count` connect calls fail
    pub fn fail_next_connects(&self, count: usize) {
        self.pending_connect_failures.store(count, Ordering::SeqCst);
    }

    /// While set, listing ports fails as if the link utility were missing
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn links(&self) -> Vec<(String, String)> {
        self.links.lock().clone()
    }

    pub fn is_linked(&self, source: &str, dest: &str) -> bool {
        self.links
            .lock()
            .iter()
            .any(|(s, d)| s == source && d == dest)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PortGraph for MemoryGraph {
    async fn list_ports(&self) -> CaptureResult<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CaptureError::Routing("port graph unavailable".to_string()));
        }
        Ok(self.ports.lock().clone())
    }

    async fn connect(&self, source: &str, dest: &str) -> CaptureResult<()> {
        let injected = self
            .pending_connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(CaptureError::Routing(format!(
                "failed to connect ports: {} -> {} (injected)",
                source, dest
            )));
        }

        {
            let ports = self.ports.lock();
            for port in [source, dest] {
                if !ports.iter().any(|p| p == port) {
                    return Err(CaptureError::PortNotFound(port.to_string()));
                }
            }
        }

        let mut links = self.links.lock();
        if links.iter().any(|(s, d)| s == source && d == dest) {
            return Err(CaptureError::Routing(format!(
                "failed to connect ports: {} -> {} already linked",
                source, dest
            )));
        }
        links.push((source.to_string(), dest.to_string()));
        Ok(())
    }

    async fn disconnect(&self, source: &str, dest: &str) -> CaptureResult<()> {
        let mut links = self.links.lock();
        let before = links.len();
        links.retain(|(s, d)| !(s == source && d == dest));
        if links.len() == before {
            return Err(CaptureError::Routing(format!(
                "failed to disconnect ports: {} -> {} not linked",
                source, dest
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_link_and_unlink() {
        let graph = MemoryGraph::with_ports(["dev:1", "enc:input_1"]);
        graph.connect("dev:1", "enc:input_1").await.unwrap();
        assert!(graph.is_linked("dev:1", "enc:input_1"));

        graph.disconnect("dev:1", "enc:input_1").await.unwrap();
        assert!(graph.links().is_empty());
        assert!(graph.disconnect("dev:1", "enc:input_1").await.is_err());
    }

    #[tokio::test]
    async fn test_connect_missing_port() {
        let graph = MemoryGraph::with_ports(["enc:input_1"]);
        let err = graph.connect("dev:1", "enc:input_1").await.unwrap_err();
        assert!(matches!(err, CaptureError::PortNotFound(p) if p == "dev:1"));
    }

    #[tokio::test]
    async fn test_injected_failures_run_out() {
        let graph = MemoryGraph::with_ports(["dev:1", "enc:input_1"]);
        graph.fail_next_connects(2);
        assert!(graph.connect("dev:1", "enc:input_1").await.is_err());
        assert!(graph.connect("dev:1", "enc:input_1").await.is_err());
        assert!(graph.connect("dev:1", "enc:input_1").await.is_ok());
    }

    #[tokio::test]
    async fn test_unavailable_graph() {
        let graph = MemoryGraph::with_ports(["dev:1"]);
        graph.set_unavailable(true);
        assert!(matches!(graph.list_ports().await, Err(CaptureError::Routing(_))));
        graph.set_unavailable(false);
        assert_eq!(graph.list_ports().await.unwrap(), vec!["dev:1".to_string()]);
        assert_eq!(graph.list_calls(), 2);
    }

    #[test]
    fn test_remove_one_registration() {
        let graph = MemoryGraph::with_ports(["dev:1", "dev:1"]);
        assert!(graph.remove_port("dev:1"));
        assert_eq!(graph.ports.lock().len(), 1);
    }
}
