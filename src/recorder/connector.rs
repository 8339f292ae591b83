//! Post-start connection of sources to encoder inputs

use super::coordinator::Timings;
use crate::config::{Channel, MAX_SOURCES_PER_CHANNEL};
use crate::routing::ConnectionManager;
use tokio::sync::oneshot;

/// One source-to-encoder link to make
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPlan {
    pub channel: String,
    pub source: String,
    pub dest: String,
}

/// Source `i` of a channel feeds encoder input `i + 1`; disabled slots keep
/// their position but get no link.
pub fn plan_links(channels: &[Channel]) -> Vec<LinkPlan> {
    let mut plan = Vec::new();
    for channel in channels {
        for (index, source) in channel
            .sources
            .iter()
            .enumerate()
            .take(MAX_SOURCES_PER_CHANNEL)
        {
            if let Some(port) = source.port() {
                plan.push(LinkPlan {
                    channel: channel.name.clone(),
                    source: port.to_string(),
                    dest: channel.encoder_port(index),
                });
            }
        }
    }
    plan
}

/// Make every planned link; failures are logged and skipped.
/// Returns how many links were made.
pub async fn connect_all(manager: &ConnectionManager, plan: &[LinkPlan], timings: &Timings) -> usize {
    // give the encoder time to register its inputs
    tokio::time::sleep(timings.encoder_settle).await;

    let mut connected = 0;
    for link in plan {
        if let Err(e) = manager
            .directory()
            .wait_for_port(&link.dest, timings.encoder_port_timeout, timings.port_poll)
            .await
        {
            tracing::error!("Channel {}: encoder input not available: {}", link.channel, e);
            continue;
        }

        match manager.connect(&link.source, &link.dest).await {
            Ok(attempt) => {
                tracing::info!(
                    "Channel {}: connected {} -> {} (attempt {})",
                    link.channel,
                    link.source,
                    link.dest,
                    attempt
                );
                connected += 1;
            }
            Err(e) => tracing::error!("Channel {}: {}", link.channel, e),
        }
    }
    connected
}

/// Background task body: connect everything unless stopped first
pub async fn run(
    manager: ConnectionManager,
    plan: Vec<LinkPlan>,
    timings: Timings,
    stop: oneshot::Receiver<()>,
) {
    tokio::select! {
        biased;
        _ = stop => tracing::debug!("Port connector retired"),
        connected = connect_all(&manager, &plan, &timings) => {
            if connected == plan.len() {
                tracing::info!("All {} source links established", connected);
            } else {
                tracing::warn!("{} of {} source links established", connected, plan.len());
            }
        }
    }
}
