//! Discovery-registry client.
//!
//! The registry exposes a long-poll endpoint per logical service:
//! `GET {node}/registry/poll?service=plume.gateway&index={n}` blocks until
//! the instance set changes past `index` (or the server's poll window
//! lapses), then returns the full snapshot keyed by zone. A background task
//! owns the HTTP side and feeds the reconciler through [`DiscoveryFeed`]:
//! a change notification followed by a snapshot fetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{mpsc, RwLock};
use tokio::time;

/// Logical service name the gateway fleet registers under.
pub const GATEWAY_SERVICE: &str = "plume.gateway";

/// Wait between polls after a registry node error, before rotating nodes.
const RETRY_BACKOFF: Duration = Duration::from_secs(3);

/// Outer bound on one long-poll request; the server's window is shorter.
const POLL_TIMEOUT: Duration = Duration::from_secs(40);

/// One live gateway process as reported by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Instance {
    /// Unique within the service; membership is keyed by this.
    pub hostname: String,
    /// Dialable `host:port` for the gateway RPC listener.
    pub addr: String,
}

/// Zone name to instance list, the shape of one registry snapshot.
pub type ZoneMap = HashMap<String, Vec<Instance>>;

/// Read side of the discovery feed consumed by the membership reconciler.
#[async_trait]
pub trait DiscoveryFeed: Send {
    /// Block until the instance set changes. Returns `false` once the feed
    /// is closed and no further notifications will arrive.
    async fn changed(&mut self) -> bool;

    /// Latest snapshot, `None` until the first poll lands.
    async fn fetch(&self) -> Option<ZoneMap>;
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    index: u64,
    zones: ZoneMap,
}

/// [`DiscoveryFeed`] backed by the HTTP long-poll task.
pub struct HttpFeed {
    events: mpsc::Receiver<()>,
    snapshot: Arc<RwLock<Option<ZoneMap>>>,
}

impl HttpFeed {
    /// Spawn the poll task against the given registry nodes and return the
    /// feed. Dropping the feed stops the task.
    pub fn spawn(nodes: Vec<String>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(1);
        let snapshot = Arc::new(RwLock::new(None));
        tokio::spawn(poll_loop(nodes, events_tx, snapshot.clone()));
        Self {
            events: events_rx,
            snapshot,
        }
    }
}

#[async_trait]
impl DiscoveryFeed for HttpFeed {
    async fn changed(&mut self) -> bool {
        self.events.recv().await.is_some()
    }

    async fn fetch(&self) -> Option<ZoneMap> {
        self.snapshot.read().await.clone()
    }
}

async fn poll_loop(
    nodes: Vec<String>,
    events: mpsc::Sender<()>,
    snapshot: Arc<RwLock<Option<ZoneMap>>>,
) {
    if nodes.is_empty() {
        tracing::error!("no registry nodes configured, discovery disabled");
        return;
    }
    let http = match reqwest::Client::builder().timeout(POLL_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(?e, "failed to build discovery http client");
            return;
        }
    };

    let mut index = 0u64;
    let mut node_idx = 0usize;
    loop {
        let node = &nodes[node_idx % nodes.len()];
        let url = format!("{node}/registry/poll?service={GATEWAY_SERVICE}&index={index}");
        match poll_once(&http, &url).await {
            Ok(resp) => {
                if resp.index == index {
                    // Poll window lapsed with no change.
                    continue;
                }
                index = resp.index;
                *snapshot.write().await = Some(resp.zones);
                if events.send(()).await.is_err() {
                    // Feed dropped — reconciler is gone.
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(%node, ?e, "registry poll failed, rotating node");
                node_idx = node_idx.wrapping_add(1);
                time::sleep(RETRY_BACKOFF).await;
            }
        }
    }
}

async fn poll_once(http: &reqwest::Client, url: &str) -> Result<PollResponse, reqwest::Error> {
    http.get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<PollResponse>()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_response_shape() {
        let json = r#"{
            "index": 7,
            "zones": {
                "z1": [
                    { "hostname": "gw-a", "addr": "10.0.0.1:7020" },
                    { "hostname": "gw-b", "addr": "10.0.0.2:7020" }
                ],
                "z2": []
            }
        }"#;
        let resp: PollResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.index, 7);
        assert_eq!(resp.zones["z1"].len(), 2);
        assert_eq!(resp.zones["z1"][0].hostname, "gw-a");
        assert_eq!(resp.zones["z1"][1].addr, "10.0.0.2:7020");
        assert!(resp.zones["z2"].is_empty());
    }
}
