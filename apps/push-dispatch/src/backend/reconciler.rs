//! Watches the discovery feed and keeps [`BackendSet`] in step with it.
//!
//! Startup blocks for one snapshot, bounded by a timeout; a slow registry
//! must never keep the dispatcher from starting. After that the reconciler
//! runs until the feed closes. Each snapshot produces a fresh generation:
//! endpoints for unchanged hostnames are reused (connection reuse), new
//! hostnames get new endpoints, and removed hostnames are cancelled before
//! the generation is published.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use crate::discovery::{DiscoveryFeed, ZoneMap};
use crate::rpc::GatewayConnector;

use super::{BackendSet, Endpoint, Generation};

pub struct Reconciler {
    backends: BackendSet,
    connector: Arc<dyn GatewayConnector>,
    zone: String,
    startup_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        backends: BackendSet,
        connector: Arc<dyn GatewayConnector>,
        zone: String,
        startup_timeout: Duration,
    ) -> Self {
        Self {
            backends,
            connector,
            zone,
            startup_timeout,
        }
    }

    /// Block for the initial snapshot (bounded by the startup timeout), then
    /// watch until the discovery feed closes.
    pub async fn run<F: DiscoveryFeed>(self, mut feed: F) {
        self.init(&mut feed).await;
        self.watch(feed).await;
    }

    /// Load the first membership snapshot, bounded by the startup timeout. A
    /// slow registry must never keep the dispatcher from starting.
    pub async fn init<F: DiscoveryFeed>(&self, feed: &mut F) {
        match time::timeout(self.startup_timeout, feed.changed()).await {
            Ok(true) => {
                if let Some(zones) = feed.fetch().await {
                    self.apply(&zones);
                }
                tracing::info!(
                    zone = %self.zone,
                    backends = self.backends.len(),
                    "initial gateway membership loaded"
                );
            }
            Ok(false) => {
                tracing::info!("discovery feed closed before the first snapshot");
            }
            Err(_) => {
                tracing::warn!(
                    zone = %self.zone,
                    "timed out waiting for the initial discovery snapshot, starting with no backends"
                );
            }
        }
    }

    /// React to membership notifications until the feed closes.
    pub async fn watch<F: DiscoveryFeed>(self, mut feed: F) {
        while feed.changed().await {
            let Some(zones) = feed.fetch().await else {
                continue;
            };
            self.apply(&zones);
        }
        tracing::info!("discovery feed closed, membership watch exiting");
    }

    /// Build the next generation from one snapshot and swap it in.
    fn apply(&self, zones: &ZoneMap) {
        let instances = zones.get(&self.zone).map(Vec::as_slice).unwrap_or_default();
        if instances.is_empty() {
            // A transient fetch anomaly must not collapse live membership.
            tracing::error!(
                zone = %self.zone,
                "discovery snapshot has no instances for the zone, keeping previous membership"
            );
            return;
        }

        let current = self.backends.snapshot();
        let mut next: Generation = HashMap::with_capacity(instances.len());
        for instance in instances {
            if let Some(existing) = current.get(&instance.hostname) {
                next.insert(instance.hostname.clone(), existing.clone());
                continue;
            }
            match self.connector.connect(instance) {
                Ok(rpc) => {
                    tracing::info!(
                        backend = %instance.hostname,
                        addr = %instance.addr,
                        "gateway joined"
                    );
                    next.insert(
                        instance.hostname.clone(),
                        Arc::new(Endpoint::new(instance, rpc)),
                    );
                }
                Err(e) => {
                    // Partial membership is fine; this host waits for the
                    // next notification.
                    tracing::error!(
                        backend = %instance.hostname,
                        addr = %instance.addr,
                        ?e,
                        "failed to connect new gateway, leaving it out of this generation"
                    );
                }
            }
        }

        if next.is_empty() {
            tracing::error!(
                zone = %self.zone,
                "no gateway in the snapshot was usable, keeping previous membership"
            );
            return;
        }

        for (hostname, endpoint) in current.iter() {
            if !next.contains_key(hostname) {
                tracing::info!(backend = %hostname, "gateway left");
                endpoint.cancel();
            }
        }
        self.backends.store(next);
    }
}
