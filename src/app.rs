//! Main node lifecycle and coordination.
//!
//! An [`App`] answers probes from other peers and periodically probes the
//! local subnet itself, keeping the host registry current.

use crate::{
    network::{DiscoveryReport, DiscoveryScheduler, NetInfo, Responder},
    session::{HostRegistry, ProtocolEngine, Snapshot},
    utils::{MagnetConfig, Result},
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};

/// A running magnet node
pub struct App {
    /// Node configuration
    config: MagnetConfig,
    /// Shared request engine and registry
    engine: Arc<ProtocolEngine>,
    /// Subnet prober
    scheduler: DiscoveryScheduler,
}

/// Summary of the node's state
#[derive(Debug, Clone)]
pub struct AppStats {
    /// Interface being scanned
    pub interface: String,
    /// Port peers are probed on
    pub port: u16,
    /// Registered peers
    pub known_peers: usize,
    /// Registered peers that reported a hostname
    pub named_peers: usize,
}

impl App {
    /// Create a node for `config`, reading the host's interfaces
    pub fn new(config: MagnetConfig) -> Self {
        let net_info = NetInfo::new(config.network.interface.clone());
        Self::with_net_info(config, net_info)
    }

    /// Create a node resolving interfaces through `net_info`
    pub fn with_net_info(config: MagnetConfig, net_info: NetInfo) -> Self {
        let registry = Arc::new(HostRegistry::new());
        let engine = Arc::new(ProtocolEngine::new(registry, &config));
        let scheduler = DiscoveryScheduler::new(Arc::clone(&engine), net_info, &config);

        Self {
            config,
            engine,
            scheduler,
        }
    }

    /// Shared request engine
    pub fn engine(&self) -> &Arc<ProtocolEngine> {
        &self.engine
    }

    /// Subnet prober
    pub fn scheduler(&self) -> &DiscoveryScheduler {
        &self.scheduler
    }

    /// Run one discovery pass
    pub async fn discover(&self) -> DiscoveryReport {
        self.scheduler.discover().await
    }

    /// Current registry contents
    pub async fn snapshot(&self) -> Snapshot {
        self.engine.registry().snapshot().await
    }

    /// Answer probes and rediscover on the configured interval, forever
    pub async fn run(self) -> Result<()> {
        let responder = Responder::from_config(&self.config).await?;
        let mut responder = responder.spawn();

        log::info!(
            "Scanning {} every {}s on port {}",
            self.config.network.interface,
            self.config.discovery.interval_secs,
            self.config.network.port
        );

        let mut ticker = interval(self.config.discovery.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut known = BTreeSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.discover().await;
                    known = log_changes(&known, &report);
                }
                result = &mut responder => {
                    return match result {
                        Ok(outcome) => outcome,
                        Err(e) => Err(crate::utils::MagnetError::unexpected(e.to_string())),
                    };
                }
            }
        }
    }

    /// Get node statistics
    pub async fn stats(&self) -> AppStats {
        let snapshot = self.snapshot().await;
        AppStats {
            interface: self.config.network.interface.clone(),
            port: self.config.network.port,
            known_peers: snapshot.len(),
            named_peers: snapshot.hostnames.iter().flatten().count(),
        }
    }
}

/// Log peers that appeared or vanished since the previous pass
fn log_changes(previous: &BTreeSet<String>, report: &DiscoveryReport) -> BTreeSet<String> {
    if !report.ok {
        log::warn!("Discovery pass skipped: interface unavailable");
    }

    let current: BTreeSet<String> = report
        .hosts
        .iter()
        .map(|host| {
            host.hostname
                .clone()
                .unwrap_or_else(|| host.socket_address())
        })
        .collect();

    for peer in current.difference(previous) {
        log::info!("Peer joined: {}", peer);
    }
    for peer in previous.difference(&current) {
        log::info!("Peer gone: {}", peer);
    }

    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::StaticInterfaces;

    #[tokio::test]
    async fn test_app_without_interface() {
        let config = MagnetConfig::default();
        let app = App::with_net_info(
            config,
            NetInfo::with_source("wlan0", Arc::new(StaticInterfaces::new())),
        );

        let report = app.discover().await;
        assert!(!report.ok);

        let stats = app.stats().await;
        assert_eq!(stats.interface, "wlan0");
        assert_eq!(stats.port, 2024);
        assert_eq!(stats.known_peers, 0);
    }

    #[test]
    fn test_log_changes_tracks_membership() {
        let previous: BTreeSet<String> = ["alpha".to_string()].into_iter().collect();
        let report = DiscoveryReport {
            ok: true,
            ..DiscoveryReport::default()
        };

        let current = log_changes(&previous, &report);
        assert!(current.is_empty());
    }
}
