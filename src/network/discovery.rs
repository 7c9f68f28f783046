//! Peer discovery over the local subnet.
//!
//! Every candidate address is probed with a HEAD handshake on the
//! configured port. Probes run in batches: the first batch covers indices
//! `[start, batch_limit)`, and each following batch doubles the limit, so the
//! number of connection attempts in flight stays bounded on the first pass.

use crate::network::NetInfo;
use crate::session::{HostEntry, ProtocolEngine, Snapshot};
use crate::utils::MagnetConfig;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Index range probed concurrently in one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    /// First candidate index
    pub start: usize,
    /// One past the last candidate index
    pub end: usize,
    /// Batch limit in effect for this batch
    pub limit: usize,
}

impl Batch {
    /// Number of probes in the batch
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the batch holds no probes
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Split `len` candidates into batches starting at `start`.
///
/// A limit at or below `start` puts the whole remainder in one batch.
pub fn plan_batches(len: usize, start: usize, batch_limit: usize) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut start = start;
    let mut limit = batch_limit;

    while start < len {
        let end = if limit > start { limit.min(len) } else { len };
        batches.push(Batch { start, end, limit });
        start = end;
        limit = limit.saturating_mul(2);
    }

    batches
}

/// Outcome of one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Indices covered
    pub batch: Batch,
    /// Probes that completed a handshake
    pub succeeded: usize,
    /// Probes that returned a failure status or whose task died
    pub failed: usize,
}

/// Outcome of a discovery pass
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    /// False when the interface could not be resolved
    pub ok: bool,
    /// Registry hostnames after the pass
    pub hostnames: Vec<Option<String>>,
    /// Registry entries after the pass
    pub hosts: Vec<HostEntry>,
    /// Per-batch results in execution order
    pub batches: Vec<BatchReport>,
}

impl DiscoveryReport {
    fn from_snapshot(snapshot: Snapshot, batches: Vec<BatchReport>) -> Self {
        Self {
            ok: true,
            hostnames: snapshot.hostnames,
            hosts: snapshot.hosts,
            batches,
        }
    }
}

/// Drives discovery passes and feeds the registry
pub struct DiscoveryScheduler {
    engine: Arc<ProtocolEngine>,
    net_info: NetInfo,
    port: u16,
    batch_limit: usize,
}

impl DiscoveryScheduler {
    /// Create a scheduler configured from `config`
    pub fn new(engine: Arc<ProtocolEngine>, net_info: NetInfo, config: &MagnetConfig) -> Self {
        Self {
            engine,
            net_info,
            port: config.network.port,
            batch_limit: config.discovery.batch_limit,
        }
    }

    /// Create a scheduler probing `port` with the given first batch size
    pub fn with_settings(
        engine: Arc<ProtocolEngine>,
        net_info: NetInfo,
        port: u16,
        batch_limit: usize,
    ) -> Self {
        Self {
            engine,
            net_info,
            port,
            batch_limit,
        }
    }

    /// Engine probes are sent through
    pub fn engine(&self) -> &Arc<ProtocolEngine> {
        &self.engine
    }

    /// Probe the local subnet with the configured batch limit
    pub async fn discover(&self) -> DiscoveryReport {
        self.probe_all(None, 0, self.batch_limit).await
    }

    /// Probe `hosts` (or the local subnet when `None`) from index `start`.
    ///
    /// If the local subnet cannot be resolved the registry is cleared and
    /// the report comes back with `ok = false` and no hosts.
    pub async fn probe_all(
        &self,
        hosts: Option<Vec<Ipv4Addr>>,
        start: usize,
        batch_limit: usize,
    ) -> DiscoveryReport {
        let hosts = match hosts {
            Some(hosts) => hosts,
            None => {
                let (ok, hosts) = self.net_info.enumerate_local_hosts();
                if !ok {
                    log::warn!(
                        "Cannot enumerate hosts on {}, clearing registry",
                        self.net_info.interface()
                    );
                    self.engine.registry().clear().await;
                    return DiscoveryReport::default();
                }
                hosts
            }
        };

        let mut reports = Vec::new();
        for batch in plan_batches(hosts.len(), start, batch_limit) {
            reports.push(self.run_batch(&hosts[batch.start..batch.end], batch).await);
        }

        let snapshot = self.engine.registry().snapshot().await;
        log::info!(
            "Discovery pass over {} candidates found {} peers",
            hosts.len().saturating_sub(start),
            snapshot.len()
        );
        DiscoveryReport::from_snapshot(snapshot, reports)
    }

    async fn run_batch(&self, candidates: &[Ipv4Addr], batch: Batch) -> BatchReport {
        log::debug!(
            "Probing candidates {}..{} (limit {})",
            batch.start,
            batch.end,
            batch.limit
        );

        let handles: Vec<_> = candidates
            .iter()
            .map(|address| {
                let engine = Arc::clone(&self.engine);
                let host = address.to_string();
                let port = self.port;
                tokio::spawn(async move {
                    engine
                        .send_request(None, &host, port, "HEAD", "/", None)
                        .await
                })
            })
            .collect();

        let mut report = BatchReport {
            batch,
            succeeded: 0,
            failed: 0,
        };

        for result in futures::future::join_all(handles).await {
            match result {
                Ok(status) if status.is_ok() => report.succeeded += 1,
                Ok(_) => report.failed += 1,
                Err(e) => {
                    log::warn!("Probe task failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Responder, StaticInterfaces};
    use crate::session::HostRegistry;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn engine() -> Arc<ProtocolEngine> {
        Arc::new(ProtocolEngine::with_settings(
            Arc::new(HostRegistry::new()),
            "magnet/0.0",
            Duration::from_secs(2),
        ))
    }

    fn unused_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_plan_grows_geometrically() {
        let batches = plan_batches(300, 0, 256);
        assert_eq!(
            batches,
            vec![
                Batch { start: 0, end: 256, limit: 256 },
                Batch { start: 256, end: 300, limit: 512 },
            ]
        );

        let batches = plan_batches(1000, 0, 100);
        let limits: Vec<_> = batches.iter().map(|b| b.limit).collect();
        assert_eq!(limits, vec![100, 200, 400, 800, 1600]);
        assert_eq!(batches.last().unwrap().end, 1000);
    }

    #[test]
    fn test_plan_small_and_empty() {
        assert_eq!(plan_batches(254, 0, 256), vec![Batch { start: 0, end: 254, limit: 256 }]);
        assert!(plan_batches(0, 0, 256).is_empty());
        assert!(plan_batches(10, 10, 256).is_empty());
    }

    #[test]
    fn test_plan_limit_below_start_takes_remainder() {
        assert_eq!(plan_batches(300, 280, 256), vec![Batch { start: 280, end: 300, limit: 256 }]);
    }

    #[tokio::test]
    async fn test_probe_all_batches_over_300_candidates() {
        let scheduler = DiscoveryScheduler::with_settings(
            engine(),
            NetInfo::with_source("eth0", Arc::new(StaticInterfaces::new())),
            unused_port(),
            256,
        );

        let candidates = vec![Ipv4Addr::LOCALHOST; 300];
        let report = scheduler.probe_all(Some(candidates), 0, 256).await;

        assert!(report.ok);
        assert!(report.hosts.is_empty());
        let batches: Vec<_> = report.batches.iter().map(|r| r.batch).collect();
        assert_eq!(
            batches,
            vec![
                Batch { start: 0, end: 256, limit: 256 },
                Batch { start: 256, end: 300, limit: 512 },
            ]
        );
        assert_eq!(report.batches[0].failed, 256);
        assert_eq!(report.batches[1].failed, 44);
    }

    #[tokio::test]
    async fn test_unresolvable_interface_clears_registry() {
        let engine = engine();
        let (_remote, local) = tokio::io::duplex(64);
        let transport = crate::transport::TransportHandle::new(
            crate::transport::Connection::from_stream(local, "10.0.0.9:2024"),
        );
        engine
            .registry()
            .upsert(HostEntry::new(Some("stale".into()), "10.0.0.9", 2024, transport))
            .await;

        let scheduler = DiscoveryScheduler::with_settings(
            engine.clone(),
            NetInfo::with_source("wlan0", Arc::new(StaticInterfaces::new())),
            2024,
            256,
        );
        let report = scheduler.discover().await;

        assert!(!report.ok);
        assert!(report.hostnames.is_empty());
        assert!(report.hosts.is_empty());
        assert!(engine.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_discovers_two_peers_on_subnet() {
        let alpha = Responder::bind(SocketAddr::from(([127, 0, 0, 2], 0)), Some("alpha".into()))
            .await
            .unwrap();
        let port = alpha.local_addr().unwrap().port();
        let beta = Responder::bind(SocketAddr::from(([127, 0, 0, 3], port)), Some("beta".into()))
            .await
            .unwrap();
        tokio::spawn(alpha.run());
        tokio::spawn(beta.run());

        let interfaces = StaticInterfaces::new().with(
            "eth0",
            Ipv4Addr::new(127, 0, 0, 5),
            Ipv4Addr::new(255, 255, 255, 0),
        );
        let net_info = NetInfo::with_source("eth0", Arc::new(interfaces));
        let (ok, candidates) = net_info.enumerate_local_hosts();
        assert!(ok);
        assert_eq!(candidates.len(), 254);

        let scheduler = DiscoveryScheduler::with_settings(engine(), net_info, port, 256);
        let report = scheduler.discover().await;

        assert!(report.ok);
        assert_eq!(report.batches.len(), 1);
        assert_eq!(report.batches[0].batch.len(), 254);
        assert_eq!(report.batches[0].succeeded, 2);

        let mut hostnames: Vec<_> = report.hostnames.iter().flatten().cloned().collect();
        hostnames.sort();
        assert_eq!(hostnames, vec!["alpha".to_string(), "beta".to_string()]);
        assert_eq!(report.hosts.len(), 2);
        assert!(!report.hosts[0].transport.same_stream(&report.hosts[1].transport));

        for host in &report.hosts {
            let expected = match host.hostname.as_deref() {
                Some("alpha") => "127.0.0.2",
                Some("beta") => "127.0.0.3",
                other => panic!("unexpected peer {other:?}"),
            };
            assert_eq!(host.address, expected);
            assert_eq!(host.port, port);
        }
    }

    #[tokio::test]
    async fn test_default_config_peer_registered_once() {
        let mut config = MagnetConfig::default();
        config.network.bind_address = std::net::IpAddr::from([127, 0, 0, 4]);
        config.network.port = {
            let listener = std::net::TcpListener::bind("127.0.0.4:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let responder = Responder::from_config(&config).await.unwrap();
        tokio::spawn(responder.run());

        let scheduler = DiscoveryScheduler::new(
            engine(),
            NetInfo::with_source("eth0", Arc::new(StaticInterfaces::new())),
            &config,
        );
        let candidates = vec![Ipv4Addr::new(127, 0, 0, 4)];

        for _ in 0..3 {
            let report = scheduler.probe_all(Some(candidates.clone()), 0, 256).await;
            assert_eq!(report.hosts.len(), 1);
            assert!(report.hostnames[0].is_some());
        }
    }

    #[tokio::test]
    async fn test_rediscovery_keeps_one_entry_per_peer() {
        let alpha = Responder::bind(SocketAddr::from(([127, 0, 0, 2], 0)), Some("alpha".into()))
            .await
            .unwrap();
        let port = alpha.local_addr().unwrap().port();
        tokio::spawn(alpha.run());

        let scheduler = DiscoveryScheduler::with_settings(
            engine(),
            NetInfo::with_source("eth0", Arc::new(StaticInterfaces::new())),
            port,
            256,
        );
        let candidates = vec![Ipv4Addr::new(127, 0, 0, 2)];

        let first = scheduler.probe_all(Some(candidates.clone()), 0, 256).await;
        let second = scheduler.probe_all(Some(candidates), 0, 256).await;

        assert_eq!(first.hosts.len(), 1);
        assert_eq!(second.hosts.len(), 1);
        assert!(second.hosts[0].generation > first.hosts[0].generation);
        assert!(!second.hosts[0].transport.same_stream(&first.hosts[0].transport));
    }
}
