//! Registry of peers that completed a handshake.
//!
//! Entries are keyed by hostname. An entry without a hostname is never
//! matched against another one and is always appended.

use crate::transport::TransportHandle;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// A peer that answered a HEAD handshake
#[derive(Debug, Clone)]
pub struct HostEntry {
    /// Display name reported by the peer
    pub hostname: Option<String>,
    /// Address reported by the peer
    pub address: String,
    /// Listening port reported by the peer
    pub port: u16,
    /// Stream the handshake completed on
    pub transport: TransportHandle,
    /// When the handshake completed
    pub handshake_at: DateTime<Utc>,
    /// Registry-wide upsert counter at the time this entry was stored
    pub generation: u64,
}

impl HostEntry {
    /// Create an entry for a handshake that just completed
    pub fn new(
        hostname: Option<String>,
        address: impl Into<String>,
        port: u16,
        transport: TransportHandle,
    ) -> Self {
        Self {
            hostname,
            address: address.into(),
            port,
            transport,
            handshake_at: Utc::now(),
            generation: 0,
        }
    }

    /// `address:port`
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Read-only copy of the registry
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Hostnames in insertion order, parallel to `hosts`
    pub hostnames: Vec<Option<String>>,
    /// Entries in insertion order
    pub hosts: Vec<HostEntry>,
}

impl Snapshot {
    /// Number of entries
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// Outcome of [`HostRegistry::upsert`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    /// A new entry was appended
    Inserted,
    /// An entry with the same hostname was overwritten in place
    Replaced {
        /// Address the old entry pointed at
        previous_address: String,
    },
}

#[derive(Default)]
struct Inner {
    hostnames: Vec<Option<String>>,
    hosts: Vec<HostEntry>,
    generation: u64,
}

/// Deduplicated table of reachable peers
#[derive(Default)]
pub struct HostRegistry {
    inner: RwLock<Inner>,
}

impl HostRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `entry`, replacing the entry with the same hostname if any.
    ///
    /// Upserts are serialized, so the stored entry for a hostname is always
    /// the one whose upsert ran last. A superseded stream is shut down.
    pub async fn upsert(&self, mut entry: HostEntry) -> Upsert {
        let superseded = {
            let mut inner = self.inner.write().await;
            inner.generation += 1;
            entry.generation = inner.generation;

            let existing = entry.hostname.as_ref().and_then(|name| {
                if !inner.hostnames.iter().any(|h| h.as_ref() == Some(name)) {
                    return None;
                }
                inner
                    .hosts
                    .iter()
                    .position(|host| host.hostname.as_ref() == Some(name))
            });

            match existing {
                Some(index) => {
                    let old = std::mem::replace(&mut inner.hosts[index], entry);
                    let reused = old.transport.same_stream(&inner.hosts[index].transport);
                    Some((old, reused))
                }
                None => {
                    inner.hostnames.push(entry.hostname.clone());
                    inner.hosts.push(entry);
                    None
                }
            }
        };

        match superseded {
            Some((old, reused)) => {
                if !reused {
                    old.transport.close().await;
                }
                log::info!(
                    "Updated peer {} (was {})",
                    old.hostname.as_deref().unwrap_or("<unnamed>"),
                    old.socket_address()
                );
                Upsert::Replaced {
                    previous_address: old.address,
                }
            }
            None => Upsert::Inserted,
        }
    }

    /// Entry registered under `hostname`
    pub async fn get(&self, hostname: &str) -> Option<HostEntry> {
        let inner = self.inner.read().await;
        inner
            .hosts
            .iter()
            .find(|host| host.hostname.as_deref() == Some(hostname))
            .cloned()
    }

    /// Copy of the current hostnames and entries
    pub async fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read().await;
        Snapshot {
            hostnames: inner.hostnames.clone(),
            hosts: inner.hosts.clone(),
        }
    }

    /// Number of entries
    pub async fn len(&self) -> usize {
        self.inner.read().await.hosts.len()
    }

    /// Whether there are no entries
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every entry and shut down their streams
    pub async fn clear(&self) {
        let removed = {
            let mut inner = self.inner.write().await;
            inner.hostnames.clear();
            std::mem::take(&mut inner.hosts)
        };

        for entry in removed {
            entry.transport.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Connection;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn handle(peer: &str) -> (DuplexStream, TransportHandle) {
        let (remote, local) = tokio::io::duplex(256);
        (remote, TransportHandle::new(Connection::from_stream(local, peer)))
    }

    #[tokio::test]
    async fn test_insert_then_replace_by_hostname() {
        let registry = HostRegistry::new();
        let (_a, first) = handle("10.0.0.2:2024");
        let (_b, second) = handle("10.0.0.3:2024");

        let outcome = registry
            .upsert(HostEntry::new(Some("alpha".into()), "10.0.0.2", 2024, first))
            .await;
        assert_eq!(outcome, Upsert::Inserted);

        let outcome = registry
            .upsert(HostEntry::new(Some("alpha".into()), "10.0.0.3", 2024, second.clone()))
            .await;
        assert_eq!(
            outcome,
            Upsert::Replaced {
                previous_address: "10.0.0.2".to_string()
            }
        );

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.hostnames, vec![Some("alpha".to_string())]);
        assert_eq!(snapshot.hosts.len(), 1);
        assert_eq!(snapshot.hosts[0].address, "10.0.0.3");
        assert!(snapshot.hosts[0].transport.same_stream(&second));
    }

    #[tokio::test]
    async fn test_hostnames_stay_unique() {
        let registry = HostRegistry::new();
        let names = ["alpha", "beta", "alpha", "gamma", "beta", "alpha"];
        let mut streams = Vec::new();

        for (i, name) in names.iter().enumerate() {
            let address = format!("10.0.0.{}", i + 1);
            let (remote, transport) = handle(&address);
            streams.push(remote);
            registry
                .upsert(HostEntry::new(Some(name.to_string()), address, 2024, transport))
                .await;
        }

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 3);
        let mut seen = std::collections::HashSet::new();
        for host in &snapshot.hosts {
            assert!(seen.insert(host.hostname.clone()));
        }
        assert_eq!(registry.get("alpha").await.unwrap().address, "10.0.0.6");
        assert_eq!(registry.get("beta").await.unwrap().address, "10.0.0.5");
        assert_eq!(registry.get("gamma").await.unwrap().address, "10.0.0.4");
    }

    #[tokio::test]
    async fn test_unnamed_entries_are_never_merged() {
        let registry = HostRegistry::new();
        let (_a, first) = handle("10.0.0.2:2024");
        let (_b, second) = handle("10.0.0.2:2024");

        registry.upsert(HostEntry::new(None, "10.0.0.2", 2024, first)).await;
        registry.upsert(HostEntry::new(None, "10.0.0.2", 2024, second)).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.hostnames, vec![None, None]);
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn test_generation_increases() {
        let registry = HostRegistry::new();
        let (_a, first) = handle("10.0.0.2:2024");
        let (_b, second) = handle("10.0.0.3:2024");

        registry.upsert(HostEntry::new(Some("alpha".into()), "10.0.0.2", 2024, first)).await;
        let before = registry.get("alpha").await.unwrap().generation;
        registry.upsert(HostEntry::new(Some("alpha".into()), "10.0.0.3", 2024, second)).await;
        let after = registry.get("alpha").await.unwrap().generation;

        assert!(after > before);
    }

    #[tokio::test]
    async fn test_superseded_stream_is_closed() {
        let registry = HostRegistry::new();
        let (mut old_remote, old) = handle("10.0.0.2:2024");
        let (_new_remote, new) = handle("10.0.0.3:2024");

        registry.upsert(HostEntry::new(Some("alpha".into()), "10.0.0.2", 2024, old)).await;
        registry.upsert(HostEntry::new(Some("alpha".into()), "10.0.0.3", 2024, new)).await;

        let mut buf = [0u8; 8];
        assert_eq!(old_remote.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rehandshake_on_same_stream_keeps_it_open() {
        let registry = HostRegistry::new();
        let (_remote, transport) = handle("10.0.0.2:2024");

        registry
            .upsert(HostEntry::new(Some("alpha".into()), "10.0.0.2", 2024, transport.clone()))
            .await;
        registry
            .upsert(HostEntry::new(Some("alpha".into()), "10.0.0.2", 2024, transport.clone()))
            .await;

        let status = transport.lock().await.send("still open").await;
        assert!(status.is_ok());
    }

    #[tokio::test]
    async fn test_clear_closes_streams() {
        let registry = HostRegistry::new();
        let (mut remote, transport) = handle("10.0.0.2:2024");
        registry.upsert(HostEntry::new(Some("alpha".into()), "10.0.0.2", 2024, transport)).await;

        registry.clear().await;
        assert!(registry.is_empty().await);

        let mut buf = [0u8; 8];
        assert_eq!(remote.read(&mut buf).await.unwrap(), 0);
    }
}
