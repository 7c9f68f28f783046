//! Local interface lookup and subnet enumeration.
//!
//! Lookups fail soft: a missing interface, an interface without IPv4, or an
//! OS error all resolve to an [`InterfaceInfo`] without an address, and
//! enumeration then reports `ok = false`.

use crate::utils::{MagnetError, NetworkError, Result};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;

/// Where interface addresses come from
pub trait InterfaceSource: Send + Sync {
    /// First IPv4 address and netmask bound to `interface`, if any
    fn ipv4(&self, interface: &str) -> Result<Option<(Ipv4Addr, Ipv4Addr)>>;
}

/// Reads the host's interfaces
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn ipv4(&self, interface: &str) -> Result<Option<(Ipv4Addr, Ipv4Addr)>> {
        let found = if_addrs::get_if_addrs()?
            .into_iter()
            .filter(|iface| iface.name == interface)
            .find_map(|iface| match iface.addr {
                if_addrs::IfAddr::V4(v4) => Some((v4.ip, v4.netmask)),
                _ => None,
            });
        Ok(found)
    }
}

/// Fixed interface table
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces {
    entries: Vec<(String, Ipv4Addr, Ipv4Addr)>,
}

impl StaticInterfaces {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `address`/`netmask` to `interface`
    pub fn with(mut self, interface: &str, address: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        self.entries.push((interface.to_string(), address, netmask));
        self
    }
}

impl InterfaceSource for StaticInterfaces {
    fn ipv4(&self, interface: &str) -> Result<Option<(Ipv4Addr, Ipv4Addr)>> {
        Ok(self
            .entries
            .iter()
            .find(|(name, _, _)| name == interface)
            .map(|(_, address, netmask)| (*address, *netmask)))
    }
}

/// Result of resolving one interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// Interface name as requested
    pub interface: String,
    /// IPv4 address, `None` if resolution failed
    pub address: Option<Ipv4Addr>,
    /// Prefix length, `None` if resolution failed
    pub prefix_len: Option<u8>,
}

impl InterfaceInfo {
    /// Subnet the interface sits on.
    ///
    /// `None` when unresolved or when the prefix length is zero.
    pub fn subnet(&self) -> Option<Subnet> {
        match (self.address, self.prefix_len) {
            (Some(address), Some(prefix_len)) if prefix_len > 0 => {
                Subnet::new(address, prefix_len).ok()
            }
            _ => None,
        }
    }
}

/// Number of set bits across the four netmask octets
pub fn prefix_len(netmask: Ipv4Addr) -> u8 {
    netmask
        .octets()
        .iter()
        .map(|octet| octet.count_ones() as u8)
        .sum()
}

fn mask(prefix_len: u8) -> u32 {
    match prefix_len {
        0 => 0,
        n => u32::MAX << (32 - u32::from(n)),
    }
}

/// An IPv4 network address plus prefix length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Subnet {
    /// Subnet of length `prefix_len` containing `address`
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 32 {
            return Err(NetworkError::InvalidAddress {
                address: format!("{address}/{prefix_len}"),
            }
            .into());
        }

        Ok(Self {
            network: Ipv4Addr::from(u32::from(address) & mask(prefix_len)),
            prefix_len,
        })
    }

    /// Network address
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// Prefix length
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Netmask
    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(mask(self.prefix_len))
    }

    /// Broadcast address
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !mask(self.prefix_len))
    }

    /// Whether `address` lies inside the subnet
    pub fn contains(&self, address: Ipv4Addr) -> bool {
        u32::from(address) & mask(self.prefix_len) == u32::from(self.network)
    }

    /// Usable host addresses in ascending order.
    ///
    /// Network and broadcast addresses are excluded, except on /31 and /32
    /// where every address is a host.
    pub fn hosts(&self) -> SubnetHosts {
        let first = u64::from(u32::from(self.network));
        let last = u64::from(u32::from(self.broadcast()));
        match self.prefix_len {
            31 | 32 => SubnetHosts { next: first, end: last + 1 },
            _ => SubnetHosts { next: first + 1, end: last },
        }
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl FromStr for Subnet {
    type Err = MagnetError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || NetworkError::InvalidAddress {
            address: s.to_string(),
        };
        let (address, prefix_len) = s.split_once('/').ok_or_else(invalid)?;
        let address = address.parse::<Ipv4Addr>().map_err(|_| invalid())?;
        let prefix_len = prefix_len.parse::<u8>().map_err(|_| invalid())?;
        Self::new(address, prefix_len)
    }
}

/// Lazy ascending iterator over a subnet's hosts
#[derive(Debug, Clone)]
pub struct SubnetHosts {
    next: u64,
    end: u64,
}

impl Iterator for SubnetHosts {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Ipv4Addr> {
        if self.next >= self.end {
            return None;
        }
        let address = Ipv4Addr::from(self.next as u32);
        self.next += 1;
        Some(address)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SubnetHosts {}

/// Resolves the configured interface and enumerates its subnet
#[derive(Clone)]
pub struct NetInfo {
    interface: String,
    source: Arc<dyn InterfaceSource>,
}

impl NetInfo {
    /// Look interfaces up on this host
    pub fn new(interface: impl Into<String>) -> Self {
        Self::with_source(interface, Arc::new(SystemInterfaces))
    }

    /// Look interfaces up through `source`
    pub fn with_source(interface: impl Into<String>, source: Arc<dyn InterfaceSource>) -> Self {
        Self {
            interface: interface.into(),
            source,
        }
    }

    /// Interface used by [`enumerate_local_hosts`](Self::enumerate_local_hosts)
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Address and prefix length of `interface`, or nulls on any failure
    pub fn resolve(&self, interface: &str) -> InterfaceInfo {
        let unresolved = || InterfaceInfo {
            interface: interface.to_string(),
            address: None,
            prefix_len: None,
        };

        match self.source.ipv4(interface) {
            Ok(Some((address, netmask))) => InterfaceInfo {
                interface: interface.to_string(),
                address: Some(address),
                prefix_len: Some(prefix_len(netmask)),
            },
            Ok(None) => {
                log::warn!(
                    "{}",
                    NetworkError::InterfaceUnavailable {
                        interface: interface.to_string(),
                        reason: "no IPv4 binding".to_string(),
                    }
                );
                unresolved()
            }
            Err(e) => {
                log::warn!("Interface lookup for {} failed: {}", interface, e);
                unresolved()
            }
        }
    }

    /// Subnet of the configured interface
    pub fn local_subnet(&self) -> Option<Subnet> {
        self.resolve(&self.interface).subnet()
    }

    /// Every host address on the configured interface's subnet.
    ///
    /// Returns `(false, [])` when the interface cannot be resolved.
    pub fn enumerate_local_hosts(&self) -> (bool, Vec<Ipv4Addr>) {
        match self.local_subnet() {
            Some(subnet) => {
                log::debug!("Enumerating {} on {}", subnet, self.interface);
                (true, subnet.hosts().collect())
            }
            None => (false, Vec::new()),
        }
    }
}

impl fmt::Debug for NetInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetInfo")
            .field("interface", &self.interface)
            .finish()
    }
}
