//! Network layer for subnet discovery.
//!
//! This module resolves the local interface, enumerates the subnet behind
//! it, probes every candidate, and answers probes from other peers.

pub mod discovery;
pub mod netinfo;
pub mod responder;

pub use discovery::{plan_batches, Batch, BatchReport, DiscoveryReport, DiscoveryScheduler};
pub use netinfo::{
    prefix_len, InterfaceInfo, InterfaceSource, NetInfo, StaticInterfaces, Subnet, SubnetHosts,
    SystemInterfaces,
};
pub use responder::{ContentStore, Responder, StoredContent};
