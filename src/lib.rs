//! # Magnet
//!
//! Local-network peer discovery and a small stateful request protocol.
//!
//! A node resolves one of its interfaces, enumerates the subnet behind it,
//! probes every address with a HEAD handshake and keeps the peers that
//! answered in a registry keyed by hostname, together with the open stream
//! each one answered on.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use magnet::{App, MagnetConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = App::new(MagnetConfig::default());
//!     let report = app.discover().await;
//!     for host in &report.hosts {
//!         println!("{:?} at {}", host.hostname, host.socket_address());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`network`]: interface resolution, subnet enumeration, the discovery
//!   scheduler and the responder answering other peers
//! - [`session`]: the protocol engine and the host registry
//! - [`transport`]: wire messages and the bounded-read stream wrapper
//! - [`utils`]: configuration and error handling

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod network;
pub mod session;
pub mod transport;
pub mod utils;

pub use app::App;
pub use network::{DiscoveryReport, DiscoveryScheduler, NetInfo, Responder};
pub use session::{HostEntry, HostRegistry, ProtocolEngine};
pub use transport::{Header, Method, Status};
pub use utils::{MagnetConfig, MagnetError, Result};

/// Default configuration values
pub mod defaults {
    /// Interface scanned when none is configured
    pub const DEFAULT_INTERFACE: &str = "wlan0";

    /// Port peers listen on
    pub const DEFAULT_PORT: u16 = 2024;

    /// Size of the first probe batch
    pub const DEFAULT_BATCH_LIMIT: usize = 256;

    /// Per-request timeout in milliseconds
    pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2000;

    /// User agent sent with every request
    pub const DEFAULT_USER_AGENT: &str = "magnet/0.0";
}
