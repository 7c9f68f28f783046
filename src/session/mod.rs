//! Request handling and peer bookkeeping.
//!
//! The engine speaks the protocol; the registry remembers who answered.

pub mod engine;
pub mod registry;

pub use engine::ProtocolEngine;
pub use registry::{HostEntry, HostRegistry, Snapshot, Upsert};
