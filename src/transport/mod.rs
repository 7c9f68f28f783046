//! Transport layer for the magnet protocol.
//!
//! This module provides the wire message definitions and the bounded-read
//! stream wrapper every request travels over.

pub mod content;
pub mod protocol;
pub mod stream;

pub use protocol::*;
pub use stream::{Connection, TransportHandle, READ_CHUNK_SIZE};
