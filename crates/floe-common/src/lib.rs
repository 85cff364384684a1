//! Floe Common Types and Transport
//!
//! This crate provides the shared infrastructure used by every floe
//! component:
//!
//! - **Addresses**: packed node addresses (`IPv4:port` in a `u64`) and
//!   service addresses (kind + instance index in a `u32`)
//! - **Errors**: one error type with a stable [`ErrorCode`] taxonomy that
//!   survives the wire
//! - **Codec**: pluggable payload marshalling, JSON by default
//! - **Message**: the binary wire frame exchanged between nodes
//! - **Transport**: length-prefixed framing over TCP and WebSocket

pub mod addr;
pub mod codec;
pub mod error;
pub mod message;
pub mod transport;

pub use addr::{NodeAddr, ServiceAddr};
pub use codec::{Codec, JsonCodec};
pub use error::{Error, ErrorCode, Result};
pub use message::Message;
