//! GetMyMusic Protocol Library
//!
//! Shared protocol definitions for GetMyMusic client-server communication.
//! This includes packet types, constants, payload encoding/decoding and the
//! length-prefixed framing layer used on both ends of a TCP connection.

pub mod constants;
pub mod error;
pub mod framing;
pub mod packets;

pub use constants::*;
pub use error::ProtocolError;
pub use framing::PacketStream;

/// Protocol version
pub const PROTOCOL_VERSION: u8 = 1;
