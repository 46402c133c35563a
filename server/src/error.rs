//! Session error taxonomy
//!
//! Every variant closes the offending connection; none of them affect the
//! accept loop or other sessions.

use crate::auth::AuthError;
use crate::storage::StorageError;
use protocol::{PacketType, ProtocolError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Malformed request: {0}")]
    Malformed(#[from] ProtocolError),

    #[error("Authentication failed for {0:?}")]
    AuthFailure(String),

    #[error("Session token mismatch: expected {expected:#010x}, got {got:#010x}")]
    TokenMismatch { expected: u32, got: u32 },

    #[error("{0:?} requires an authenticated session")]
    NotAuthenticated(PacketType),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("File too large to announce: {len} bytes, maximum {max}")]
    FileTooLarge { len: u64, max: usize },

    #[error("Unexpected packet from client: {0:?}")]
    UnexpectedPacket(PacketType),

    #[error("Timed out waiting for client")]
    Timeout,

    #[error("Authentication store error: {0}")]
    Auth(#[from] AuthError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidName(name) => SessionError::InvalidName(name),
            StorageError::NotFound(name) => SessionError::NotFound(name),
            StorageError::Io(e) => SessionError::Io(e),
        }
    }
}

impl SessionError {
    /// Peer hung up; logged quieter than protocol violations
    pub fn is_disconnect(&self) -> bool {
        match self {
            SessionError::Malformed(e) => e.is_disconnect(),
            _ => false,
        }
    }
}
