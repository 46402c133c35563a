//! GetMyMusic server library
//!
//! Authentication store, per-user file storage, the per-connection session
//! state machine and the TCP listener that ties them together.

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod listener;
pub mod session;
pub mod state;
pub mod storage;

pub use config::Config;
pub use error::SessionError;
pub use listener::Server;
