//! GetMyMusic client library
//!
//! `RemoteSession` speaks the GetMyMusic protocol over one TCP connection:
//! signup/logon, listing, upload, download and leave.

pub mod output;
pub mod prompt;
pub mod remote;

pub use remote::RemoteSession;
