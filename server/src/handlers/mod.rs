//! Request handlers for the different protocol packet types

pub mod download;
pub mod leave;
pub mod list;
pub mod logon;
pub mod upload;

pub use download::handle_download;
pub use leave::handle_leave;
pub use list::handle_list;
pub use logon::handle_logon;
pub use upload::handle_upload;

use crate::error::SessionError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// What the connection does after a request was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Run `fut`, failing with `SessionError::Timeout` after `limit`
pub(crate) async fn with_timeout<T, E, F>(limit: Option<Duration>, fut: F) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, E>>,
    SessionError: From<E>,
{
    with_deadline(limit.map(|limit| Instant::now() + limit), fut).await
}

/// Run `fut`, failing with `SessionError::Timeout` once `deadline` passes.
///
/// Every step of one request shares the same deadline, so a peer that
/// trickles bytes cannot stretch a request past it.
pub(crate) async fn with_deadline<T, E, F>(deadline: Option<Instant>, fut: F) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, E>>,
    SessionError: From<E>,
{
    match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
            Ok(result) => result.map_err(SessionError::from),
            Err(_) => Err(SessionError::Timeout),
        },
        None => fut.await.map_err(SessionError::from),
    }
}
