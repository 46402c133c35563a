//! File listing handler

use super::with_deadline;
use crate::error::SessionError;
use crate::session::Session;
use crate::state::ServerState;
use protocol::packets::encode_list_response;
use protocol::{PacketStream, MAX_LIST_ENTRIES};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Handle LIST_REQUEST
///
/// Checksums are recomputed from disk on every request.
pub async fn handle_list<S>(
    stream: &mut PacketStream<S>,
    state: &ServerState,
    session: &Session,
    deadline: Option<Instant>,
) -> Result<usize, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut entries = state.storage.list_files(&session.username).await?;

    if entries.len() > MAX_LIST_ENTRIES {
        warn!(
            "{} has {} files; listing only the first {}",
            session.username,
            entries.len(),
            MAX_LIST_ENTRIES
        );
        entries.truncate(MAX_LIST_ENTRIES);
    }

    with_deadline(
        deadline,
        stream.send(|buf| encode_list_response(buf, session.token, &entries)),
    )
    .await?;

    debug!("Sent {} entries to {}", entries.len(), session.username);
    Ok(entries.len())
}
