//! File upload handler

use super::with_deadline;
use crate::error::SessionError;
use crate::session::Session;
use crate::state::ServerState;
use protocol::packets::{encode_header_only, read_file_name, PacketHeader};
use protocol::{PacketStream, PacketType, ProtocolError, FILE_NAME_LEN, HEADER_LEN};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{info, warn};

/// Handle FILE_TRANSFER (upload)
///
/// The header has already been read. The file name field follows, then
/// raw body bytes up to the declared total length, read straight off the
/// stream. A failed transfer removes the partial file.
pub async fn handle_upload<S>(
    stream: &mut PacketStream<S>,
    state: &ServerState,
    session: &Session,
    header: &PacketHeader,
    deadline: Option<Instant>,
) -> Result<u64, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let prefix_len = HEADER_LEN + FILE_NAME_LEN;
    let total_len = header.total_length as usize;
    if total_len < prefix_len {
        return Err(ProtocolError::MalformedPacket("upload shorter than file name field").into());
    }

    let field = with_deadline(deadline, stream.read_exact(FILE_NAME_LEN)).await?;
    let filename = read_file_name(field)?;

    let mut file = state
        .storage
        .open_for_write(&session.username, &filename)
        .await?;

    let body_len = (total_len - prefix_len) as u64;
    info!("Receiving {} ({} bytes) from {}", filename, body_len, session.username);

    let received = receive_body(stream, &mut file, body_len, state.chunk_size, deadline).await;
    drop(file);

    if let Err(e) = received {
        warn!("Upload of {} from {} failed: {}", filename, session.username, e);
        if let Err(rm) = state.storage.remove_file(&session.username, &filename).await {
            warn!("Failed to remove partial upload {}: {}", filename, rm);
        }
        return Err(e);
    }

    with_deadline(
        deadline,
        stream.send(|buf| encode_header_only(buf, PacketType::FileReceivedAck, session.token)),
    )
    .await?;

    info!("Stored {} for {}", filename, session.username);
    Ok(body_len)
}

async fn receive_body<S>(
    stream: &mut PacketStream<S>,
    file: &mut File,
    len: u64,
    chunk_size: usize,
    deadline: Option<Instant>,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut received = 0u64;
    while received < len {
        let want = (len - received).min(chunk_size as u64) as usize;
        let data = with_deadline(deadline, stream.read_chunk(want)).await?;
        file.write_all(data).await?;
        received += data.len() as u64;
    }
    file.flush().await?;
    Ok(())
}
