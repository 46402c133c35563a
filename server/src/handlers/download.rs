//! File download handler

use super::with_deadline;
use crate::error::SessionError;
use crate::session::Session;
use crate::state::ServerState;
use protocol::packets::encode_file_header;
use protocol::{PacketStream, MAX_DOWNLOAD_LEN};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::time::Instant;
use tracing::{debug, info};

/// Handle FILE_REQUEST
///
/// Sends one FILE_TRANSFER header whose total length announces the file
/// size, then the raw file content in chunks of at most `chunk_size`
/// bytes. There is no end marker; the client counts bytes.
pub async fn handle_download<S>(
    stream: &mut PacketStream<S>,
    state: &ServerState,
    session: &Session,
    filename: &str,
    deadline: Option<Instant>,
) -> Result<u64, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut file = state
        .storage
        .open_for_read(&session.username, filename)
        .await?;

    let len = file.metadata().await?.len();
    if len > MAX_DOWNLOAD_LEN as u64 {
        return Err(SessionError::FileTooLarge {
            len,
            max: MAX_DOWNLOAD_LEN,
        });
    }

    info!("Sending {} ({} bytes) to {}", filename, len, session.username);

    with_deadline(
        deadline,
        stream.send(|buf| encode_file_header(buf, session.token, len as usize)),
    )
    .await?;

    let mut chunk = vec![0u8; state.chunk_size];
    let mut sent = 0u64;
    while sent < len {
        let want = (len - sent).min(chunk.len() as u64) as usize;
        let n = file.read(&mut chunk[..want]).await?;
        if n == 0 {
            return Err(SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{} shrank during download", filename),
            )));
        }
        with_deadline(deadline, stream.write_all(&chunk[..n])).await?;
        sent += n as u64;
    }
    with_deadline(deadline, stream.flush()).await?;

    debug!("Sent {} bytes of {} to {}", sent, filename, session.username);
    Ok(sent)
}
