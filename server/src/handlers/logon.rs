//! Signup and logon handler

use super::with_deadline;
use crate::error::SessionError;
use crate::session::Session;
use crate::state::ServerState;
use protocol::packets::{encode_header_only, Credentials};
use protocol::{PacketStream, PacketType};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::{info, warn};

/// Handle SIGNUP_REQUEST / LOGON_REQUEST
///
/// On success the session is bound to the user under a fresh token, which
/// is sent back in a header-only TOKEN_RESPONSE.
pub async fn handle_logon<S>(
    stream: &mut PacketStream<S>,
    state: &ServerState,
    session: &mut Session,
    credentials: Credentials,
    is_new_user: bool,
    deadline: Option<Instant>,
) -> Result<u32, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Credentials { username, password } = credentials;

    // A name that cannot become a directory never reaches the store
    state.storage.user_directory(&username)?;

    let accepted = if is_new_user {
        info!("User signup: {} from {}", username, session.peer);
        state.auth.create(&username, &password).await?
    } else {
        info!("User logon: {} from {}", username, session.peer);
        state.auth.verify(&username, &password).await?
    };

    if !accepted {
        if is_new_user {
            warn!("Signup rejected for {}: user exists or invalid credentials", username);
        } else {
            warn!("Logon rejected for {}: wrong credentials", username);
        }
        return Err(SessionError::AuthFailure(username));
    }

    state.storage.ensure_user_directory(&username).await?;

    let token = session.authenticate(&username);
    with_deadline(
        deadline,
        stream.send(|buf| encode_header_only(buf, PacketType::TokenResponse, token)),
    )
    .await?;

    Ok(token)
}
