//! Leave request handler

use super::Flow;
use crate::session::Session;
use tracing::info;

/// Handle LEAVE_REQUEST
///
/// There is no logout response; the connection is simply closed.
pub fn handle_leave(session: &Session) -> Flow {
    if session.is_authenticated() {
        info!("Client {} ({}) left", session.username, session.peer);
    } else {
        info!("Unauthenticated client {} left", session.peer);
    }
    Flow::Close
}
