//! Per-connection session state machine
//!
//! `Unauthenticated -> Authenticated -> Closed`. Requests are handled one
//! at a time in arrival order. Any error closes the connection; nothing is
//! sent back for protocol-level failures.

use crate::error::SessionError;
use crate::handlers::{self, with_deadline, with_timeout, Flow};
use crate::session::{Session, SessionSlot};
use crate::state::ServerState;
use protocol::packets::{read_file_name, Credentials, PacketHeader};
use protocol::{PacketStream, PacketType, ProtocolError, FILE_NAME_LEN};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub struct Connection<S> {
    stream: PacketStream<S>,
    session: Session,
    state: Arc<ServerState>,
    slot: Option<SessionSlot>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: SocketAddr, state: Arc<ServerState>, slot: Option<SessionSlot>) -> Self {
        Self {
            stream: PacketStream::new(stream),
            session: Session::new(peer),
            state,
            slot,
        }
    }

    /// Serve requests until the client leaves, disconnects or misbehaves
    pub async fn run(mut self) {
        let peer = self.session.peer;
        loop {
            match self.handle_request().await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close) => break,
                Err(e) if e.is_disconnect() => {
                    debug!("Client {} disconnected: {}", peer, e);
                    break;
                }
                Err(e) => {
                    warn!("Dropping client {}: {}", peer, e);
                    break;
                }
            }
        }
        self.session.clear();
        info!("Closed connection to {}", peer);
        // Socket and slot are released when `self` drops
    }

    /// Read one request and handle it to completion.
    ///
    /// The idle timeout covers the wait for the first byte. From then on
    /// the whole request, response included, runs against one deadline.
    pub async fn handle_request(&mut self) -> Result<Flow, SessionError> {
        let idle = self.state.timeouts.idle_timeout();
        if !with_timeout(idle, self.stream.wait_for_packet()).await? {
            return Ok(Flow::Close);
        }

        let deadline = self
            .state
            .timeouts
            .request_timeout()
            .map(|limit| Instant::now() + limit);
        let Some(header) = with_deadline(deadline, self.stream.read_header()).await? else {
            return Ok(Flow::Close);
        };

        self.authorize(&header)?;
        debug!("{:?} from {}", header.packet_type, self.session.peer);

        match header.packet_type {
            PacketType::SignupRequest | PacketType::LogonRequest => {
                let is_new_user = header.packet_type == PacketType::SignupRequest;
                let credentials =
                    Credentials::from_payload(self.read_payload(&header, deadline).await?)?;
                handlers::handle_logon(
                    &mut self.stream,
                    &self.state,
                    &mut self.session,
                    credentials,
                    is_new_user,
                    deadline,
                )
                .await?;
                if let Some(slot) = &self.slot {
                    slot.set_user(&self.session.username);
                }
                Ok(Flow::Continue)
            }
            PacketType::LeaveRequest => Ok(handlers::handle_leave(&self.session)),
            PacketType::ListRequest => {
                if header.payload_len() != 0 {
                    return Err(ProtocolError::MalformedPacket("list request carries a payload").into());
                }
                handlers::handle_list(&mut self.stream, &self.state, &self.session, deadline).await?;
                Ok(Flow::Continue)
            }
            PacketType::FileRequest => {
                let payload = self.read_payload(&header, deadline).await?;
                if payload.len() != FILE_NAME_LEN {
                    return Err(ProtocolError::MalformedPayload("file request is not one name field").into());
                }
                let filename = read_file_name(payload)?;
                handlers::handle_download(
                    &mut self.stream,
                    &self.state,
                    &self.session,
                    &filename,
                    deadline,
                )
                .await?;
                Ok(Flow::Continue)
            }
            PacketType::FileTransfer => {
                handlers::handle_upload(&mut self.stream, &self.state, &self.session, &header, deadline)
                    .await?;
                Ok(Flow::Continue)
            }
            PacketType::TokenResponse | PacketType::ListResponse | PacketType::FileReceivedAck => {
                Err(SessionError::UnexpectedPacket(header.packet_type))
            }
        }
    }

    /// The header token must equal the session's current token exactly
    /// (zero before logon); file operations also need a logged-in user.
    fn authorize(&self, header: &PacketHeader) -> Result<(), SessionError> {
        if header.session_token != self.session.token {
            return Err(SessionError::TokenMismatch {
                expected: self.session.token,
                got: header.session_token,
            });
        }

        let needs_user = matches!(
            header.packet_type,
            PacketType::ListRequest | PacketType::FileRequest | PacketType::FileTransfer
        );
        if needs_user && !self.session.is_authenticated() {
            return Err(SessionError::NotAuthenticated(header.packet_type));
        }
        Ok(())
    }

    async fn read_payload(
        &mut self,
        header: &PacketHeader,
        deadline: Option<Instant>,
    ) -> Result<&[u8], SessionError> {
        with_deadline(deadline, self.stream.read_payload(header)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthStore;
    use crate::config::TimeoutConfig;
    use crate::storage::FileStorage;
    use protocol::packets::{
        decode_list_response, encode_file_request, encode_header_only, encode_logon,
        encode_upload_header,
    };
    use protocol::{HEADER_LEN, MAX_DOWNLOAD_LEN, MAX_LIST_ENTRIES, NO_SESSION};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};
    use tokio::task::JoinHandle;

    struct Harness {
        _dir: TempDir,
        state: Arc<ServerState>,
        client: PacketStream<DuplexStream>,
        server: JoinHandle<()>,
    }

    async fn harness() -> Harness {
        harness_with(TimeoutConfig::default()).await
    }

    async fn harness_with(timeouts: TimeoutConfig) -> Harness {
        let dir = TempDir::new().unwrap();
        let state = Arc::new(ServerState {
            auth: AuthStore::open(dir.path().join("password.dat")).await.unwrap(),
            storage: FileStorage::new(dir.path().join("users")),
            chunk_size: 64,
            timeouts,
        });
        let (client, server) = duplex(64 * 1024);
        let peer = SocketAddr::from(([127, 0, 0, 1], 5555));
        let connection = Connection::new(server, peer, state.clone(), None);
        let server = tokio::spawn(connection.run());
        Harness {
            _dir: dir,
            state,
            client: PacketStream::new(client),
            server,
        }
    }

    impl Harness {
        async fn signup(&mut self, user: &str, pass: &str) -> u32 {
            self.client
                .send(|buf| encode_logon(buf, true, user, pass))
                .await
                .unwrap();
            let (header, _) = self.client.read_packet().await.unwrap().unwrap();
            assert_eq!(header.packet_type, PacketType::TokenResponse);
            header.session_token
        }

        /// The server side hung up: EOF on read and the task finished
        async fn assert_closed(mut self) {
            let header = self.client.read_header().await.unwrap();
            assert!(header.is_none(), "expected the connection to close");
            self.server.await.unwrap();
        }
    }

    fn one_second_requests() -> TimeoutConfig {
        TimeoutConfig {
            request_timeout_sec: 1,
            idle_timeout_sec: 0,
        }
    }

    #[tokio::test]
    async fn test_signup_issues_token_and_creates_directory() {
        let mut h = harness().await;
        let token = h.signup("bob", "pw1").await;
        assert_ne!(token, NO_SESSION);
        assert!(h.state.storage.user_directory("bob").unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_wrong_token_closes_connection() {
        let mut h = harness().await;
        let token = h.signup("bob", "pw1").await;

        h.client
            .send(|buf| encode_header_only(buf, PacketType::ListRequest, token.wrapping_add(1)))
            .await
            .unwrap();
        h.assert_closed().await;
    }

    #[tokio::test]
    async fn test_list_before_logon_closes_connection() {
        let mut h = harness().await;
        h.client
            .send(|buf| encode_header_only(buf, PacketType::ListRequest, NO_SESSION))
            .await
            .unwrap();
        h.assert_closed().await;
    }

    #[tokio::test]
    async fn test_bad_logon_closes_connection() {
        let mut h = harness().await;
        h.client
            .send(|buf| encode_logon(buf, false, "nobody", "pw"))
            .await
            .unwrap();
        h.assert_closed().await;
    }

    #[tokio::test]
    async fn test_duplicate_signup_closes_connection() {
        let mut first = harness().await;
        first.signup("bob", "pw1").await;

        // Second connection against the same store
        let (client, server) = duplex(1024);
        let peer = SocketAddr::from(([127, 0, 0, 1], 6666));
        let task = tokio::spawn(Connection::new(server, peer, first.state.clone(), None).run());
        let mut client = PacketStream::new(client);
        client
            .send(|buf| encode_logon(buf, true, "bob", "pw1"))
            .await
            .unwrap();
        assert!(client.read_header().await.unwrap().is_none());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_credentials_close_connection() {
        let mut h = harness().await;
        // Declared length covers trailing garbage after the password
        let mut raw = vec![1u8, PacketType::SignupRequest.to_u8(), 0, 0, 0, 0, 0, 0];
        raw.extend_from_slice(b"bob\0pw1\0xx");
        let len = raw.len() as u16;
        raw[2..4].copy_from_slice(&len.to_be_bytes());
        h.client.write_all(&raw).await.unwrap();
        h.client.flush().await.unwrap();
        h.assert_closed().await;
    }

    #[tokio::test]
    async fn test_unknown_type_closes_connection() {
        let mut h = harness().await;
        h.client.write_all(&[1, 0x7F, 0, 8, 0, 0, 0, 0]).await.unwrap();
        h.client.flush().await.unwrap();
        h.assert_closed().await;
    }

    #[tokio::test]
    async fn test_leave_closes_without_response() {
        let mut h = harness().await;
        let token = h.signup("bob", "pw1").await;
        h.client
            .send(|buf| encode_header_only(buf, PacketType::LeaveRequest, token))
            .await
            .unwrap();
        h.assert_closed().await;
    }

    #[tokio::test]
    async fn test_upload_list_download() {
        let mut h = harness().await;
        let token = h.signup("bob", "pw1").await;
        let body: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

        h.client
            .send(|buf| encode_upload_header(buf, token, "song.mp3", body.len()))
            .await
            .unwrap();
        h.client.write_all(&body).await.unwrap();
        h.client.flush().await.unwrap();
        let (ack, _) = h.client.read_packet().await.unwrap().unwrap();
        assert_eq!(ack.packet_type, PacketType::FileReceivedAck);
        assert_eq!(ack.session_token, token);

        h.client
            .send(|buf| encode_header_only(buf, PacketType::ListRequest, token))
            .await
            .unwrap();
        let (header, payload) = h.client.read_packet().await.unwrap().unwrap();
        assert_eq!(header.packet_type, PacketType::ListResponse);
        let entries = decode_list_response(payload).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "song.mp3");
        assert_eq!(entries[0].checksum, crc32fast::hash(&body));

        h.client
            .send(|buf| encode_file_request(buf, token, "song.mp3"))
            .await
            .unwrap();
        let header = h.client.read_header().await.unwrap().unwrap();
        assert_eq!(header.packet_type, PacketType::FileTransfer);
        assert_eq!(header.payload_len(), body.len());
        let mut downloaded = Vec::new();
        while downloaded.len() < body.len() {
            let chunk = h.client.read_chunk(body.len() - downloaded.len()).await.unwrap();
            downloaded.extend_from_slice(chunk);
        }
        assert_eq!(downloaded, body);
    }

    #[tokio::test]
    async fn test_download_missing_file_closes_connection() {
        let mut h = harness().await;
        let token = h.signup("bob", "pw1").await;
        h.client
            .send(|buf| encode_file_request(buf, token, "missing.mp3"))
            .await
            .unwrap();
        h.assert_closed().await;
    }

    #[tokio::test]
    async fn test_upload_traversal_name_is_rejected() {
        let mut h = harness().await;
        let token = h.signup("bob", "pw1").await;
        h.client
            .send(|buf| encode_upload_header(buf, token, "../alice.mp3", 4))
            .await
            .unwrap();
        // The server may already have hung up
        let _ = h.client.write_all(b"data").await;

        let users = h.state.storage.root().to_path_buf();
        h.assert_closed().await;
        assert!(!users.join("alice.mp3").exists());
    }

    #[tokio::test]
    async fn test_interrupted_upload_removes_partial_file() {
        let mut h = harness().await;
        let token = h.signup("bob", "pw1").await;
        h.client
            .send(|buf| encode_upload_header(buf, token, "half.bin", 500))
            .await
            .unwrap();
        h.client.write_all(&[9u8; 100]).await.unwrap();
        h.client.flush().await.unwrap();

        let path = h.state.storage.file_path("bob", "half.bin").unwrap();
        let Harness { client, server, .. } = h;
        drop(client);
        server.await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_second_logon_needs_current_token() {
        let mut h = harness().await;
        let token = h.signup("bob", "pw1").await;

        // A fresh logon on the same connection still has to carry the token
        let mut raw = [0u8; 64];
        let len = encode_logon(&mut raw, false, "bob", "pw1").unwrap();
        raw[4..HEADER_LEN].copy_from_slice(&token.to_be_bytes());
        h.client.write_all(&raw[..len]).await.unwrap();
        h.client.flush().await.unwrap();

        let (header, _) = h.client.read_packet().await.unwrap().unwrap();
        assert_eq!(header.packet_type, PacketType::TokenResponse);
        assert_ne!(header.session_token, NO_SESSION);

        // The old zero token is no longer accepted
        h.client
            .send(|buf| encode_logon(buf, false, "bob", "pw1"))
            .await
            .unwrap();
        h.assert_closed().await;
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_connection() {
        let dir = TempDir::new().unwrap();
        let state = Arc::new(ServerState {
            auth: AuthStore::open(dir.path().join("password.dat")).await.unwrap(),
            storage: FileStorage::new(dir.path().join("users")),
            chunk_size: 64,
            timeouts: TimeoutConfig {
                request_timeout_sec: 1,
                idle_timeout_sec: 1,
            },
        });
        let (mut client, server) = duplex(1024);
        let peer = SocketAddr::from(([127, 0, 0, 1], 7777));
        let task = tokio::spawn(Connection::new(server, peer, state, None).run());

        let mut buf = [0u8; 1];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stalled_header_hits_request_timeout() {
        let mut h = harness_with(one_second_requests()).await;
        h.client.write_all(&[1, 4, 0]).await.unwrap();
        h.client.flush().await.unwrap();

        let server = h.server;
        let finished = tokio::time::timeout(Duration::from_secs(3), server).await;
        assert!(finished.is_ok(), "stalled header kept the connection open");
    }

    #[tokio::test]
    async fn test_trickled_upload_hits_request_timeout() {
        let mut h = harness_with(one_second_requests()).await;
        let token = h.signup("bob", "pw1").await;
        h.client
            .send(|buf| encode_upload_header(buf, token, "slow.bin", 500))
            .await
            .unwrap();
        h.client.flush().await.unwrap();

        let path = h.state.storage.file_path("bob", "slow.bin").unwrap();
        let Harness { mut client, server, .. } = h;
        // One byte every 200ms never stalls a single read for a full second
        let trickle = tokio::spawn(async move {
            for _ in 0..25 {
                tokio::time::sleep(Duration::from_millis(200)).await;
                if client.write_all(&[7]).await.is_err() || client.flush().await.is_err() {
                    break;
                }
            }
            client
        });

        let finished = tokio::time::timeout(Duration::from_secs(3), server).await;
        assert!(finished.is_ok(), "trickled upload outlived the request timeout");
        assert!(!path.exists());
        drop(trickle.await.unwrap());
    }

    #[tokio::test]
    async fn test_stalled_upload_body_removes_partial_file() {
        let mut h = harness_with(one_second_requests()).await;
        let token = h.signup("bob", "pw1").await;
        h.client
            .send(|buf| encode_upload_header(buf, token, "stuck.bin", 500))
            .await
            .unwrap();
        h.client.write_all(&[3u8; 200]).await.unwrap();
        h.client.flush().await.unwrap();

        let path = h.state.storage.file_path("bob", "stuck.bin").unwrap();
        let Harness { client, server, .. } = h;
        let finished = tokio::time::timeout(Duration::from_secs(3), server).await;
        assert!(finished.is_ok(), "stalled upload kept the connection open");
        assert!(!path.exists());
        drop(client);
    }

    #[tokio::test]
    async fn test_download_too_large_closes_without_header() {
        let mut h = harness().await;
        let token = h.signup("bob", "pw1").await;
        let path = h.state.storage.file_path("bob", "huge.bin").unwrap();
        std::fs::write(&path, vec![0u8; MAX_DOWNLOAD_LEN + 1]).unwrap();

        h.client
            .send(|buf| encode_file_request(buf, token, "huge.bin"))
            .await
            .unwrap();
        h.assert_closed().await;
    }

    #[tokio::test]
    async fn test_listing_is_truncated_to_one_packet() {
        let mut h = harness().await;
        let token = h.signup("bob", "pw1").await;
        let dir = h.state.storage.user_directory("bob").unwrap();
        for i in 0..MAX_LIST_ENTRIES + 1 {
            std::fs::write(dir.join(format!("track{:03}.mp3", i)), [i as u8]).unwrap();
        }

        h.client
            .send(|buf| encode_header_only(buf, PacketType::ListRequest, token))
            .await
            .unwrap();
        let (header, payload) = h.client.read_packet().await.unwrap().unwrap();
        assert_eq!(header.packet_type, PacketType::ListResponse);
        let entries = decode_list_response(payload).unwrap();
        assert_eq!(entries.len(), MAX_LIST_ENTRIES);
    }
}
