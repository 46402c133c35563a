//! Protocol client for a GetMyMusic server

use anyhow::{Context, Result};
use protocol::packets::{
    decode_list_response, encode_file_request, encode_header_only, encode_logon,
    encode_upload_header, FileEntry, PacketHeader,
};
use protocol::{PacketStream, PacketType, DEFAULT_CHUNK_SIZE, MAX_UPLOAD_LEN, NO_SESSION};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// One connection to the server and the session token it was given
pub struct RemoteSession<S = TcpStream> {
    stream: PacketStream<S>,
    token: u32,
}

impl RemoteSession<TcpStream> {
    /// Connect to `host:port`, trying every resolved address in turn
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("Failed to connect to {}:{}", host, port))?;
        stream.set_nodelay(true).context("Failed to set TCP_NODELAY")?;
        info!("Connected to {}:{}", host, port);
        Ok(Self::new(stream))
    }
}

impl<S> RemoteSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: PacketStream::new(stream),
            token: NO_SESSION,
        }
    }

    /// Current session token; `NO_SESSION` before signup/logon
    pub fn token(&self) -> u32 {
        self.token
    }

    /// Create an account and log on to it
    pub async fn signup(&mut self, username: &str, password: &str) -> Result<u32> {
        self.authenticate(true, username, password).await
    }

    pub async fn logon(&mut self, username: &str, password: &str) -> Result<u32> {
        self.authenticate(false, username, password).await
    }

    async fn authenticate(&mut self, is_new_account: bool, username: &str, password: &str) -> Result<u32> {
        if self.token != NO_SESSION {
            anyhow::bail!("Already logged on; open a new connection to switch users");
        }

        self.stream
            .send(|buf| encode_logon(buf, is_new_account, username, password))
            .await
            .context("Failed to send logon request")?;

        let header = self.expect_response(PacketType::TokenResponse).await.with_context(|| {
            if is_new_account {
                format!("Signup failed for {} (user may already exist)", username)
            } else {
                format!("Logon failed for {}", username)
            }
        })?;

        self.token = header.session_token;
        debug!("Session token {:#010x}", self.token);
        Ok(self.token)
    }

    /// Names and CRC-32 checksums of the user's stored files
    pub async fn list(&mut self) -> Result<Vec<FileEntry>> {
        let token = self.token;
        self.stream
            .send(|buf| encode_header_only(buf, PacketType::ListRequest, token))
            .await
            .context("Failed to send list request")?;

        let header = self.expect_response(PacketType::ListResponse).await?;
        let payload = self.stream.read_payload(&header).await?;
        let entries = decode_list_response(payload).context("Invalid list response")?;
        Ok(entries)
    }

    /// Store `data` on the server as `name`
    pub async fn upload(&mut self, name: &str, data: &[u8]) -> Result<()> {
        if data.len() > MAX_UPLOAD_LEN {
            anyhow::bail!(
                "{} is {} bytes; a single upload can carry at most {}",
                name,
                data.len(),
                MAX_UPLOAD_LEN
            );
        }

        let token = self.token;
        self.stream
            .send(|buf| encode_upload_header(buf, token, name, data.len()))
            .await
            .context("Failed to send upload header")?;
        for chunk in data.chunks(DEFAULT_CHUNK_SIZE) {
            self.stream.write_all(chunk).await?;
        }
        self.stream.flush().await?;

        self.expect_response(PacketType::FileReceivedAck)
            .await
            .with_context(|| format!("Upload of {} was not acknowledged", name))?;
        info!("Uploaded {} ({} bytes)", name, data.len());
        Ok(())
    }

    /// Upload a local file, stored under `name` or its own file name
    pub async fn upload_file(&mut self, path: &Path, name: Option<&str>) -> Result<String> {
        let name = match name {
            Some(name) => name.to_string(),
            None => path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .with_context(|| format!("Cannot derive a file name from {:?}", path))?,
        };
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        self.upload(&name, &data).await?;
        Ok(name)
    }

    /// Fetch a stored file. The server announces the length up front and
    /// then streams the body with no further framing.
    pub async fn download(&mut self, name: &str) -> Result<Vec<u8>> {
        let token = self.token;
        self.stream
            .send(|buf| encode_file_request(buf, token, name))
            .await
            .context("Failed to send file request")?;

        let header = self
            .expect_response(PacketType::FileTransfer)
            .await
            .with_context(|| format!("Download of {} failed", name))?;

        let len = header.payload_len();
        let mut data = Vec::with_capacity(len);
        while data.len() < len {
            let chunk = self
                .stream
                .read_chunk(len - data.len())
                .await
                .context("Connection lost during download")?;
            data.extend_from_slice(chunk);
        }
        info!("Downloaded {} ({} bytes)", name, len);
        Ok(data)
    }

    /// Tell the server we are done; it closes the connection
    pub async fn leave(mut self) -> Result<()> {
        let token = self.token;
        self.stream
            .send(|buf| encode_header_only(buf, PacketType::LeaveRequest, token))
            .await
            .context("Failed to send leave request")?;
        // Wait for the server to hang up
        while self.stream.read_header().await?.is_some() {}
        Ok(())
    }

    /// Read the next header and check its type. The server answers errors
    /// by closing the connection, so EOF here means the request failed.
    async fn expect_response(&mut self, expected: PacketType) -> Result<PacketHeader> {
        let header = self
            .stream
            .read_header()
            .await?
            .context("Server closed the connection")?;
        if header.packet_type != expected {
            anyhow::bail!("Expected {:?}, got {:?}", expected, header.packet_type);
        }
        Ok(header)
    }
}
