//! Connection multiplexer
//!
//! Accepts TCP connections and runs one task per connection. The number
//! of live sessions is capped by the slot table; a connection that finds
//! every slot taken is accepted and closed straight away.

use crate::config::Config;
use crate::connection::Connection;
use crate::session::SessionManager;
use crate::state::ServerState;
use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

const STATUS_INTERVAL: Duration = Duration::from_secs(60);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
    sessions: SessionManager,
}

impl Server {
    /// Open the stores and bind the listening socket
    pub async fn bind(config: &Config) -> Result<Self> {
        config.validate()?;

        let state = ServerState::from_config(config)
            .await
            .context("Failed to open authentication store")?;

        let bind_addr = config.bind_address();
        let addr = tokio::net::lookup_host(&bind_addr)
            .await
            .with_context(|| format!("Failed to resolve {}", bind_addr))?
            .next()
            .with_context(|| format!("No address for {}", bind_addr))?;

        let capacity = config.general.max_concurrent_clients;
        let listener = bind_listener(addr, capacity)
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;

        Ok(Self {
            listener,
            state: Arc::new(state),
            sessions: SessionManager::new(capacity),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle onto the slot table, usable after `run` took the server
    pub fn sessions(&self) -> SessionManager {
        self.sessions.clone()
    }

    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves. Connections already
    /// being served are left to finish on their own.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("Server listening on {}", self.local_addr()?);
        info!("Max concurrent clients: {}", self.sessions.capacity());

        let status_sessions = self.sessions.clone();
        let status = tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATUS_INTERVAL);
            loop {
                interval.tick().await;
                let connected = status_sessions.connected();
                if connected.is_empty() {
                    continue;
                }
                debug!("Active sessions: {}", connected.len());
                for (peer, username, age) in connected {
                    debug!(
                        "  {} {} connected {}s",
                        peer,
                        username.as_deref().unwrap_or("-"),
                        age.as_secs()
                    );
                }
            }
        });

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down listener");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer),
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        // EMFILE and friends persist; retrying at once would spin
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        status.abort();
        Ok(())
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        let Some(slot) = self.sessions.claim(peer) else {
            warn!(
                "Rejecting {}: all {} session slots in use",
                peer,
                self.sessions.capacity()
            );
            drop(stream);
            return;
        };

        info!("Accepted new client {} at slot {}", peer, slot.index());
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let state = self.state.clone();
        tokio::spawn(async move {
            Connection::new(stream, peer, state, Some(slot)).run().await;
        });
    }
}

fn bind_listener(addr: SocketAddr, backlog: usize) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.clamp(1, i32::MAX as usize) as i32)?;
    TcpListener::from_std(socket.into())
}
