//! Session state and the fixed-capacity slot table

use protocol::NO_SESSION;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Per-connection session state
#[derive(Debug, Clone)]
pub struct Session {
    pub peer: SocketAddr,
    /// Empty while unauthenticated
    pub username: String,
    /// `NO_SESSION` until signup/logon succeeds
    pub token: u32,
}

impl Session {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            username: String::new(),
            token: NO_SESSION,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !self.username.is_empty()
    }

    /// Bind the session to `username` under a fresh token
    pub fn authenticate(&mut self, username: &str) -> u32 {
        self.username = username.to_string();
        self.token = generate_token();
        self.token
    }

    pub fn clear(&mut self) {
        self.username.clear();
        self.token = NO_SESSION;
    }
}

/// 32-bit token from four independent random bytes.
///
/// Not cryptographically strong; the protocol has no confidentiality goal.
pub fn generate_token() -> u32 {
    loop {
        let bytes: [u8; 4] = [
            rand::random::<u8>(),
            rand::random::<u8>(),
            rand::random::<u8>(),
            rand::random::<u8>(),
        ];
        let token = u32::from_le_bytes(bytes);
        if token != NO_SESSION {
            return token;
        }
    }
}

#[derive(Debug, Clone)]
struct SlotInfo {
    peer: SocketAddr,
    username: Option<String>,
    connected_at: Instant,
}

type Slots = Arc<Mutex<Vec<Option<SlotInfo>>>>;

fn lock(slots: &Slots) -> MutexGuard<'_, Vec<Option<SlotInfo>>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Table of `capacity` session slots
#[derive(Debug, Clone)]
pub struct SessionManager {
    slots: Slots,
}

impl SessionManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Mutex::new(vec![None; capacity])),
        }
    }

    pub fn capacity(&self) -> usize {
        lock(&self.slots).len()
    }

    /// Take the first free slot, or `None` when every slot is occupied
    pub fn claim(&self, peer: SocketAddr) -> Option<SessionSlot> {
        let mut slots = lock(&self.slots);
        let index = slots.iter().position(Option::is_none)?;
        slots[index] = Some(SlotInfo {
            peer,
            username: None,
            connected_at: Instant::now(),
        });
        Some(SessionSlot {
            index,
            slots: self.slots.clone(),
        })
    }

    /// Get number of active sessions
    pub fn active_sessions(&self) -> usize {
        lock(&self.slots).iter().filter(|slot| slot.is_some()).count()
    }

    /// Peer, username and connection age of every occupied slot
    pub fn connected(&self) -> Vec<(SocketAddr, Option<String>, Duration)> {
        lock(&self.slots)
            .iter()
            .flatten()
            .map(|info| (info.peer, info.username.clone(), info.connected_at.elapsed()))
            .collect()
    }
}

/// An occupied slot; dropping it frees the slot
#[derive(Debug)]
pub struct SessionSlot {
    index: usize,
    slots: Slots,
}

impl SessionSlot {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn set_user(&self, username: &str) {
        if let Some(info) = lock(&self.slots)[self.index].as_mut() {
            info.username = Some(username.to_string());
        }
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        lock(&self.slots)[self.index] = None;
    }
}
