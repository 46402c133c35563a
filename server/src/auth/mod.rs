//! Flat-file authentication store
//!
//! The store is a sequence of fixed-width records with no header and no
//! delimiters; EOF ends the scan. Each record is the username, nul-padded
//! to `USERNAME_FIELD_LEN` so it is always terminated, followed by the
//! 4-byte password checksum.

use protocol::{MAX_PASSWORD_LEN, MAX_USERNAME_LEN};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Username field width, including the guaranteed terminator
pub const USERNAME_FIELD_LEN: usize = MAX_USERNAME_LEN + 1;

/// Full record width: username field + checksum
pub const RECORD_LEN: usize = USERNAME_FIELD_LEN + 4;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Failed to access password file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Additive password checksum (wrapping sum of the byte values).
///
/// Not a password hash: it only exists to keep plain passwords off disk
/// and is kept as-is for compatibility with existing store files.
pub fn password_checksum(password: &str) -> u32 {
    password
        .bytes()
        .fold(0u32, |sum, b| sum.wrapping_add(u32::from(b)))
}

/// One on-disk record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub password_checksum: u32,
}

impl UserRecord {
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut bytes = [0u8; RECORD_LEN];
        let name = self.username.as_bytes();
        bytes[..name.len()].copy_from_slice(name);
        bytes[USERNAME_FIELD_LEN..].copy_from_slice(&self.password_checksum.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; RECORD_LEN]) -> Self {
        let field = &bytes[..USERNAME_FIELD_LEN];
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&bytes[USERNAME_FIELD_LEN..]);
        Self {
            username: String::from_utf8_lossy(&field[..end]).into_owned(),
            password_checksum: u32::from_le_bytes(checksum),
        }
    }
}

/// Username field equals `username` up to its terminator
fn record_matches(record: &[u8; RECORD_LEN], username: &str) -> bool {
    let field = &record[..USERNAME_FIELD_LEN];
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..end] == username.as_bytes()
}

fn valid_credentials(username: &str, password: &str) -> bool {
    !username.is_empty()
        && username.len() <= MAX_USERNAME_LEN
        && !password.is_empty()
        && password.len() <= MAX_PASSWORD_LEN
}

/// Username → password checksum store.
///
/// `create` and `verify` run under one lock so two concurrent signups can
/// never both observe a username as free.
pub struct AuthStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AuthStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// Create the store file (and its directory) if it does not exist yet
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, AuthError> {
        let store = Self::new(path);
        if let Some(parent) = store.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| store.io_error(e))?;
            }
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&store.path)
            .await
            .map_err(|e| store.io_error(e))?;
        info!("Authentication store at {:?}", store.path);
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True only if `username` exists and its checksum matches `password`
    pub async fn verify(&self, username: &str, password: &str) -> Result<bool, AuthError> {
        if !valid_credentials(username, password) {
            return Ok(false);
        }
        let checksum = password_checksum(password);

        let _guard = self.lock.lock().await;
        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(self.io_error(e)),
        };

        match self.find(file, username).await? {
            Some(record) => Ok(record.password_checksum == checksum),
            None => {
                debug!("No such user: {}", username);
                Ok(false)
            }
        }
    }

    /// Append a record for a new user; false if the name is taken or invalid
    pub async fn create(&self, username: &str, password: &str) -> Result<bool, AuthError> {
        if !valid_credentials(username, password) {
            return Ok(false);
        }

        let _guard = self.lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        let existing = self
            .find(file.try_clone().await.map_err(|e| self.io_error(e))?, username)
            .await?;
        if existing.is_some() {
            debug!("User already exists: {}", username);
            return Ok(false);
        }

        let record = UserRecord {
            username: username.to_string(),
            password_checksum: password_checksum(password),
        };
        file.write_all(&record.to_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;

        info!("Created user {}", username);
        Ok(true)
    }

    /// Sequential fixed-stride scan; a trailing partial record is ignored
    async fn find(&self, file: File, username: &str) -> Result<Option<UserRecord>, AuthError> {
        let mut reader = BufReader::new(file);
        let mut record = [0u8; RECORD_LEN];
        loop {
            match reader.read_exact(&mut record).await {
                Ok(_) => {
                    if record_matches(&record, username) {
                        return Ok(Some(UserRecord::from_bytes(&record)));
                    }
                }
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(self.io_error(e)),
            }
        }
    }

    fn io_error(&self, source: std::io::Error) -> AuthError {
        AuthError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn store() -> (TempDir, AuthStore) {
        let dir = TempDir::new().unwrap();
        let store = AuthStore::open(dir.path().join("password.dat")).await.unwrap();
        (dir, store)
    }

    #[test]
    fn test_password_checksum_is_byte_sum() {
        assert_eq!(password_checksum(""), 0);
        assert_eq!(password_checksum("ab"), 97 + 98);
        // Multi-byte characters count as unsigned bytes
        assert_eq!(password_checksum("\u{ff}"), 0xC3 + 0xBF);
    }

    #[test]
    fn test_record_layout() {
        let record = UserRecord {
            username: "alice".into(),
            password_checksum: 0x01020304,
        };
        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), 68);
        assert_eq!(&bytes[..5], b"alice");
        assert!(bytes[5..USERNAME_FIELD_LEN].iter().all(|&b| b == 0));
        assert_eq!(&bytes[USERNAME_FIELD_LEN..], &[4, 3, 2, 1]);
        assert_eq!(UserRecord::from_bytes(&bytes), record);
    }

    #[tokio::test]
    async fn test_create_then_verify() {
        let (_dir, store) = store().await;
        assert!(store.create("alice", "secret").await.unwrap());
        assert!(store.verify("alice", "secret").await.unwrap());
        assert!(!store.verify("alice", "wrong").await.unwrap());
        assert!(!store.verify("bob", "x").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_create_is_rejected() {
        let (_dir, store) = store().await;
        assert!(store.create("alice", "secret").await.unwrap());
        assert!(!store.create("alice", "secret").await.unwrap());
        assert!(!store.create("alice", "other").await.unwrap());

        let contents = tokio::fs::read(store.path()).await.unwrap();
        assert_eq!(contents.len(), RECORD_LEN);
    }

    #[tokio::test]
    async fn test_prefix_names_are_distinct() {
        let (_dir, store) = store().await;
        assert!(store.create("alice", "one").await.unwrap());
        assert!(store.create("al", "two").await.unwrap());
        assert!(store.create("alice2", "three").await.unwrap());
        assert!(store.verify("al", "two").await.unwrap());
        assert!(!store.verify("al", "one").await.unwrap());
        assert!(store.verify("alice2", "three").await.unwrap());
    }

    #[tokio::test]
    async fn test_length_limits() {
        let (_dir, store) = store().await;
        let long_name = "u".repeat(MAX_USERNAME_LEN + 1);
        let long_pass = "p".repeat(MAX_PASSWORD_LEN + 1);
        assert!(!store.create("", "pw").await.unwrap());
        assert!(!store.create("user", "").await.unwrap());
        assert!(!store.create(&long_name, "pw").await.unwrap());
        assert!(!store.create("user", &long_pass).await.unwrap());

        let max_name = "u".repeat(MAX_USERNAME_LEN);
        assert!(store.create(&max_name, "pw").await.unwrap());
        assert!(store.verify(&max_name, "pw").await.unwrap());
        assert!(!store.verify(&long_name, "pw").await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_without_store_file() {
        let dir = TempDir::new().unwrap();
        let store = AuthStore::new(dir.path().join("missing.dat"));
        assert!(!store.verify("alice", "secret").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_signups_create_one_record() {
        let (_dir, store) = store().await;
        let store = Arc::new(store);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.create("carol", "pw").await.unwrap()
            }));
        }

        let mut created = 0;
        for task in tasks {
            if task.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);

        let contents = tokio::fs::read(store.path()).await.unwrap();
        assert_eq!(contents.len(), RECORD_LEN);
    }
}
