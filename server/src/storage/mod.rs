//! Per-user file storage
//!
//! One directory per username under a fixed root, files stored directly
//! inside with their original names.

use protocol::packets::FileEntry;
use protocol::FILE_NAME_LEN;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

const CHECKSUM_BUFFER_LEN: usize = 8192;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reject anything that could escape the directory it is joined onto
fn validate_component(name: &str) -> Result<(), StorageError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.len() >= FILE_NAME_LEN
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Stream a file through a CRC-32 accumulator
pub async fn file_checksum(path: &Path) -> Result<u32, std::io::Error> {
    let mut file = File::open(path).await?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; CHECKSUM_BUFFER_LEN];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn user_directory(&self, username: &str) -> Result<PathBuf, StorageError> {
        validate_component(username)?;
        Ok(self.root.join(username))
    }

    /// Create the user's directory if it is not there yet
    pub async fn ensure_user_directory(&self, username: &str) -> Result<PathBuf, StorageError> {
        let dir = self.user_directory(username)?;
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    pub fn file_path(&self, username: &str, filename: &str) -> Result<PathBuf, StorageError> {
        validate_component(filename)?;
        Ok(self.user_directory(username)?.join(filename))
    }

    /// Regular files in the user's directory with their CRC-32.
    ///
    /// Recomputed on every call; costs a full read of every file.
    pub async fn list_files(&self, username: &str) -> Result<Vec<FileEntry>, StorageError> {
        let dir = self.user_directory(username)?;
        let mut entries = Vec::new();

        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = read_dir.next_entry().await? {
            // file_type() does not follow symlinks
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!("Skipping non UTF-8 file name in {:?}", dir);
                continue;
            };
            if name.len() >= FILE_NAME_LEN {
                warn!("Skipping file with over-long name in {:?}", dir);
                continue;
            }
            let checksum = file_checksum(&entry.path()).await?;
            entries.push(FileEntry { name, checksum });
        }

        debug!("Listed {} files for {}", entries.len(), username);
        Ok(entries)
    }

    pub async fn open_for_read(&self, username: &str, filename: &str) -> Result<File, StorageError> {
        let path = self.file_path(username, filename)?;
        match File::open(&path).await {
            Ok(file) => {
                if !file.metadata().await?.is_file() {
                    return Err(StorageError::NotFound(filename.to_string()));
                }
                Ok(file)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create or truncate the named file
    pub async fn open_for_write(&self, username: &str, filename: &str) -> Result<File, StorageError> {
        let path = self.file_path(username, filename)?;
        Ok(File::create(&path).await?)
    }

    /// Remove a file; a file that is already gone is not an error
    pub async fn remove_file(&self, username: &str, filename: &str) -> Result<(), StorageError> {
        let path = self.file_path(username, filename)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
