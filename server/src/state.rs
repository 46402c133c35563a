//! Process-wide resources shared by every connection

use crate::auth::{AuthError, AuthStore};
use crate::config::{Config, TimeoutConfig};
use crate::storage::FileStorage;

pub struct ServerState {
    pub auth: AuthStore,
    pub storage: FileStorage,
    /// Buffer size for streamed file bodies
    pub chunk_size: usize,
    pub timeouts: TimeoutConfig,
}

impl ServerState {
    pub async fn from_config(config: &Config) -> Result<Self, AuthError> {
        let auth = AuthStore::open(&config.storage.password_file).await?;
        Ok(Self {
            auth,
            storage: FileStorage::new(&config.storage.data_dir),
            chunk_size: config.transfer.chunk_size,
            timeouts: config.timeouts.clone(),
        })
    }
}
