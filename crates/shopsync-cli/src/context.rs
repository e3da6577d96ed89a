use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use shopsync_core::backup::BackupStore;
use shopsync_core::config::{EngineConfig, CONFIG_FILE_NAME};
use shopsync_core::storage::{FallbackStore, FileStore, KeyValueStore};
use shopsync_core::store::EntityStore;
use shopsync_core::sync::{HttpSyncTransport, SyncCheckpoint, SyncEngine};

use crate::error::CliError;

const STATE_DIR_NAME: &str = "state";

/// Local state shared by all commands
pub struct AppContext {
    pub data_dir: PathBuf,
    pub config: EngineConfig,
    kv: Arc<FallbackStore<FileStore>>,
    pub store: Arc<EntityStore>,
}

impl AppContext {
    pub fn open(data_dir: &Path) -> Result<Self, CliError> {
        let config = EngineConfig::load_from_path(&data_dir.join(CONFIG_FILE_NAME))?;
        let kv = Arc::new(FallbackStore::new(FileStore::new(
            data_dir.join(STATE_DIR_NAME),
        )));
        let shared: Arc<dyn KeyValueStore> = kv.clone();
        let store = EntityStore::open(shared.clone())
            .with_backup(BackupStore::new(shared, config.backup.history_limit));

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            config,
            kv,
            store: Arc::new(store),
        })
    }

    pub fn checkpoint(&self) -> SyncCheckpoint {
        SyncCheckpoint::new(self.kv.clone())
    }

    pub fn backup(&self) -> Result<&BackupStore, CliError> {
        self.store.backup().ok_or(CliError::NoBackup)
    }

    pub fn engine(&self) -> Result<SyncEngine<HttpSyncTransport>, CliError> {
        let transport = HttpSyncTransport::new(self.config.sync.http_timeout())?;
        Ok(SyncEngine::new(
            self.store.clone(),
            transport,
            self.checkpoint(),
            self.config.sync.clone(),
        ))
    }

    /// Whether writes fell back to memory and will not outlive this process
    pub fn storage_degraded(&self) -> bool {
        self.kv.is_degraded()
    }
}

pub fn resolve_data_dir(cli_data_dir: Option<PathBuf>) -> PathBuf {
    cli_data_dir
        .or_else(|| env::var_os("SHOPSYNC_DATA_DIR").map(PathBuf::from))
        .unwrap_or_else(default_data_dir)
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shopsync")
}
