use std::collections::BTreeMap;
use std::io::Error as IoError;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub mod models;
pub use models::ChannelEntry;

/// guild id → channel id → entry
pub type StateMap = BTreeMap<String, BTreeMap<String, ChannelEntry>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to create directory {0}: {1}")]
    DirectoryCreate(PathBuf, IoError),

    #[error("Failed to create file {0}: {1}")]
    FileCreate(PathBuf, IoError),

    #[error("Failed to write to file {0}: {1}")]
    FileWrite(PathBuf, IoError),

    #[error("Failed to sync file {0}: {1}")]
    FileSync(PathBuf, IoError),

    #[error("Failed to rename file from {0} to {1}: {2}")]
    FileRename(PathBuf, PathBuf, IoError),

    #[error("Failed to serialize scoreboard state: {0}")]
    Serialization(serde_json::Error),
}

/// Flat-file scoreboard store.
///
/// The whole mapping lives in memory; [`save`](Self::save) rewrites the file
/// in full. Nothing is written until `save` is called.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    entries: StateMap,
}

impl StateStore {
    /// Load the store from `path`. A missing or unreadable file yields an
    /// empty store rather than an error.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<StateMap>(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        "State file {} is malformed, starting empty: {}",
                        path.display(),
                        e
                    );
                    StateMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No state file at {}, starting empty", path.display());
                StateMap::new()
            }
            Err(e) => {
                warn!(
                    "Failed to read state file {}, starting empty: {}",
                    path.display(),
                    e
                );
                StateMap::new()
            }
        };

        StateStore { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of channels with a scoreboard.
    pub fn channel_count(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    #[cfg(test)]
    pub fn get(&self, guild_id: &str, channel_id: &str) -> Option<&ChannelEntry> {
        self.entries.get(guild_id)?.get(channel_id)
    }

    /// Entry for the pair, created with a default scoreboard if absent.
    pub fn get_or_create(&mut self, guild_id: &str, channel_id: &str) -> &mut ChannelEntry {
        self.entries
            .entry(guild_id.to_string())
            .or_default()
            .entry(channel_id.to_string())
            .or_default()
    }

    /// Serialize the whole mapping and replace the file. The new content is
    /// written to a sibling temp file and renamed over the target.
    pub async fn save(&self) -> Result<(), StoreError> {
        let content =
            serde_json::to_string_pretty(&self.entries).map_err(StoreError::Serialization)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::DirectoryCreate(parent.to_path_buf(), e))?;
        }

        let temp_path = self.path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StoreError::FileCreate(temp_path.clone(), e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StoreError::FileWrite(temp_path.clone(), e))?;
        file.sync_all()
            .await
            .map_err(|e| StoreError::FileSync(temp_path.clone(), e))?;
        drop(file);

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| StoreError::FileRename(temp_path, self.path.clone(), e))?;

        debug!(
            "Saved {} scoreboard(s) to {}",
            self.channel_count(),
            self.path.display()
        );
        Ok(())
    }
}
