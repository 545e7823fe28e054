use crate::store::write_atomic;
use async_trait::async_trait;
use folio_core::{FolioError, FolioResult, Profile};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Client profiles keyed by name, independent of any session.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetches the profile stored under `name`.
    async fn get(&self, name: &str) -> FolioResult<Option<Profile>>;

    /// Merges `update` into the stored profile named `update.name` and returns
    /// the merged record. Fields unset in `update` keep their stored values.
    async fn save(&self, update: &Profile) -> FolioResult<Profile>;
}

/// Profile store backed by one JSON document (`name -> profile`).
///
/// The document is re-read on every call, so edits made by another process
/// between calls are picked up.
pub struct FileProfileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileProfileStore {
    pub async fn new(path: PathBuf) -> FolioResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    async fn load(&self) -> FolioResult<BTreeMap<String, Profile>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = tokio::fs::read_to_string(&self.path).await?;
        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&data)
            .map_err(|e| FolioError::Persistence(format!("Failed to parse profiles: {e}")))
    }
}

#[async_trait]
impl ProfileStore for FileProfileStore {
    async fn get(&self, name: &str) -> FolioResult<Option<Profile>> {
        let profiles = self.load().await?;
        Ok(profiles.get(name).cloned())
    }

    async fn save(&self, update: &Profile) -> FolioResult<Profile> {
        let name = update
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| FolioError::MalformedInput("profile has no name".to_string()))?;

        let _guard = self.write_lock.lock().await;
        let mut profiles = self.load().await?;
        let merged = match profiles.get_mut(&name) {
            Some(existing) => {
                existing.merge_from(update);
                debug!(profile = %name, "Profile merged");
                existing.clone()
            }
            None => {
                info!(profile = %name, "New profile saved");
                let mut fresh = update.clone();
                fresh.name = Some(name.clone());
                profiles.insert(name.clone(), fresh.clone());
                fresh
            }
        };

        let json = serde_json::to_string_pretty(&profiles)?;
        write_atomic(&self.path, json.as_bytes()).await?;
        Ok(merged)
    }
}
