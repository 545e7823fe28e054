use crate::session::{Session, SessionKey};
use async_trait::async_trait;
use folio_core::{FolioError, FolioResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// `app -> user -> session -> Session`, the on-disk document layout.
type SessionTree = BTreeMap<String, BTreeMap<String, BTreeMap<String, Session>>>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Registers a fresh session. Fails with [`FolioError::AlreadyExists`] when
    /// the identity is already live in memory; callers fall back to `get`.
    async fn create(&self, key: &SessionKey) -> FolioResult<Session>;

    /// Looks the session up, reloading the durable file once on a cache miss.
    async fn get(&self, key: &SessionKey) -> FolioResult<Session>;

    /// Writes a mutated session back into the cache. Not durable until `persist`.
    async fn update(&self, session: &Session) -> FolioResult<()>;

    /// Serializes every cached session to durable storage.
    async fn persist(&self) -> FolioResult<()>;

    /// Identities of all cached sessions.
    async fn list(&self) -> FolioResult<Vec<SessionKey>>;
}

/// Session store that keeps every session in memory and mirrors the whole
/// cache to one JSON file.
///
/// Writes go to a sibling temp file that is then renamed over the target, so a
/// crash mid-write leaves the previous document intact. Concurrent writers in
/// different processes are not coordinated: the last `persist` wins.
pub struct FileSessionStore {
    path: PathBuf,
    cache: RwLock<SessionTree>,
}

impl FileSessionStore {
    /// Opens the store at `path`, loading existing sessions if the file exists.
    pub async fn new(path: PathBuf) -> FolioResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tree = read_tree(&path).await?;
        let count = count_sessions(&tree);
        info!(path = %path.display(), sessions = count, "Session store opened");
        Ok(Self {
            path,
            cache: RwLock::new(tree),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lookup(tree: &SessionTree, key: &SessionKey) -> Option<Session> {
        tree.get(&key.app_name)
            .and_then(|users| users.get(&key.user_id))
            .and_then(|sessions| sessions.get(&key.session_id))
            .cloned()
    }

    /// Reloads the durable file, adding sessions the cache does not hold.
    /// Sessions already cached keep their in-memory (possibly newer) copy.
    async fn reload(&self) -> FolioResult<usize> {
        let disk = read_tree(&self.path).await?;
        let mut cache = self.cache.write().await;
        let mut added = 0;
        for (app, users) in disk {
            let cached_users = cache.entry(app).or_default();
            for (user, sessions) in users {
                let cached_sessions = cached_users.entry(user).or_default();
                for (id, session) in sessions {
                    if let std::collections::btree_map::Entry::Vacant(slot) =
                        cached_sessions.entry(id)
                    {
                        slot.insert(session);
                        added += 1;
                    }
                }
            }
        }
        Ok(added)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn create(&self, key: &SessionKey) -> FolioResult<Session> {
        let mut cache = self.cache.write().await;
        let sessions = cache
            .entry(key.app_name.clone())
            .or_default()
            .entry(key.user_id.clone())
            .or_default();
        if sessions.contains_key(&key.session_id) {
            return Err(FolioError::AlreadyExists(format!("session {key}")));
        }
        let session = Session::new(key);
        sessions.insert(key.session_id.clone(), session.clone());
        debug!(session = %key, "Session created");
        Ok(session)
    }

    async fn get(&self, key: &SessionKey) -> FolioResult<Session> {
        if let Some(session) = Self::lookup(&*self.cache.read().await, key) {
            return Ok(session);
        }

        info!(session = %key, "Session not in memory, reloading from disk");
        let added = self.reload().await?;
        debug!(added, "Session file reloaded");

        Self::lookup(&*self.cache.read().await, key)
            .ok_or_else(|| FolioError::NotFound(format!("session {key}")))
    }

    async fn update(&self, session: &Session) -> FolioResult<()> {
        let mut cache = self.cache.write().await;
        cache
            .entry(session.app_name.clone())
            .or_default()
            .entry(session.user_id.clone())
            .or_default()
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn persist(&self) -> FolioResult<()> {
        let json = {
            let cache = self.cache.read().await;
            serde_json::to_string_pretty(&*cache)
                .map_err(|e| FolioError::Persistence(format!("Failed to serialize sessions: {e}")))?
        };
        write_atomic(&self.path, json.as_bytes()).await?;
        debug!(path = %self.path.display(), "Sessions persisted");
        Ok(())
    }

    async fn list(&self) -> FolioResult<Vec<SessionKey>> {
        let cache = self.cache.read().await;
        let mut keys = Vec::new();
        for (app, users) in cache.iter() {
            for (user, sessions) in users {
                for id in sessions.keys() {
                    keys.push(SessionKey::new(app, user, id));
                }
            }
        }
        Ok(keys)
    }
}

async fn read_tree(path: &Path) -> FolioResult<SessionTree> {
    if !path.exists() {
        return Ok(SessionTree::new());
    }
    let data = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| FolioError::Persistence(format!("Failed to read session file: {e}")))?;
    if data.trim().is_empty() {
        warn!(path = %path.display(), "Session file is empty");
        return Ok(SessionTree::new());
    }
    serde_json::from_str(&data)
        .map_err(|e| FolioError::Persistence(format!("Failed to parse session file: {e}")))
}

fn count_sessions(tree: &SessionTree) -> usize {
    tree.values()
        .flat_map(BTreeMap::values)
        .map(BTreeMap::len)
        .sum()
}

/// Writes `bytes` to a temp sibling of `path`, then renames it into place.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> FolioResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| FolioError::Persistence(format!("Failed to write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| FolioError::Persistence(format!("Failed to replace {}: {e}", path.display())))?;
    Ok(())
}
