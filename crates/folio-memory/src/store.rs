use crate::keyword::KeywordIndex;
use crate::summarizer::{DigestSummarizer, Summarizer};
use folio_core::{Event, FolioError, FolioResult};
use folio_session::{write_atomic, Session};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Author recorded on compaction summary events.
pub const COMPACTOR_AUTHOR: &str = "memory_compactor";

/// When and how much of an archived history to compact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Archived turns between two compactions of the same session.
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Trailing events kept verbatim across a compaction.
    #[serde(default = "default_overlap")]
    pub overlap_size: usize,
}

fn default_interval() -> u32 {
    3
}

fn default_overlap() -> usize {
    1
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            overlap_size: default_overlap(),
        }
    }
}

/// The archived history of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionArchive {
    pub events: Vec<Event>,
    /// Number of session events already ingested; later archives append from here.
    #[serde(default)]
    pub ingested: usize,
    /// Archived turns since this session was last compacted.
    #[serde(default)]
    pub turns_since_compaction: u32,
}

/// `"app/user" -> session -> archive`, the on-disk document layout.
type ArchiveDoc = BTreeMap<String, BTreeMap<String, SessionArchive>>;

/// Outcome of one compaction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub sessions_compacted: usize,
    pub events_folded: usize,
}

/// A recalled event and the session it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RecallHit {
    pub session_id: String,
    pub event: Event,
    pub score: f32,
}

/// Append-oriented archive of session histories, mirrored to one JSON file.
pub struct MemoryStore {
    path: PathBuf,
    archive: RwLock<ArchiveDoc>,
    summarizer: Arc<dyn Summarizer>,
}

fn owner_key(app: &str, user: &str) -> String {
    format!("{app}/{user}")
}

impl MemoryStore {
    /// Opens the archive at `path` with the offline digest summarizer.
    pub async fn new(path: PathBuf) -> FolioResult<Self> {
        Self::with_summarizer(path, Arc::new(DigestSummarizer)).await
    }

    pub async fn with_summarizer(
        path: PathBuf,
        summarizer: Arc<dyn Summarizer>,
    ) -> FolioResult<Self> {
        let archive = if path.exists() {
            let data = tokio::fs::read_to_string(&path).await.map_err(|e| {
                FolioError::Persistence(format!("Failed to read memory file: {e}"))
            })?;
            if data.trim().is_empty() {
                ArchiveDoc::new()
            } else {
                serde_json::from_str(&data).map_err(|e| {
                    FolioError::Persistence(format!("Failed to parse memory file: {e}"))
                })?
            }
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            ArchiveDoc::new()
        };
        Ok(Self {
            path,
            archive: RwLock::new(archive),
            summarizer,
        })
    }

    async fn save(&self, doc: &ArchiveDoc) -> FolioResult<()> {
        let json = serde_json::to_string_pretty(doc)
            .map_err(|e| FolioError::Persistence(format!("Failed to serialize memory: {e}")))?;
        write_atomic(&self.path, json.as_bytes()).await
    }

    /// Appends the session events not yet archived and counts one turn.
    ///
    /// Returns the number of events appended.
    pub async fn archive(&self, session: &Session) -> FolioResult<usize> {
        let mut doc = self.archive.write().await;
        let entry = doc
            .entry(owner_key(&session.app_name, &session.user_id))
            .or_default()
            .entry(session.id.clone())
            .or_default();

        if session.events.len() < entry.ingested {
            // The session was recreated under the same id; ingest it from the start.
            debug!(session_id = %session.id, "Session history shorter than archive cursor");
            entry.ingested = 0;
        }
        let fresh = &session.events[entry.ingested..];
        let appended = fresh.len();
        entry.events.extend_from_slice(fresh);
        entry.ingested = session.events.len();
        entry.turns_since_compaction += 1;

        self.save(&doc).await?;
        debug!(session_id = %session.id, appended, "Session archived");
        Ok(appended)
    }

    /// Compacts every session whose turn count since the last compaction has
    /// reached `interval`.
    ///
    /// The events before the trailing `overlap_size` are folded into a single
    /// summary event; the trailing events are kept verbatim. An `interval` of 0
    /// compacts every session unconditionally.
    pub async fn compact(&self, interval: u32, overlap_size: usize) -> FolioResult<CompactionReport> {
        let mut doc = self.archive.write().await;
        let mut report = CompactionReport::default();

        for sessions in doc.values_mut() {
            for (session_id, entry) in sessions.iter_mut() {
                if entry.turns_since_compaction < interval {
                    continue;
                }
                if entry.events.len() <= overlap_size {
                    entry.turns_since_compaction = 0;
                    continue;
                }
                let split = entry.events.len() - overlap_size;
                // The archive is only rewritten once the summary exists.
                let summary = self.summarizer.summarize(&entry.events[..split]).await?;
                let tail = entry.events.split_off(split);
                entry.events = std::iter::once(Event::system(COMPACTOR_AUTHOR, summary))
                    .chain(tail)
                    .collect();
                entry.turns_since_compaction = 0;

                report.sessions_compacted += 1;
                report.events_folded += split;
                debug!(session_id = %session_id, folded = split, "Session compacted");
            }
        }

        if report.sessions_compacted > 0 {
            self.save(&doc).await?;
            info!(
                sessions = report.sessions_compacted,
                folded = report.events_folded,
                "Memory compaction complete"
            );
        }
        Ok(report)
    }

    /// Best-effort retrieval of archived events relevant to `query`.
    ///
    /// Events are ranked by keyword relevance; when nothing matches, the most
    /// recent events are returned instead.
    pub async fn recall(
        &self,
        app: &str,
        user: &str,
        query: &str,
        limit: usize,
    ) -> FolioResult<Vec<RecallHit>> {
        let doc = self.archive.read().await;
        let Some(sessions) = doc.get(&owner_key(app, user)) else {
            return Ok(Vec::new());
        };

        let mut by_id: HashMap<Uuid, (&str, &Event)> = HashMap::new();
        for (session_id, entry) in sessions {
            for ev in &entry.events {
                by_id.insert(ev.id, (session_id.as_str(), ev));
            }
        }

        let index =
            KeywordIndex::from_documents(by_id.values().map(|(_, ev)| (ev.id, ev.content.as_str())));
        let ranked = index.search(query, limit);

        let hits: Vec<RecallHit> = if ranked.is_empty() {
            let mut recent: Vec<&(&str, &Event)> = by_id.values().collect();
            recent.sort_by(|a, b| b.1.timestamp.cmp(&a.1.timestamp));
            recent
                .into_iter()
                .take(limit)
                .map(|(sid, ev)| RecallHit {
                    session_id: (*sid).to_string(),
                    event: (*ev).clone(),
                    score: 0.0,
                })
                .collect()
        } else {
            ranked
                .into_iter()
                .filter_map(|(id, score)| {
                    by_id.get(&id).map(|(sid, ev)| RecallHit {
                        session_id: (*sid).to_string(),
                        event: (*ev).clone(),
                        score,
                    })
                })
                .collect()
        };
        Ok(hits)
    }

    /// The archived events of one session.
    pub async fn events(&self, app: &str, user: &str, session_id: &str) -> Vec<Event> {
        let doc = self.archive.read().await;
        doc.get(&owner_key(app, user))
            .and_then(|s| s.get(session_id))
            .map(|a| a.events.clone())
            .unwrap_or_default()
    }

    /// Total archived events across every owner and session.
    pub async fn event_count(&self) -> usize {
        let doc = self.archive.read().await;
        doc.values()
            .flat_map(BTreeMap::values)
            .map(|a| a.events.len())
            .sum()
    }
}
