use crate::router::{Phase, Router, ROUTER_NAME};
use crate::worker::TurnContext;
use folio_core::{Event, FolioError, FolioResult};
use folio_memory::{CompactionConfig, MemoryStore};
use folio_session::{Session, SessionKey, SessionStore};
use std::sync::Arc;
use tracing::{info, warn};

/// What the caller gets back from one turn.
#[derive(Debug, Clone)]
pub struct TurnReply {
    pub response: String,
    pub phase: Option<Phase>,
    /// Whether the session file was written after this turn.
    pub persisted: bool,
}

/// Ties the router to durable sessions and long-term memory.
///
/// Each turn: open or create the session, record the user event, route, record
/// the replies, persist, then archive into memory and run compaction. The
/// archive step runs even when persisting failed.
pub struct Copilot {
    app_name: String,
    sessions: Arc<dyn SessionStore>,
    memory: Arc<MemoryStore>,
    router: Router,
    compaction: CompactionConfig,
}

impl Copilot {
    pub fn new(
        app_name: impl Into<String>,
        sessions: Arc<dyn SessionStore>,
        memory: Arc<MemoryStore>,
        router: Router,
        compaction: CompactionConfig,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            sessions,
            memory,
            router,
            compaction,
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub async fn handle_turn(
        &self,
        user_id: &str,
        session_id: &str,
        input: &str,
    ) -> FolioResult<TurnReply> {
        let key = SessionKey::new(self.app_name.as_str(), user_id, session_id);
        let mut session = self.open_session(&key).await?;
        session.add_event(Event::user(input));

        let ctx = TurnContext::new(self.app_name.as_str(), user_id, session_id, input)
            .with_memory(self.memory.clone());
        let result = self.router.handle_turn(&ctx, &session.state).await;

        if result.applied {
            session.replace_state(result.state);
        }
        for utterance in result.transcript {
            session.add_event(Event::assistant(utterance.author, utterance.text));
        }
        session.add_event(Event::assistant(ROUTER_NAME, result.response.as_str()));

        let updated = self.sessions.update(&session).await;
        let persisted = match self.sessions.persist().await {
            Ok(()) => true,
            Err(e) => {
                warn!(session = %key, error = %e, "Session persist failed; will retry next turn");
                false
            }
        };
        self.finalize(&session).await;
        updated?;

        Ok(TurnReply {
            response: result.response,
            phase: result.phase,
            persisted,
        })
    }

    /// `create`, falling back to `get` when the identity is already live.
    async fn open_session(&self, key: &SessionKey) -> FolioResult<Session> {
        match self.sessions.create(key).await {
            Ok(session) => {
                info!(session = %key, "Session created");
                Ok(session)
            }
            Err(FolioError::AlreadyExists(_)) => self.sessions.get(key).await,
            Err(e) => Err(e),
        }
    }

    /// Archives the session into memory and compacts. Failures are logged.
    async fn finalize(&self, session: &Session) {
        if let Err(e) = self.memory.archive(session).await {
            warn!(session_id = %session.id, error = %e, "Memory archive failed");
            return;
        }
        if let Err(e) = self
            .memory
            .compact(self.compaction.interval, self.compaction.overlap_size)
            .await
        {
            warn!(error = %e, "Memory compaction failed");
        }
    }
}
