use chrono::{DateTime, Utc};
use folio_core::{Event, StateStore};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a conversation: `(application, user, session)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.app_name, self.user_id, self.session_id)
    }
}

/// One conversation: its state blackboard plus ordered event history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    #[serde(default)]
    pub state: StateStore,
    #[serde(default)]
    pub events: Vec<Event>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(key: &SessionKey) -> Self {
        let now = Utc::now();
        Self {
            id: key.session_id.clone(),
            app_name: key.app_name.clone(),
            user_id: key.user_id.clone(),
            state: StateStore::new(),
            events: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.app_name, &self.user_id, &self.id)
    }

    pub fn add_event(&mut self, event: Event) {
        self.updated_at = Utc::now();
        self.events.push(event);
    }

    /// Replaces the state with the one produced by a completed turn.
    pub fn replace_state(&mut self, state: StateStore) {
        self.updated_at = Utc::now();
        self.state = state;
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}
