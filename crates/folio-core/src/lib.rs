//! Core types and error definitions for the Folio workflow engine.
//!
//! This crate provides the foundational types shared across all Folio crates:
//! the unified error type, conversation events, the per-turn state blackboard,
//! client profiles, and the traits through which workers reach external
//! capabilities.
//!
//! # Main types
//!
//! - [`FolioError`]: Unified error enum for all Folio subsystems.
//! - [`FolioResult`]: Convenience alias for `Result<T, FolioError>`.
//! - [`Role`]: Event role (user, assistant, system).
//! - [`Event`]: An immutable, timestamped record in a session's history.
//! - [`StateStore`]: Key-value blackboard workers exchange data through.
//! - [`StateDelta`]: A set of writes a worker asks its composer to apply.
//! - [`ControlSignal`]: Out-of-band steering value returned with every outcome.
//! - [`Profile`]: A partially-specified client profile.

/// Traits for text generation, web search and market data.
pub mod capability;
/// Client profile and holdings types.
pub mod profile;
/// Shared state blackboard, deltas and control signals.
pub mod state;

pub use capability::{
    GenerationRequest, MarketDataProvider, Quote, SearchHit, SearchProvider, TextGenerator,
};
pub use profile::{Holding, Profile};
pub use state::{ControlSignal, StateDelta, StateStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Error types ---

/// Top-level error type for the Folio engine.
///
/// Variants follow the recovery taxonomy: absent records, malformed user
/// input, failed external capabilities and failed durable writes are each
/// distinguishable so callers can pick the right fallback.
#[derive(Debug, thiserror::Error)]
pub enum FolioError {
    /// A session, profile or archive entry does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A session with the same identity is already live in memory.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// User text could not be classified.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// An external search, data or generation call failed.
    #[error("Capability error: {0}")]
    Capability(String),

    /// A durable write failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A worker failed in a way that aborts its enclosing sequence.
    #[error("Worker error: {0}")]
    Worker(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from an outbound HTTP request.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`FolioError`].
pub type FolioResult<T> = Result<T, FolioError>;

// --- Event types ---

/// The role of the participant that authored an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A human end-user.
    User,
    /// The coordinator or one of its workers.
    Assistant,
    /// Engine-generated records such as compaction summaries.
    System,
}

/// An immutable record appended to a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event.
    pub id: Uuid,
    /// UTC timestamp of when the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// The role of the event author.
    pub role: Role,
    /// Name of the worker or participant that produced the content.
    pub author: String,
    /// The textual content of the event.
    pub content: String,
}

impl Event {
    /// Creates a new event stamped with the current time.
    pub fn new(role: Role, author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role,
            author: author.into(),
            content: content.into(),
        }
    }

    /// Creates a new event with [`Role::User`].
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, "user", content)
    }

    /// Creates a new event with [`Role::Assistant`].
    pub fn assistant(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, author, content)
    }

    /// Creates a new event with [`Role::System`].
    pub fn system(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(Role::System, author, content)
    }
}
