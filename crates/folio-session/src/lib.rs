//! Durable session and profile storage.
//!
//! # Main types
//!
//! - [`Session`]: Identity, shared state and event history of one conversation.
//! - [`SessionStore`]: Trait for session persistence backends.
//! - [`FileSessionStore`]: In-memory cache backed by a single JSON file.
//! - [`ProfileStore`]: Trait for client profile storage with merge-on-save.
//! - [`FileProfileStore`]: JSON-file profile store keyed by client name.

/// Client profile storage.
pub mod profile;
/// Session identity and history.
pub mod session;
/// Session persistence.
pub mod store;

pub use profile::{FileProfileStore, ProfileStore};
pub use session::{Session, SessionKey};
pub use store::{write_atomic, FileSessionStore, SessionStore};
