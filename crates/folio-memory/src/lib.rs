//! Long-term memory for completed conversation turns.
//!
//! Session histories are archived per `(application, user)`, periodically
//! compacted into a summary plus a verbatim overlap window, and searched with
//! a BM25 keyword index when workers ask for recall.
//!
//! # Main types
//!
//! - [`MemoryStore`]: File-backed archive with `archive`, `compact` and `recall`.
//! - [`CompactionConfig`]: Compaction interval and overlap window.
//! - [`Summarizer`]: Trait for collapsing older events into one summary.
//! - [`DigestSummarizer`]: Deterministic, offline summarizer.
//! - [`GeneratorSummarizer`]: Summarizer backed by a text generator.
//! - [`KeywordIndex`]: BM25 index used to rank recall candidates.

/// BM25 keyword index.
pub mod keyword;
/// Archive, compaction and recall.
pub mod store;
/// Summarizers used during compaction.
pub mod summarizer;

pub use keyword::KeywordIndex;
pub use store::{CompactionConfig, CompactionReport, MemoryStore, RecallHit, COMPACTOR_AUTHOR};
pub use summarizer::{DigestSummarizer, GeneratorSummarizer, Summarizer};
