//! External capabilities a worker may be constructed with.
//!
//! These traits live in `folio-core` so that `folio-agent` (which implements
//! HTTP-backed providers) and `folio-orchestrator` (which consumes them) can
//! share them without depending on each other.

use crate::FolioResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single prompt sent to a text generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Name of the worker issuing the request.
    pub worker: String,
    /// Persona and standing instructions.
    pub instruction: String,
    /// The task-specific prompt assembled from state.
    pub prompt: String,
}

impl GenerationRequest {
    pub fn new(
        worker: impl Into<String>,
        instruction: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            worker: worker.into(),
            instruction: instruction.into(),
            prompt: prompt.into(),
        }
    }
}

/// Opaque text generation (an LLM or any scripted stand-in).
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> FolioResult<String>;
}

/// A single web search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

/// Web search.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> FolioResult<Vec<SearchHit>>;
}

/// A price snapshot for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub change: f64,
    pub percent_change: f64,
    pub currency: String,
}

/// Structured market-data queries.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn quote(&self, symbol: &str) -> FolioResult<Quote>;
}
