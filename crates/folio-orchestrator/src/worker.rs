use async_trait::async_trait;
use folio_core::{
    ControlSignal, FolioResult, MarketDataProvider, SearchProvider, StateDelta, StateStore,
};
use folio_memory::{MemoryStore, RecallHit};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// One piece of text produced during a turn, tagged with its author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub author: String,
    pub text: String,
}

/// Why a [`LoopComposer`](crate::LoopComposer) stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "exit", rename_all = "snake_case")]
pub enum LoopExit {
    /// The inner pass returned [`ControlSignal::Escalate`].
    Escalated { iteration: u32 },
    /// The configured completion flag was set in state.
    Completed { iteration: u32 },
    /// `max_iterations` passes ran without either of the above.
    Ceiling { iterations: u32 },
}

impl LoopExit {
    pub fn is_ceiling(&self) -> bool {
        matches!(self, LoopExit::Ceiling { .. })
    }
}

/// Result of running a worker or composer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub transcript: Vec<Utterance>,
    pub delta: StateDelta,
    pub signal: ControlSignal,
    /// Set by loop composers, and carried up by sequences that contain one.
    pub loop_exit: Option<LoopExit>,
}

impl Outcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// An outcome carrying a single utterance.
    pub fn say(author: impl Into<String>, text: impl Into<String>) -> Self {
        let mut out = Self::default();
        out.push(author, text);
        out
    }

    pub fn with_delta(mut self, delta: StateDelta) -> Self {
        self.delta = delta;
        self
    }

    pub fn with_signal(mut self, signal: ControlSignal) -> Self {
        self.signal = signal;
        self
    }

    pub fn push(&mut self, author: impl Into<String>, text: impl Into<String>) {
        self.transcript.push(Utterance {
            author: author.into(),
            text: text.into(),
        });
    }

    /// The last non-empty utterance.
    pub fn final_text(&self) -> Option<&str> {
        self.transcript
            .iter()
            .rev()
            .map(|u| u.text.as_str())
            .find(|t| !t.trim().is_empty())
    }

    /// Folds a member's outcome into this one: transcript appended, delta
    /// merged, signal replaced, loop exit kept if the member reported one.
    pub fn absorb(&mut self, other: Outcome) {
        self.transcript.extend(other.transcript);
        self.delta.merge(other.delta);
        self.signal = other.signal;
        if other.loop_exit.is_some() {
            self.loop_exit = other.loop_exit;
        }
    }
}

/// Everything a worker may know about the turn besides the state itself.
#[derive(Clone)]
pub struct TurnContext {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    pub user_input: String,
    memory: Option<Arc<MemoryStore>>,
}

impl TurnContext {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        user_input: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            user_input: user_input.into(),
            memory: None,
        }
    }

    pub fn with_memory(mut self, memory: Arc<MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Archived events relevant to `query`. Failures are logged and yield
    /// nothing.
    pub async fn recall(&self, query: &str, limit: usize) -> Vec<RecallHit> {
        let Some(memory) = &self.memory else {
            return Vec::new();
        };
        match memory
            .recall(&self.app_name, &self.user_id, query, limit)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "Memory recall failed");
                Vec::new()
            }
        }
    }
}

impl fmt::Debug for TurnContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnContext")
            .field("app_name", &self.app_name)
            .field("user_id", &self.user_id)
            .field("session_id", &self.session_id)
            .field("user_input", &self.user_input)
            .field("memory", &self.memory.is_some())
            .finish()
    }
}

/// The atomic unit of work, and the contract every composer also implements.
///
/// A worker reads `state` and returns the writes it wants applied; it never
/// mutates shared state itself.
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &TurnContext, state: &StateStore) -> FolioResult<Outcome>;
}

/// The external capability a worker was constructed with.
#[derive(Clone, Default)]
pub enum Capability {
    #[default]
    None,
    Search(Arc<dyn SearchProvider>),
    MarketData(Arc<dyn MarketDataProvider>),
}

impl Capability {
    pub fn kind(&self) -> &'static str {
        match self {
            Capability::None => "none",
            Capability::Search(_) => "search",
            Capability::MarketData(_) => "market_data",
        }
    }

    /// Queries the capability and renders the result as prompt context.
    ///
    /// Search uses `query`; market data quotes each of `symbols`. A failed call
    /// becomes a short note in the returned text rather than an error.
    pub async fn gather(&self, query: &str, symbols: &[String]) -> String {
        match self {
            Capability::None => String::new(),
            Capability::Search(provider) => match provider.search(query, 5).await {
                Ok(hits) if hits.is_empty() => format!("No search results for \"{query}\"."),
                Ok(hits) => {
                    let mut out = format!("Search results for \"{query}\":");
                    for hit in hits {
                        out.push_str(&format!("\n- {} ({}): {}", hit.title, hit.url, hit.snippet));
                    }
                    out
                }
                Err(e) => {
                    warn!(query, error = %e, "Search capability failed");
                    format!("Search unavailable: {e}")
                }
            },
            Capability::MarketData(provider) => {
                let mut lines = Vec::with_capacity(symbols.len());
                for symbol in symbols {
                    match provider.quote(symbol).await {
                        Ok(q) => lines.push(format!(
                            "{}: {:.2} {} ({:+.2}, {:+.2}%)",
                            q.symbol, q.price, q.currency, q.change, q.percent_change
                        )),
                        Err(e) => {
                            warn!(symbol = %symbol, error = %e, "Market data capability failed");
                            lines.push(format!("market data unavailable for {symbol}: {e}"));
                        }
                    }
                }
                lines.join("\n")
            }
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capability({})", self.kind())
    }
}
