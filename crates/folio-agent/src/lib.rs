//! HTTP-backed capabilities for Folio workers.
//!
//! - [`LlmClient`] implements [`TextGenerator`](folio_core::TextGenerator)
//!   over any OpenAI-compatible chat completions endpoint.
//! - [`SearxSearch`] implements [`SearchProvider`](folio_core::SearchProvider).
//! - [`YahooMarketData`] implements
//!   [`MarketDataProvider`](folio_core::MarketDataProvider).
//!
//! Non-success responses map to [`FolioError::Capability`](folio_core::FolioError)
//! and transport failures to `FolioError::Http`; workers degrade on either.

/// Model and provider configuration.
pub mod config;
pub mod llm;
pub mod market;
pub mod search;

pub use config::{LlmProvider, ModelConfig};
pub use llm::LlmClient;
pub use market::{YahooMarketData, DEFAULT_MARKET_DATA_URL};
pub use search::SearxSearch;
