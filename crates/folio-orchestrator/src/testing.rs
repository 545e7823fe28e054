//! Scripted collaborators for unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use folio_core::{
    FolioError, FolioResult, GenerationRequest, MarketDataProvider, Quote, TextGenerator,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Replies from per-worker queues, matched by worker-name prefix.
///
/// An exhausted or missing queue answers `"<worker> output"`. A queued reply
/// of `"!fail"` makes that call return a capability error.
#[derive(Default)]
pub struct ScriptedGenerator {
    scripts: Mutex<HashMap<String, VecDeque<String>>>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, worker_prefix: &str, replies: &[&str]) -> Self {
        self.scripts.lock().unwrap().insert(
            worker_prefix.to_string(),
            replies.iter().map(|r| r.to_string()).collect(),
        );
        self
    }

    pub fn calls_to(&self, worker_prefix: &str) -> Vec<GenerationRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.worker.starts_with(worker_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> FolioResult<String> {
        self.calls.lock().unwrap().push(request.clone());
        let mut scripts = self.scripts.lock().unwrap();
        let reply = scripts
            .iter_mut()
            .filter(|(prefix, _)| request.worker.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .and_then(|(_, queue)| queue.pop_front());
        match reply.as_deref() {
            Some("!fail") => Err(FolioError::Capability(format!("{} offline", request.worker))),
            Some(text) => Ok(text.to_string()),
            None => Ok(format!("{} output", request.worker)),
        }
    }
}

/// Quotes from a fixed price table; unknown symbols fail.
pub struct FixedQuotes(pub HashMap<String, f64>);

impl FixedQuotes {
    pub fn new(prices: &[(&str, f64)]) -> Self {
        Self(prices.iter().map(|(s, p)| (s.to_string(), *p)).collect())
    }
}

#[async_trait]
impl MarketDataProvider for FixedQuotes {
    async fn quote(&self, symbol: &str) -> FolioResult<Quote> {
        let price = self
            .0
            .get(symbol)
            .copied()
            .ok_or_else(|| FolioError::Capability(format!("no quote for {symbol}")))?;
        Ok(Quote {
            symbol: symbol.to_string(),
            price,
            change: 0.0,
            percent_change: 0.0,
            currency: "USD".into(),
        })
    }
}
