//! Leaf workers: strategy drafting and the research team.

use crate::keys;
use crate::worker::{Capability, Outcome, TurnContext, Worker};
use async_trait::async_trait;
use folio_core::{
    FolioError, FolioResult, GenerationRequest, Profile, StateDelta, StateStore, TextGenerator,
};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// Most archived snippets folded into a drafting prompt.
const RECALL_LIMIT: usize = 3;
/// Most symbols quoted per deep dive.
const MAX_SYMBOLS: usize = 8;

#[allow(clippy::expect_used)]
static TICKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z]{2,5}\b").expect("valid ticker pattern"));

/// Upper-case words that look like tickers but are not.
const NOT_TICKERS: &[&str] = &[
    "ETF", "ETFS", "US", "USD", "CASH", "IRA", "ROTH", "REIT", "CD", "CDS", "TIPS", "AND", "OR",
    "THE", "FOR", "NOT", "YOU", "YOUR", "ESG", "EM", "DM", "SP", "API",
];

fn generation_failed(worker: &str, e: FolioError) -> FolioError {
    FolioError::Worker(format!("{worker}: {e}"))
}

/// Tickers from the holdings on file, then any mentioned in the strategy text.
fn symbols_for(state: &StateStore) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut symbols = Vec::new();

    let holdings = Profile::from_state(state).current_holdings.unwrap_or_default();
    let from_holdings = holdings.into_iter().filter(|h| !h.is_cash()).map(|h| h.ticker);

    let strategy = state
        .get_str(keys::APPROVED_STRATEGY)
        .or_else(|| state.get_str(keys::PROPOSED_STRATEGY))
        .unwrap_or_default();
    let from_strategy = TICKER_RE
        .find_iter(strategy)
        .map(|m| m.as_str().to_string())
        .filter(|t| !NOT_TICKERS.contains(&t.as_str()));

    for symbol in from_holdings.chain(from_strategy) {
        if symbols.len() == MAX_SYMBOLS {
            break;
        }
        if seen.insert(symbol.clone()) {
            symbols.push(symbol);
        }
    }
    symbols
}

/// Drafts the first `proposed_strategy` from the profile, the workflow mode
/// and anything recalled from earlier sessions.
pub struct InitialStrategyWorker {
    generator: Arc<dyn TextGenerator>,
}

impl InitialStrategyWorker {
    pub const NAME: &'static str = "StrategyDrafter";

    const INSTRUCTION: &'static str = "You are a portfolio strategist. Draft a diversified \
        investment strategy for the client: target asset allocation with percentages, \
        example funds or securities, and the reasoning tied to their risk tolerance, time \
        horizon and goals. When rebalancing, state which current positions to trim or add.";

    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Worker for InitialStrategyWorker {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &TurnContext, state: &StateStore) -> FolioResult<Outcome> {
        let profile = Profile::from_state(state);
        let rebalancing = state.get_str(keys::WORKFLOW_MODE) == Some("rebalance");

        let mut prompt = format!(
            "Task: {}\n\nClient profile:\n{}\n",
            if rebalancing {
                "rebalance the client's existing portfolio"
            } else {
                "build a new portfolio"
            },
            profile.summary()
        );

        let query = [
            profile.investment_goals.as_deref(),
            profile.risk_tolerance.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
        let recalled = ctx.recall(&query, RECALL_LIMIT).await;
        if !recalled.is_empty() {
            prompt.push_str("\nNotes from earlier conversations:\n");
            for hit in &recalled {
                prompt.push_str(&format!("- {}\n", hit.event.content.replace('\n', " ")));
            }
        }
        debug!(worker = Self::NAME, recalled = recalled.len(), rebalancing, "Drafting strategy");

        let request = GenerationRequest::new(Self::NAME, Self::INSTRUCTION, prompt);
        let draft = self
            .generator
            .generate(&request)
            .await
            .map_err(|e| generation_failed(Self::NAME, e))?;

        let delta = StateDelta::new()
            .set(keys::PROPOSED_STRATEGY, draft.trim())
            .set(keys::LOOP_COMPLETE, false)
            .remove(keys::CRITIQUE)
            .remove(keys::USER_FEEDBACK);
        Ok(Outcome::say(Self::NAME, "Drafted a strategy and sent it for risk review.").with_delta(delta))
    }
}

/// Summarizes recent news relevant to the strategy into `market_news`.
pub struct NewsSpecialist {
    generator: Arc<dyn TextGenerator>,
    capability: Capability,
}

impl NewsSpecialist {
    pub const NAME: &'static str = "NewsSpecialist";

    const INSTRUCTION: &'static str = "You are a financial news analyst. Summarize the news \
        items that matter for the client's strategy in a few bullet points. Say so plainly \
        when no reliable news was available.";

    pub fn new(generator: Arc<dyn TextGenerator>, capability: Capability) -> Self {
        Self {
            generator,
            capability,
        }
    }
}

#[async_trait]
impl Worker for NewsSpecialist {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, _ctx: &TurnContext, state: &StateStore) -> FolioResult<Outcome> {
        let symbols = symbols_for(state);
        let query = if symbols.is_empty() {
            "stock market outlook".to_string()
        } else {
            format!("{} stock news", symbols.join(" "))
        };
        let research = self.capability.gather(&query, &[]).await;

        let prompt = format!(
            "Strategy:\n{}\n\n{}",
            state
                .get_str(keys::APPROVED_STRATEGY)
                .or_else(|| state.get_str(keys::PROPOSED_STRATEGY))
                .unwrap_or("(none)"),
            if research.is_empty() { "No search results available." } else { research.as_str() }
        );
        let request = GenerationRequest::new(Self::NAME, Self::INSTRUCTION, prompt);
        let news = self
            .generator
            .generate(&request)
            .await
            .map_err(|e| generation_failed(Self::NAME, e))?;

        Ok(Outcome::say(Self::NAME, news.trim())
            .with_delta(StateDelta::new().set(keys::MARKET_NEWS, news.trim())))
    }
}

/// Quotes the relevant symbols and writes an analysis to `market_data`.
pub struct DataSpecialist {
    generator: Arc<dyn TextGenerator>,
    capability: Capability,
}

impl DataSpecialist {
    pub const NAME: &'static str = "DataSpecialist";

    const INSTRUCTION: &'static str = "You are a quantitative analyst. Interpret the price \
        data for the client's securities: recent moves, concentration and anything that \
        affects the strategy. Note any symbols whose data was unavailable.";

    pub fn new(generator: Arc<dyn TextGenerator>, capability: Capability) -> Self {
        Self {
            generator,
            capability,
        }
    }
}

#[async_trait]
impl Worker for DataSpecialist {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, _ctx: &TurnContext, state: &StateStore) -> FolioResult<Outcome> {
        let symbols = symbols_for(state);
        if symbols.is_empty() {
            let note = "No securities on file or in the strategy to quote.";
            return Ok(Outcome::say(Self::NAME, note)
                .with_delta(StateDelta::new().set(keys::MARKET_DATA, note)));
        }

        let quotes = self.capability.gather("", &symbols).await;
        let prompt = format!(
            "Symbols: {}\n\nMarket data:\n{}",
            symbols.join(", "),
            if quotes.is_empty() { "(no market data capability)" } else { quotes.as_str() }
        );
        let request = GenerationRequest::new(Self::NAME, Self::INSTRUCTION, prompt);
        let analysis = self
            .generator
            .generate(&request)
            .await
            .map_err(|e| generation_failed(Self::NAME, e))?;

        Ok(Outcome::say(Self::NAME, analysis.trim())
            .with_delta(StateDelta::new().set(keys::MARKET_DATA, analysis.trim())))
    }
}

/// Combines the approved strategy and research into the client-facing `report`.
pub struct ReportAnalyst {
    generator: Arc<dyn TextGenerator>,
}

impl ReportAnalyst {
    pub const NAME: &'static str = "ReportAnalyst";

    const INSTRUCTION: &'static str = "You are a senior advisor writing to the client. Using \
        the strategy, news and market data, recommend specific securities to implement the \
        strategy and explain each choice briefly. Close with a reminder that this is not \
        personalized financial advice.";

    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Worker for ReportAnalyst {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, _ctx: &TurnContext, state: &StateStore) -> FolioResult<Outcome> {
        let section = |key: &str| state.get_str(key).unwrap_or("(not available)").to_string();
        let strategy = state
            .get_str(keys::APPROVED_STRATEGY)
            .or_else(|| state.get_str(keys::PROPOSED_STRATEGY))
            .unwrap_or("(no strategy on file)");

        let prompt = format!(
            "Client profile:\n{}\n\nStrategy:\n{strategy}\n\nNews:\n{}\n\nMarket data:\n{}",
            Profile::from_state(state).summary(),
            section(keys::MARKET_NEWS),
            section(keys::MARKET_DATA),
        );
        let request = GenerationRequest::new(Self::NAME, Self::INSTRUCTION, prompt);
        let report = self
            .generator
            .generate(&request)
            .await
            .map_err(|e| generation_failed(Self::NAME, e))?;

        Ok(Outcome::say(Self::NAME, report.trim())
            .with_delta(StateDelta::new().set(keys::REPORT, report.trim())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGenerator;
    use folio_core::profile::KEY_CURRENT_HOLDINGS;
    use folio_core::{Event, Holding};
    use folio_memory::MemoryStore;
    use folio_session::{Session, SessionKey};

    fn ctx() -> TurnContext {
        TurnContext::new("folio", "ada", "s1", "")
    }

    fn with_holdings(holdings: Vec<Holding>) -> StateStore {
        let mut state = StateStore::new();
        state.set(KEY_CURRENT_HOLDINGS, serde_json::to_value(holdings).unwrap());
        state
    }

    #[test]
    fn test_symbols_from_holdings_and_strategy() {
        let mut state = with_holdings(vec![
            Holding::new("VTI", 10),
            Holding::cash(500),
            Holding::new("AAPL", 3),
        ]);
        state.set(
            keys::APPROVED_STRATEGY,
            "Hold 60% VTI, add 20% BND via an ETF and 20% VXUS.",
        );
        assert_eq!(symbols_for(&state), vec!["VTI", "AAPL", "BND", "VXUS"]);
    }

    #[tokio::test]
    async fn test_initial_strategy_clears_old_review() {
        let generator = Arc::new(ScriptedGenerator::new().script("StrategyDrafter", &["  60/40  "]));
        let mut state = StateStore::new();
        state.set(keys::CRITIQUE, "approved");
        state.set(keys::WORKFLOW_MODE, "rebalance");

        let out = InitialStrategyWorker::new(generator.clone())
            .run(&ctx(), &state)
            .await
            .unwrap();
        state.apply(&out.delta);

        assert_eq!(state.get_str(keys::PROPOSED_STRATEGY), Some("60/40"));
        assert!(!state.contains(keys::CRITIQUE));
        assert!(generator.calls_to("StrategyDrafter")[0]
            .prompt
            .contains("rebalance the client's existing portfolio"));
    }

    #[tokio::test]
    async fn test_initial_strategy_uses_recall() {
        let tmp = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryStore::new(tmp.path().join("memory.json")).await.unwrap());
        let mut earlier = Session::new(&SessionKey::new("folio", "ada", "old"));
        earlier.add_event(Event::user("I care most about retirement income"));
        memory.archive(&earlier).await.unwrap();

        let mut state = StateStore::new();
        state.set(folio_core::profile::KEY_INVESTMENT_GOALS, "retirement");
        let generator = Arc::new(ScriptedGenerator::new());
        InitialStrategyWorker::new(generator.clone())
            .run(&ctx().with_memory(memory), &state)
            .await
            .unwrap();

        let prompt = &generator.calls_to("StrategyDrafter")[0].prompt;
        assert!(prompt.contains("- I care most about retirement income"));
    }

    #[tokio::test]
    async fn test_data_specialist_without_symbols_skips_generation() {
        let generator = Arc::new(ScriptedGenerator::new());
        let out = DataSpecialist::new(generator.clone(), Capability::None)
            .run(&ctx(), &StateStore::new())
            .await
            .unwrap();
        assert!(generator.calls_to("DataSpecialist").is_empty());
        assert!(out.delta.get(keys::MARKET_DATA).is_some());
    }

    #[tokio::test]
    async fn test_report_reads_research_keys() {
        let generator = Arc::new(ScriptedGenerator::new().script("ReportAnalyst", &["Buy VTI."]));
        let mut state = StateStore::new();
        state.set(keys::APPROVED_STRATEGY, "All VTI");
        state.set(keys::MARKET_NEWS, "Calm markets");

        let out = ReportAnalyst::new(generator.clone())
            .run(&ctx(), &state)
            .await
            .unwrap();

        assert_eq!(out.final_text(), Some("Buy VTI."));
        let prompt = &generator.calls_to("ReportAnalyst")[0].prompt;
        assert!(prompt.contains("All VTI"));
        assert!(prompt.contains("Calm markets"));
        assert!(prompt.contains("Market data:\n(not available)"));
    }
}
