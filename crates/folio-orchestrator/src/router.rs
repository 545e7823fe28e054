//! The conversation state machine.
//!
//! ```text
//! (fresh) ──disclaimer──▶ NewUser ──name──▶ ReturningUser | AwaitingIntent(build_or_analyze)
//!
//! AwaitingIntent(build_or_analyze)
//!   A ──▶ Building ──profile complete──▶ strategy_development ──▶ AwaitingFeedback
//!   B ──▶ AwaitingIntent(rebalance_or_analyze)
//!           A ──▶ Rebalancing ──▶ strategy_development ──▶ AwaitingFeedback
//!           B ──▶ deep_dive ──▶ AwaitingIntent(build_or_analyze)
//!
//! AwaitingFeedback
//!   approval ──▶ Reviewing
//!   feedback ──▶ standalone_refinement ──▶ AwaitingFeedback
//!
//! Reviewing
//!   yes ──▶ deep_dive ──▶ AwaitingIntent(build_or_analyze)
//!   no  ──▶ AwaitingIntent(build_or_analyze)
//!
//! Reviewing | AwaitingIntent(build_or_analyze)
//!   "update my holdings" ──▶ approved allocation saved as holdings
//! ```
//!
//! The phase lives in state under [`keys::PHASE`], so it persists with the
//! session. A reply that cannot be classified gets a clarification and leaves
//! state exactly as it was; so does any worker or store failure.

use crate::allocation::{parse_allocation, rebalance, Target};
use crate::intake::{
    answer_field, classify_choice, extract_name, is_approval, next_missing, parse_labeled,
    wants_execution, yes_no, Choice, Field,
};
use crate::keys;
use crate::parser::parse_holdings;
use crate::refinement::rejection;
use crate::worker::{Capability, LoopExit, TurnContext, Utterance};
use crate::workflows::Workflows;
use folio_core::profile::{CASH_TICKER, KEY_USER_NAME};
use folio_core::{FolioError, FolioResult, Holding, Profile, StateStore};
use folio_session::ProfileStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Author of the router's own replies.
pub const ROUTER_NAME: &str = "ClientAdvisor";

pub const DISCLAIMER: &str = "Hello! I'm an AI assistant that helps you think through how to \
    allocate your portfolio. I am not a financial advisor, I may not have all the information \
    needed to make a recommendation, and I cannot provide personalized financial advice. \
    Investing always involves risk, and past performance is no guarantee of future results.";

const ASK_NAME: &str = "To get started, what's your name?";

const BUILD_OR_ANALYZE: &str =
    "Would you like to (A) build a new portfolio or (B) analyze an existing portfolio?";

const REBALANCE_OR_ANALYZE: &str =
    "Would you like to (A) rebalance your portfolio or (B) analyze it?";

const APOLOGY: &str = "Sorry, something went wrong on my side while working on that. \
    Nothing was changed; please try again.";

const BUILD_WORDS: &[&str] = &["build", "new", "create", "start"];
const ANALYZE_WORDS: &[&str] = &["analy", "existing", "current", "review", "rebalanc"];
const REBALANCE_WORDS: &[&str] = &["rebalanc", "adjust"];
const ANALYZE_ONLY_WORDS: &[&str] = &["analy", "review", "assess"];

/// Which two-way question the router is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentChoice {
    BuildOrAnalyze,
    RebalanceOrAnalyze,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Phase {
    NewUser,
    ReturningUser,
    AwaitingIntent { choice: IntentChoice },
    Building,
    Rebalancing,
    Reviewing,
    AwaitingFeedback,
}

/// What one call to [`Router::handle_turn`] produced.
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub response: String,
    /// The state to keep. Equal to the input state when `applied` is false.
    pub state: StateStore,
    /// Worker utterances produced along the way, in order.
    pub transcript: Vec<Utterance>,
    pub phase: Option<Phase>,
    pub applied: bool,
}

struct Reply {
    text: String,
    transcript: Vec<Utterance>,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            transcript: Vec::new(),
        }
    }
}

pub struct Router {
    profiles: Arc<dyn ProfileStore>,
    workflows: Workflows,
}

impl Router {
    pub fn new(profiles: Arc<dyn ProfileStore>, workflows: Workflows) -> Self {
        Self {
            profiles,
            workflows,
        }
    }

    /// The phase recorded in `state`, if any.
    pub fn phase(state: &StateStore) -> Option<Phase> {
        state.get_as(keys::PHASE)
    }

    fn set_phase(state: &mut StateStore, phase: Phase) {
        if let Ok(value) = serde_json::to_value(phase) {
            state.set(keys::PHASE, value);
        }
    }

    /// Runs one conversational turn. Never fails: errors become a reply and
    /// the returned state is the input state unchanged.
    pub async fn handle_turn(&self, ctx: &TurnContext, state: &StateStore) -> TurnResult {
        let phase = Self::phase(state);
        let mut working = state.clone();

        match self.step(ctx, &mut working, phase).await {
            Ok(reply) => {
                let next = Self::phase(&working);
                if next != phase {
                    info!(session_id = %ctx.session_id, from = ?phase, to = ?next, "Phase transition");
                }
                TurnResult {
                    response: reply.text,
                    state: working,
                    transcript: reply.transcript,
                    phase: next,
                    applied: true,
                }
            }
            Err(FolioError::MalformedInput(prompt)) => {
                debug!(session_id = %ctx.session_id, phase = ?phase, "Input not understood, re-prompting");
                TurnResult {
                    response: prompt,
                    state: state.clone(),
                    transcript: Vec::new(),
                    phase,
                    applied: false,
                }
            }
            Err(e) => {
                error!(session_id = %ctx.session_id, phase = ?phase, error = %e, "Turn failed");
                TurnResult {
                    response: APOLOGY.to_string(),
                    state: state.clone(),
                    transcript: Vec::new(),
                    phase,
                    applied: false,
                }
            }
        }
    }

    async fn step(
        &self,
        ctx: &TurnContext,
        state: &mut StateStore,
        phase: Option<Phase>,
    ) -> FolioResult<Reply> {
        let input = ctx.user_input.trim();
        match phase {
            None => {
                Self::set_phase(state, Phase::NewUser);
                Ok(Reply::text(format!("{DISCLAIMER}\n\n{ASK_NAME}")))
            }
            Some(Phase::NewUser) => self.identify(state, input).await,
            Some(Phase::ReturningUser)
            | Some(Phase::AwaitingIntent {
                choice: IntentChoice::BuildOrAnalyze,
            }) => self.choose_path(ctx, state, input).await,
            Some(Phase::AwaitingIntent {
                choice: IntentChoice::RebalanceOrAnalyze,
            }) => self.choose_existing(ctx, state, input).await,
            Some(Phase::Building) | Some(Phase::Rebalancing) => {
                self.collect(ctx, state, input).await
            }
            Some(Phase::AwaitingFeedback) => self.feedback(ctx, state, input).await,
            Some(Phase::Reviewing) => self.review(ctx, state, input).await,
        }
    }

    async fn identify(&self, state: &mut StateStore, input: &str) -> FolioResult<Reply> {
        let name = extract_name(input).ok_or_else(|| {
            FolioError::MalformedInput("I didn't catch your name. What should I call you?".into())
        })?;

        let stored = match self.profiles.get(&name).await? {
            Some(profile) => Some(profile),
            None => self.carried_profile(state, &name).await?,
        };

        match stored {
            Some(profile) => {
                state.apply(&profile.to_delta());
                state.set(KEY_USER_NAME, name.as_str());
                Self::set_phase(state, Phase::ReturningUser);
                Ok(Reply::text(format!(
                    "Welcome back, {name}! Here is what I have on file:\n{}\n\n{BUILD_OR_ANALYZE}",
                    profile.summary()
                )))
            }
            None => {
                self.profiles.save(&Profile::named(name.as_str())).await?;
                state.set(KEY_USER_NAME, name.as_str());
                Self::set_phase(
                    state,
                    Phase::AwaitingIntent {
                        choice: IntentChoice::BuildOrAnalyze,
                    },
                );
                Ok(Reply::text(format!("Nice to meet you, {name}! {BUILD_OR_ANALYZE}")))
            }
        }
    }

    /// The profile already held in session state for `name`, when the store
    /// has no record of it. It is written back so the store catches up.
    async fn carried_profile(
        &self,
        state: &StateStore,
        name: &str,
    ) -> FolioResult<Option<Profile>> {
        let mut carried = Profile::from_state(state);
        let same_user = carried
            .name
            .as_deref()
            .is_some_and(|n| n.eq_ignore_ascii_case(name));
        carried.name = Some(name.to_string());
        if !same_user || carried == Profile::named(name) {
            return Ok(None);
        }
        debug!(user = %name, "No stored profile, using the one held in session state");
        Ok(Some(self.profiles.save(&carried).await?))
    }

    async fn choose_path(
        &self,
        ctx: &TurnContext,
        state: &mut StateStore,
        input: &str,
    ) -> FolioResult<Reply> {
        if wants_execution(input) {
            return self.execute_strategy(state).await;
        }
        match classify_choice(input, BUILD_WORDS, ANALYZE_WORDS) {
            Some(Choice::First) => {
                state.set(keys::WORKFLOW_MODE, "build");
                Self::set_phase(state, Phase::Building);
                self.advance(ctx, state).await
            }
            Some(Choice::Second) => {
                Self::set_phase(
                    state,
                    Phase::AwaitingIntent {
                        choice: IntentChoice::RebalanceOrAnalyze,
                    },
                );
                let profile = Profile::from_state(state);
                if profile.has_securities() {
                    Ok(Reply::text(format!(
                        "Here is the portfolio I have on file:\n{}\n\n{REBALANCE_OR_ANALYZE}",
                        profile.summary()
                    )))
                } else {
                    Ok(Reply::text(ask_for_holdings()))
                }
            }
            None => Err(FolioError::MalformedInput(format!(
                "Sorry, I didn't follow. {BUILD_OR_ANALYZE}"
            ))),
        }
    }

    async fn choose_existing(
        &self,
        ctx: &TurnContext,
        state: &mut StateStore,
        input: &str,
    ) -> FolioResult<Reply> {
        let choice = classify_choice(input, REBALANCE_WORDS, ANALYZE_ONLY_WORDS);

        // Bare holdings are only read from replies that make no choice, so
        // "analyze my 3 funds" is not taken for a position in FUNDS.
        let mut recorded = None;
        if let Some(update) = parse_labeled(input)? {
            self.save_profile(state, update).await?;
            recorded = Some("Thanks, I've updated your profile");
        } else if choice.is_none() {
            if let Ok(holdings) = parse_holdings(input) {
                let update = Profile {
                    current_holdings: Some(holdings),
                    ..Profile::default()
                };
                self.save_profile(state, update).await?;
                recorded = Some("Thanks, I've recorded your holdings");
            }
        }

        let profile = Profile::from_state(state);
        match choice {
            None => match recorded {
                Some(lead) => Ok(Reply::text(format!(
                    "{lead}:\n{}\n\n{REBALANCE_OR_ANALYZE}",
                    profile.summary()
                ))),
                None => Err(FolioError::MalformedInput(format!(
                    "Sorry, I didn't follow. {REBALANCE_OR_ANALYZE}"
                ))),
            },
            Some(_) if !profile.has_securities() => Ok(Reply::text(ask_for_holdings())),
            Some(Choice::First) => {
                state.set(keys::WORKFLOW_MODE, "rebalance");
                Self::set_phase(state, Phase::Rebalancing);
                self.advance(ctx, state).await
            }
            Some(Choice::Second) => self.deep_dive(ctx, state).await,
        }
    }

    /// Records the answer to the pending profile question (or any labelled
    /// `field: value` clauses), then asks the next one.
    async fn collect(
        &self,
        ctx: &TurnContext,
        state: &mut StateStore,
        input: &str,
    ) -> FolioResult<Reply> {
        let update = match parse_labeled(input)? {
            Some(update) => update,
            None => {
                let pending = state
                    .get_as::<Field>(keys::AWAITING_FIELD)
                    .or_else(|| next_missing(&Profile::from_state(state)));
                match pending {
                    Some(field) => answer_field(field, input)?,
                    None => Profile::default(),
                }
            }
        };
        if update != Profile::default() {
            self.save_profile(state, update).await?;
        }
        self.advance(ctx, state).await
    }

    /// Asks for the next missing profile field, or runs strategy development
    /// once the profile is complete.
    async fn advance(&self, ctx: &TurnContext, state: &mut StateStore) -> FolioResult<Reply> {
        let profile = Profile::from_state(state);
        if let Some(field) = next_missing(&profile) {
            state.set(keys::AWAITING_FIELD, serde_json::to_value(field)?);
            return Ok(Reply::text(field.question()));
        }
        state.remove(keys::AWAITING_FIELD);

        let outcome = self.workflows.strategy_development.run(ctx, state).await?;
        state.apply(&outcome.delta);
        Self::set_phase(state, Phase::AwaitingFeedback);
        Ok(Reply {
            text: present_strategy(state, outcome.loop_exit, "Here is the strategy I propose"),
            transcript: outcome.transcript,
        })
    }

    async fn feedback(
        &self,
        ctx: &TurnContext,
        state: &mut StateStore,
        input: &str,
    ) -> FolioResult<Reply> {
        if input.is_empty() {
            return Err(FolioError::MalformedInput(
                "Does the strategy work for you? Say 'approve', or tell me what to change.".into(),
            ));
        }

        if is_approval(input) {
            let strategy = state
                .get_str(keys::PROPOSED_STRATEGY)
                .map(str::to_string)
                .ok_or_else(|| FolioError::Worker("no proposed strategy to approve".into()))?;
            state.set(keys::APPROVED_STRATEGY, strategy);
            Self::set_phase(state, Phase::Reviewing);
            return Ok(Reply::text(
                "Great, the strategy is approved. Would you like me to research the specific \
                 securities to buy and sell to implement it? (yes/no)",
            ));
        }

        state.set(keys::CRITIQUE, rejection(input));
        state.set(keys::USER_FEEDBACK, input);
        state.set(keys::LOOP_COMPLETE, false);

        let outcome = self.workflows.standalone_refinement.run(ctx, state).await?;
        state.apply(&outcome.delta);
        Ok(Reply {
            text: present_strategy(state, outcome.loop_exit, "I've revised the strategy"),
            transcript: outcome.transcript,
        })
    }

    async fn review(
        &self,
        ctx: &TurnContext,
        state: &mut StateStore,
        input: &str,
    ) -> FolioResult<Reply> {
        if wants_execution(input) {
            return self.execute_strategy(state).await;
        }
        match yes_no(input) {
            Some(true) => self.deep_dive(ctx, state).await,
            Some(false) => {
                Self::set_phase(
                    state,
                    Phase::AwaitingIntent {
                        choice: IntentChoice::BuildOrAnalyze,
                    },
                );
                Ok(Reply::text(format!(
                    "No problem. Remember to review your portfolio periodically and rebalance \
                     when it drifts from the target allocation. Anything else? {BUILD_OR_ANALYZE}"
                )))
            }
            None => Err(FolioError::MalformedInput(
                "Please answer yes or no: should I research specific securities for the strategy?"
                    .into(),
            )),
        }
    }

    async fn deep_dive(&self, ctx: &TurnContext, state: &mut StateStore) -> FolioResult<Reply> {
        let outcome = self.workflows.deep_dive.run(ctx, state).await?;
        state.apply(&outcome.delta);
        Self::set_phase(
            state,
            Phase::AwaitingIntent {
                choice: IntentChoice::BuildOrAnalyze,
            },
        );
        let report = state
            .get_str(keys::REPORT)
            .or_else(|| outcome.final_text())
            .unwrap_or("The research team could not produce a report.")
            .to_string();
        Ok(Reply {
            text: format!("{report}\n\nIs there anything else I can help with? {BUILD_OR_ANALYZE}"),
            transcript: outcome.transcript,
        })
    }

    /// Replaces the user's holdings with whole-share positions that follow
    /// the approved allocation, keeping the current portfolio value.
    async fn execute_strategy(&self, state: &mut StateStore) -> FolioResult<Reply> {
        let strategy = state
            .get_str(keys::APPROVED_STRATEGY)
            .map(str::to_string)
            .ok_or_else(|| {
                FolioError::MalformedInput(format!(
                    "There is no approved strategy to apply yet. {BUILD_OR_ANALYZE}"
                ))
            })?;
        let targets = parse_allocation(&strategy)?;
        let held = Profile::from_state(state)
            .current_holdings
            .unwrap_or_default();
        let prices = self.prices(&targets, &held).await;
        let next = rebalance(&targets, &held, &prices)?;

        info!(
            positions = next.len(),
            quoted = prices.len(),
            "Applying approved allocation to holdings"
        );
        let update = Profile {
            current_holdings: Some(next),
            ..Profile::default()
        };
        self.save_profile(state, update).await?;
        Self::set_phase(
            state,
            Phase::AwaitingIntent {
                choice: IntentChoice::BuildOrAnalyze,
            },
        );
        Ok(Reply::text(format!(
            "Done. I've updated your holdings to follow the approved strategy:\n{}\n\n\
             These are target positions; place the actual trades with your broker. \
             Anything else? {BUILD_OR_ANALYZE}",
            Profile::from_state(state).summary()
        )))
    }

    /// Live prices for the target and held tickers. Tickers that cannot be
    /// quoted fall back to their cost basis later.
    async fn prices(&self, targets: &[Target], held: &[Holding]) -> HashMap<String, f64> {
        let mut prices = HashMap::new();
        let Capability::MarketData(provider) = &self.workflows.market_data else {
            return prices;
        };
        let mut symbols: Vec<&str> = targets
            .iter()
            .map(|t| t.ticker.as_str())
            .chain(held.iter().filter(|h| !h.is_cash()).map(|h| h.ticker.as_str()))
            .filter(|s| !s.eq_ignore_ascii_case(CASH_TICKER))
            .collect();
        symbols.sort_unstable();
        symbols.dedup();
        for symbol in symbols {
            match provider.quote(symbol).await {
                Ok(quote) => {
                    prices.insert(symbol.to_string(), quote.price);
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Quote failed, pricing at cost basis");
                }
            }
        }
        prices
    }

    /// Merges `update` into the stored profile of the current user and mirrors
    /// the merged record into state.
    async fn save_profile(&self, state: &mut StateStore, mut update: Profile) -> FolioResult<()> {
        update.name = state.get_str(KEY_USER_NAME).map(str::to_string);
        let merged = self.profiles.save(&update).await?;
        state.apply(&merged.to_delta());
        Ok(())
    }
}

fn ask_for_holdings() -> String {
    format!(
        "Please share your current holdings (for example, '10 VTI @ $200, 5 AAPL'). {REBALANCE_OR_ANALYZE}"
    )
}

fn present_strategy(state: &StateStore, exit: Option<LoopExit>, lead: &str) -> String {
    let proposal = state
        .get_str(keys::PROPOSED_STRATEGY)
        .unwrap_or("(no strategy was drafted)");
    let caveat = if exit.is_some_and(|e| e.is_ceiling()) {
        "\n\nNote: the internal risk review did not fully sign off on this draft, so please look it over carefully."
    } else {
        ""
    };
    format!(
        "{lead}:\n\n{proposal}{caveat}\n\nDoes this work for you? Say 'approve' to accept it, or tell me what you'd like changed."
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testing::{FixedQuotes, ScriptedGenerator};
    use folio_core::profile::{KEY_CURRENT_HOLDINGS, KEY_RISK_TOLERANCE};
    use folio_core::Holding;
    use folio_session::FileProfileStore;

    struct Harness {
        router: Router,
        profiles: Arc<FileProfileStore>,
        generator: Arc<ScriptedGenerator>,
        state: StateStore,
        _tmp: tempfile::TempDir,
    }

    impl Harness {
        async fn new(generator: ScriptedGenerator) -> Self {
            Self::build(generator, None).await
        }

        async fn priced(generator: ScriptedGenerator, quotes: FixedQuotes) -> Self {
            Self::build(generator, Some(quotes)).await
        }

        async fn build(generator: ScriptedGenerator, quotes: Option<FixedQuotes>) -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let profiles = Arc::new(
                FileProfileStore::new(tmp.path().join("user_profiles.json"))
                    .await
                    .unwrap(),
            );
            let generator = Arc::new(generator);
            let mut builder = Workflows::builder(generator.clone());
            if let Some(quotes) = quotes {
                builder = builder.market_data(Arc::new(quotes));
            }
            let workflows = builder.build();
            Self {
                router: Router::new(profiles.clone(), workflows),
                profiles,
                generator,
                state: StateStore::new(),
                _tmp: tmp,
            }
        }

        async fn say(&mut self, input: &str) -> TurnResult {
            let ctx = TurnContext::new("folio", "tester", "s1", input);
            let result = self.router.handle_turn(&ctx, &self.state).await;
            self.state = result.state.clone();
            result
        }
    }

    fn approving() -> ScriptedGenerator {
        ScriptedGenerator::new()
            .script("StrategyDrafter", &["60% VTI, 40% BND"])
            .script("RiskCritic", &["approved"; 10])
    }

    #[tokio::test]
    async fn test_first_contact_shows_disclaimer() {
        let mut h = Harness::new(approving()).await;
        let result = h.say("hi").await;
        assert!(result.response.starts_with(DISCLAIMER));
        assert!(result.response.ends_with(ASK_NAME));
        assert_eq!(result.phase, Some(Phase::NewUser));
    }

    #[tokio::test]
    async fn test_new_user_is_saved_and_asked_for_intent() {
        let mut h = Harness::new(approving()).await;
        h.say("hi").await;
        let result = h.say("I'm Ada").await;

        assert!(result.response.contains("Nice to meet you, Ada!"));
        assert_eq!(
            result.phase,
            Some(Phase::AwaitingIntent {
                choice: IntentChoice::BuildOrAnalyze
            })
        );
        assert!(h.profiles.get("Ada").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_returning_user_profile_loaded_into_state() {
        let mut h = Harness::new(approving()).await;
        h.profiles
            .save(&Profile {
                name: Some("Ada".into()),
                risk_tolerance: Some("Aggressive".into()),
                ..Profile::default()
            })
            .await
            .unwrap();

        h.say("hello").await;
        let result = h.say("Ada").await;

        assert_eq!(result.phase, Some(Phase::ReturningUser));
        assert!(result.response.contains("Welcome back, Ada!"));
        assert!(result.response.contains("Risk tolerance: Aggressive"));
        assert_eq!(h.state.get_str(KEY_RISK_TOLERANCE), Some("Aggressive"));
    }

    #[tokio::test]
    async fn test_malformed_intent_keeps_state() {
        let mut h = Harness::new(approving()).await;
        h.say("hi").await;
        h.say("Ada").await;
        let before = h.state.clone();

        let result = h.say("what's the weather like?").await;

        assert!(!result.applied);
        assert!(result.response.contains("(A) build a new portfolio"));
        assert_eq!(h.state, before);
    }

    #[tokio::test]
    async fn test_build_flow_collects_profile_then_proposes() {
        let mut h = Harness::new(approving()).await;
        h.say("hi").await;
        h.say("Ada").await;

        assert_eq!(h.say("A").await.response, Field::RiskTolerance.question());
        assert_eq!(h.say("moderate").await.response, Field::TimeHorizon.question());

        let bad = h.say("whenever").await;
        assert!(!bad.applied);
        assert_eq!(
            h.state.get_as::<Field>(keys::AWAITING_FIELD),
            Some(Field::TimeHorizon)
        );

        assert_eq!(h.say("20 years").await.response, Field::InvestmentGoals.question());
        assert_eq!(h.say("retirement").await.response, Field::Holdings.question());

        let proposal = h.say("starting from scratch with $10,000").await;
        assert_eq!(proposal.phase, Some(Phase::AwaitingFeedback));
        assert!(proposal.response.contains("60% VTI, 40% BND"));
        assert!(!proposal.response.contains("did not fully sign off"));
        assert_eq!(
            h.state.get_as::<Vec<Holding>>(KEY_CURRENT_HOLDINGS),
            Some(vec![Holding::cash(10_000)])
        );

        let stored = h.profiles.get("Ada").await.unwrap().unwrap();
        assert!(stored.is_complete());
    }

    #[tokio::test]
    async fn test_labeled_answers_fill_several_fields() {
        let mut h = Harness::new(approving()).await;
        h.say("hi").await;
        h.say("Ada").await;
        h.say("build").await;

        let result = h
            .say("risk: aggressive; horizon: 30 years; goals: early retirement; holdings: 10 VTI @ $200")
            .await;
        assert_eq!(result.phase, Some(Phase::AwaitingFeedback));
    }

    async fn at_feedback(generator: ScriptedGenerator) -> Harness {
        drive_to_feedback(Harness::new(generator).await).await
    }

    async fn drive_to_feedback(mut h: Harness) -> Harness {
        h.say("hi").await;
        h.say("Ada").await;
        h.say("A").await;
        h.say("risk: moderate; horizon: 10 years; goals: retirement; cash: 5000").await;
        assert_eq!(Router::phase(&h.state), Some(Phase::AwaitingFeedback));
        h
    }

    #[tokio::test]
    async fn test_feedback_runs_standalone_loop() {
        let generator = approving().script("Refiner_standalone", &["50% VTI, 30% VXUS, 20% BND"]);
        let mut h = at_feedback(generator).await;

        let result = h.say("I'd like some international exposure").await;

        assert_eq!(result.phase, Some(Phase::AwaitingFeedback));
        assert!(result.response.contains("50% VTI, 30% VXUS, 20% BND"));
        assert!(!h.state.contains(keys::USER_FEEDBACK));
        let prompt = &h.generator.calls_to("Refiner_standalone")[0].prompt;
        assert!(prompt.contains("Client feedback: I'd like some international exposure"));
    }

    #[tokio::test]
    async fn test_approval_then_deep_dive() {
        let generator = approving().script("ReportAnalyst", &["Buy 30 VTI and 40 BND."]);
        let mut h = at_feedback(generator).await;

        let approved = h.say("Looks good").await;
        assert_eq!(approved.phase, Some(Phase::Reviewing));
        assert_eq!(
            h.state.get_str(keys::APPROVED_STRATEGY),
            Some("60% VTI, 40% BND")
        );

        let report = h.say("yes please").await;
        assert!(report.response.starts_with("Buy 30 VTI and 40 BND."));
        assert_eq!(
            report.phase,
            Some(Phase::AwaitingIntent {
                choice: IntentChoice::BuildOrAnalyze
            })
        );
        assert!(h.state.contains(keys::MARKET_NEWS));
        assert!(h.state.contains(keys::MARKET_DATA));
    }

    #[tokio::test]
    async fn test_declining_deep_dive_reminds_and_returns_to_intent() {
        let mut h = at_feedback(approving()).await;
        h.say("approve").await;
        let result = h.say("no thanks").await;
        assert!(result.response.contains("review your portfolio periodically"));
        assert!(h.generator.calls_to("ReportAnalyst").is_empty());
    }

    #[tokio::test]
    async fn test_ceiling_is_surfaced_with_caveat() {
        let generator = ScriptedGenerator::new()
            .script("StrategyDrafter", &["draft"])
            .script("RiskCritic", &["rejected: too risky"; 10]);
        let h = at_feedback(generator).await;
        assert_eq!(h.generator.calls_to("RiskCritic_internal").len(), 5);
        assert!(h.state.contains(keys::PROPOSED_STRATEGY));
    }

    #[tokio::test]
    async fn test_worker_failure_apologizes_and_keeps_state() {
        let generator = ScriptedGenerator::new().script("StrategyDrafter", &["!fail"]);
        let mut h = Harness::new(generator).await;
        h.say("hi").await;
        h.say("Ada").await;
        h.say("A").await;
        let before = h.state.clone();

        let result = h
            .say("risk: moderate; horizon: 10 years; goals: retirement; cash: 5000")
            .await;

        assert!(!result.applied);
        assert_eq!(result.response, APOLOGY);
        assert_eq!(h.state, before);
    }

    #[tokio::test]
    async fn test_analyze_path_asks_for_holdings_then_runs_deep_dive() {
        let generator = approving().script("ReportAnalyst", &["Your portfolio is concentrated."]);
        let mut h = Harness::new(generator).await;
        h.say("hi").await;
        h.say("Ada").await;

        let ask = h.say("B").await;
        assert!(ask.response.contains("share your current holdings"));

        let recorded = h.say("10 VTI @ $200, 5 AAPL").await;
        assert!(recorded.response.contains("10 VTI @ $200.00, 5 AAPL"));

        let report = h.say("analyze please").await;
        assert!(report.response.starts_with("Your portfolio is concentrated."));
        let data_prompt = &h.generator.calls_to("DataSpecialist")[0].prompt;
        assert!(data_prompt.contains("Symbols: VTI, AAPL"));
    }

    #[tokio::test]
    async fn test_choice_reply_does_not_overwrite_holdings() {
        let generator = approving().script("ReportAnalyst", &["Your portfolio is all VTI."]);
        let mut h = Harness::new(generator).await;
        h.profiles
            .save(&Profile {
                current_holdings: Some(vec![Holding::new("VTI", 10)]),
                ..Profile::named("Ada")
            })
            .await
            .unwrap();
        h.say("hi").await;
        h.say("Ada").await;
        h.say("B").await;

        let report = h.say("please analyze my 3 funds").await;

        assert!(report.response.starts_with("Your portfolio is all VTI."));
        let kept = vec![Holding::new("VTI", 10)];
        assert_eq!(h.state.get_as::<Vec<Holding>>(KEY_CURRENT_HOLDINGS), Some(kept.clone()));
        let stored = h.profiles.get("Ada").await.unwrap().unwrap();
        assert_eq!(stored.current_holdings, Some(kept));
        let data_prompt = &h.generator.calls_to("DataSpecialist")[0].prompt;
        assert!(data_prompt.contains("Symbols: VTI"));
        assert!(!data_prompt.contains("FUNDS"));
    }

    #[tokio::test]
    async fn test_labeled_changes_accepted_before_rebalance_choice() {
        let mut h = Harness::new(approving()).await;
        h.profiles
            .save(&Profile {
                risk_tolerance: Some("Aggressive".into()),
                current_holdings: Some(vec![Holding::new("VTI", 10)]),
                ..Profile::named("Ada")
            })
            .await
            .unwrap();
        h.say("hi").await;
        h.say("Ada").await;
        h.say("B").await;

        let updated = h.say("risk: conservative; horizon: 5 years").await;

        assert!(updated.applied);
        assert!(updated.response.contains("updated your profile"));
        assert_eq!(
            updated.phase,
            Some(Phase::AwaitingIntent {
                choice: IntentChoice::RebalanceOrAnalyze
            })
        );
        let stored = h.profiles.get("Ada").await.unwrap().unwrap();
        assert_eq!(stored.risk_tolerance.as_deref(), Some("Conservative"));
        assert_eq!(stored.time_horizon.as_deref(), Some("5 years"));
        assert_eq!(stored.current_holdings, Some(vec![Holding::new("VTI", 10)]));
        assert_eq!(h.state.get_str(KEY_RISK_TOLERANCE), Some("Conservative"));
    }

    #[tokio::test]
    async fn test_session_profile_used_when_store_has_none() {
        let mut h = Harness::new(approving()).await;
        h.state.apply(
            &Profile {
                risk_tolerance: Some("Moderate".into()),
                ..Profile::named("Ada")
            }
            .to_delta(),
        );

        h.say("hi").await;
        let result = h.say("ada").await;

        assert_eq!(result.phase, Some(Phase::ReturningUser));
        assert!(result.response.contains("Welcome back, Ada!"));
        assert!(result.response.contains("Risk tolerance: Moderate"));
        let stored = h.profiles.get("Ada").await.unwrap().unwrap();
        assert_eq!(stored.risk_tolerance.as_deref(), Some("Moderate"));
    }

    #[tokio::test]
    async fn test_session_profile_of_another_user_is_ignored() {
        let mut h = Harness::new(approving()).await;
        h.state.apply(
            &Profile {
                risk_tolerance: Some("Moderate".into()),
                ..Profile::named("Grace")
            }
            .to_delta(),
        );

        h.say("hi").await;
        let result = h.say("Ada").await;

        assert!(result.response.contains("Nice to meet you, Ada!"));
        assert!(h.profiles.get("Grace").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_holdings_applies_approved_allocation() {
        let quotes = FixedQuotes::new(&[("VTI", 250.0), ("BND", 75.0)]);
        let mut h = drive_to_feedback(Harness::priced(approving(), quotes).await).await;
        h.say("approve").await;

        let result = h.say("Please update my holdings").await;

        assert!(result.applied);
        assert!(result.response.contains("updated your holdings"));
        assert_eq!(
            result.phase,
            Some(Phase::AwaitingIntent {
                choice: IntentChoice::BuildOrAnalyze
            })
        );
        // $5,000: 60% buys 12 VTI at $250, 40% buys 26 BND at $75, $50 is left over.
        let expected = vec![
            Holding::new("VTI", 12).with_cost_basis(250.0),
            Holding::new("BND", 26).with_cost_basis(75.0),
            Holding::cash(50),
        ];
        let stored = h.profiles.get("Ada").await.unwrap().unwrap();
        assert_eq!(stored.current_holdings, Some(expected.clone()));
        assert_eq!(stored.risk_tolerance.as_deref(), Some("Moderate"));
        assert_eq!(h.state.get_as::<Vec<Holding>>(KEY_CURRENT_HOLDINGS), Some(expected));
        assert!(h.generator.calls_to("ReportAnalyst").is_empty());
    }

    #[tokio::test]
    async fn test_execute_after_declining_research() {
        let quotes = FixedQuotes::new(&[("VTI", 250.0), ("BND", 75.0)]);
        let mut h = drive_to_feedback(Harness::priced(approving(), quotes).await).await;
        h.say("approve").await;
        h.say("no thanks").await;

        let result = h.say("execute the strategy").await;

        assert!(result.applied);
        let holdings = h.state.get_as::<Vec<Holding>>(KEY_CURRENT_HOLDINGS).unwrap();
        assert_eq!(holdings[0], Holding::new("VTI", 12).with_cost_basis(250.0));
    }

    #[tokio::test]
    async fn test_update_holdings_without_approval_keeps_state() {
        let mut h = Harness::new(approving()).await;
        h.say("hi").await;
        h.say("Ada").await;
        let before = h.state.clone();

        let result = h.say("update my holdings").await;

        assert!(!result.applied);
        assert!(result.response.contains("no approved strategy"));
        assert_eq!(h.state, before);
    }

    #[tokio::test]
    async fn test_unpriced_allocation_keeps_state() {
        let mut h = at_feedback(approving()).await;
        h.say("approve").await;
        let before = h.state.clone();

        let result = h.say("update my holdings").await;

        assert!(!result.applied);
        assert!(result.response.contains("VTI"));
        assert_eq!(h.state, before);
    }
}
