//! The refine/critique loop over `proposed_strategy`.
//!
//! One pass is `[Refiner, Critic]`. The critic leaves either the approval
//! token or `"rejected: <reason>"` under `critique`; on the next pass the
//! refiner escalates on approval, revises on rejection or pending user
//! feedback, and otherwise just forwards the draft for review.

use crate::composer::{LoopComposer, SequentialComposer};
use crate::keys;
use crate::worker::{Capability, Outcome, TurnContext, Worker};
use async_trait::async_trait;
use folio_core::{
    ControlSignal, FolioError, FolioResult, GenerationRequest, Profile, StateDelta, StateStore,
    TextGenerator,
};
use std::sync::Arc;
use tracing::debug;

/// Critique value meaning the strategy passed review.
pub const APPROVAL_TOKEN: &str = "approved";
/// Prefix of every critique that asks for a revision.
pub const REJECTION_PREFIX: &str = "rejected";

const REFINER_INSTRUCTION: &str = "You are a portfolio strategist. Revise the proposed \
    investment strategy so it addresses every point of the critique and the client's \
    feedback while staying consistent with the client profile. Reply with the full revised \
    strategy only.";

const CRITIC_INSTRUCTION: &str = "You are a risk reviewer. Check the proposed strategy \
    against the client's risk tolerance, time horizon and goals. Reply with exactly \
    'approved' if it is suitable, otherwise 'rejected: <reason>'.";

pub fn is_approval(critique: &str) -> bool {
    critique.trim().eq_ignore_ascii_case(APPROVAL_TOKEN)
}

pub fn is_rejection(critique: &str) -> bool {
    critique
        .trim()
        .to_ascii_lowercase()
        .starts_with(REJECTION_PREFIX)
}

/// Formats a rejection critique.
pub fn rejection(reason: &str) -> String {
    format!("{REJECTION_PREFIX}: {}", reason.trim())
}

/// Reduces free-form reviewer output to the approval token or a rejection.
///
/// Anything that is not clearly an approval is treated as a rejection.
pub fn normalize_verdict(raw: &str) -> String {
    let text = raw.trim().trim_matches(|c: char| c == '*' || c == '"' || c == '\'');
    let lower = text.to_ascii_lowercase();

    if lower.starts_with(REJECTION_PREFIX) {
        let reason = text[REJECTION_PREFIX.len()..]
            .trim_start_matches(|c: char| c == ':' || c == '-' || c == '.' || c.is_whitespace());
        if reason.is_empty() {
            return rejection("no reason given");
        }
        return rejection(reason);
    }
    if lower.starts_with(APPROVAL_TOKEN) {
        return APPROVAL_TOKEN.to_string();
    }
    if text.is_empty() {
        return rejection("reviewer returned no verdict");
    }
    rejection(text)
}

/// Revises `proposed_strategy` from the critique and any user feedback, or
/// escalates once the critique is the approval token.
pub struct RefinerWorker {
    name: String,
    generator: Arc<dyn TextGenerator>,
}

impl RefinerWorker {
    pub fn new(name: impl Into<String>, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            name: name.into(),
            generator,
        }
    }
}

#[async_trait]
impl Worker for RefinerWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &TurnContext, state: &StateStore) -> FolioResult<Outcome> {
        let proposal = state.get_str(keys::PROPOSED_STRATEGY).unwrap_or_default();
        let critique = state.get_str(keys::CRITIQUE).unwrap_or_default().trim();
        let feedback = state
            .get_str(keys::USER_FEEDBACK)
            .map(str::trim)
            .filter(|f| !f.is_empty());

        if feedback.is_none() && is_approval(critique) {
            debug!(worker = %self.name, "Strategy approved, escalating");
            return Ok(Outcome::say(self.name.as_str(), proposal)
                .with_delta(StateDelta::new().set(keys::LOOP_COMPLETE, true))
                .with_signal(ControlSignal::Escalate));
        }

        if feedback.is_none() && !is_rejection(critique) {
            return Ok(Outcome::say(
                self.name.as_str(),
                "Sending the strategy for risk review.",
            ));
        }

        let profile = Profile::from_state(state);
        let mut prompt = format!(
            "Client profile:\n{}\n\nCurrent strategy:\n{}\n",
            profile.summary(),
            if proposal.is_empty() { "(none yet)" } else { proposal }
        );
        if is_rejection(critique) {
            prompt.push_str(&format!("\nRisk review: {critique}\n"));
        }
        if let Some(feedback) = feedback {
            prompt.push_str(&format!("\nClient feedback: {feedback}\n"));
        }

        let request = GenerationRequest::new(self.name.as_str(), REFINER_INSTRUCTION, prompt);
        let revised = self
            .generator
            .generate(&request)
            .await
            .map_err(|e| FolioError::Worker(format!("{}: {e}", self.name)))?;

        let delta = StateDelta::new()
            .set(keys::PROPOSED_STRATEGY, revised.trim())
            .set(keys::LOOP_COMPLETE, false)
            .remove(keys::CRITIQUE)
            .remove(keys::USER_FEEDBACK);
        Ok(Outcome::say(
            self.name.as_str(),
            "Revised the strategy and sent it back for risk review.",
        )
        .with_delta(delta))
    }
}

/// Reviews `proposed_strategy` and writes a normalized verdict to `critique`.
pub struct CriticWorker {
    name: String,
    generator: Arc<dyn TextGenerator>,
    capability: Capability,
}

impl CriticWorker {
    pub fn new(
        name: impl Into<String>,
        generator: Arc<dyn TextGenerator>,
        capability: Capability,
    ) -> Self {
        Self {
            name: name.into(),
            generator,
            capability,
        }
    }
}

#[async_trait]
impl Worker for CriticWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &TurnContext, state: &StateStore) -> FolioResult<Outcome> {
        let Some(proposal) = state
            .get_str(keys::PROPOSED_STRATEGY)
            .filter(|p| !p.trim().is_empty())
        else {
            let critique = rejection("no strategy has been drafted yet");
            return Ok(Outcome::say(self.name.as_str(), critique.as_str())
                .with_delta(StateDelta::new().set(keys::CRITIQUE, critique.as_str()))
                .with_signal(ControlSignal::RequestRevision(critique)));
        };

        let profile = Profile::from_state(state);
        let query = format!(
            "{} risk portfolio allocation outlook",
            profile.risk_tolerance.as_deref().unwrap_or("moderate")
        );
        let research = self.capability.gather(&query, &[]).await;

        let mut prompt = format!(
            "Client profile:\n{}\n\nProposed strategy:\n{proposal}\n",
            profile.summary()
        );
        if !research.is_empty() {
            prompt.push_str(&format!("\n{research}\n"));
        }

        let request = GenerationRequest::new(self.name.as_str(), CRITIC_INSTRUCTION, prompt);
        let verdict = self
            .generator
            .generate(&request)
            .await
            .map_err(|e| FolioError::Worker(format!("{}: {e}", self.name)))?;
        let critique = normalize_verdict(&verdict);
        debug!(worker = %self.name, critique = %critique, "Risk review complete");

        let signal = if is_approval(&critique) {
            ControlSignal::Continue
        } else {
            ControlSignal::RequestRevision(critique.clone())
        };
        Ok(Outcome::say(self.name.as_str(), critique.as_str())
            .with_delta(StateDelta::new().set(keys::CRITIQUE, critique.as_str()))
            .with_signal(signal))
    }
}

/// Builds a `[Refiner, Critic]` loop. `suffix` keeps worker names unique when
/// the loop is built more than once.
pub fn refinement_loop(
    suffix: &str,
    generator: Arc<dyn TextGenerator>,
    search: Capability,
    max_iterations: u32,
) -> LoopComposer {
    let refiner: Arc<dyn Worker> = Arc::new(RefinerWorker::new(
        format!("Refiner_{suffix}"),
        generator.clone(),
    ));
    let critic: Arc<dyn Worker> = Arc::new(CriticWorker::new(
        format!("RiskCritic_{suffix}"),
        generator,
        search,
    ));
    let pass = SequentialComposer::new(format!("RefinementPass_{suffix}"), vec![refiner, critic]);
    LoopComposer::new(format!("RefinementLoop_{suffix}"), Arc::new(pass), max_iterations)
        .with_result_key(keys::PROPOSED_STRATEGY)
}
