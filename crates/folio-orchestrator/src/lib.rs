//! Workflow orchestration for Folio.
//!
//! Workers implement one contract, [`Worker::run`], which reads a
//! [`StateStore`](folio_core::StateStore) and returns an [`Outcome`] with the
//! writes it wants applied and a [`ControlSignal`](folio_core::ControlSignal).
//! Composers are workers too, so the workflow graph is built by nesting:
//!
//! - [`SequentialComposer`] runs members in order and stops on escalation.
//! - [`ParallelComposer`] fans out over one snapshot and merges the writes.
//! - [`LoopComposer`] repeats until escalation or its iteration ceiling.
//!
//! [`Router`] is the conversation state machine on top, and [`Copilot`] wires
//! it to session persistence and long-term memory.

/// Approved-allocation to holdings arithmetic.
pub mod allocation;
/// Sequential, parallel and loop composers.
pub mod composer;
/// The turn engine that persists sessions and feeds memory.
pub mod engine;
/// Reply classifiers used by the router.
pub mod intake;
pub mod keys;
/// Holdings and cash parsing.
pub mod parser;
pub mod refinement;
pub mod router;
pub mod worker;
/// Strategy and research workers.
pub mod workers;
pub mod workflows;

#[cfg(test)]
mod testing;

pub use allocation::{parse_allocation, rebalance, Target};
pub use composer::{LoopComposer, ParallelComposer, SequentialComposer};
pub use engine::{Copilot, TurnReply};
pub use parser::{parse_holdings, parse_portfolio, NO_HOLDINGS_MESSAGE};
pub use refinement::{refinement_loop, CriticWorker, RefinerWorker, APPROVAL_TOKEN, REJECTION_PREFIX};
pub use router::{IntentChoice, Phase, Router, TurnResult, ROUTER_NAME};
pub use worker::{Capability, LoopExit, Outcome, TurnContext, Utterance, Worker};
pub use workflows::{Workflows, WorkflowsBuilder, DEFAULT_MAX_ITERATIONS};
