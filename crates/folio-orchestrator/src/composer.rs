//! Sequential, parallel and loop composition.
//!
//! Every composer is itself a [`Worker`], so they nest freely. None of them
//! mutate the caller's [`StateStore`]: each runs its members against a working
//! copy and returns the accumulated [`StateDelta`](folio_core::StateDelta).

use crate::worker::{LoopExit, Outcome, TurnContext, Worker};
use async_trait::async_trait;
use folio_core::{ControlSignal, FolioError, FolioResult, StateStore};
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs members in order; each sees the writes of the ones before it.
///
/// A member returning [`ControlSignal::Escalate`] stops the sequence and the
/// signal propagates to the caller. A member error aborts the sequence.
pub struct SequentialComposer {
    name: String,
    members: Vec<Arc<dyn Worker>>,
}

impl SequentialComposer {
    pub fn new(name: impl Into<String>, members: Vec<Arc<dyn Worker>>) -> Self {
        Self {
            name: name.into(),
            members,
        }
    }
}

#[async_trait]
impl Worker for SequentialComposer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TurnContext, state: &StateStore) -> FolioResult<Outcome> {
        let mut working = state.clone();
        let mut out = Outcome::new();

        for member in &self.members {
            debug!(sequence = %self.name, member = member.name(), "Running member");
            let step = member.run(ctx, &working).await?;
            working.apply(&step.delta);
            let escalated = step.signal.is_escalate();
            out.absorb(step);
            if escalated {
                debug!(sequence = %self.name, member = member.name(), "Member escalated");
                break;
            }
        }
        Ok(out)
    }
}

/// Runs members concurrently against one snapshot and merges their writes.
///
/// Members should write disjoint keys. When two do not, the later member in
/// declaration order wins and a warning is logged. Each member runs on its own
/// task, so a panic is contained like an error: a failing member is logged
/// and skipped, and the composer fails only if every member fails.
pub struct ParallelComposer {
    name: String,
    members: Vec<Arc<dyn Worker>>,
}

impl ParallelComposer {
    pub fn new(name: impl Into<String>, members: Vec<Arc<dyn Worker>>) -> Self {
        Self {
            name: name.into(),
            members,
        }
    }
}

#[async_trait]
impl Worker for ParallelComposer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TurnContext, state: &StateStore) -> FolioResult<Outcome> {
        let handles: Vec<_> = self
            .members
            .iter()
            .map(|member| {
                let member = Arc::clone(member);
                let ctx = ctx.clone();
                let snapshot = state.clone();
                tokio::spawn(async move { member.run(&ctx, &snapshot).await })
            })
            .collect();
        let results = join_all(handles).await;

        let mut out = Outcome::new();
        let mut first_error: Option<FolioError> = None;
        let mut succeeded = 0usize;
        let mut escalated = false;
        let mut revision: Option<ControlSignal> = None;

        for (member, joined) in self.members.iter().zip(results) {
            let result = joined.unwrap_or_else(|e| {
                Err(FolioError::Worker(format!("{} task failed: {e}", member.name())))
            });
            match result {
                Ok(branch) => {
                    let overlap = out.delta.overlapping_keys(&branch.delta);
                    if !overlap.is_empty() {
                        warn!(
                            parallel = %self.name,
                            member = member.name(),
                            keys = ?overlap,
                            "Parallel members wrote the same keys; later member wins"
                        );
                    }
                    match &branch.signal {
                        ControlSignal::Escalate => escalated = true,
                        ControlSignal::RequestRevision(_) if revision.is_none() => {
                            revision = Some(branch.signal.clone());
                        }
                        _ => {}
                    }
                    out.transcript.extend(branch.transcript);
                    out.delta.merge(branch.delta);
                    succeeded += 1;
                }
                Err(e) => {
                    warn!(parallel = %self.name, member = member.name(), error = %e, "Parallel member failed");
                    out.push(member.name(), format!("{} could not complete: {e}", member.name()));
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if succeeded == 0 {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        out.signal = if escalated {
            ControlSignal::Escalate
        } else {
            revision.unwrap_or_default()
        };
        Ok(out)
    }
}

/// Re-runs an inner worker until it escalates, an optional completion flag is
/// set, or `max_iterations` passes have run.
///
/// Escalation is consumed here: the loop itself reports
/// [`ControlSignal::Continue`] and records why it stopped in
/// [`Outcome::loop_exit`]. Hitting the ceiling is a normal exit, not an error.
pub struct LoopComposer {
    name: String,
    inner: Arc<dyn Worker>,
    max_iterations: u32,
    completion_key: Option<String>,
    result_key: Option<String>,
}

impl LoopComposer {
    pub fn new(name: impl Into<String>, inner: Arc<dyn Worker>, max_iterations: u32) -> Self {
        Self {
            name: name.into(),
            inner,
            max_iterations,
            completion_key: None,
            result_key: None,
        }
    }

    /// Also stop once `key` reads as `true` after a pass.
    pub fn with_completion_key(mut self, key: impl Into<String>) -> Self {
        self.completion_key = Some(key.into());
        self
    }

    /// On the ceiling, surface the value under `key` as the loop's final text.
    pub fn with_result_key(mut self, key: impl Into<String>) -> Self {
        self.result_key = Some(key.into());
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }
}

#[async_trait]
impl Worker for LoopComposer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TurnContext, state: &StateStore) -> FolioResult<Outcome> {
        let mut working = state.clone();
        let mut out = Outcome::new();
        let mut exit = LoopExit::Ceiling {
            iterations: self.max_iterations,
        };

        for iteration in 1..=self.max_iterations {
            debug!(loop_name = %self.name, iteration, "Loop pass");
            let pass = self.inner.run(ctx, &working).await?;
            working.apply(&pass.delta);
            let escalated = pass.signal.is_escalate();
            out.transcript.extend(pass.transcript);
            out.delta.merge(pass.delta);

            if escalated {
                exit = LoopExit::Escalated { iteration };
                break;
            }
            if let Some(key) = &self.completion_key {
                if working.get_bool(key) == Some(true) {
                    exit = LoopExit::Completed { iteration };
                    break;
                }
            }
        }

        if exit.is_ceiling() {
            warn!(
                loop_name = %self.name,
                max_iterations = self.max_iterations,
                "Loop reached its iteration ceiling"
            );
            if let Some(text) = self.result_key.as_deref().and_then(|k| working.get_str(k)) {
                out.push(self.name.as_str(), text);
            }
        } else {
            info!(loop_name = %self.name, exit = ?exit, "Loop finished");
        }

        out.signal = ControlSignal::Continue;
        out.loop_exit = Some(exit);
        Ok(out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use folio_core::StateDelta;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    fn ctx() -> TurnContext {
        TurnContext::new("folio", "tester", "s1", "")
    }

    /// Increments `counter` in state and reports the value it wrote.
    struct Counter {
        name: String,
        escalate_at: Option<i64>,
        calls: AtomicU32,
    }

    impl Counter {
        fn new(name: &str, escalate_at: Option<i64>) -> Self {
            Self {
                name: name.to_string(),
                escalate_at,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Worker for Counter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run(&self, _ctx: &TurnContext, state: &StateStore) -> FolioResult<Outcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = state.get_as::<i64>("counter").unwrap_or(0) + 1;
            let signal = if Some(next) == self.escalate_at {
                ControlSignal::Escalate
            } else {
                ControlSignal::Continue
            };
            Ok(Outcome::say(&self.name, format!("count {next}"))
                .with_delta(StateDelta::new().set("counter", next))
                .with_signal(signal))
        }
    }

    struct Writer {
        name: &'static str,
        key: &'static str,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl Worker for Writer {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, _ctx: &TurnContext, _state: &StateStore) -> FolioResult<Outcome> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(FolioError::Worker(format!("{} broke", self.name)));
            }
            Ok(Outcome::say(self.name, "done").with_delta(StateDelta::new().set(self.key, self.name)))
        }
    }

    fn writer(name: &'static str, key: &'static str, ms: u64, fail: bool) -> Arc<dyn Worker> {
        Arc::new(Writer {
            name,
            key,
            delay: Duration::from_millis(ms),
            fail,
        })
    }

    #[tokio::test]
    async fn test_sequence_members_see_prior_writes() {
        let seq = SequentialComposer::new(
            "seq",
            vec![
                Arc::new(Counter::new("a", None)),
                Arc::new(Counter::new("b", None)),
                Arc::new(Counter::new("c", None)),
            ],
        );
        let state = StateStore::new();
        let out = seq.run(&ctx(), &state).await.unwrap();

        let mut after = state.clone();
        after.apply(&out.delta);
        assert_eq!(after.get_as::<i64>("counter"), Some(3));
        assert_eq!(out.final_text(), Some("count 3"));
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_sequence_stops_on_escalate() {
        let last = Arc::new(Counter::new("c", None));
        let seq = SequentialComposer::new(
            "seq",
            vec![
                Arc::new(Counter::new("a", None)),
                Arc::new(Counter::new("b", Some(2))),
                last.clone(),
            ],
        );
        let out = seq.run(&ctx(), &StateStore::new()).await.unwrap();
        assert!(out.signal.is_escalate());
        assert_eq!(last.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sequence_error_aborts() {
        let seq = SequentialComposer::new(
            "seq",
            vec![writer("boom", "x", 0, true), writer("after", "y", 0, false)],
        );
        assert!(seq.run(&ctx(), &StateStore::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_parallel_disjoint_writes_and_latency() {
        let par = ParallelComposer::new(
            "par",
            vec![
                writer("news", "market_news", 200, false),
                writer("data", "market_data", 200, false),
            ],
        );
        let started = Instant::now();
        let out = par.run(&ctx(), &StateStore::new()).await.unwrap();
        let elapsed = started.elapsed();

        let mut state = StateStore::new();
        state.apply(&out.delta);
        assert_eq!(state.get_str("market_news"), Some("news"));
        assert_eq!(state.get_str("market_data"), Some("data"));
        assert!(elapsed < Duration::from_millis(350), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_parallel_overlap_later_member_wins() {
        let par = ParallelComposer::new(
            "par",
            vec![writer("first", "shared", 20, false), writer("second", "shared", 0, false)],
        );
        let out = par.run(&ctx(), &StateStore::new()).await.unwrap();
        let mut state = StateStore::new();
        state.apply(&out.delta);
        assert_eq!(state.get_str("shared"), Some("second"));
    }

    #[tokio::test]
    async fn test_parallel_tolerates_partial_failure() {
        let par = ParallelComposer::new(
            "par",
            vec![writer("news", "market_news", 0, true), writer("data", "market_data", 0, false)],
        );
        let out = par.run(&ctx(), &StateStore::new()).await.unwrap();
        let mut state = StateStore::new();
        state.apply(&out.delta);
        assert!(!state.contains("market_news"));
        assert_eq!(state.get_str("market_data"), Some("data"));
        assert!(out.transcript.iter().any(|u| u.text.contains("news could not complete")));
    }

    struct Panicker;

    #[async_trait]
    impl Worker for Panicker {
        fn name(&self) -> &str {
            "news"
        }

        async fn run(&self, _ctx: &TurnContext, _state: &StateStore) -> FolioResult<Outcome> {
            panic!("feed exploded");
        }
    }

    #[tokio::test]
    async fn test_parallel_panic_is_contained() {
        let par = ParallelComposer::new(
            "par",
            vec![
                Arc::new(Panicker) as Arc<dyn Worker>,
                writer("data", "market_data", 10, false),
            ],
        );
        let out = par.run(&ctx(), &StateStore::new()).await.unwrap();

        let mut state = StateStore::new();
        state.apply(&out.delta);
        assert_eq!(state.get_str("market_data"), Some("data"));
        assert!(out.transcript.iter().any(|u| u.text.contains("news could not complete")));
    }

    #[tokio::test]
    async fn test_parallel_all_failed_is_error() {
        let par = ParallelComposer::new(
            "par",
            vec![writer("a", "x", 0, true), writer("b", "y", 0, true)],
        );
        let err = par.run(&ctx(), &StateStore::new()).await.unwrap_err();
        assert!(err.to_string().contains("a broke"));
    }

    #[tokio::test]
    async fn test_loop_escalation_ends_on_that_pass() {
        let inner = Arc::new(Counter::new("inner", Some(3)));
        let looped = LoopComposer::new("loop", inner.clone(), 5);
        let out = looped.run(&ctx(), &StateStore::new()).await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(out.loop_exit, Some(LoopExit::Escalated { iteration: 3 }));
        assert_eq!(out.signal, ControlSignal::Continue);
    }

    #[tokio::test]
    async fn test_loop_ceiling_runs_exactly_max_passes() {
        let inner = Arc::new(Counter::new("inner", None));
        let looped = LoopComposer::new("loop", inner.clone(), 5);
        let out = looped.run(&ctx(), &StateStore::new()).await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 5);
        assert_eq!(out.loop_exit, Some(LoopExit::Ceiling { iterations: 5 }));
        let mut state = StateStore::new();
        state.apply(&out.delta);
        assert_eq!(state.get_as::<i64>("counter"), Some(5));
    }

    #[tokio::test]
    async fn test_loop_completion_key() {
        struct Finisher;

        #[async_trait]
        impl Worker for Finisher {
            fn name(&self) -> &str {
                "finisher"
            }

            async fn run(&self, _ctx: &TurnContext, _state: &StateStore) -> FolioResult<Outcome> {
                Ok(Outcome::new().with_delta(StateDelta::new().set("loop_complete", "true")))
            }
        }

        let looped = LoopComposer::new("loop", Arc::new(Finisher), 5).with_completion_key("loop_complete");
        let out = looped.run(&ctx(), &StateStore::new()).await.unwrap();
        assert_eq!(out.loop_exit, Some(LoopExit::Completed { iteration: 1 }));
    }

    #[tokio::test]
    async fn test_loop_ceiling_surfaces_result_key() {
        struct Drafter;

        #[async_trait]
        impl Worker for Drafter {
            fn name(&self) -> &str {
                "drafter"
            }

            async fn run(&self, _ctx: &TurnContext, state: &StateStore) -> FolioResult<Outcome> {
                let n = state.get_as::<i64>("n").unwrap_or(0) + 1;
                Ok(Outcome::say("drafter", "")
                    .with_delta(StateDelta::new().set("n", n).set("draft", format!("draft {n}"))))
            }
        }

        let looped = LoopComposer::new("loop", Arc::new(Drafter), 2).with_result_key("draft");
        let out = looped.run(&ctx(), &StateStore::new()).await.unwrap();
        assert_eq!(out.final_text(), Some("draft 2"));
    }
}
