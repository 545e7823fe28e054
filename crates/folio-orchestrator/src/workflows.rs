//! The composed workflow graph the router dispatches into.
//!
//! ```text
//! strategy_development = Sequential[StrategyDrafter, RefinementLoop_internal]
//! standalone_refinement = RefinementLoop_standalone
//! research_team         = Parallel[NewsSpecialist, DataSpecialist]
//! deep_dive             = Sequential[research_team, ReportAnalyst]
//! ```

use crate::composer::{ParallelComposer, SequentialComposer};
use crate::refinement::refinement_loop;
use crate::worker::{Capability, Worker};
use crate::workers::{DataSpecialist, InitialStrategyWorker, NewsSpecialist, ReportAnalyst};
use folio_core::{MarketDataProvider, SearchProvider, TextGenerator};
use std::sync::Arc;

/// Default refinement ceiling. A soft bound: reaching it surfaces the last
/// draft instead of failing.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Top-level workflows, built once at startup and shared across turns.
#[derive(Clone)]
pub struct Workflows {
    pub strategy_development: Arc<dyn Worker>,
    pub standalone_refinement: Arc<dyn Worker>,
    pub deep_dive: Arc<dyn Worker>,
    /// Quotes used to price holdings when an approved strategy is executed.
    pub market_data: Capability,
}

impl Workflows {
    pub fn builder(generator: Arc<dyn TextGenerator>) -> WorkflowsBuilder {
        WorkflowsBuilder {
            generator,
            search: Capability::None,
            market_data: Capability::None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

pub struct WorkflowsBuilder {
    generator: Arc<dyn TextGenerator>,
    search: Capability,
    market_data: Capability,
    max_iterations: u32,
}

impl WorkflowsBuilder {
    pub fn search(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.search = Capability::Search(provider);
        self
    }

    pub fn market_data(mut self, provider: Arc<dyn MarketDataProvider>) -> Self {
        self.market_data = Capability::MarketData(provider);
        self
    }

    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn build(self) -> Workflows {
        let g = self.generator;

        // Two independent loop instances so worker names stay unique.
        let internal = refinement_loop("internal", g.clone(), self.search.clone(), self.max_iterations);
        let standalone =
            refinement_loop("standalone", g.clone(), self.search.clone(), self.max_iterations);

        let strategy_development = SequentialComposer::new(
            "StrategyDevelopment",
            vec![
                Arc::new(InitialStrategyWorker::new(g.clone())) as Arc<dyn Worker>,
                Arc::new(internal),
            ],
        );

        let research_team = ParallelComposer::new(
            "ResearchTeam",
            vec![
                Arc::new(NewsSpecialist::new(g.clone(), self.search)) as Arc<dyn Worker>,
                Arc::new(DataSpecialist::new(g.clone(), self.market_data.clone())),
            ],
        );
        let deep_dive = SequentialComposer::new(
            "DeepDive",
            vec![
                Arc::new(research_team) as Arc<dyn Worker>,
                Arc::new(ReportAnalyst::new(g)),
            ],
        );

        Workflows {
            strategy_development: Arc::new(strategy_development),
            standalone_refinement: Arc::new(standalone),
            deep_dive: Arc::new(deep_dive),
            market_data: self.market_data,
        }
    }
}
