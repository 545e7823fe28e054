//! State keys shared by the workers and the router.
//!
//! Profile keys (`user_name`, `user_risk_tolerance`, ...) live in
//! [`folio_core::profile`].

/// Current conversation phase, serialized [`Phase`](crate::Phase).
pub const PHASE: &str = "phase";
/// Profile field the router asked about last.
pub const AWAITING_FIELD: &str = "awaiting_field";
/// `"build"` or `"rebalance"`.
pub const WORKFLOW_MODE: &str = "workflow_mode";

pub const PROPOSED_STRATEGY: &str = "proposed_strategy";
pub const APPROVED_STRATEGY: &str = "approved_strategy";
/// Either the approval token or `"rejected: <reason>"`.
pub const CRITIQUE: &str = "critique";
pub const USER_FEEDBACK: &str = "user_feedback";
pub const LOOP_COMPLETE: &str = "loop_complete";

pub const MARKET_NEWS: &str = "market_news";
pub const MARKET_DATA: &str = "market_data";
pub const REPORT: &str = "report";
