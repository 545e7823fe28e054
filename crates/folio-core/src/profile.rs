use crate::state::{StateDelta, StateStore};
use serde::{Deserialize, Serialize};

/// State key holding the client's name.
pub const KEY_USER_NAME: &str = "user_name";
/// State key holding the client's risk tolerance.
pub const KEY_RISK_TOLERANCE: &str = "user_risk_tolerance";
/// State key holding the client's time horizon.
pub const KEY_TIME_HORIZON: &str = "user_time_horizon";
/// State key holding the client's investment goals.
pub const KEY_INVESTMENT_GOALS: &str = "user_investment_goals";
/// State key holding the client's holdings as a JSON list.
pub const KEY_CURRENT_HOLDINGS: &str = "user_current_holdings";

/// Ticker used for uninvested cash. `shares` counts whole dollars.
pub const CASH_TICKER: &str = "CASH";

/// A single position in a portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub ticker: String,
    pub shares: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_basis: Option<f64>,
}

impl Holding {
    pub fn new(ticker: impl Into<String>, shares: u64) -> Self {
        Self {
            ticker: ticker.into(),
            shares,
            cost_basis: None,
        }
    }

    pub fn with_cost_basis(mut self, cost_basis: f64) -> Self {
        self.cost_basis = Some(cost_basis);
        self
    }

    /// A cash position of `dollars`.
    pub fn cash(dollars: u64) -> Self {
        Self::new(CASH_TICKER, dollars).with_cost_basis(1.0)
    }

    pub fn is_cash(&self) -> bool {
        self.ticker == CASH_TICKER
    }
}

/// A named, partially-specified client record.
///
/// Every field is optional. Saving a profile merges it into the stored one, so
/// an update that leaves a field unset never erases a stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_tolerance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_horizon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investment_goals: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_holdings: Option<Vec<Holding>>,
}

impl Profile {
    /// A profile carrying only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Copies every field set in `update` over `self`.
    pub fn merge_from(&mut self, update: &Profile) {
        if update.name.is_some() {
            self.name.clone_from(&update.name);
        }
        if update.risk_tolerance.is_some() {
            self.risk_tolerance.clone_from(&update.risk_tolerance);
        }
        if update.time_horizon.is_some() {
            self.time_horizon.clone_from(&update.time_horizon);
        }
        if update.investment_goals.is_some() {
            self.investment_goals.clone_from(&update.investment_goals);
        }
        if update.current_holdings.is_some() {
            self.current_holdings.clone_from(&update.current_holdings);
        }
    }

    /// Whether risk, horizon, goals and holdings are all known.
    pub fn is_complete(&self) -> bool {
        self.risk_tolerance.is_some()
            && self.time_horizon.is_some()
            && self.investment_goals.is_some()
            && self.current_holdings.as_ref().is_some_and(|h| !h.is_empty())
    }

    /// Whether the holdings include at least one non-cash position.
    pub fn has_securities(&self) -> bool {
        self.current_holdings
            .as_ref()
            .is_some_and(|h| h.iter().any(|x| !x.is_cash()))
    }

    /// Reads the profile fields mirrored in session state.
    pub fn from_state(state: &StateStore) -> Self {
        Self {
            name: state.get_str(KEY_USER_NAME).map(str::to_string),
            risk_tolerance: state.get_str(KEY_RISK_TOLERANCE).map(str::to_string),
            time_horizon: state.get_str(KEY_TIME_HORIZON).map(str::to_string),
            investment_goals: state.get_str(KEY_INVESTMENT_GOALS).map(str::to_string),
            current_holdings: state.get_as(KEY_CURRENT_HOLDINGS),
        }
    }

    /// Writes for every field that is set; unset fields are left alone.
    pub fn to_delta(&self) -> StateDelta {
        let mut delta = StateDelta::new();
        if let Some(v) = &self.name {
            delta = delta.set(KEY_USER_NAME, v.as_str());
        }
        if let Some(v) = &self.risk_tolerance {
            delta = delta.set(KEY_RISK_TOLERANCE, v.as_str());
        }
        if let Some(v) = &self.time_horizon {
            delta = delta.set(KEY_TIME_HORIZON, v.as_str());
        }
        if let Some(v) = &self.investment_goals {
            delta = delta.set(KEY_INVESTMENT_GOALS, v.as_str());
        }
        if let Some(v) = &self.current_holdings {
            delta = delta.set(
                KEY_CURRENT_HOLDINGS,
                serde_json::to_value(v).unwrap_or_default(),
            );
        }
        delta
    }

    /// One-line-per-field summary for display.
    pub fn summary(&self) -> String {
        let holdings = match &self.current_holdings {
            Some(h) if !h.is_empty() => h
                .iter()
                .map(|x| match x.cost_basis {
                    Some(c) if !x.is_cash() => format!("{} {} @ ${c:.2}", x.shares, x.ticker),
                    _ if x.is_cash() => format!("${} cash", x.shares),
                    _ => format!("{} {}", x.shares, x.ticker),
                })
                .collect::<Vec<_>>()
                .join(", "),
            _ => "none on file".to_string(),
        };
        format!(
            "Risk tolerance: {}\nTime horizon: {}\nInvestment goals: {}\nHoldings: {}",
            self.risk_tolerance.as_deref().unwrap_or("not set"),
            self.time_horizon.as_deref().unwrap_or("not set"),
            self.investment_goals.as_deref().unwrap_or("not set"),
            holdings
        )
    }
}
