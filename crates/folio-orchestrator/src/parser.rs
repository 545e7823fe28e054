//! Free-text holdings parsing.
//!
//! Accepted forms, case-insensitive and separated by anything:
//!
//! ```text
//! 10 VTI
//! 10 shares of VTI
//! 10 VTI @ 250
//! 10 VTI at $250.50
//! ```
//!
//! A cash-only answer (`"$5,000"`, `"5000 in cash"`) becomes a single
//! [`CASH_TICKER`](folio_core::profile::CASH_TICKER) holding with
//! `shares` = dollars and a cost basis of 1.0.

use folio_core::{FolioError, FolioResult, Holding};
use regex::Regex;
use std::sync::LazyLock;

/// Returned when no holding can be extracted.
pub const NO_HOLDINGS_MESSAGE: &str =
    "No valid holdings found. Format example: '10 VTI @ $200, 5 AAPL'";

#[allow(clippy::expect_used)]
static HOLDING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s+(?:shares\s+of\s+)?([A-Za-z]+)(?:\s*(?:@|at)\s*\$?([\d,.]+))?")
        .expect("valid holding pattern")
});

#[allow(clippy::expect_used)]
static AMOUNT_ONLY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*\$?\s*([\d,]+(?:\.\d+)?)\s*(?:k\b)?\s*(?:dollars|usd)?\s*(?:(?:in\s+)?cash)?\s*\.?\s*$")
        .expect("valid amount pattern")
});

#[allow(clippy::expect_used)]
static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$\s*([\d,]+(?:\.\d+)?)\s*(k\b)?|([\d,]+(?:\.\d+)?)\s*(k\b)?\s*(?:dollars|usd|in\s+cash|cash)")
        .expect("valid amount pattern")
});

/// Extracts every `quantity ticker [@ cost]` triple from `text`.
pub fn parse_holdings(text: &str) -> FolioResult<Vec<Holding>> {
    let mut holdings = Vec::new();
    for caps in HOLDING_RE.captures_iter(text) {
        let (Some(qty), Some(ticker)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let Ok(shares) = qty.as_str().parse::<u64>() else {
            continue;
        };
        let mut holding = Holding::new(ticker.as_str().to_uppercase(), shares);
        if let Some(cost) = caps.get(3) {
            if let Ok(cost) = cost.as_str().replace(',', "").parse::<f64>() {
                holding = holding.with_cost_basis(cost);
            }
        }
        holdings.push(holding);
    }

    if holdings.is_empty() {
        return Err(FolioError::MalformedInput(NO_HOLDINGS_MESSAGE.to_string()));
    }
    Ok(holdings)
}

fn dollars(number: &str, thousands: bool) -> Option<u64> {
    let value = number.replace(',', "").parse::<f64>().ok()?;
    let value = if thousands { value * 1000.0 } else { value };
    if value.is_finite() && value >= 0.0 {
        Some(value.round() as u64)
    } else {
        None
    }
}

/// Recognizes a cash-only answer and returns the dollar amount.
///
/// Either the whole text is an amount (`"$5,000"`, `"10k cash"`), or it talks
/// about cash or starting from scratch and names a dollar figure without any
/// share quantities.
pub fn parse_cash(text: &str) -> Option<u64> {
    if let Some(caps) = AMOUNT_ONLY_RE.captures(text) {
        let thousands = text.to_lowercase().contains('k');
        return dollars(caps.get(1)?.as_str(), thousands);
    }

    let lower = text.to_lowercase();
    let mentions_cash = lower.contains("cash") || lower.contains("scratch") || lower.contains('$');
    let mentions_positions = lower.contains("share") || lower.contains('@') || lower.contains(" at ");
    if !mentions_cash || mentions_positions {
        return None;
    }
    let caps = AMOUNT_RE.captures(text)?;
    match (caps.get(1), caps.get(3)) {
        (Some(n), _) => dollars(n.as_str(), caps.get(2).is_some()),
        (None, Some(n)) => dollars(n.as_str(), caps.get(4).is_some()),
        _ => None,
    }
}

/// Parses a holdings answer: cash first, then positions.
pub fn parse_portfolio(text: &str) -> FolioResult<Vec<Holding>> {
    if let Some(amount) = parse_cash(text) {
        return Ok(vec![Holding::cash(amount)]);
    }
    parse_holdings(text)
}
