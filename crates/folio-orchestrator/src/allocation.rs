//! Turns an approved percentage allocation into concrete holdings.
//!
//! ```text
//! value   = Σ shares × price          (cash priced at 1.0)
//! shares' = ⌊value × weight / price⌋  per target ticker
//! cash'   = value − Σ shares' × price
//! ```
//!
//! Prices come from live quotes when available, otherwise from the cost
//! basis already on file for that ticker.

use folio_core::profile::CASH_TICKER;
use folio_core::{FolioError, FolioResult, Holding};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static WEIGHT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\d+(?:\.\d+)?)\s*%\s*(?:(?:in|of|to)\s+)?([A-Z]{1,5})\b|\b([A-Z]{1,5})\s*[:\-]?\s*(\d+(?:\.\d+)?)\s*%",
    )
    .expect("valid weight pattern")
});

/// Slack for rounding in drafted percentages.
const WEIGHT_TOLERANCE: f64 = 0.5;

/// One target weight, in percent.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub ticker: String,
    pub percent: f64,
}

/// Extracts `60% VTI` or `VTI: 60%` pairs from a strategy text. The first
/// weight given for a ticker wins.
pub fn parse_allocation(strategy: &str) -> FolioResult<Vec<Target>> {
    let mut targets: Vec<Target> = Vec::new();
    for caps in WEIGHT_RE.captures_iter(strategy) {
        let pair = match (caps.get(1), caps.get(2), caps.get(3), caps.get(4)) {
            (Some(pct), Some(ticker), _, _) | (_, _, Some(ticker), Some(pct)) => (pct, ticker),
            _ => continue,
        };
        let Ok(percent) = pair.0.as_str().parse::<f64>() else {
            continue;
        };
        let ticker = pair.1.as_str().to_string();
        if percent > 0.0 && !targets.iter().any(|t| t.ticker == ticker) {
            targets.push(Target { ticker, percent });
        }
    }

    if targets.is_empty() {
        return Err(FolioError::MalformedInput(
            "I couldn't find ticker percentages (like '60% VTI') in the approved strategy.".into(),
        ));
    }
    let total: f64 = targets.iter().map(|t| t.percent).sum();
    if total > 100.0 + WEIGHT_TOLERANCE {
        return Err(FolioError::MalformedInput(format!(
            "The approved strategy allocates {total:.1}%, which is more than 100%."
        )));
    }
    Ok(targets)
}

fn price_of(ticker: &str, quotes: &HashMap<String, f64>, held: &[Holding]) -> Option<f64> {
    if ticker.eq_ignore_ascii_case(CASH_TICKER) {
        return Some(1.0);
    }
    quotes
        .get(ticker)
        .copied()
        .or_else(|| {
            held.iter()
                .find(|h| h.ticker.eq_ignore_ascii_case(ticker))
                .and_then(|h| h.cost_basis)
        })
        .filter(|p| p.is_finite() && *p > 0.0)
}

fn unpriced(tickers: Vec<String>) -> FolioError {
    FolioError::MalformedInput(format!(
        "I don't have a price for {}. Share it like '10 {} @ $250' and ask again.",
        tickers.join(", "),
        tickers.first().map(String::as_str).unwrap_or("VTI"),
    ))
}

/// Market value of `held`.
pub fn portfolio_value(held: &[Holding], quotes: &HashMap<String, f64>) -> FolioResult<f64> {
    let mut missing = Vec::new();
    let mut total = 0.0;
    for holding in held {
        match price_of(&holding.ticker, quotes, held) {
            Some(price) => total += holding.shares as f64 * price,
            None => missing.push(holding.ticker.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(unpriced(missing));
    }
    Ok(total)
}

/// The whole-share holdings that realize `targets` for the value of `held`.
/// Whatever cannot buy a whole share stays as cash.
pub fn rebalance(
    targets: &[Target],
    held: &[Holding],
    quotes: &HashMap<String, f64>,
) -> FolioResult<Vec<Holding>> {
    let value = portfolio_value(held, quotes)?;
    if value <= 0.0 {
        return Err(FolioError::MalformedInput(
            "Your holdings on file have no value to allocate yet. Share your holdings or cash first."
                .into(),
        ));
    }

    let missing: Vec<String> = targets
        .iter()
        .filter(|t| price_of(&t.ticker, quotes, held).is_none())
        .map(|t| t.ticker.clone())
        .collect();
    if !missing.is_empty() {
        return Err(unpriced(missing));
    }

    let mut spent = 0.0;
    let mut next = Vec::new();
    for target in targets {
        if target.ticker.eq_ignore_ascii_case(CASH_TICKER) {
            continue;
        }
        let Some(price) = price_of(&target.ticker, quotes, held) else {
            continue;
        };
        let shares = (value * target.percent / 100.0 / price).floor() as u64;
        if shares > 0 {
            spent += shares as f64 * price;
            next.push(Holding::new(target.ticker.as_str(), shares).with_cost_basis(price));
        }
    }

    let cash = (value - spent).floor();
    if cash >= 1.0 {
        next.push(Holding::cash(cash as u64));
    }
    Ok(next)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn quotes(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(t, p)| (t.to_string(), *p)).collect()
    }

    #[test]
    fn test_parse_allocation_both_orders() {
        let targets = parse_allocation("Allocate 70% VTI and 30% BND.").unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].ticker, "VTI");
        assert_eq!(targets[1].percent, 30.0);

        let targets = parse_allocation("VTI: 55%, VXUS - 25%, BND 20%").unwrap();
        let tickers: Vec<_> = targets.iter().map(|t| t.ticker.as_str()).collect();
        assert_eq!(tickers, ["VTI", "VXUS", "BND"]);
    }

    #[test]
    fn test_allocation_without_weights_is_malformed() {
        assert!(matches!(
            parse_allocation("Stay diversified and keep costs low."),
            Err(FolioError::MalformedInput(_))
        ));
        assert!(parse_allocation("80% VTI, 40% BND").is_err());
    }

    #[test]
    fn test_cash_rebalanced_into_whole_shares() {
        let targets = parse_allocation("60% VTI, 40% BND").unwrap();
        let held = [Holding::cash(10_000)];
        let next = rebalance(&targets, &held, &quotes(&[("VTI", 250.0), ("BND", 75.0)])).unwrap();

        assert_eq!(
            next,
            vec![
                Holding::new("VTI", 24).with_cost_basis(250.0),
                Holding::new("BND", 53).with_cost_basis(75.0),
                Holding::cash(25),
            ]
        );
    }

    #[test]
    fn test_cost_basis_prices_when_no_quote() {
        let targets = parse_allocation("50% VTI, 50% CASH").unwrap();
        let held = [Holding::new("VTI", 10).with_cost_basis(200.0)];
        let next = rebalance(&targets, &held, &HashMap::new()).unwrap();
        assert_eq!(
            next,
            vec![Holding::new("VTI", 5).with_cost_basis(200.0), Holding::cash(1_000)]
        );
    }

    #[test]
    fn test_unpriced_ticker_is_named() {
        let targets = parse_allocation("100% VXUS").unwrap();
        let err = rebalance(&targets, &[Holding::cash(500)], &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("VXUS"));
    }
}
