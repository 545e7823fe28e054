use async_trait::async_trait;
use folio_core::{FolioError, FolioResult, MarketDataProvider, Quote};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Default public chart endpoint.
pub const DEFAULT_MARKET_DATA_URL: &str = "https://query1.finance.yahoo.com";

/// Quotes from the Yahoo Finance chart API (`/v8/finance/chart/{symbol}`).
pub struct YahooMarketData {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChartResult {
    meta: ChartMeta,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    regular_market_price: Option<f64>,
    #[serde(default)]
    chart_previous_close: Option<f64>,
    #[serde(default)]
    previous_close: Option<f64>,
}

impl YahooMarketData {
    pub fn new(base_url: impl Into<String>) -> FolioResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("folio/0.3")
            .build()
            .map_err(|e| FolioError::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl MarketDataProvider for YahooMarketData {
    async fn quote(&self, symbol: &str) -> FolioResult<Quote> {
        let symbol = symbol.trim().to_uppercase();
        let url = format!("{}/v8/finance/chart/{symbol}", self.base_url);
        debug!(symbol = %symbol, "Fetching quote");

        let resp = self
            .http
            .get(&url)
            .query(&[("interval", "1d"), ("range", "5d")])
            .send()
            .await
            .map_err(|e| FolioError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FolioError::Capability(format!(
                "quote request for {symbol} failed with {status}"
            )));
        }
        let envelope: ChartEnvelope = resp
            .json()
            .await
            .map_err(|e| FolioError::Capability(format!("unreadable quote for {symbol}: {e}")))?;

        if let Some(err) = envelope.chart.error.filter(|e| !e.is_null()) {
            return Err(FolioError::Capability(format!("quote error for {symbol}: {err}")));
        }
        let meta = envelope
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .map(|r| r.meta)
            .ok_or_else(|| FolioError::Capability(format!("no quote returned for {symbol}")))?;

        quote_from_meta(&symbol, meta)
    }
}

fn quote_from_meta(symbol: &str, meta: ChartMeta) -> FolioResult<Quote> {
    let price = meta
        .regular_market_price
        .ok_or_else(|| FolioError::Capability(format!("no price for {symbol}")))?;
    let previous = meta.chart_previous_close.or(meta.previous_close).unwrap_or(price);
    let change = price - previous;
    let percent_change = if previous.abs() > f64::EPSILON {
        change / previous * 100.0
    } else {
        0.0
    };
    Ok(Quote {
        symbol: meta.symbol.unwrap_or_else(|| symbol.to_string()),
        price,
        change,
        percent_change,
        currency: meta.currency.unwrap_or_else(|| "USD".to_string()),
    })
}
