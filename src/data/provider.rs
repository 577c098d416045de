//! Market-data providers.
//!
//! The cache is the source of truth in normal operation; providers only
//! fill the delta from the cache's latest date to today. Two
//! implementations: a Polygon-style aggregates API and the free Stooq CSV
//! endpoint as fallback. Index symbols get their vendor prefix here; the
//! rest of the engine uses unprefixed names.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::data::Bar;
use crate::error::EngineError;

const POLYGON_BASE_URL: &str = "https://api.polygon.io";
const STOOQ_BASE_URL: &str = "https://stooq.com";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Symbols quoted as indices rather than equities.
const INDEX_SYMBOLS: [&str; 1] = ["NDX"];

#[async_trait]
pub trait MarketData: Send + Sync {
    fn name(&self) -> &'static str;

    /// Daily bars for `symbol` over `[start, end]`, ascending by date.
    async fn daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, EngineError>;
}

fn http_client() -> Result<Client, EngineError> {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| EngineError::Provider(format!("failed to build HTTP client: {e}")))
}

fn provider_error(context: &str, e: reqwest::Error) -> EngineError {
    EngineError::Provider(format!("{context}: {e}"))
}

// ==================== Polygon ====================

pub struct PolygonClient {
    http: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct PolygonAggsResponse {
    #[serde(default)]
    results: Vec<PolygonAgg>,
}

#[derive(Debug, Deserialize)]
struct PolygonAgg {
    /// Window start in epoch milliseconds.
    t: i64,
    #[serde(with = "rust_decimal::serde::float")]
    o: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    h: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    l: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    c: Decimal,
    #[serde(default)]
    v: f64,
}

impl PolygonClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, EngineError> {
        Ok(Self {
            http: http_client()?,
            base_url: POLYGON_BASE_URL.to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Vendor ticker: indices carry the `I:` prefix.
    fn vendor_ticker(symbol: &str) -> String {
        if INDEX_SYMBOLS.contains(&symbol) {
            format!("I:{symbol}")
        } else {
            symbol.to_string()
        }
    }
}

#[async_trait]
impl MarketData for PolygonClient {
    fn name(&self) -> &'static str {
        "polygon"
    }

    #[instrument(skip(self))]
    async fn daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, EngineError> {
        let url = format!(
            "{}/v2/aggs/ticker/{}/range/1/day/{}/{}?adjusted=true&sort=asc&limit=50000&apiKey={}",
            self.base_url,
            Self::vendor_ticker(symbol),
            start,
            end,
            self.api_key
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| provider_error("polygon request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Provider(format!(
                "polygon returned {status} for {symbol}"
            )));
        }

        let payload: PolygonAggsResponse = response
            .json()
            .await
            .map_err(|e| provider_error("polygon response parse failed", e))?;

        let mut bars = Vec::with_capacity(payload.results.len());
        for agg in payload.results {
            let date = chrono::DateTime::from_timestamp_millis(agg.t)
                .ok_or_else(|| {
                    EngineError::Provider(format!("polygon bar has bad timestamp {}", agg.t))
                })?
                .date_naive();
            bars.push(Bar {
                date,
                open: agg.o,
                high: agg.h,
                low: agg.l,
                close: agg.c,
                volume: agg.v as u64,
            });
        }
        debug!(%symbol, rows = bars.len(), "polygon bars fetched");
        Ok(bars)
    }
}

// ==================== Stooq (free fallback) ====================

pub struct StooqClient {
    http: Client,
    base_url: String,
}

impl StooqClient {
    pub fn new() -> Result<Self, EngineError> {
        Ok(Self {
            http: http_client()?,
            base_url: STOOQ_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Stooq ticker: indices as `^ndx`, US equities as `tqqq.us`.
    fn vendor_ticker(symbol: &str) -> String {
        if INDEX_SYMBOLS.contains(&symbol) {
            format!("^{}", symbol.to_lowercase())
        } else {
            format!("{}.us", symbol.to_lowercase())
        }
    }

    fn parse_csv(content: &str) -> Result<Vec<Bar>, EngineError> {
        let mut bars = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line_no == 0 || line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() < 5 {
                return Err(EngineError::Provider(format!(
                    "stooq line {}: expected Date,Open,High,Low,Close[,Volume]",
                    line_no + 1
                )));
            }
            let parse = |i: usize, what: &str| -> Result<Decimal, EngineError> {
                fields[i].trim().parse().map_err(|_| {
                    EngineError::Provider(format!(
                        "stooq line {}: bad {what} {}",
                        line_no + 1,
                        fields[i]
                    ))
                })
            };
            bars.push(Bar {
                date: fields[0].trim().parse().map_err(|_| {
                    EngineError::Provider(format!(
                        "stooq line {}: bad date {}",
                        line_no + 1,
                        fields[0]
                    ))
                })?,
                open: parse(1, "open")?,
                high: parse(2, "high")?,
                low: parse(3, "low")?,
                close: parse(4, "close")?,
                volume: fields
                    .get(5)
                    .and_then(|v| v.trim().parse::<f64>().ok())
                    .unwrap_or(0.0) as u64,
            });
        }
        Ok(bars)
    }
}

#[async_trait]
impl MarketData for StooqClient {
    fn name(&self) -> &'static str {
        "stooq"
    }

    #[instrument(skip(self))]
    async fn daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, EngineError> {
        let url = format!(
            "{}/q/d/l/?s={}&d1={}&d2={}&i=d",
            self.base_url,
            Self::vendor_ticker(symbol),
            start.format("%Y%m%d"),
            end.format("%Y%m%d"),
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| provider_error("stooq request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Provider(format!(
                "stooq returned {status} for {symbol}"
            )));
        }

        let content = response
            .text()
            .await
            .map_err(|e| provider_error("stooq response read failed", e))?;

        let mut bars = Self::parse_csv(&content)?;
        bars.retain(|b| b.date >= start && b.date <= end);
        debug!(%symbol, rows = bars.len(), "stooq bars fetched");
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn polygon_prefixes_indices_only() {
        assert_eq!(PolygonClient::vendor_ticker("NDX"), "I:NDX");
        assert_eq!(PolygonClient::vendor_ticker("TQQQ"), "TQQQ");
    }

    #[test]
    fn stooq_ticker_mapping() {
        assert_eq!(StooqClient::vendor_ticker("NDX"), "^ndx");
        assert_eq!(StooqClient::vendor_ticker("BIL"), "bil.us");
    }

    #[test]
    fn stooq_csv_parses() {
        let csv = "Date,Open,High,Low,Close,Volume\n\
                   2024-01-02,50.10,51.00,49.90,50.55,12000000\n\
                   2024-01-03,50.60,50.90,50.10,50.20,9000000\n";
        let bars = StooqClient::parse_csv(csv).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, dec!(50.55));
        assert_eq!(bars[1].volume, 9_000_000);
    }

    #[test]
    fn stooq_csv_rejects_malformed_rows() {
        let csv = "Date,Open,High,Low,Close,Volume\n2024-01-02,oops\n";
        assert!(matches!(
            StooqClient::parse_csv(csv),
            Err(EngineError::Provider(_))
        ));
    }

    #[test]
    fn polygon_agg_deserializes() {
        let payload = r#"{"results":[{"t":1704171600000,"o":50.1,"h":51.0,"l":49.9,"c":50.55,"v":12000000.0}]}"#;
        let parsed: PolygonAggsResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.results.len(), 1);
        assert_eq!(parsed.results[0].c, dec!(50.55));
    }
}
