//! Alpaca REST API client.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::broker::{
    AccountSnapshot, Brokerage, Fill, OrderSide, OrderStatus, Position,
};
use crate::error::EngineError;

const LIVE_BASE_URL: &str = "https://api.alpaca.markets";
const PAPER_BASE_URL: &str = "https://paper-api.alpaca.markets";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct AlpacaClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

#[derive(Debug, Deserialize)]
struct AlpacaAccount {
    #[serde(with = "rust_decimal::serde::str")]
    equity: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    cash: Decimal,
}

#[derive(Debug, Deserialize)]
struct AlpacaPosition {
    symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    avg_entry_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    market_value: Decimal,
}

#[derive(Debug, Deserialize)]
struct AlpacaOrder {
    id: String,
    symbol: String,
    side: OrderSide,
    status: String,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    filled_qty: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    filled_avg_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct AlpacaClock {
    is_open: bool,
}

#[derive(Debug, Serialize)]
struct NewOrderRequest<'a> {
    symbol: &'a str,
    qty: String,
    side: OrderSide,
    #[serde(rename = "type")]
    order_type: &'a str,
    time_in_force: &'a str,
}

impl AlpacaClient {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        paper: bool,
    ) -> Result<Self, EngineError> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| EngineError::broker_fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: if paper { PAPER_BASE_URL } else { LIVE_BASE_URL }.to_string(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
    }

    /// Transport failures and 5xx/429 are retriable; 4xx are not.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, EngineError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = format!("alpaca returned {status}: {body}");
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(EngineError::broker_transient(message))
        } else if status == StatusCode::FORBIDDEN || status == StatusCode::UNPROCESSABLE_ENTITY {
            Err(EngineError::OrderRejected(message))
        } else {
            Err(EngineError::broker_fatal(message))
        }
    }

    fn transport(e: reqwest::Error) -> EngineError {
        EngineError::broker_transient(format!("alpaca transport error: {e}"))
    }

    fn map_status(status: &str) -> OrderStatus {
        match status {
            "filled" => OrderStatus::Filled,
            "partially_filled" => OrderStatus::PartiallyFilled,
            "canceled" | "expired" | "done_for_day" => OrderStatus::Canceled,
            "rejected" | "stopped" | "suspended" => OrderStatus::Rejected,
            _ => OrderStatus::New,
        }
    }

    fn to_fill(order: AlpacaOrder) -> Fill {
        Fill {
            order_id: order.id,
            symbol: order.symbol,
            side: order.side,
            filled_quantity: order
                .filled_qty
                .and_then(|q| q.trunc().to_u64())
                .unwrap_or(0),
            avg_fill_price: order.filled_avg_price.unwrap_or(Decimal::ZERO),
            status: Self::map_status(&order.status),
        }
    }
}

#[async_trait]
impl Brokerage for AlpacaClient {
    fn name(&self) -> &'static str {
        "alpaca"
    }

    #[instrument(skip(self))]
    async fn get_account(&self) -> Result<AccountSnapshot, EngineError> {
        let account: AlpacaAccount = Self::check(
            self.request(reqwest::Method::GET, "/v2/account")
                .send()
                .await
                .map_err(Self::transport)?,
        )
        .await?
        .json()
        .await
        .map_err(Self::transport)?;

        let raw_positions: Vec<AlpacaPosition> = Self::check(
            self.request(reqwest::Method::GET, "/v2/positions")
                .send()
                .await
                .map_err(Self::transport)?,
        )
        .await?
        .json()
        .await
        .map_err(Self::transport)?;

        let mut positions = HashMap::with_capacity(raw_positions.len());
        for p in raw_positions {
            positions.insert(
                p.symbol.clone(),
                Position {
                    symbol: p.symbol,
                    quantity: p.qty.trunc().to_i64().unwrap_or(0),
                    avg_cost: p.avg_entry_price,
                    market_value: p.market_value,
                },
            );
        }

        debug!(equity = %account.equity, positions = positions.len(), "account snapshot");
        Ok(AccountSnapshot {
            equity: account.equity,
            cash: account.cash,
            positions,
        })
    }

    #[instrument(skip(self))]
    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: u64,
    ) -> Result<String, EngineError> {
        let body = NewOrderRequest {
            symbol,
            qty: quantity.to_string(),
            side,
            order_type: "market",
            time_in_force: "day",
        };
        let order: AlpacaOrder = Self::check(
            self.request(reqwest::Method::POST, "/v2/orders")
                .json(&body)
                .send()
                .await
                .map_err(Self::transport)?,
        )
        .await?
        .json()
        .await
        .map_err(Self::transport)?;

        debug!(order_id = %order.id, %symbol, %side, quantity, "order submitted");
        Ok(order.id)
    }

    #[instrument(skip(self))]
    async fn poll_order(&self, order_id: &str) -> Result<Fill, EngineError> {
        let order: AlpacaOrder = Self::check(
            self.request(reqwest::Method::GET, &format!("/v2/orders/{order_id}"))
                .send()
                .await
                .map_err(Self::transport)?,
        )
        .await?
        .json()
        .await
        .map_err(Self::transport)?;
        Ok(Self::to_fill(order))
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, order_id: &str) -> Result<bool, EngineError> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/v2/orders/{order_id}"))
            .send()
            .await
            .map_err(Self::transport)?;
        Ok(response.status().is_success())
    }

    async fn is_market_open(&self) -> Result<bool, EngineError> {
        let clock: AlpacaClock = Self::check(
            self.request(reqwest::Method::GET, "/v2/clock")
                .send()
                .await
                .map_err(Self::transport)?,
        )
        .await?
        .json()
        .await
        .map_err(Self::transport)?;
        Ok(clock.is_open)
    }
}
