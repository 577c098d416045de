//! Failover brokerage wrapper.
//!
//! Routes every call to the active broker: the primary until connectivity
//! errors on two consecutive retries of the same order, then the
//! secondary for the rest of the session. Submissions, status polls, and
//! cancels all retry with exponential backoff and jitter, never past the
//! close deadline, and all count toward the failover trigger. A session
//! never uses both brokers in parallel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::broker::{AccountSnapshot, Brokerage, Fill, OrderSide};
use crate::error::EngineError;

/// Consecutive connectivity failures on one order that trigger failover.
const FAILOVER_AFTER_CONSECUTIVE: u32 = 2;

/// A single in-flight brokerage call.
type BrokerCall<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, EngineError>> + Send + 'a>>;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_secs: f64,
    pub cap_secs: f64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_secs: 2.0,
            cap_secs: 60.0,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt` (1-based): base * 2^(attempt-1),
    /// capped, with +/-25% jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let raw = self.base_secs * 2f64.powi(attempt.saturating_sub(1) as i32);
        let capped = raw.min(self.cap_secs);
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_secs_f64(capped * jitter)
    }
}

pub struct FailoverBroker {
    primary: Arc<dyn Brokerage>,
    secondary: Option<Arc<dyn Brokerage>>,
    policy: RetryPolicy,
    deadline: Option<DateTime<Utc>>,
    switched: AtomicBool,
}

impl FailoverBroker {
    pub fn new(
        primary: Arc<dyn Brokerage>,
        secondary: Option<Arc<dyn Brokerage>>,
        policy: RetryPolicy,
        deadline: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            primary,
            secondary,
            policy,
            deadline,
            switched: AtomicBool::new(false),
        }
    }

    fn active(&self) -> &Arc<dyn Brokerage> {
        if self.switched.load(Ordering::SeqCst) {
            self.secondary.as_ref().unwrap_or(&self.primary)
        } else {
            &self.primary
        }
    }

    pub fn has_failed_over(&self) -> bool {
        self.switched.load(Ordering::SeqCst)
    }

    fn past_deadline(&self) -> bool {
        matches!(self.deadline, Some(d) if Utc::now() >= d)
    }

    /// Run one brokerage call with retries on a single broker. Returns the
    /// value, or the last error with a count of trailing consecutive
    /// connectivity failures. With `failover_armed`, gives up early once
    /// the failover threshold is reached so the caller can switch.
    async fn call_with_retry<'a, T, C>(
        &self,
        broker_name: &str,
        what: &str,
        failover_armed: bool,
        call: &mut C,
    ) -> Result<T, (EngineError, u32)>
    where
        T: Send,
        C: FnMut() -> BrokerCall<'a, T> + Send,
    {
        let mut consecutive_connectivity = 0u32;
        let mut last_error: Option<EngineError> = None;

        for attempt in 1..=self.policy.max_attempts {
            if self.past_deadline() {
                return Err((
                    EngineError::DeadlineExceeded(format!(
                        "{what}: past market_close - buffer"
                    )),
                    consecutive_connectivity,
                ));
            }

            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retriable() => {
                    consecutive_connectivity += 1;
                    warn!(
                        broker = broker_name,
                        what,
                        attempt,
                        max = self.policy.max_attempts,
                        error = %e,
                        "retriable brokerage failure"
                    );
                    last_error = Some(e);

                    if failover_armed
                        && consecutive_connectivity >= FAILOVER_AFTER_CONSECUTIVE
                    {
                        return Err((
                            last_error.unwrap(),
                            consecutive_connectivity,
                        ));
                    }
                    if attempt < self.policy.max_attempts {
                        tokio::time::sleep(self.policy.backoff(attempt)).await;
                    }
                }
                Err(e) => return Err((e, consecutive_connectivity)),
            }
        }

        Err((
            last_error.unwrap_or_else(|| {
                EngineError::broker_transient(format!(
                    "{what}: all {} attempts failed",
                    self.policy.max_attempts
                ))
            }),
            consecutive_connectivity,
        ))
    }

    /// Retry on the primary, switch to the secondary on persistent
    /// connectivity failures, and stay there for the rest of the session.
    async fn route<'a, T, P, S>(
        &self,
        what: &str,
        mut primary_call: P,
        mut secondary_call: Option<S>,
    ) -> Result<T, EngineError>
    where
        T: Send,
        P: FnMut() -> BrokerCall<'a, T> + Send,
        S: FnMut() -> BrokerCall<'a, T> + Send,
    {
        if !self.switched.load(Ordering::SeqCst) {
            let armed = secondary_call.is_some();
            match self
                .call_with_retry(self.primary.name(), what, armed, &mut primary_call)
                .await
            {
                Ok(value) => return Ok(value),
                Err((error, connectivity_failures)) => {
                    let can_fail_over = armed
                        && error.is_retriable()
                        && connectivity_failures >= FAILOVER_AFTER_CONSECUTIVE;
                    if !can_fail_over {
                        return Err(error);
                    }
                    info!(
                        from = self.primary.name(),
                        error = %error,
                        "failing over to secondary brokerage"
                    );
                    self.switched.store(true, Ordering::SeqCst);
                }
            }
        }

        let secondary_name = self.secondary.as_ref().map_or("secondary", |b| b.name());
        match secondary_call.as_mut() {
            Some(call) => self
                .call_with_retry(secondary_name, what, false, call)
                .await
                .map_err(|(error, _)| error),
            None => Err(EngineError::broker_fatal(
                "no secondary brokerage configured",
            )),
        }
    }
}

#[async_trait]
impl Brokerage for FailoverBroker {
    fn name(&self) -> &'static str {
        "failover"
    }

    async fn get_account(&self) -> Result<AccountSnapshot, EngineError> {
        self.active().get_account().await
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: u64,
    ) -> Result<String, EngineError> {
        let primary = &self.primary;
        let what = format!("submit {side} {quantity} {symbol}");
        self.route(
            &what,
            || primary.submit_market_order(symbol, side, quantity),
            self.secondary
                .as_ref()
                .map(|broker| move || broker.submit_market_order(symbol, side, quantity)),
        )
        .await
    }

    async fn poll_order(&self, order_id: &str) -> Result<Fill, EngineError> {
        let primary = &self.primary;
        let what = format!("poll order {order_id}");
        self.route(
            &what,
            || primary.poll_order(order_id),
            self.secondary
                .as_ref()
                .map(|broker| move || broker.poll_order(order_id)),
        )
        .await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool, EngineError> {
        let primary = &self.primary;
        let what = format!("cancel order {order_id}");
        self.route(
            &what,
            || primary.cancel_order(order_id),
            self.secondary
                .as_ref()
                .map(|broker| move || broker.cancel_order(order_id)),
        )
        .await
    }

    async fn is_market_open(&self) -> Result<bool, EngineError> {
        self.active().is_market_open().await
    }
}
