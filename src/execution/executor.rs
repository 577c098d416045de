//! Order executor: sells first, then cash-aware buys.
//!
//! Each order is submitted sequentially and polled to a terminal state
//! before the next goes out; transient poll failures retry with the same
//! backoff policy as submissions. After the sell phase the executor
//! re-reads cash from the broker (absorbing partial fills) and scales
//! the buy quantities down proportionally when the realized cash cannot
//! cover them. A deadline breach cancels in-flight work and aborts the
//! rest.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::broker::{Brokerage, Fill, OrderSide, OrderStatus, PlannedOrder, RetryPolicy};
use crate::config::ExecutionConfig;
use crate::error::EngineError;

/// What happened to one planned order.
#[derive(Debug, Clone)]
pub struct OrderOutcome {
    pub planned: PlannedOrder,
    pub fill: Option<Fill>,
    pub error: Option<String>,
}

impl OrderOutcome {
    pub fn is_filled(&self) -> bool {
        matches!(&self.fill, Some(f) if f.status == OrderStatus::Filled)
    }
}

/// Session-level execution summary.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub outcomes: Vec<OrderOutcome>,
    pub dry_run: bool,
    pub deadline_breached: bool,
}

impl ExecutionReport {
    pub fn all_filled(&self) -> bool {
        !self.deadline_breached && self.outcomes.iter().all(OrderOutcome::is_filled)
    }

    pub fn partial_fills(&self) -> impl Iterator<Item = &OrderOutcome> {
        self.outcomes.iter().filter(|o| {
            matches!(
                &o.fill,
                Some(f) if f.filled_quantity > 0 && f.status != OrderStatus::Filled
            )
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &OrderOutcome> {
        self.outcomes.iter().filter(|o| o.error.is_some())
    }
}

pub struct OrderExecutor<'a> {
    broker: &'a dyn Brokerage,
    config: &'a ExecutionConfig,
    deadline: DateTime<Utc>,
}

impl<'a> OrderExecutor<'a> {
    pub fn new(
        broker: &'a dyn Brokerage,
        config: &'a ExecutionConfig,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            broker,
            config,
            deadline,
        }
    }

    /// Run the plan. In dry-run mode the plan is only reported.
    pub async fn execute(
        &self,
        plan: &[PlannedOrder],
        dry_run: bool,
    ) -> Result<ExecutionReport, EngineError> {
        let mut report = ExecutionReport {
            dry_run,
            ..ExecutionReport::default()
        };

        if dry_run {
            for order in plan {
                info!(
                    symbol = %order.symbol,
                    side = %order.side,
                    quantity = order.quantity,
                    notional = %order.estimated_notional,
                    "dry run: order not submitted"
                );
                report.outcomes.push(OrderOutcome {
                    planned: order.clone(),
                    fill: None,
                    error: None,
                });
            }
            return Ok(report);
        }

        let sells: Vec<&PlannedOrder> =
            plan.iter().filter(|o| o.side == OrderSide::Sell).collect();
        let buys: Vec<&PlannedOrder> =
            plan.iter().filter(|o| o.side == OrderSide::Buy).collect();

        // Phase 1: sells free buying power.
        for order in sells {
            if self.past_deadline() {
                report.deadline_breached = true;
                report.outcomes.push(aborted(order, "deadline reached"));
                continue;
            }
            let outcome = self.run_order(order).await;
            report.outcomes.push(outcome);
        }

        if report.deadline_breached {
            return Ok(report);
        }

        // Phase 2: re-read cash to absorb partial sell fills.
        let available_cash = match self.broker.get_account().await {
            Ok(account) => account.cash,
            Err(e) => {
                warn!(error = %e, "cannot re-read cash after sells, aborting buys");
                for order in buys {
                    report.outcomes.push(aborted(order, "cash re-read failed"));
                }
                return Ok(report);
            }
        };
        let spendable = available_cash * (Decimal::ONE - self.config.safety_margin);

        // Phase 3: scale buys proportionally into the realized cash.
        let required: Decimal = buys.iter().map(|o| o.estimated_notional).sum();
        let scale = if required > spendable && required > Decimal::ZERO {
            let s = spendable / required;
            info!(
                %required,
                %spendable,
                scale = %s.round_dp(4),
                "scaling buy quantities to realized cash"
            );
            s
        } else {
            Decimal::ONE
        };

        for order in buys {
            if self.past_deadline() {
                report.deadline_breached = true;
                report.outcomes.push(aborted(order, "deadline reached"));
                continue;
            }

            let scaled_quantity = (Decimal::from(order.quantity) * scale)
                .floor()
                .to_u64()
                .unwrap_or(0);
            if scaled_quantity == 0 {
                info!(symbol = %order.symbol, "buy scaled to zero, skipping");
                report.outcomes.push(aborted(order, "scaled to zero"));
                continue;
            }
            let adjusted = PlannedOrder {
                quantity: scaled_quantity,
                estimated_notional: order.estimated_notional * scale,
                ..order.clone()
            };
            let outcome = self.run_order(&adjusted).await;
            report.outcomes.push(outcome);
        }

        Ok(report)
    }

    /// Submit one order and poll it to a terminal state. Rejections are
    /// final for the order but never abort the rest of the plan.
    async fn run_order(&self, order: &PlannedOrder) -> OrderOutcome {
        let order_id = match self
            .broker
            .submit_market_order(&order.symbol, order.side, order.quantity)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(symbol = %order.symbol, side = %order.side, error = %e, "order failed");
                return OrderOutcome {
                    planned: order.clone(),
                    fill: None,
                    error: Some(e.to_string()),
                };
            }
        };

        match self.poll_to_terminal(&order_id).await {
            Ok(fill) => {
                info!(
                    symbol = %order.symbol,
                    side = %order.side,
                    requested = order.quantity,
                    filled = fill.filled_quantity,
                    avg_price = %fill.avg_fill_price,
                    status = ?fill.status,
                    "order complete"
                );
                OrderOutcome {
                    planned: order.clone(),
                    fill: Some(fill),
                    error: None,
                }
            }
            Err(e) => {
                // Cancel best-effort; keep whatever filled.
                if let Ok(false) | Err(_) = self.broker.cancel_order(&order_id).await {
                    warn!(%order_id, "cancel not acknowledged");
                }
                let fill = self.broker.poll_order(&order_id).await.ok();
                OrderOutcome {
                    planned: order.clone(),
                    fill,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Poll until a terminal state or the deadline. Transient poll
    /// failures retry with the backoff policy; a successful poll resets
    /// the count. Only non-retriable errors, exhausted retries, or the
    /// deadline are final.
    async fn poll_to_terminal(&self, order_id: &str) -> Result<Fill, EngineError> {
        let retry = RetryPolicy {
            base_secs: self.config.retry_base_secs,
            cap_secs: self.config.retry_cap_secs,
            max_attempts: self.config.retry_max_attempts,
        };
        let mut transient_failures = 0u32;
        loop {
            match self.broker.poll_order(order_id).await {
                Ok(fill) if fill.status.is_terminal() => return Ok(fill),
                Ok(_) => {
                    transient_failures = 0;
                    if self.past_deadline() {
                        return Err(EngineError::DeadlineExceeded(format!(
                            "order {order_id} not terminal by deadline"
                        )));
                    }
                    tokio::time::sleep(std::time::Duration::from_secs(
                        self.config.poll_interval_secs,
                    ))
                    .await;
                }
                Err(e) if e.is_retriable() => {
                    transient_failures += 1;
                    warn!(
                        %order_id,
                        attempt = transient_failures,
                        max = retry.max_attempts,
                        error = %e,
                        "transient poll failure"
                    );
                    if transient_failures >= retry.max_attempts {
                        return Err(e);
                    }
                    if self.past_deadline() {
                        return Err(EngineError::DeadlineExceeded(format!(
                            "order {order_id} status unknown at deadline"
                        )));
                    }
                    tokio::time::sleep(retry.backoff(transient_failures)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn past_deadline(&self) -> bool {
        Utc::now() >= self.deadline
    }
}

fn aborted(order: &PlannedOrder, reason: &str) -> OrderOutcome {
    OrderOutcome {
        planned: order.clone(),
        fill: None,
        error: Some(reason.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{AccountSnapshot, PaperBroker};
    use async_trait::async_trait;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> ExecutionConfig {
        ExecutionConfig {
            poll_interval_secs: 0,
            ..ExecutionConfig::default()
        }
    }

    fn fast_retry_config(max_attempts: u32) -> ExecutionConfig {
        ExecutionConfig {
            poll_interval_secs: 0,
            retry_base_secs: 0.001,
            retry_cap_secs: 0.002,
            retry_max_attempts: max_attempts,
            ..ExecutionConfig::default()
        }
    }

    /// Paper broker whose status endpoint fails transiently a set number
    /// of times before answering.
    struct FlakyPollBroker {
        inner: PaperBroker,
        poll_failures_left: AtomicU32,
    }

    impl FlakyPollBroker {
        fn new(inner: PaperBroker, poll_failures: u32) -> Self {
            Self {
                inner,
                poll_failures_left: AtomicU32::new(poll_failures),
            }
        }
    }

    #[async_trait]
    impl Brokerage for FlakyPollBroker {
        fn name(&self) -> &'static str {
            "flaky-poll"
        }

        async fn get_account(&self) -> Result<AccountSnapshot, EngineError> {
            self.inner.get_account().await
        }

        async fn submit_market_order(
            &self,
            symbol: &str,
            side: OrderSide,
            quantity: u64,
        ) -> Result<String, EngineError> {
            self.inner.submit_market_order(symbol, side, quantity).await
        }

        async fn poll_order(&self, order_id: &str) -> Result<Fill, EngineError> {
            let left = self.poll_failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.poll_failures_left.store(left - 1, Ordering::SeqCst);
                return Err(EngineError::broker_transient("status endpoint timeout"));
            }
            self.inner.poll_order(order_id).await
        }

        async fn cancel_order(&self, order_id: &str) -> Result<bool, EngineError> {
            self.inner.cancel_order(order_id).await
        }

        async fn is_market_open(&self) -> Result<bool, EngineError> {
            self.inner.is_market_open().await
        }
    }

    fn far_deadline() -> DateTime<Utc> {
        Utc::now() + Duration::hours(1)
    }

    fn order(symbol: &str, side: OrderSide, quantity: u64, price: Decimal) -> PlannedOrder {
        PlannedOrder {
            symbol: symbol.to_string(),
            side,
            quantity,
            estimated_notional: Decimal::from(quantity) * price,
        }
    }

    #[tokio::test]
    async fn dry_run_submits_nothing() {
        let broker = PaperBroker::new(dec!(10000));
        broker.set_price("TQQQ", dec!(50)).await;
        let cfg = config();
        let executor = OrderExecutor::new(&broker, &cfg, far_deadline());

        let plan = vec![order("TQQQ", OrderSide::Buy, 100, dec!(50))];
        let report = executor.execute(&plan, true).await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.outcomes.len(), 1);
        let account = broker.get_account().await.unwrap();
        assert_eq!(account.quantity_of("TQQQ"), 0);
        assert_eq!(account.cash, dec!(10000));
    }

    #[tokio::test]
    async fn sells_execute_before_buys() {
        // Starting 100% TQQQ with no cash: the buy can only succeed if the
        // sell settled first.
        let broker = PaperBroker::new(dec!(0));
        broker.set_price("TQQQ", dec!(50)).await;
        broker.set_price("BIL", dec!(91.50)).await;
        broker.set_position("TQQQ", 200, dec!(50)).await;

        let cfg = config();
        let executor = OrderExecutor::new(&broker, &cfg, far_deadline());
        let plan = vec![
            order("TQQQ", OrderSide::Sell, 200, dec!(50)),
            order("BIL", OrderSide::Buy, 108, dec!(91.50)),
        ];
        let report = executor.execute(&plan, false).await.unwrap();

        assert!(report.all_filled());
        let account = broker.get_account().await.unwrap();
        assert_eq!(account.quantity_of("TQQQ"), 0);
        assert_eq!(account.quantity_of("BIL"), 108);
    }

    #[tokio::test]
    async fn partial_sell_fill_scales_buys() {
        // Scenario F: the sell fills 60 of 100; buys shrink to the cash
        // that actually arrived.
        let broker = PaperBroker::new(dec!(0));
        broker.set_price("TQQQ", dec!(50)).await;
        broker.set_price("BIL", dec!(50)).await;
        broker.set_position("TQQQ", 100, dec!(50)).await;
        broker.set_fill_ratio(dec!(0.6)).await;

        let cfg = config();
        let executor = OrderExecutor::new(&broker, &cfg, far_deadline());
        let plan = vec![
            order("TQQQ", OrderSide::Sell, 100, dec!(50)),
            order("BIL", OrderSide::Buy, 100, dec!(50)),
        ];
        let report = executor.execute(&plan, false).await.unwrap();

        // Sell realized $3000; safety margin holds back 1%; the buy is
        // scaled from 100 down to 59 shares.
        let account = broker.get_account().await.unwrap();
        let bil_fill = report.outcomes[1].fill.as_ref().unwrap();
        assert_eq!(bil_fill.filled_quantity, 35); // 59 requested * 0.6 ratio
        assert!(account.cash >= Decimal::ZERO);
        assert!(report.partial_fills().count() >= 1);
    }

    #[tokio::test]
    async fn rejection_skips_order_and_continues() {
        let broker = PaperBroker::new(dec!(100000));
        broker.set_price("TQQQ", dec!(50)).await;
        // No price for SQQQ: its order is rejected.
        let cfg = config();
        let executor = OrderExecutor::new(&broker, &cfg, far_deadline());
        let plan = vec![
            order("SQQQ", OrderSide::Buy, 10, dec!(10)),
            order("TQQQ", OrderSide::Buy, 100, dec!(50)),
        ];
        let report = executor.execute(&plan, false).await.unwrap();

        assert_eq!(report.failures().count(), 1);
        assert!(!report.all_filled());
        let account = broker.get_account().await.unwrap();
        assert_eq!(account.quantity_of("TQQQ"), 100);
    }

    #[tokio::test]
    async fn past_deadline_aborts_plan() {
        let broker = PaperBroker::new(dec!(10000));
        broker.set_price("TQQQ", dec!(50)).await;
        let cfg = config();
        let executor =
            OrderExecutor::new(&broker, &cfg, Utc::now() - Duration::seconds(1));
        let plan = vec![order("TQQQ", OrderSide::Sell, 10, dec!(50))];
        let report = executor.execute(&plan, false).await.unwrap();

        assert!(report.deadline_breached);
        assert!(!report.all_filled());
        assert_eq!(report.failures().count(), 1);
    }

    #[tokio::test]
    async fn transient_poll_failures_retry_until_fill() {
        let inner = PaperBroker::new(dec!(10000));
        inner.set_price("TQQQ", dec!(50)).await;
        let broker = FlakyPollBroker::new(inner, 2);

        let cfg = fast_retry_config(5);
        let executor = OrderExecutor::new(&broker, &cfg, far_deadline());
        let plan = vec![order("TQQQ", OrderSide::Buy, 10, dec!(50))];
        let report = executor.execute(&plan, false).await.unwrap();

        assert!(report.all_filled());
        let account = broker.get_account().await.unwrap();
        assert_eq!(account.quantity_of("TQQQ"), 10);
    }

    #[tokio::test]
    async fn persistent_poll_failure_is_final_after_retries() {
        let inner = PaperBroker::new(dec!(10000));
        inner.set_price("TQQQ", dec!(50)).await;
        let broker = FlakyPollBroker::new(inner, 100);

        let cfg = fast_retry_config(3);
        let executor = OrderExecutor::new(&broker, &cfg, far_deadline());
        let plan = vec![order("TQQQ", OrderSide::Buy, 10, dec!(50))];
        let report = executor.execute(&plan, false).await.unwrap();

        assert!(!report.all_filled());
        assert_eq!(report.failures().count(), 1);
        // The order itself went through; only its status stayed unknown.
        let account = broker.get_account().await.unwrap();
        assert_eq!(account.quantity_of("TQQQ"), 10);
    }

    #[tokio::test]
    async fn empty_plan_is_a_clean_noop() {
        let broker = PaperBroker::new(dec!(10000));
        let cfg = config();
        let executor = OrderExecutor::new(&broker, &cfg, far_deadline());
        let report = executor.execute(&[], false).await.unwrap();
        assert!(report.all_filled());
        assert!(report.outcomes.is_empty());
    }
}
