//! Day-walking replay engine.
//!
//! Feeds bars through the live strategy engine and reconciler, filling
//! the resulting plans at the session close in a simulated portfolio.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::backtest::metrics::{monthly_returns, BacktestMetrics, MonthlyReturn};
use crate::backtest::BacktestConfig;
use crate::broker::{AccountSnapshot, OrderSide, PlannedOrder, Position};
use crate::data::{calendar, PriceHistory};
use crate::error::EngineError;
use crate::execution::Reconciler;
use crate::indicators::TRADING_DAYS_PER_YEAR;
use crate::strategy::{StrategyEngine, TargetAllocation, WARMUP_BARS};

/// Mark price used for BIL when no price series is loaded; yield accrues
/// to cash instead of the price.
const SYNTHETIC_BIL_PRICE: Decimal = dec!(100);

/// Portfolio state on one replay day.
#[derive(Debug, Clone)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub allocation: TargetAllocation,
    pub tqqq_shares: i64,
    pub sqqq_shares: i64,
    pub bil_shares: i64,
    pub cash: Decimal,
    pub equity: Decimal,
    pub orders: Vec<PlannedOrder>,
}

/// One executed replay order; sells that close a lot carry realized PnL
/// and holding duration.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub date: NaiveDate,
    pub symbol: String,
    pub side: OrderSide,
    pub shares: u64,
    pub price: Decimal,
    pub pnl: Option<Decimal>,
    pub duration_days: Option<i64>,
}

#[derive(Debug)]
pub struct BacktestResult {
    pub config: BacktestConfig,
    pub records: Vec<DailyRecord>,
    pub trades: Vec<TradeRecord>,
    pub metrics: BacktestMetrics,
    pub monthly_returns: Vec<MonthlyReturn>,
}

impl BacktestResult {
    pub fn equity_curve(&self) -> Vec<(NaiveDate, Decimal)> {
        self.records.iter().map(|r| (r.date, r.equity)).collect()
    }

    /// Export the equity curve as CSV.
    pub fn equity_to_csv(&self, path: &str) -> anyhow::Result<()> {
        use std::io::Write;
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "date,equity,cash,tqqq_shares,sqqq_shares,bil_shares")?;
        for r in &self.records {
            writeln!(
                file,
                "{},{},{},{},{},{}",
                r.date, r.equity, r.cash, r.tqqq_shares, r.sqqq_shares, r.bil_shares
            )?;
        }
        Ok(())
    }

    pub fn summary(&self) -> String {
        format!(
            "{}\n  Period: {} to {}  Capital: ${}",
            self.metrics.summary(),
            self.config.start,
            self.config.end,
            self.config.initial_capital,
        )
    }
}

/// Tracks an open lot for round-trip accounting.
#[derive(Debug, Clone)]
struct OpenLot {
    entry_date: NaiveDate,
    entry_price: Decimal,
    shares: i64,
}

pub struct BacktestEngine {
    engine: StrategyEngine,
    reconciler: Reconciler,
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(engine: StrategyEngine, reconciler: Reconciler, config: BacktestConfig) -> Self {
        Self {
            engine,
            reconciler,
            config,
        }
    }

    /// Replay over the common sessions of the input histories. `bil` may
    /// be absent, in which case BIL is priced flat and accrues its yield
    /// into cash.
    pub fn run(
        &self,
        ndx: &PriceHistory,
        tqqq: &PriceHistory,
        sqqq: &PriceHistory,
        bil: Option<&PriceHistory>,
    ) -> Result<BacktestResult, EngineError> {
        for history in [ndx, tqqq, sqqq].into_iter().chain(bil) {
            history.check_gaps(crate::data::cache::MAX_CALENDAR_GAP_DAYS)?;
        }

        let mut date_sets = vec![
            ndx.bars().iter().map(|b| b.date).collect::<Vec<_>>(),
            tqqq.bars().iter().map(|b| b.date).collect::<Vec<_>>(),
            sqqq.bars().iter().map(|b| b.date).collect::<Vec<_>>(),
        ];
        if let Some(bil) = bil {
            date_sets.push(bil.bars().iter().map(|b| b.date).collect());
        }
        let sessions: Vec<NaiveDate> = calendar::common_sessions(&date_sets)
            .into_iter()
            .filter(|d| *d >= self.config.start && *d <= self.config.end)
            .collect();
        if sessions.is_empty() {
            return Err(EngineError::DataGap(
                "no common trading days in the requested range".into(),
            ));
        }
        info!(
            days = sessions.len(),
            start = %sessions[0],
            end = %sessions[sessions.len() - 1],
            "replay starting"
        );

        let ndx_closes = ndx.closes_f64();
        let ndx_dates: Vec<NaiveDate> = ndx.bars().iter().map(|b| b.date).collect();

        let mut cash = self.config.initial_capital;
        let mut shares: HashMap<&str, i64> =
            HashMap::from([("TQQQ", 0), ("SQQQ", 0), ("BIL", 0)]);
        let mut lots: HashMap<String, OpenLot> = HashMap::new();
        let mut previous = TargetAllocation::all_cash();
        let daily_bil_yield = self.config.bil_apr
            / Decimal::from_f64_retain(TRADING_DAYS_PER_YEAR).unwrap_or(dec!(252));

        let mut records: Vec<DailyRecord> = Vec::with_capacity(sessions.len());
        let mut trades: Vec<TradeRecord> = Vec::new();

        for day in sessions {
            // History tail through this session only.
            let ndx_len = ndx_dates.partition_point(|d| *d <= day);
            if ndx_len < WARMUP_BARS {
                debug!(%day, bars = ndx_len, "inside warmup, skipping");
                continue;
            }

            let tqqq_close = tqqq.close_on(day).ok_or_else(|| {
                EngineError::DataGap(format!("TQQQ missing bar on {day}"))
            })?;
            let sqqq_close = sqqq.close_on(day).ok_or_else(|| {
                EngineError::DataGap(format!("SQQQ missing bar on {day}"))
            })?;
            let bil_close = match bil {
                Some(history) => history.close_on(day).ok_or_else(|| {
                    EngineError::DataGap(format!("BIL missing bar on {day}"))
                })?,
                None => SYNTHETIC_BIL_PRICE,
            };
            let closes = HashMap::from([
                ("TQQQ".to_string(), tqqq_close),
                ("SQQQ".to_string(), sqqq_close),
                ("BIL".to_string(), bil_close),
            ]);

            // Synthetic BIL accrues its yield into cash.
            if bil.is_none() && shares["BIL"] != 0 {
                cash += Decimal::from(shares["BIL"]) * SYNTHETIC_BIL_PRICE * daily_bil_yield;
            }

            let (allocation, _signals) =
                self.engine.evaluate(&ndx_closes[..ndx_len], &previous)?;

            let snapshot = snapshot_of(&shares, &closes, cash);
            let plan = self.reconciler.plan(&allocation, &snapshot, &closes)?;

            for order in &plan {
                let close = closes[&order.symbol];
                let fill_price = self.fill_price(close, order.side);
                apply_order(order, fill_price, day, &mut cash, &mut shares, &mut lots, &mut trades);
            }

            let equity = equity_of(&shares, &closes, cash);
            records.push(DailyRecord {
                date: day,
                allocation: allocation.clone(),
                tqqq_shares: shares["TQQQ"],
                sqqq_shares: shares["SQQQ"],
                bil_shares: shares["BIL"],
                cash,
                equity,
                orders: plan,
            });
            previous = allocation;
        }

        if records.is_empty() {
            return Err(EngineError::DataGap(
                "no sessions cleared the warmup period".into(),
            ));
        }

        let equity_curve: Vec<(NaiveDate, Decimal)> =
            records.iter().map(|r| (r.date, r.equity)).collect();
        let metrics = BacktestMetrics::compute(&equity_curve, &trades);
        let monthly = monthly_returns(&equity_curve);

        info!(
            days = records.len(),
            trades = trades.len(),
            final_equity = %records[records.len() - 1].equity,
            "replay complete"
        );

        Ok(BacktestResult {
            config: self.config.clone(),
            records,
            trades,
            metrics,
            monthly_returns: monthly,
        })
    }

    /// Close adjusted by the uniform slippage: buys pay up, sells give up.
    fn fill_price(&self, close: Decimal, side: OrderSide) -> Decimal {
        let bps = self.config.slippage_bps / dec!(10000);
        match side {
            OrderSide::Buy => close * (Decimal::ONE + bps),
            OrderSide::Sell => close * (Decimal::ONE - bps),
        }
    }
}

fn snapshot_of(
    shares: &HashMap<&str, i64>,
    closes: &HashMap<String, Decimal>,
    cash: Decimal,
) -> AccountSnapshot {
    let mut positions = HashMap::new();
    for (&symbol, &quantity) in shares {
        if quantity == 0 {
            continue;
        }
        let close = closes[symbol];
        positions.insert(
            symbol.to_string(),
            Position {
                symbol: symbol.to_string(),
                quantity,
                avg_cost: close,
                market_value: Decimal::from(quantity) * close,
            },
        );
    }
    AccountSnapshot {
        equity: equity_of(shares, closes, cash),
        cash,
        positions,
    }
}

fn equity_of(
    shares: &HashMap<&str, i64>,
    closes: &HashMap<String, Decimal>,
    cash: Decimal,
) -> Decimal {
    cash + shares
        .iter()
        .map(|(&symbol, &quantity)| Decimal::from(quantity) * closes[symbol])
        .sum::<Decimal>()
}

#[allow(clippy::too_many_arguments)]
fn apply_order(
    order: &PlannedOrder,
    price: Decimal,
    day: NaiveDate,
    cash: &mut Decimal,
    shares: &mut HashMap<&str, i64>,
    lots: &mut HashMap<String, OpenLot>,
    trades: &mut Vec<TradeRecord>,
) {
    let key: &str = match order.symbol.as_str() {
        "TQQQ" => "TQQQ",
        "SQQQ" => "SQQQ",
        _ => "BIL",
    };
    let quantity = order.quantity as i64;
    let notional = Decimal::from(order.quantity) * price;

    let mut record = TradeRecord {
        date: day,
        symbol: order.symbol.clone(),
        side: order.side,
        shares: order.quantity,
        price,
        pnl: None,
        duration_days: None,
    };

    match order.side {
        OrderSide::Buy => {
            *cash -= notional;
            *shares.get_mut(key).unwrap() += quantity;
            lots.entry(order.symbol.clone())
                .and_modify(|lot| {
                    let total = lot.shares + quantity;
                    lot.entry_price = (lot.entry_price * Decimal::from(lot.shares)
                        + price * Decimal::from(quantity))
                        / Decimal::from(total);
                    lot.shares = total;
                })
                .or_insert(OpenLot {
                    entry_date: day,
                    entry_price: price,
                    shares: quantity,
                });
        }
        OrderSide::Sell => {
            *cash += notional;
            *shares.get_mut(key).unwrap() -= quantity;
            if let Some(lot) = lots.get_mut(&order.symbol) {
                record.pnl = Some((price - lot.entry_price) * Decimal::from(quantity));
                record.duration_days = Some((day - lot.entry_date).num_days());
                if quantity >= lot.shares {
                    lots.remove(&order.symbol);
                } else {
                    lot.shares -= quantity;
                }
            }
        }
    }
    trades.push(record);
}
