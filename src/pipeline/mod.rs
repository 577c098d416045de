//! Daily session orchestrator.
//!
//! One run wires `bars -> signals -> allocation -> plan -> orders ->
//! telemetry`, holding the cache lock for its duration. The engine keeps
//! no state between runs: the previous allocation is derived from live
//! positions at start.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::alerts::{AlertSink, CompositeAlerts, NoopAlerts, NtfyAlerts, Severity, TelegramAlerts};
use crate::backtest::{BacktestConfig, BacktestEngine, BacktestResult};
use crate::broker::{AlpacaClient, Brokerage, FailoverBroker, PaperBroker, RetryPolicy};
use crate::config::Config;
use crate::data::cache::{BarCache, CacheLock, MAX_CALENDAR_GAP_DAYS};
use crate::data::calendar;
use crate::data::provider::{MarketData, PolygonClient, StooqClient};
use crate::data::sync::DataSyncer;
use crate::data::PriceHistory;
use crate::error::EngineError;
use crate::execution::{allocation_from_positions, OrderExecutor, Reconciler};
use crate::secrets::Secrets;
use crate::strategy::{SignalCombiner, StrategyEngine};

/// External collaborators of a session, injected for testability.
pub struct SessionDeps {
    pub providers: Vec<Box<dyn MarketData>>,
    pub broker: Arc<dyn Brokerage>,
    pub alerts: Arc<dyn AlertSink>,
}

/// Outcome of a live/dry session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Orders (if any) completed.
    Traded,
    /// Nothing to do: portfolio already at target.
    NoTradesNeeded,
    /// Outside the execution window or market closed; no orders issued.
    Skipped,
}

/// Run the full daily pipeline for `today`.
pub async fn run_session(
    config: &Config,
    deps: &SessionDeps,
    dry_run: bool,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<SessionOutcome, EngineError> {
    let session_id = format!("wl-{today}");
    info!(%session_id, dry_run, "session starting");
    deps.alerts
        .send(
            Severity::Info,
            "Session start",
            &format!("{session_id} dry_run={dry_run}"),
        )
        .await;

    let result = run_session_inner(config, deps, dry_run, today, now, &session_id).await;

    match &result {
        Ok(outcome) => {
            info!(%session_id, ?outcome, "session complete");
        }
        Err(e) => {
            error!(%session_id, error = %e, "session failed");
            deps.alerts
                .send(Severity::Critical, "Session failed", &format!("{session_id}: {e}"))
                .await;
        }
    }
    result
}

async fn run_session_inner(
    config: &Config,
    deps: &SessionDeps,
    dry_run: bool,
    today: NaiveDate,
    now: DateTime<Utc>,
    session_id: &str,
) -> Result<SessionOutcome, EngineError> {
    let cache = BarCache::new(&config.data.cache_dir)
        .map_err(|e| EngineError::DataGap(e.to_string()))?;
    let _lock = CacheLock::acquire(std::path::Path::new(&config.data.cache_dir))?;

    // Data sync: cache first, providers fill the delta.
    let provider_refs: Vec<&dyn MarketData> =
        deps.providers.iter().map(|p| p.as_ref()).collect();
    let syncer = DataSyncer::new(&cache, provider_refs, config.data.history_start);
    let histories = syncer.sync(&config.data.tickers, today).await?;

    let ndx = histories
        .get("NDX")
        .ok_or_else(|| EngineError::DataGap("NDX not in configured tickers".into()))?;
    let closes = latest_closes(&histories, today)?;

    // Previous allocation is derived from live positions (stateless core).
    let snapshot = deps.broker.get_account().await?;
    let previous = allocation_from_positions(&snapshot);
    info!(
        %session_id,
        equity = %snapshot.equity,
        prev_tqqq = %previous.tqqq,
        prev_sqqq = %previous.sqqq,
        "account snapshot"
    );

    // Signals and allocation.
    let engine = StrategyEngine::new(SignalCombiner::new(config.strategy.clone()));
    let (allocation, _signals) = engine.evaluate(&ndx.closes_f64(), &previous)?;
    deps.alerts
        .send(
            Severity::Info,
            "Target allocation",
            &format!(
                "TQQQ {} / SQQQ {} / BIL {} (composite {:.3})",
                allocation.tqqq, allocation.sqqq, allocation.bil, allocation.composite
            ),
        )
        .await;

    // Reconcile.
    let reconciler = Reconciler::new(&config.strategy, &config.execution);
    let plan = reconciler.plan(&allocation, &snapshot, &closes)?;
    if plan.is_empty() {
        info!(%session_id, "portfolio already at target");
        deps.alerts
            .send(Severity::Info, "No action", "Portfolio within threshold.")
            .await;
        return Ok(SessionOutcome::NoTradesNeeded);
    }

    // Live gate: execution window and market clock.
    if !dry_run {
        let in_window = calendar::within_execution_window(
            now,
            today,
            config.execution.et_utc_offset_hours,
            config.execution.window_start_minutes_before_close,
            config.execution.window_end_minutes_before_close,
        );
        if !in_window {
            warn!(%session_id, "outside execution window, skipping orders");
            deps.alerts
                .send(Severity::Warn, "Skipped", "Outside execution window.")
                .await;
            return Ok(SessionOutcome::Skipped);
        }
        if !deps.broker.is_market_open().await? {
            warn!(%session_id, "market closed, skipping orders");
            deps.alerts
                .send(Severity::Warn, "Skipped", "Market is closed.")
                .await;
            return Ok(SessionOutcome::Skipped);
        }
    }

    // Execute. The deadline is the time remaining until
    // market_close - buffer, measured from the session clock.
    let remaining = calendar::order_deadline(
        today,
        config.execution.et_utc_offset_hours,
        config.execution.market_close_buffer_secs,
    ) - now;
    let deadline = Utc::now() + remaining;
    let executor = OrderExecutor::new(deps.broker.as_ref(), &config.execution, deadline);
    let report = executor.execute(&plan, dry_run).await?;

    if report.deadline_breached {
        deps.alerts
            .send(
                Severity::Critical,
                "Deadline breached",
                "In-flight orders canceled; session incomplete.",
            )
            .await;
        return Err(EngineError::DeadlineExceeded(
            "orders aborted at market_close - buffer".into(),
        ));
    }

    let failures: Vec<String> = report
        .failures()
        .map(|o| format!("{} {} {}: {}", o.planned.side, o.planned.quantity, o.planned.symbol,
            o.error.as_deref().unwrap_or("unknown")))
        .collect();
    let partials = report.partial_fills().count();

    if report.dry_run {
        deps.alerts
            .send(
                Severity::Info,
                "Dry run",
                &format!("{} orders planned, none submitted.", report.outcomes.len()),
            )
            .await;
    } else if !failures.is_empty() {
        deps.alerts
            .send(
                Severity::Warn,
                "Execution finished with failures",
                &failures.join("\n"),
            )
            .await;
    } else if partials > 0 {
        deps.alerts
            .send(
                Severity::Warn,
                "Partial fills",
                &format!("{partials} orders partially filled."),
            )
            .await;
    } else {
        deps.alerts
            .send(
                Severity::Info,
                "Execution complete",
                &format!("All {} orders filled.", report.outcomes.len()),
            )
            .await;
    }

    Ok(SessionOutcome::Traded)
}

/// Latest usable close per plan symbol; the cache must be fresh.
fn latest_closes(
    histories: &HashMap<String, PriceHistory>,
    today: NaiveDate,
) -> Result<HashMap<String, Decimal>, EngineError> {
    let mut closes = HashMap::new();
    for symbol in ["TQQQ", "SQQQ", "BIL"] {
        let history = histories
            .get(symbol)
            .ok_or_else(|| EngineError::DataGap(format!("{symbol} not synced")))?;
        let bar = history
            .last_bar()
            .ok_or_else(|| EngineError::DataGap(format!("{symbol} has no bars")))?;
        if (today - bar.date).num_days() > MAX_CALENDAR_GAP_DAYS {
            return Err(EngineError::DataGap(format!(
                "{symbol} latest close {} is stale for {today}",
                bar.date
            )));
        }
        closes.insert(symbol.to_string(), bar.close);
    }
    Ok(closes)
}

/// Sync the cache and validate it; the `sync` subcommand.
pub async fn run_sync(
    config: &Config,
    providers: Vec<Box<dyn MarketData>>,
    today: NaiveDate,
) -> Result<(), EngineError> {
    let cache = BarCache::new(&config.data.cache_dir)
        .map_err(|e| EngineError::DataGap(e.to_string()))?;
    let _lock = CacheLock::acquire(std::path::Path::new(&config.data.cache_dir))?;
    let provider_refs: Vec<&dyn MarketData> = providers.iter().map(|p| p.as_ref()).collect();
    let syncer = DataSyncer::new(&cache, provider_refs, config.data.history_start);
    syncer.sync(&config.data.tickers, today).await?;
    for ticker in &config.data.tickers {
        cache.validate(ticker)?;
    }
    info!("cache synced and validated");
    Ok(())
}

/// Replay the strategy over cached bars; the `backtest` subcommand.
pub fn run_backtest(
    config: &Config,
    backtest_config: BacktestConfig,
) -> Result<BacktestResult, EngineError> {
    let cache = BarCache::new(&config.data.cache_dir)
        .map_err(|e| EngineError::DataGap(e.to_string()))?;
    let _lock = CacheLock::acquire(std::path::Path::new(&config.data.cache_dir))?;

    let read = |symbol: &str| -> Result<PriceHistory, EngineError> {
        cache
            .read(symbol)
            .map_err(|e| EngineError::DataGap(format!("{symbol}: {e}")))
    };
    let ndx = read("NDX")?;
    let tqqq = read("TQQQ")?;
    let sqqq = read("SQQQ")?;
    let bil = read("BIL").ok().filter(|h| !h.is_empty());

    let engine = StrategyEngine::new(SignalCombiner::new(config.strategy.clone()));
    let reconciler = Reconciler::new(&config.strategy, &config.execution);
    BacktestEngine::new(engine, reconciler, backtest_config).run(
        &ndx,
        &tqqq,
        &sqqq,
        bil.as_ref(),
    )
}

// ==================== Wiring ====================

/// Build market-data providers from config, in priority order.
pub fn build_providers(
    config: &Config,
    secrets: &dyn Secrets,
) -> Result<Vec<Box<dyn MarketData>>, EngineError> {
    let mut providers: Vec<Box<dyn MarketData>> = Vec::new();
    for name in &config.data.providers {
        match name.as_str() {
            "polygon" => {
                let api_key = secrets.get("polygon/api_key")?;
                providers.push(Box::new(PolygonClient::new(api_key)?));
            }
            "stooq" => providers.push(Box::new(StooqClient::new()?)),
            other => {
                return Err(EngineError::Config(format!(
                    "unknown market-data provider '{other}'"
                )))
            }
        }
    }
    if providers.is_empty() {
        return Err(EngineError::Config("no market-data providers configured".into()));
    }
    Ok(providers)
}

fn build_single_broker(
    name: &str,
    config: &Config,
    secrets: &dyn Secrets,
) -> Result<Arc<dyn Brokerage>, EngineError> {
    match name {
        "alpaca" => {
            let key = secrets.get("alpaca/api_key")?;
            let secret = secrets.get("alpaca/api_secret")?;
            Ok(Arc::new(AlpacaClient::new(
                key,
                secret,
                config.brokers.alpaca_paper,
            )?))
        }
        "paper" => Ok(Arc::new(PaperBroker::new(Decimal::from(100_000)))),
        other => Err(EngineError::Config(format!("unknown brokerage '{other}'"))),
    }
}

/// Build the failover brokerage stack for `today`'s session.
pub fn build_broker(
    config: &Config,
    secrets: &dyn Secrets,
    today: NaiveDate,
) -> Result<Arc<dyn Brokerage>, EngineError> {
    let primary = build_single_broker(&config.brokers.primary, config, secrets)?;
    let secondary = config
        .brokers
        .secondary
        .as_deref()
        .map(|name| build_single_broker(name, config, secrets))
        .transpose()?;
    let deadline = calendar::order_deadline(
        today,
        config.execution.et_utc_offset_hours,
        config.execution.market_close_buffer_secs,
    );
    Ok(Arc::new(FailoverBroker::new(
        primary,
        secondary,
        RetryPolicy {
            base_secs: config.execution.retry_base_secs,
            cap_secs: config.execution.retry_cap_secs,
            max_attempts: config.execution.retry_max_attempts,
        },
        Some(deadline),
    )))
}

/// Build the configured alert sink.
pub fn build_alerts(
    config: &Config,
    secrets: &dyn Secrets,
) -> Result<Arc<dyn AlertSink>, EngineError> {
    match config.alerts.provider.as_str() {
        "noop" => Ok(Arc::new(NoopAlerts)),
        "telegram" => {
            let token = secrets.get("telegram/bot_token")?;
            let chat_id = secrets.get("telegram/chat_id")?;
            let sink = TelegramAlerts::new(token, chat_id)
                .ok_or_else(|| EngineError::Config("telegram alert init failed".into()))?;
            Ok(Arc::new(sink))
        }
        "ntfy" => {
            let topic = config.alerts.ntfy_topic.clone().ok_or_else(|| {
                EngineError::Config("ntfy provider needs alerts.ntfy_topic".into())
            })?;
            let sink = NtfyAlerts::new(topic)
                .ok_or_else(|| EngineError::Config("ntfy alert init failed".into()))?;
            Ok(Arc::new(sink))
        }
        "composite" => {
            // Every channel we can construct from available secrets.
            let mut sinks: Vec<Box<dyn AlertSink>> = Vec::new();
            if let (Ok(token), Ok(chat)) = (
                secrets.get("telegram/bot_token"),
                secrets.get("telegram/chat_id"),
            ) {
                if let Some(sink) = TelegramAlerts::new(token, chat) {
                    sinks.push(Box::new(sink));
                }
            }
            if let Some(topic) = config.alerts.ntfy_topic.clone() {
                if let Some(sink) = NtfyAlerts::new(topic) {
                    sinks.push(Box::new(sink));
                }
            }
            if sinks.is_empty() {
                sinks.push(Box::new(NoopAlerts));
            }
            Ok(Arc::new(CompositeAlerts::new(sinks)))
        }
        other => Err(EngineError::Config(format!("unknown alert provider '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::testdata::weekday_bars;
    use crate::data::Bar;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    struct NoProviders;

    #[async_trait]
    impl MarketData for NoProviders {
        fn name(&self) -> &'static str {
            "none"
        }
        async fn daily_bars(
            &self,
            _symbol: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<Bar>, EngineError> {
            Err(EngineError::Provider("offline".into()))
        }
    }

    /// Seed a cache with 300 sessions of calm uptrend for all tickers and
    /// return (config, today).
    fn seeded(dir: &TempDir) -> (Config, NaiveDate) {
        let mut config = Config::default();
        config.data.cache_dir = dir.path().to_str().unwrap().to_string();
        let cache = BarCache::new(dir.path()).unwrap();

        let ndx: Vec<f64> = (0..300).map(|i| 15000.0 * 1.0005f64.powi(i)).collect();
        let tqqq: Vec<f64> = (0..300).map(|i| 50.0 * 1.0015f64.powi(i)).collect();
        let sqqq: Vec<f64> = (0..300).map(|i| 20.0 * 0.9985f64.powi(i)).collect();
        let bil: Vec<f64> = vec![91.5; 300];

        cache.append("NDX", weekday_bars(&ndx)).unwrap();
        cache.append("TQQQ", weekday_bars(&tqqq)).unwrap();
        cache.append("SQQQ", weekday_bars(&sqqq)).unwrap();
        let bil_bars = weekday_bars(&bil);
        let today = bil_bars.last().unwrap().date;
        cache.append("BIL", bil_bars).unwrap();

        (config, today)
    }

    fn deps_with_paper(broker: Arc<PaperBroker>) -> SessionDeps {
        SessionDeps {
            providers: vec![Box::new(NoProviders)],
            broker,
            alerts: Arc::new(NoopAlerts),
        }
    }

    fn final_close(base: f64, drift: f64) -> Decimal {
        use rust_decimal::prelude::FromPrimitive;
        Decimal::from_f64(base * drift.powi(299)).unwrap().round_dp(8)
    }

    async fn priced_paper(cash: Decimal) -> Arc<PaperBroker> {
        let broker = Arc::new(PaperBroker::new(cash));
        // Prices match the final cached closes exactly.
        broker.set_price("TQQQ", final_close(50.0, 1.0015)).await;
        broker.set_price("SQQQ", final_close(20.0, 0.9985)).await;
        broker.set_price("BIL", dec!(91.5)).await;
        broker
    }

    #[tokio::test]
    async fn dry_run_session_plans_without_orders() {
        let dir = TempDir::new().unwrap();
        let (config, today) = seeded(&dir);
        let broker = priced_paper(dec!(100_000)).await;
        let deps = deps_with_paper(broker.clone());

        let outcome = run_session(&config, &deps, true, today, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, SessionOutcome::Traded);

        let account = broker.get_account().await.unwrap();
        assert_eq!(account.quantity_of("TQQQ"), 0);
        assert_eq!(account.cash, dec!(100_000));
    }

    #[tokio::test]
    async fn live_session_places_orders_inside_window() {
        let dir = TempDir::new().unwrap();
        let (config, today) = seeded(&dir);
        let broker = priced_paper(dec!(100_000)).await;
        let deps = deps_with_paper(broker.clone());

        // Five minutes before the close.
        let now = calendar::session_close_utc(today, config.execution.et_utc_offset_hours)
            - chrono::Duration::minutes(5);
        let outcome = run_session(&config, &deps, false, today, now).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Traded);

        let account = broker.get_account().await.unwrap();
        assert!(account.quantity_of("TQQQ") > 0, "calm uptrend buys TQQQ");
    }

    #[tokio::test]
    async fn outside_window_skips_orders() {
        let dir = TempDir::new().unwrap();
        let (config, today) = seeded(&dir);
        let broker = priced_paper(dec!(100_000)).await;
        let deps = deps_with_paper(broker.clone());

        let now = calendar::session_close_utc(today, config.execution.et_utc_offset_hours)
            - chrono::Duration::hours(3);
        let outcome = run_session(&config, &deps, false, today, now).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Skipped);
        assert_eq!(broker.get_account().await.unwrap().quantity_of("TQQQ"), 0);
    }

    #[tokio::test]
    async fn empty_cache_fails_with_data_gap() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data.cache_dir = dir.path().to_str().unwrap().to_string();
        let broker = priced_paper(dec!(100_000)).await;
        let deps = deps_with_paper(broker);

        let err = run_session(&config, &deps, true, NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Provider(_) | EngineError::DataGap(_)));
    }

    #[tokio::test]
    async fn session_already_at_target_needs_no_trades() {
        let dir = TempDir::new().unwrap();
        let (config, today) = seeded(&dir);
        let broker = priced_paper(dec!(100)).await;
        // Position the book at 100% TQQQ, which is the calm-uptrend target.
        broker
            .set_position("TQQQ", 2000, final_close(50.0, 1.0015))
            .await;
        let deps = deps_with_paper(broker.clone());

        let outcome = run_session(&config, &deps, true, today, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, SessionOutcome::NoTradesNeeded);
    }

    #[tokio::test]
    async fn run_backtest_replays_from_cache() {
        let dir = TempDir::new().unwrap();
        let (config, _today) = seeded(&dir);
        let backtest_config = BacktestConfig::new(
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            dec!(100_000),
        );
        let result = run_backtest(&config, backtest_config).unwrap();
        assert!(!result.records.is_empty());
        assert!(result.metrics.trading_days > 0);
    }

    #[test]
    fn unknown_provider_is_a_config_error() {
        let mut config = Config::default();
        config.data.providers = vec!["bloomberg".to_string()];
        struct NoSecrets;
        impl Secrets for NoSecrets {
            fn get(&self, key: &str) -> Result<String, EngineError> {
                Err(EngineError::Config(format!("missing {key}")))
            }
        }
        let err = build_providers(&config, &NoSecrets).err().unwrap();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
