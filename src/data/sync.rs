//! Cache-delta synchronization.
//!
//! For each configured ticker, fetch only the bars between the cache's
//! latest date and today, falling back from the primary provider to the
//! secondary, and to the cache alone when both fail but the cache is
//! still fresh enough to trade on.

use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::data::cache::BarCache;
use crate::data::calendar;
use crate::data::provider::MarketData;
use crate::data::PriceHistory;
use crate::error::EngineError;

pub struct DataSyncer<'a> {
    cache: &'a BarCache,
    providers: Vec<&'a dyn MarketData>,
    history_start: NaiveDate,
    provider_attempts: u32,
}

impl<'a> DataSyncer<'a> {
    /// `providers` in priority order (primary first).
    pub fn new(
        cache: &'a BarCache,
        providers: Vec<&'a dyn MarketData>,
        history_start: NaiveDate,
    ) -> Self {
        Self {
            cache,
            providers,
            history_start,
            provider_attempts: 3,
        }
    }

    /// Attempts per provider before moving down the chain.
    pub fn with_provider_attempts(mut self, attempts: u32) -> Self {
        self.provider_attempts = attempts.max(1);
        self
    }

    /// Bring every ticker up to `today` and return the combined histories.
    pub async fn sync(
        &self,
        tickers: &[String],
        today: NaiveDate,
    ) -> Result<HashMap<String, PriceHistory>, EngineError> {
        let mut out = HashMap::with_capacity(tickers.len());
        for ticker in tickers {
            let history = self.sync_symbol(ticker, today).await?;
            out.insert(ticker.clone(), history);
        }
        Ok(out)
    }

    async fn sync_symbol(
        &self,
        symbol: &str,
        today: NaiveDate,
    ) -> Result<PriceHistory, EngineError> {
        let last_cached = self
            .cache
            .last_date(symbol)
            .map_err(|e| EngineError::DataGap(format!("{symbol}: {e}")))?;

        let fetch_start = match last_cached {
            Some(last) if last >= calendar::previous_session(today) => {
                info!(%symbol, %last, "cache is current, skipping fetch");
                return self
                    .cache
                    .read(symbol)
                    .map_err(|e| EngineError::DataGap(format!("{symbol}: {e}")));
            }
            Some(last) => last + Duration::days(1),
            None => self.history_start,
        };

        match self.fetch_delta(symbol, fetch_start, today).await {
            Ok(bars) if !bars.is_empty() => {
                let history = self
                    .cache
                    .append(symbol, bars)
                    .map_err(|e| EngineError::DataGap(format!("{symbol}: {e}")))?;
                history.check_gaps(crate::data::cache::MAX_CALENDAR_GAP_DAYS)?;
                Ok(history)
            }
            Ok(_) => {
                // Providers returned nothing new (holiday stretch or a lag
                // at the vendor). The cache must still be fresh enough.
                self.cached_if_fresh(symbol, today)
            }
            Err(e) => {
                warn!(%symbol, error = %e, "all providers failed, trying cache");
                self.cached_if_fresh(symbol, today).map_err(|_| e)
            }
        }
    }

    async fn fetch_delta(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<crate::data::Bar>, EngineError> {
        let mut last_error = EngineError::Provider("no market-data providers configured".into());
        for provider in &self.providers {
            for attempt in 1..=self.provider_attempts {
                match provider.daily_bars(symbol, start, end).await {
                    Ok(bars) => {
                        info!(
                            %symbol,
                            provider = provider.name(),
                            rows = bars.len(),
                            %start,
                            %end,
                            "delta fetched"
                        );
                        return Ok(bars);
                    }
                    Err(e) => {
                        warn!(
                            %symbol,
                            provider = provider.name(),
                            attempt,
                            error = %e,
                            "provider failed"
                        );
                        let retriable = e.is_retriable();
                        last_error = e;
                        if !retriable {
                            break;
                        }
                        if attempt < self.provider_attempts {
                            tokio::time::sleep(std::time::Duration::from_secs(
                                u64::from(attempt),
                            ))
                            .await;
                        }
                    }
                }
            }
        }
        Err(last_error)
    }

    /// The cache alone is acceptable only when its latest bar is within
    /// the tolerated calendar gap of today.
    fn cached_if_fresh(
        &self,
        symbol: &str,
        today: NaiveDate,
    ) -> Result<PriceHistory, EngineError> {
        let history = self
            .cache
            .read(symbol)
            .map_err(|e| EngineError::DataGap(format!("{symbol}: {e}")))?;
        match history.last_bar() {
            Some(last)
                if (today - last.date).num_days()
                    <= crate::data::cache::MAX_CALENDAR_GAP_DAYS =>
            {
                Ok(history)
            }
            Some(last) => Err(EngineError::DataGap(format!(
                "{symbol}: cache stale, latest bar {} vs today {}",
                last.date, today
            ))),
            None => Err(EngineError::DataGap(format!("{symbol}: cache is empty"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::testdata::weekday_bars;
    use crate::data::Bar;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct FixedProvider {
        bars: Vec<Bar>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MarketData for FixedProvider {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn daily_bars(
            &self,
            _symbol: &str,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<Bar>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .bars
                .iter()
                .filter(|b| b.date >= start && b.date <= end)
                .cloned()
                .collect())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl MarketData for FailingProvider {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn daily_bars(
            &self,
            _symbol: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<Bar>, EngineError> {
            Err(EngineError::Provider("503".into()))
        }
    }

    fn start_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    }

    #[tokio::test]
    async fn fills_delta_from_provider() {
        let dir = TempDir::new().unwrap();
        let cache = BarCache::new(dir.path()).unwrap();
        let all = weekday_bars(&[100.0, 101.0, 102.0, 103.0]);
        cache.append("TQQQ", all[..2].to_vec()).unwrap();

        let provider = FixedProvider {
            bars: all.clone(),
            calls: AtomicUsize::new(0),
        };
        let syncer = DataSyncer::new(&cache, vec![&provider], start_date());

        let today = all[3].date;
        let history = syncer.sync_symbol("TQQQ", today).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn current_cache_skips_the_network() {
        let dir = TempDir::new().unwrap();
        let cache = BarCache::new(dir.path()).unwrap();
        let all = weekday_bars(&[100.0, 101.0, 102.0]);
        cache.append("TQQQ", all.clone()).unwrap();

        let provider = FixedProvider {
            bars: vec![],
            calls: AtomicUsize::new(0),
        };
        let syncer = DataSyncer::new(&cache, vec![&provider], start_date());

        // "Today" is the next session after the last cached bar.
        let today = calendar::next_session(all[2].date);
        let history = syncer.sync_symbol("TQQQ", today).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_failure_falls_back_to_fresh_cache() {
        let dir = TempDir::new().unwrap();
        let cache = BarCache::new(dir.path()).unwrap();
        let all = weekday_bars(&[100.0, 101.0, 102.0]);
        cache.append("TQQQ", all.clone()).unwrap();

        let syncer = DataSyncer::new(&cache, vec![&FailingProvider], start_date())
            .with_provider_attempts(1);

        let today = all[2].date + Duration::days(3);
        let history = syncer.sync_symbol("TQQQ", today).await.unwrap();
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn provider_failure_with_stale_cache_is_a_data_gap() {
        let dir = TempDir::new().unwrap();
        let cache = BarCache::new(dir.path()).unwrap();
        let all = weekday_bars(&[100.0, 101.0]);
        cache.append("TQQQ", all.clone()).unwrap();

        let syncer = DataSyncer::new(&cache, vec![&FailingProvider], start_date())
            .with_provider_attempts(1);

        let today = all[1].date + Duration::days(30);
        let err = syncer.sync_symbol("TQQQ", today).await.unwrap_err();
        assert!(matches!(err, EngineError::Provider(_)));
    }

    #[tokio::test]
    async fn second_provider_covers_primary_failure() {
        let dir = TempDir::new().unwrap();
        let cache = BarCache::new(dir.path()).unwrap();
        let all = weekday_bars(&[100.0, 101.0, 102.0]);

        let fallback = FixedProvider {
            bars: all.clone(),
            calls: AtomicUsize::new(0),
        };
        let syncer = DataSyncer::new(&cache, vec![&FailingProvider, &fallback], start_date())
            .with_provider_attempts(1);

        let history = syncer.sync_symbol("TQQQ", all[2].date).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    }
}
