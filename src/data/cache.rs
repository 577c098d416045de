//! CSV-backed local cache for daily bars.
//!
//! One file per symbol (`{symbol}_daily.csv`), always sorted by date with
//! no duplicates. A lock file gives a process-level advisory lock so two
//! runs never touch the same cache concurrently.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::data::{Bar, PriceHistory};
use crate::error::EngineError;

const CSV_HEADER: &str = "date,open,high,low,close,volume";

/// Maximum tolerated calendar gap between consecutive bars. Allows long
/// weekends and holiday clusters, catches gross gaps.
pub const MAX_CALENDAR_GAP_DAYS: i64 = 5;

pub struct BarCache {
    cache_dir: PathBuf,
}

impl BarCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)
            .with_context(|| format!("failed to create cache dir {}", cache_dir.display()))?;
        debug!(dir = %cache_dir.display(), "bar cache ready");
        Ok(Self { cache_dir })
    }

    /// Read the cached history for a symbol. Missing file -> empty history.
    pub fn read(&self, symbol: &str) -> Result<PriceHistory> {
        let path = self.path_for(symbol);
        if !path.exists() {
            debug!(%symbol, "cache miss");
            return Ok(PriceHistory::new(symbol, Vec::new())?);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let bars = parse_csv(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        debug!(%symbol, rows = bars.len(), "cache hit");
        Ok(PriceHistory::new(symbol, bars)?)
    }

    /// Overwrite the entire cache file for a symbol.
    pub fn write(&self, symbol: &str, history: &PriceHistory) -> Result<()> {
        let path = self.path_for(symbol);
        let mut out = String::with_capacity(64 * history.len() + 32);
        out.push_str(CSV_HEADER);
        out.push('\n');
        for bar in history.bars() {
            out.push_str(&format!(
                "{},{},{},{},{},{}\n",
                bar.date, bar.open, bar.high, bar.low, bar.close, bar.volume
            ));
        }
        fs::write(&path, out)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(%symbol, rows = history.len(), path = %path.display(), "cache written");
        Ok(())
    }

    /// Append new bars, deduplicating by date (fresh data wins), and
    /// return the combined history.
    pub fn append(&self, symbol: &str, new_bars: Vec<Bar>) -> Result<PriceHistory> {
        let existing = self.read(symbol)?;
        let appended = new_bars.len();

        let mut combined: Vec<Bar> = existing.bars().to_vec();
        for bar in new_bars {
            match combined.iter().position(|b| b.date == bar.date) {
                Some(i) => combined[i] = bar,
                None => combined.push(bar),
            }
        }
        let history = PriceHistory::new(symbol, combined)?;
        self.write(symbol, &history)?;
        info!(%symbol, appended, total = history.len(), "cache appended");
        Ok(history)
    }

    /// Most recent cached session date for a symbol, if any.
    pub fn last_date(&self, symbol: &str) -> Result<Option<NaiveDate>> {
        Ok(self.read(symbol)?.last_bar().map(|b| b.date))
    }

    /// Integrity check: non-empty, sorted, deduplicated, no gross gaps.
    pub fn validate(&self, symbol: &str) -> Result<(), EngineError> {
        let history = self
            .read(symbol)
            .map_err(|e| EngineError::DataGap(format!("{symbol}: {e}")))?;
        if history.is_empty() {
            warn!(%symbol, "validation failed: cache is empty");
            return Err(EngineError::DataGap(format!("{symbol}: cache is empty")));
        }
        history.check_gaps(MAX_CALENDAR_GAP_DAYS)?;
        debug!(%symbol, rows = history.len(), "validation passed");
        Ok(())
    }

    fn path_for(&self, symbol: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}_daily.csv", symbol.to_lowercase()))
    }
}

fn parse_csv(content: &str) -> Result<Vec<Bar>> {
    let mut bars = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line_no == 0 && line.starts_with("date") {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 6 {
            anyhow::bail!(
                "line {}: expected 6 columns ({CSV_HEADER}), got {}",
                line_no + 1,
                fields.len()
            );
        }
        bars.push(Bar {
            date: fields[0]
                .trim()
                .parse()
                .with_context(|| format!("line {}: bad date {}", line_no + 1, fields[0]))?,
            open: fields[1]
                .trim()
                .parse()
                .with_context(|| format!("line {}: bad open {}", line_no + 1, fields[1]))?,
            high: fields[2]
                .trim()
                .parse()
                .with_context(|| format!("line {}: bad high {}", line_no + 1, fields[2]))?,
            low: fields[3]
                .trim()
                .parse()
                .with_context(|| format!("line {}: bad low {}", line_no + 1, fields[3]))?,
            close: fields[4]
                .trim()
                .parse()
                .with_context(|| format!("line {}: bad close {}", line_no + 1, fields[4]))?,
            volume: fields[5]
                .trim()
                .parse()
                .with_context(|| format!("line {}: bad volume {}", line_no + 1, fields[5]))?,
        });
    }
    Ok(bars)
}

/// Process-level advisory lock over a cache directory, held for the
/// duration of a run. Released on drop.
pub struct CacheLock {
    path: PathBuf,
}

impl CacheLock {
    pub fn acquire(cache_dir: &Path) -> Result<Self, EngineError> {
        let path = cache_dir.join(".whitelight.lock");
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {
                debug!(path = %path.display(), "cache lock acquired");
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(
                EngineError::DataGap(format!(
                    "cache is locked by another run ({})",
                    path.display()
                )),
            ),
            Err(e) => Err(EngineError::DataGap(format!(
                "cannot acquire cache lock: {e}"
            ))),
        }
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(error = %e, "failed to release cache lock");
        }
    }
}
