//! Shared indicator primitives for the White Light strategy layer.
//!
//! All functions operate on close-price slices and return a series aligned
//! to the input, with `f64::NAN` during the warm-up window. Scalar `*_last`
//! helpers read the final value as an `Option`.
//!
//! Numeric policy: 64-bit floats, sample standard deviation (n-1
//! denominator), divisions by zero resolve to a neutral output.

/// Annualization factor for daily data.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Simple moving average. Undefined (`NAN`) for the first `n - 1` points.
pub fn sma(series: &[f64], n: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; series.len()];
    if n == 0 || series.len() < n {
        return out;
    }
    let mut window_sum: f64 = series[..n].iter().sum();
    out[n - 1] = window_sum / n as f64;
    for i in n..series.len() {
        window_sum += series[i] - series[i - n];
        out[i] = window_sum / n as f64;
    }
    out
}

/// Rate of change over `n` sessions: `series[t] / series[t-n] - 1`.
pub fn roc(series: &[f64], n: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; series.len()];
    for i in n..series.len() {
        let base = series[i - n];
        out[i] = if base == 0.0 {
            0.0
        } else {
            series[i] / base - 1.0
        };
    }
    out
}

/// Relative Strength Index with Wilder smoothing, in [0, 100].
pub fn rsi(series: &[f64], n: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; series.len()];
    if n == 0 || series.len() <= n {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=n {
        let delta = series[i] - series[i - 1];
        if delta > 0.0 {
            avg_gain += delta;
        } else {
            avg_loss -= delta;
        }
    }
    avg_gain /= n as f64;
    avg_loss /= n as f64;
    out[n] = rsi_from_averages(avg_gain, avg_loss);

    for i in (n + 1)..series.len() {
        let delta = series[i] - series[i - 1];
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        avg_gain = (avg_gain * (n as f64 - 1.0) + gain) / n as f64;
        avg_loss = (avg_loss * (n as f64 - 1.0) + loss) / n as f64;
        out[i] = rsi_from_averages(avg_gain, avg_loss);
    }
    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

/// Bollinger %B: `(price - lower) / (upper - lower)` with bands at
/// `SMA(n) ± k * stdev(n)`. A zero band width yields the neutral 0.5.
pub fn bollinger_pct_b(series: &[f64], n: usize, k: f64) -> Vec<f64> {
    let mid = sma(series, n);
    let mut out = vec![f64::NAN; series.len()];
    if series.len() < n {
        return out;
    }
    for i in (n - 1)..series.len() {
        let sd = stdev(&series[i + 1 - n..=i]);
        let width = 2.0 * k * sd;
        out[i] = if width == 0.0 {
            0.5
        } else {
            let lower = mid[i] - k * sd;
            (series[i] - lower) / width
        };
    }
    out
}

/// Annualized realized volatility: `stdev(log returns, n) * sqrt(252)`.
pub fn realized_volatility(series: &[f64], n: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; series.len()];
    if series.len() < 2 {
        return out;
    }
    let mut log_returns = vec![f64::NAN; series.len()];
    for i in 1..series.len() {
        log_returns[i] = if series[i - 1] > 0.0 && series[i] > 0.0 {
            (series[i] / series[i - 1]).ln()
        } else {
            0.0
        };
    }
    for i in n..series.len() {
        let sd = stdev(&log_returns[i + 1 - n..=i]);
        out[i] = sd * TRADING_DAYS_PER_YEAR.sqrt();
    }
    out
}

/// Rolling ordinary-least-squares slope over `n` observations, with
/// x = 0..n-1 inside each window. Zero denominator yields a 0.0 slope.
pub fn lin_reg_slope(series: &[f64], n: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; series.len()];
    if n < 2 || series.len() < n {
        return out;
    }
    let nf = n as f64;
    let sum_x = nf * (nf - 1.0) / 2.0;
    let sum_x2 = nf * (nf - 1.0) * (2.0 * nf - 1.0) / 6.0;
    let denom = nf * sum_x2 - sum_x * sum_x;
    if denom == 0.0 {
        for v in out.iter_mut().skip(n - 1) {
            *v = 0.0;
        }
        return out;
    }
    for i in (n - 1)..series.len() {
        let window = &series[i + 1 - n..=i];
        let sum_y: f64 = window.iter().sum();
        let sum_xy: f64 = window
            .iter()
            .enumerate()
            .map(|(x, &y)| x as f64 * y)
            .sum();
        out[i] = (nf * sum_xy - sum_x * sum_y) / denom;
    }
    out
}

/// Rolling z-score over `lookback` observations. A zero standard deviation
/// yields the neutral 0.0.
pub fn zscore(series: &[f64], lookback: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; series.len()];
    if lookback < 2 || series.len() < lookback {
        return out;
    }
    for i in (lookback - 1)..series.len() {
        let window = &series[i + 1 - lookback..=i];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        let mean = window.iter().sum::<f64>() / lookback as f64;
        let sd = stdev(window);
        out[i] = if sd == 0.0 { 0.0 } else { (series[i] - mean) / sd };
    }
    out
}

/// Sample standard deviation (n-1 denominator).
pub fn stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

/// Final value of a series, if defined.
pub fn last(series: &[f64]) -> Option<f64> {
    series.last().copied().filter(|v| !v.is_nan())
}

/// Value `offset` sessions before the end of a series, if defined.
pub fn last_back(series: &[f64], offset: usize) -> Option<f64> {
    if series.len() <= offset {
        return None;
    }
    let v = series[series.len() - 1 - offset];
    (!v.is_nan()).then_some(v)
}
