//! Rolling price indicators shared by the regime detector and the allocator.

const EPSILON: f64 = 1e-12;

/// Simple moving average of the last `window` values. `None` when the
/// history is shorter than the window.
pub fn sma(values: &[f64], window: usize) -> Option<f64> {
    if window == 0 || values.len() < window {
        return None;
    }
    let tail = &values[values.len() - window..];
    Some(tail.iter().sum::<f64>() / window as f64)
}

/// Latest Wilder-smoothed RSI.
///
/// The seed averages take the first `period + 1` price changes divided by
/// `period`; every later change is folded in with Wilder smoothing. A window
/// with no losses reads 100 when it had gains and 50 when perfectly flat.
pub fn wilder_rsi(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < period + 2 {
        return 50.0;
    }
    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let seed = &deltas[..=period];
    let mut up = seed.iter().filter(|d| **d >= 0.0).sum::<f64>() / period as f64;
    let mut down = -seed.iter().filter(|d| **d < 0.0).sum::<f64>() / period as f64;

    let p = period as f64;
    for i in period..closes.len() {
        let delta = deltas[i - 1];
        if delta >= 0.0 {
            up = (up * (p - 1.0) + delta) / p;
            down = (down * (p - 1.0)) / p;
        } else {
            up = (up * (p - 1.0)) / p;
            down = (down * (p - 1.0) - delta) / p;
        }
    }

    rsi_from_averages(up, down)
}

fn rsi_from_averages(up: f64, down: f64) -> f64 {
    if down.abs() < EPSILON {
        return if up > EPSILON { 100.0 } else { 50.0 };
    }
    let rs = up / down;
    100.0 - 100.0 / (1.0 + rs)
}

/// Rolling sample standard deviation of log returns, in percent.
///
/// Entry `i` covers the `window` log returns ending at price `i` and is
/// `None` for `i < window`. Non-positive prices yield a zero return.
pub fn rolling_log_volatility(closes: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if window < 2 || closes.len() <= window {
        return out;
    }
    let log_returns: Vec<f64> = closes
        .windows(2)
        .map(|w| {
            if w[0] > 0.0 && w[1] > 0.0 {
                (w[1] / w[0]).ln()
            } else {
                0.0
            }
        })
        .collect();

    for (i, slot) in out.iter_mut().enumerate().skip(window) {
        let slice = &log_returns[i - window..i];
        *slot = Some(sample_std(slice) * 100.0);
    }
    out
}

/// Mean of the defined values among the last `lookback` entries.
pub fn trailing_mean(values: &[Option<f64>], lookback: usize) -> Option<f64> {
    let start = values.len().saturating_sub(lookback);
    let defined: Vec<f64> = values[start..].iter().flatten().copied().collect();
    if defined.is_empty() {
        None
    } else {
        Some(defined.iter().sum::<f64>() / defined.len() as f64)
    }
}

/// Fractional change over `window` periods. Zero when the history is too
/// short or the base price is zero.
pub fn momentum(closes: &[f64], window: usize) -> f64 {
    let n = closes.len();
    if window == 0 || n <= window {
        return 0.0;
    }
    let base = closes[n - 1 - window];
    if base.abs() < EPSILON {
        return 0.0;
    }
    (closes[n - 1] - base) / base
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Standard deviation with `n - 1` in the denominator.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Standard deviation with `n` in the denominator.
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}
