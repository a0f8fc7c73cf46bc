//! Technical indicator primitives
//!
//! Free functions over price slices. Warm-up cells where a rolling
//! window lacks history are `f64::NAN`; downstream signal logic treats
//! NaN the same as "no signal" (any comparison with NaN is false).

use crate::bars::Bar;

/// Simple rolling mean over `window` values. The first `window - 1`
/// outputs are NaN.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }

    let mut sum: f64 = values[..window].iter().sum();
    out[window - 1] = sum / window as f64;

    for i in window..values.len() {
        sum += values[i] - values[i - window];
        out[i] = sum / window as f64;
    }

    out
}

/// Exponential moving average with smoothing alpha = 2 / (period + 1),
/// seeded with the first value.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    if values.is_empty() || period == 0 {
        return vec![f64::NAN; values.len()];
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut current = values[0];
    out.push(current);

    for &value in &values[1..] {
        current = alpha * value + (1.0 - alpha) * current;
        out.push(current);
    }

    out
}

/// True range per bar: max(high - low, |high - prev close|, |low - prev close|).
/// The first bar has no previous close, so its true range is high - low.
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let hl = bar.high - bar.low;
            if i == 0 {
                hl
            } else {
                let prev_close = bars[i - 1].close;
                hl.max((bar.high - prev_close).abs())
                    .max((bar.low - prev_close).abs())
            }
        })
        .collect()
}

/// Average True Range: simple rolling mean of true range over `period` bars.
pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    rolling_mean(&true_range(bars), period)
}

/// Strict swing highs over a symmetric window: bar i is a swing high iff
/// its high strictly exceeds every high within `length` bars on each
/// side. Boundary bars (first/last `length`) have no swing value.
pub fn swing_highs(bars: &[Bar], length: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; bars.len()];
    if length == 0 || bars.len() < 2 * length + 1 {
        return out;
    }

    for i in length..bars.len() - length {
        let current = bars[i].high;
        let is_high = (1..=length)
            .all(|j| bars[i - j].high < current && bars[i + j].high < current);
        if is_high {
            out[i] = current;
        }
    }

    out
}

/// Strict swing lows, symmetric rule to [`swing_highs`].
pub fn swing_lows(bars: &[Bar], length: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; bars.len()];
    if length == 0 || bars.len() < 2 * length + 1 {
        return out;
    }

    for i in length..bars.len() - length {
        let current = bars[i].low;
        let is_low = (1..=length)
            .all(|j| bars[i - j].low > current && bars[i + j].low > current);
        if is_low {
            out[i] = current;
        }
    }

    out
}

/// Carry the last defined value forward. Leading NaN cells stay NaN.
pub fn forward_fill(values: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let mut last = f64::NAN;

    for &value in values {
        if !value.is_nan() {
            last = value;
        }
        out.push(last);
    }

    out
}
