/// Technical indicators over a price index, used as feature statistics.
///
/// Every function returns a vector aligned with its input: `None` until the
/// indicator has seen enough values, `Some(value)` afterwards.

use crate::models::config::{MovingAverageKind, RsiMethod};

/// Simple Moving Average (SMA)
pub fn sma(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }

    // Running sum; subtract the value that falls out of the window.
    values
        .iter()
        .enumerate()
        .scan(0.0_f64, move |sum, (i, &v)| {
            *sum += v;
            if i >= window {
                *sum -= values[i - window];
            }
            Some(if i + 1 >= window {
                Some(*sum / window as f64)
            } else {
                None
            })
        })
        .collect()
}

/// Exponential Moving Average (EMA) with span `window`, seeded with the first value.
pub fn ema(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if values.is_empty() || window == 0 {
        return vec![None; values.len()];
    }
    let alpha = 2.0 / (window as f64 + 1.0);
    smooth(values, alpha, window)
}

/// Linearly weighted moving average; the newest value has weight `window`.
pub fn wma(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }
    let weight_sum = (window * (window + 1)) as f64 / 2.0;

    (0..values.len())
        .map(|i| {
            if i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            let weighted: f64 = slice
                .iter()
                .enumerate()
                .map(|(k, &v)| (k + 1) as f64 * v)
                .sum();
            Some(weighted / weight_sum)
        })
        .collect()
}

pub fn moving_average(values: &[f64], window: usize, kind: MovingAverageKind) -> Vec<Option<f64>> {
    match kind {
        MovingAverageKind::Simple => sma(values, window),
        MovingAverageKind::Exponential => ema(values, window),
        MovingAverageKind::Weighted => wma(values, window),
    }
}

/// Exponential smoothing with a fixed alpha, hidden until `min_periods` values.
fn smooth(values: &[f64], alpha: f64, min_periods: usize) -> Vec<Option<f64>> {
    if values.is_empty() {
        return Vec::new();
    }
    values
        .iter()
        .enumerate()
        .scan(values[0], move |prev, (i, &v)| {
            let next = if i == 0 { v } else { alpha * v + (1.0 - alpha) * *prev };
            *prev = next;
            Some(if i + 1 >= min_periods { Some(next) } else { None })
        })
        .collect()
}

/// Relative Strength Index (RSI), 0..=100.
///
/// Gains and losses are smoothed either with Wilder's exponential average
/// (alpha = 1 / period) or with a simple rolling mean (Cutler). A market
/// with no losses approaches 100 rather than dividing by zero.
///
/// Index `i` of the output describes the change from `prices[i - 1]` to
/// `prices[i]`; index 0 is always `None`.
pub fn rsi(prices: &[f64], period: usize, method: RsiMethod) -> Vec<Option<f64>> {
    if prices.len() < 2 || period == 0 {
        return vec![None; prices.len()];
    }

    let changes: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let gains: Vec<f64> = changes.iter().map(|&c| c.max(0.0)).collect();
    let losses: Vec<f64> = changes.iter().map(|&c| (-c).max(0.0)).collect();

    let (avg_gain, avg_loss) = match method {
        RsiMethod::Wilder => {
            let alpha = 1.0 / period as f64;
            (smooth(&gains, alpha, period), smooth(&losses, alpha, period))
        }
        RsiMethod::Cutler => (sma(&gains, period), sma(&losses, period)),
    };

    std::iter::once(None)
        .chain(avg_gain.into_iter().zip(avg_loss).map(|(g, l)| match (g, l) {
            (Some(g), Some(l)) => {
                let rs = g / (l + 1e-12);
                Some(100.0 - 100.0 / (1.0 + rs))
            }
            _ => None,
        }))
        .collect()
}

/// MACD histogram: (fast EMA − slow EMA) minus its own signal EMA.
///
/// Defined once the slow EMA and the signal line both have enough values.
pub fn macd_histogram(
    prices: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> Vec<Option<f64>> {
    let len = prices.len();
    if len == 0 {
        return Vec::new();
    }

    let fast = ema(prices, fast_period);
    let slow = ema(prices, slow_period);

    let macd_line: Vec<Option<f64>> = fast
        .iter()
        .zip(slow.iter())
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();

    // Signal EMA runs over the defined part of the MACD line only.
    let first_defined = match macd_line.iter().position(Option::is_some) {
        Some(pos) => pos,
        None => return vec![None; len],
    };
    let defined: Vec<f64> = macd_line[first_defined..].iter().flatten().copied().collect();
    let signal = ema(&defined, signal_period);

    let mut histogram = vec![None; len];
    for (offset, sig) in signal.into_iter().enumerate() {
        let idx = first_defined + offset;
        if let (Some(m), Some(s)) = (macd_line[idx], sig) {
            histogram[idx] = Some(m - s);
        }
    }
    histogram
}

/// Bollinger Bands: (middle, upper, lower) with a sample standard deviation.
pub fn bollinger_bands(
    prices: &[f64],
    period: usize,
    num_std_dev: f64,
) -> (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>) {
    let len = prices.len();
    if period < 2 {
        return (vec![None; len], vec![None; len], vec![None; len]);
    }

    let middle = sma(prices, period);
    let mut upper = vec![None; len];
    let mut lower = vec![None; len];

    for i in (period - 1)..len {
        if let Some(mean) = middle[i] {
            let window = &prices[i + 1 - period..=i];
            let variance = window.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (period - 1) as f64;
            let std_dev = variance.sqrt();
            upper[i] = Some(mean + num_std_dev * std_dev);
            lower[i] = Some(mean - num_std_dev * std_dev);
        }
    }

    (middle, upper, lower)
}
