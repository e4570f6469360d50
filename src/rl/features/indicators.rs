//! Technical Indicators
//!
//! Per-bar indicator vector fed to the policy next to the structural features.

use crate::domain::Candle;

use super::structural::atr_series;

/// Number of indicator features per bar
pub const INDICATOR_COUNT: usize = 13;

const CLIP: f64 = 10.0;

/// Indicator names in vector order
pub const INDICATOR_NAMES: [&str; INDICATOR_COUNT] = [
    "price_change",
    "vol_norm",
    "momentum_5",
    "momentum_20",
    "sma10_pos",
    "sma20_pos",
    "rsi",
    "macd",
    "volatility",
    "atr_norm",
    "boll_pos",
    "price_range",
    "ema50_pos",
];

/// Compute the indicator vector for every bar.
///
/// Warm-up bars get neutral values, every entry is finite and clipped to ±10.
pub fn compute_indicators(candles: &[Candle]) -> Vec<[f64; INDICATOR_COUNT]> {
    let n = candles.len();
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

    let returns: Vec<f64> = (0..n)
        .map(|i| if i == 0 { 0.0 } else { ratio_change(closes[i], closes[i - 1]) })
        .collect();
    let vol_sma20 = rolling_mean(&volumes, 20);
    let sma10 = rolling_mean(&closes, 10);
    let sma20 = rolling_mean(&closes, 20);
    let ret_std20 = rolling_std(&returns, 20);
    let rsi = rsi_series(&closes, 14);
    let ema12 = ema_series(&closes, 12);
    let ema26 = ema_series(&closes, 26);
    let ema50 = ema_series(&closes, 50);
    let atr = atr_series(candles, 14);

    (0..n)
        .map(|i| {
            let c = closes[i];
            let momentum = |k: usize| i.checked_sub(k).map_or(0.0, |p| ratio_change(c, closes[p]));
            let position = |avg: Option<f64>| avg.map_or(0.0, |a| ratio_change(c, a));
            let boll = match sma20[i] {
                Some(mid) => {
                    let sd = price_std(&closes[i + 1 - 20..=i], mid);
                    if sd > 0.0 {
                        // lower band -> -1, upper band -> +1
                        (c - mid) / (2.0 * sd)
                    } else {
                        0.0
                    }
                }
                None => 0.0,
            };

            let raw = [
                returns[i],
                vol_sma20[i].map_or(1.0, |v| if v > 0.0 { volumes[i] / v } else { 1.0 }),
                momentum(5),
                momentum(20),
                position(sma10[i]),
                position(sma20[i]),
                rsi[i] / 100.0,
                if i >= 25 && c > 0.0 { (ema12[i] - ema26[i]) / c } else { 0.0 },
                ret_std20[i].unwrap_or(0.0),
                if c > 0.0 { atr[i] / c } else { 0.0 },
                boll,
                if c > 0.0 { candles[i].total_range() / c } else { 0.0 },
                if i >= 49 { ratio_change(c, ema50[i]) } else { 0.0 },
            ];
            raw.map(sanitize)
        })
        .collect()
}

fn sanitize(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(-CLIP, CLIP)
    } else {
        0.0
    }
}

fn ratio_change(now: f64, then: f64) -> f64 {
    if then != 0.0 {
        (now - then) / then
    } else {
        0.0
    }
}

fn rolling_mean(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for i in 0..values.len() {
        sum += values[i];
        if i >= period {
            sum -= values[i - period];
        }
        out.push((i + 1 >= period).then(|| sum / period as f64));
    }
    out
}

fn rolling_std(values: &[f64], period: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if i + 1 < period || period < 2 {
                return None;
            }
            let window = &values[i + 1 - period..=i];
            let mean = window.iter().sum::<f64>() / period as f64;
            let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (period - 1) as f64;
            Some(var.sqrt())
        })
        .collect()
}

fn price_std(window: &[f64], mean: f64) -> f64 {
    let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / window.len() as f64;
    var.sqrt()
}

fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut ema = values.first().copied().unwrap_or(0.0);
    for &v in values {
        ema = alpha * v + (1.0 - alpha) * ema;
        out.push(ema);
    }
    out
}

/// Wilder RSI; 50 during warm-up
fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![50.0; closes.len()];
    if closes.len() <= period {
        return out;
    }
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let d = closes[i] - closes[i - 1];
        avg_gain += d.max(0.0);
        avg_loss += (-d).max(0.0);
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    let rsi = |g: f64, l: f64| {
        if l == 0.0 {
            if g == 0.0 {
                50.0
            } else {
                100.0
            }
        } else {
            100.0 - 100.0 / (1.0 + g / l)
        }
    };
    out[period] = rsi(avg_gain, avg_loss);
    for i in period + 1..closes.len() {
        let d = closes[i] - closes[i - 1];
        avg_gain = (avg_gain * (period - 1) as f64 + d.max(0.0)) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + (-d).max(0.0)) / period as f64;
        out[i] = rsi(avg_gain, avg_loss);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candles(closes: &[f64]) -> Vec<Candle> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                timestamp: base + Duration::hours(i as i64),
                open: c,
                high: c * 1.01,
                low: c * 0.99,
                close: c,
                volume: 1000.0 + i as f64,
            })
            .collect()
    }

    #[test]
    fn test_indicators_are_finite_and_clipped() {
        let closes: Vec<f64> = (0..120).map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0).collect();
        let rows = compute_indicators(&candles(&closes));
        assert_eq!(rows.len(), 120);
        for row in &rows {
            assert!(row.iter().all(|v| v.is_finite() && v.abs() <= CLIP));
        }
    }

    #[test]
    fn test_warmup_values_are_neutral() {
        let rows = compute_indicators(&candles(&[100.0, 101.0, 102.0]));
        assert_eq!(rows[0][0], 0.0);
        assert_eq!(rows[0][1], 1.0);
        assert_eq!(rows[2][6], 0.5);
    }

    #[test]
    fn test_rsi_of_steady_rise_is_high() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let rows = compute_indicators(&candles(&closes));
        assert!((rows[39][6] - 1.0).abs() < 1e-12);
        assert!(rows[39][2] > 0.0);
    }

    #[test]
    fn test_empty_series() {
        assert!(compute_indicators(&[]).is_empty());
    }
}
