//! Entry Context and TP/SL Suggestions
//!
//! Per-bar trend and volatility context derived from the indicator vector,
//! and a scorer that ranks the structural TP/SL candidates around an entry.
//! Suggestions are advisory: they are recorded next to a position and an
//! inference decision, the executed levels still come from the placement
//! rules in the environment.

use serde::{Deserialize, Serialize};

use super::indicators::INDICATOR_COUNT;
use super::structural::{FibLevel, StructuralFeatures};
use crate::rl::core::action::Direction;

const MOMENTUM_20: usize = 3;
const SMA20_POS: usize = 5;
const RSI: usize = 6;
const MACD: usize = 7;
const ATR_NORM: usize = 9;
const EMA50_POS: usize = 12;

/// Rolling window for the volatility comfort band
const VOL_WINDOW: usize = 200;
const VOL_MIN_PERIODS: usize = 50;

/// Trend confidence under which a low-volatility bar counts as chop
const CHOP_TREND_CONF: f64 = 0.25;

/// S/R distances beyond this many ATR are treated as this far
const MAX_LEVEL_DISTANCE: f64 = 50.0;

/// Suggested multiplier bounds, in ATR
pub const TP_MULT_BOUNDS: (f64, f64) = (0.8, 3.0);
pub const SL_MULT_BOUNDS: (f64, f64) = (0.5, 1.6);

/// Trend and volatility context at one bar. Every field except
/// `trend_score` and `trend_dir` lies in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Signed blend of MA position, momentum, MACD and RSI
    pub trend_score: f64,
    /// Sign of `trend_score`
    pub trend_dir: f64,
    pub trend_conf: f64,
    /// 1 at the median volatility, falling off toward the extremes
    pub vol_comfort: f64,
    pub rsi_long_bias: f64,
    pub rsi_short_bias: f64,
    /// Overbought in an uptrend or oversold in a downtrend
    pub rsi_fade_risky: f64,
    /// MACD sign disagrees with price vs EMA50
    pub macd_conflict: f64,
    pub macd_bullish: f64,
    pub macd_bearish: f64,
}

impl EntryMeta {
    /// Tilt toward a direction from trend, MACD and RSI
    pub fn bias(&self, direction: Direction) -> f64 {
        let (macd, rsi) = match direction {
            Direction::Short => (self.macd_bearish, self.rsi_short_bias),
            _ => (self.macd_bullish, self.rsi_long_bias),
        };
        clamp01(0.5 * self.trend_conf + 0.25 * macd + 0.25 * rsi)
    }
}

/// Compute the entry context for every bar of an indicator series
pub fn compute_entry_meta(indicators: &[[f64; INDICATOR_COUNT]]) -> Vec<EntryMeta> {
    let atr_norm: Vec<f64> = indicators.iter().map(|row| row[ATR_NORM]).collect();

    indicators
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let trend_score = 0.2 * (row[EMA50_POS] / 0.03).tanh()
                + 0.2 * (row[SMA20_POS] / 0.03).tanh()
                + 0.3 * (row[MOMENTUM_20] / 0.02).tanh()
                + 0.2 * (row[MACD] / 0.005).tanh()
                + 0.1 * (row[RSI] - 0.5);
            let trend_dir = sign(trend_score);
            let rsi = row[RSI];
            let macd_bullish = if row[MACD] > 0.0 { 1.0 } else { 0.0 };
            let macd_bearish = if row[MACD] < 0.0 { 1.0 } else { 0.0 };
            let above = row[EMA50_POS] > 0.0;
            let below = row[EMA50_POS] < 0.0;
            let fade = (rsi >= 0.7 && trend_dir > 0.0) || (rsi <= 0.3 && trend_dir < 0.0);

            let meta = EntryMeta {
                trend_score,
                trend_dir,
                trend_conf: clamp01((trend_score.abs() / 0.4).tanh()),
                vol_comfort: vol_comfort(&atr_norm, i),
                rsi_long_bias: clamp01((rsi - 0.55) / 0.15),
                rsi_short_bias: clamp01((0.45 - rsi) / 0.15),
                rsi_fade_risky: if fade { 1.0 } else { 0.0 },
                macd_conflict: if (macd_bullish > 0.0 && below) || (macd_bearish > 0.0 && above) {
                    1.0
                } else {
                    0.0
                },
                macd_bullish,
                macd_bearish,
            };
            sanitize(meta)
        })
        .collect()
}

fn vol_comfort(atr_norm: &[f64], i: usize) -> f64 {
    let start = (i + 1).saturating_sub(VOL_WINDOW);
    let window = &atr_norm[start..=i];
    if window.len() < VOL_MIN_PERIODS {
        return 0.0;
    }
    let mut sorted = window.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let var = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = var.sqrt();
    if !(std > 0.0) {
        return 0.0;
    }
    clamp01(1.0 - ((atr_norm[i] - median) / (std + 1e-9)).abs())
}

fn sanitize(mut meta: EntryMeta) -> EntryMeta {
    for v in [
        &mut meta.trend_score,
        &mut meta.trend_dir,
        &mut meta.trend_conf,
        &mut meta.vol_comfort,
    ] {
        if !v.is_finite() {
            *v = 0.0;
        }
    }
    meta
}

/// Where a suggested level comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LevelSource {
    F127,
    F161,
    F200,
    /// Nearest resistance
    R1,
    /// Nearest support
    S1,
    Ret382,
    Ret500,
    Ret618,
    /// No usable candidate
    NA,
}

impl LevelSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LevelSource::F127 => "F127",
            LevelSource::F161 => "F161",
            LevelSource::F200 => "F200",
            LevelSource::R1 => "R1",
            LevelSource::S1 => "S1",
            LevelSource::Ret382 => "RET382",
            LevelSource::Ret500 => "RET500",
            LevelSource::Ret618 => "RET618",
            LevelSource::NA => "NA",
        }
    }

    fn from_fib(level: FibLevel) -> Self {
        match level {
            FibLevel::Ext1272 => LevelSource::F127,
            FibLevel::Ext1618 => LevelSource::F161,
            FibLevel::Ext2000 => LevelSource::F200,
            FibLevel::Ret382 => LevelSource::Ret382,
            FibLevel::Ret500 => LevelSource::Ret500,
            FibLevel::Ret618 => LevelSource::Ret618,
        }
    }
}

impl std::fmt::Display for LevelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best-scoring TP and SL candidates for one entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TpSlSuggestion {
    /// Target distance in ATR, within `TP_MULT_BOUNDS`
    pub tp_mult: f64,
    /// Stop distance in ATR, within `SL_MULT_BOUNDS`
    pub sl_mult: f64,
    pub tp_source: LevelSource,
    pub sl_source: LevelSource,
    pub tp_score: f64,
    pub sl_score: f64,
}

struct Candidate {
    source: LevelSource,
    distance: f64,
    score: f64,
}

/// Score the structural candidates around an entry and pick the best TP
/// and SL.
///
/// TP candidates are the three Fibonacci extensions and the opposing S/R
/// level; SL candidates are the protecting S/R level and the retracements.
/// Far targets are preferred when confluence and trend confidence are high,
/// near ones in chop or conflicting context. A Fibonacci target that sits
/// beyond the opposing wall is penalized. `Hold` scores as long.
pub fn suggest_tp_sl(
    direction: Direction,
    features: &StructuralFeatures,
    meta: &EntryMeta,
    confluence: f64,
) -> TpSlSuggestion {
    let conf = clamp01(confluence);
    let chop = if features.vol_regime == 0 && meta.trend_conf < CHOP_TREND_CONF {
        1.0
    } else {
        0.0
    };
    let (wall, wall_source, wall_strength, floor, floor_source, floor_strength) = match direction {
        Direction::Short => (
            features.dist_to_support,
            LevelSource::S1,
            features.support_strength,
            features.dist_to_resistance,
            LevelSource::R1,
            features.resistance_strength,
        ),
        _ => (
            features.dist_to_resistance,
            LevelSource::R1,
            features.resistance_strength,
            features.dist_to_support,
            LevelSource::S1,
            features.support_strength,
        ),
    };
    let wall = level_distance(wall);
    let floor = level_distance(floor);
    let wall_strength = clamp01(wall_strength);
    let floor_strength = clamp01(floor_strength);
    let bias = meta.bias(direction);

    let allow_far = clamp01(0.55 * conf + 0.35 * meta.trend_conf - 0.30 * chop);
    let context_risk = clamp01(0.35 * chop + 0.20 * meta.macd_conflict + 0.20 * meta.rsi_fade_risky);
    let tp_reach = |d: f64| {
        let t = (d / 4.0).tanh();
        clamp01(allow_far * t + (1.0 - allow_far) * (1.0 - t) - 0.3 * context_risk)
    };
    let base_risk = clamp01(1.0 - (0.6 * conf + 0.4 * meta.trend_conf));
    let sl_reach = |d: f64, bonus: f64| {
        let t = (d / 3.0).tanh();
        clamp01(base_risk * (1.0 - t) + (1.0 - base_risk) * t + bonus - 0.25 * chop)
    };

    let mut tp = Vec::with_capacity(4);
    let mut sl = Vec::with_capacity(4);
    if features.swing.is_some() {
        for level in FibLevel::ALL {
            let d = features.fib_distance(level).abs();
            if !d.is_finite() {
                continue;
            }
            if level.is_extension() {
                let blocked = if wall.map_or(false, |w| w < d) { 1.0 } else { 0.0 };
                tp.push(Candidate {
                    source: LevelSource::from_fib(level),
                    distance: d,
                    score: clamp01(
                        0.35 * tp_reach(d) + 0.35 * bias - 0.30 * blocked - 0.20 * wall_strength,
                    ),
                });
            } else {
                let bonus = match level {
                    FibLevel::Ret382 => 0.10,
                    FibLevel::Ret500 => 0.12,
                    _ => 0.15,
                };
                sl.push(Candidate {
                    source: LevelSource::from_fib(level),
                    distance: d,
                    score: sl_reach(d, bonus),
                });
            }
        }
    }
    if let Some(d) = wall {
        tp.push(Candidate {
            source: wall_source,
            distance: d,
            score: clamp01(0.30 * tp_reach(d) + 0.40 * bias - 0.35 * wall_strength),
        });
    }
    if let Some(d) = floor {
        sl.push(Candidate {
            source: floor_source,
            distance: d,
            score: sl_reach(d, 0.20 * floor_strength),
        });
    }

    let (tp_source, tp_distance, tp_score) = best(&tp);
    let (sl_source, sl_distance, sl_score) = best(&sl);
    TpSlSuggestion {
        tp_mult: tp_distance.clamp(TP_MULT_BOUNDS.0, TP_MULT_BOUNDS.1),
        sl_mult: sl_distance.clamp(SL_MULT_BOUNDS.0, SL_MULT_BOUNDS.1),
        tp_source,
        sl_source,
        tp_score,
        sl_score,
    }
}

/// Highest score wins; ties keep the earlier candidate
fn best(candidates: &[Candidate]) -> (LevelSource, f64, f64) {
    let mut winner: Option<&Candidate> = None;
    for c in candidates {
        if winner.map_or(true, |w| c.score > w.score) {
            winner = Some(c);
        }
    }
    winner.map_or((LevelSource::NA, 0.0, 0.0), |c| (c.source, c.distance, c.score))
}

fn level_distance(distance: Option<f64>) -> Option<f64> {
    distance
        .filter(|d| d.is_finite())
        .map(|d| d.abs().min(MAX_LEVEL_DISTANCE))
}

fn clamp01(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::features::{RegimeMix, SwingLeg, SwingPair};

    fn row(ema50: f64, sma20: f64, mom20: f64, macd: f64, rsi: f64, atr_norm: f64) -> [f64; INDICATOR_COUNT] {
        let mut r = [0.0; INDICATOR_COUNT];
        r[EMA50_POS] = ema50;
        r[SMA20_POS] = sma20;
        r[MOMENTUM_20] = mom20;
        r[MACD] = macd;
        r[RSI] = rsi;
        r[ATR_NORM] = atr_norm;
        r
    }

    fn up_leg() -> StructuralFeatures {
        let mut f = StructuralFeatures::neutral(100.0);
        f.atr = 2.0;
        f.regime = RegimeMix::neutral();
        f.swing = Some(SwingPair {
            high: 100.0,
            low: 90.0,
            leg: SwingLeg::Up,
        });
        // extensions at 1.36, 3.09 and 5.0 ATR; retracements at 1.91, 2.5, 3.09 ATR below
        f.fib_distances = [1.36, 3.09, 5.0, -1.91, -2.5, -3.09];
        f.dist_to_support = Some(1.0);
        f.dist_to_resistance = Some(10.0);
        f.support_strength = 0.5;
        f.resistance_strength = 0.1;
        f
    }

    #[test]
    fn test_strong_uptrend_meta() {
        let rows = vec![row(0.05, 0.05, 0.04, 0.01, 0.75, 0.01); 10];
        let meta = compute_entry_meta(&rows);
        let last = meta[9];
        assert!(last.trend_score > 0.8);
        assert_eq!(last.trend_dir, 1.0);
        assert!(last.trend_conf > 0.9);
        assert_eq!(last.rsi_fade_risky, 1.0);
        assert_eq!(last.macd_conflict, 0.0);
        // fewer than 50 bars of volatility history
        assert_eq!(last.vol_comfort, 0.0);
    }

    #[test]
    fn test_macd_conflict_below_ema() {
        let meta = compute_entry_meta(&[row(-0.02, 0.0, 0.0, 0.002, 0.5, 0.01)]);
        assert_eq!(meta[0].macd_conflict, 1.0);
        assert!(meta[0].bias(Direction::Long) > meta[0].bias(Direction::Short));
    }

    #[test]
    fn test_vol_comfort_peaks_at_median() {
        let mut rows: Vec<_> = (0..120)
            .map(|i| row(0.0, 0.0, 0.0, 0.0, 0.5, 0.01 + 0.001 * (i % 5) as f64))
            .collect();
        rows.push(row(0.0, 0.0, 0.0, 0.0, 0.5, 0.012));
        rows.push(row(0.0, 0.0, 0.0, 0.0, 0.5, 0.2));
        let meta = compute_entry_meta(&rows);
        assert!(meta[120].vol_comfort > 0.9);
        assert_eq!(meta[121].vol_comfort, 0.0);
        assert!(meta.iter().all(|m| (0.0..=1.0).contains(&m.vol_comfort)));
    }

    #[test]
    fn test_confident_trend_reaches_for_far_target() {
        let f = up_leg();
        let strong = EntryMeta {
            trend_conf: 0.9,
            trend_dir: 1.0,
            macd_bullish: 1.0,
            rsi_long_bias: 1.0,
            ..Default::default()
        };
        let far = suggest_tp_sl(Direction::Long, &f, &strong, 0.9);
        let near = suggest_tp_sl(Direction::Long, &f, &EntryMeta::default(), 0.0);

        assert_eq!(near.tp_source, LevelSource::F127);
        assert!((near.tp_mult - 1.36).abs() < 1e-12);
        assert_ne!(far.tp_source, LevelSource::F127);
        assert!(far.tp_mult > near.tp_mult);
        assert!(far.tp_mult <= TP_MULT_BOUNDS.1);
    }

    #[test]
    fn test_wall_blocks_extensions_beyond_it() {
        let mut f = up_leg();
        f.dist_to_resistance = Some(2.0);
        let meta = EntryMeta {
            trend_conf: 0.9,
            ..Default::default()
        };
        let s = suggest_tp_sl(Direction::Long, &f, &meta, 0.9);
        // F161 and F200 sit past the 2 ATR resistance
        assert!(matches!(s.tp_source, LevelSource::F127 | LevelSource::R1));
    }

    #[test]
    fn test_short_uses_mirrored_levels() {
        let f = up_leg();
        let s = suggest_tp_sl(Direction::Short, &f, &EntryMeta::default(), 0.0);
        assert_ne!(s.tp_source, LevelSource::R1);
        assert_ne!(s.sl_source, LevelSource::S1);
        assert!((SL_MULT_BOUNDS.0..=SL_MULT_BOUNDS.1).contains(&s.sl_mult));
    }

    #[test]
    fn test_no_structure_is_na() {
        let f = StructuralFeatures::neutral(100.0);
        let s = suggest_tp_sl(Direction::Long, &f, &EntryMeta::default(), 0.5);
        assert_eq!(s.tp_source, LevelSource::NA);
        assert_eq!(s.sl_source, LevelSource::NA);
        assert_eq!(s.tp_mult, TP_MULT_BOUNDS.0);
        assert_eq!(s.sl_mult, SL_MULT_BOUNDS.0);
        assert_eq!(s.tp_source.to_string(), "NA");
    }
}
