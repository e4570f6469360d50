//! Structural Features
//!
//! Market regime, volatility tier, support/resistance and Fibonacci levels
//! derived from raw candles. Every query is total: indices past the end are
//! clamped and short histories yield neutral defaults.

use serde::{Deserialize, Serialize};

use crate::domain::Candle;

/// Bars of history required before features are computed
pub const MIN_HISTORY: usize = 50;

const ATR_PERIOD: usize = 14;
const REGIME_SMA_PERIOD: usize = 50;
const SLOPE_LOOKBACK: usize = 10;
const SLOPE_THRESHOLD: f64 = 0.005;
const VOL_WINDOW: usize = 100;
const SR_WINDOW: usize = 100;
const PIVOT_RADIUS: usize = 2;
const CLUSTER_TOLERANCE: f64 = 0.01;
const MIN_TOUCHES: usize = 3;
const FULL_STRENGTH_TOUCHES: f64 = 6.0;
const SWING_WINDOW: usize = 50;
const SWING_REVERSAL: f64 = 0.03;
const FIB_CLIP: f64 = 50.0;

/// Wyckoff-style market phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketPhase {
    Advancing,
    Accumulation,
    Distribution,
    Declining,
}

/// Four-way regime mix. Sums to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeMix {
    pub advancing: f64,
    pub accumulation: f64,
    pub distribution: f64,
    pub declining: f64,
}

impl RegimeMix {
    /// Even split used for ambiguous or short histories
    pub fn neutral() -> Self {
        Self {
            advancing: 0.25,
            accumulation: 0.25,
            distribution: 0.25,
            declining: 0.25,
        }
    }

    /// 0.7 on the dominant phase, 0.1 on the others
    pub fn dominant(phase: MarketPhase) -> Self {
        let weight = |p: MarketPhase| if p == phase { 0.7 } else { 0.1 };
        Self {
            advancing: weight(MarketPhase::Advancing),
            accumulation: weight(MarketPhase::Accumulation),
            distribution: weight(MarketPhase::Distribution),
            declining: weight(MarketPhase::Declining),
        }
    }

    pub fn as_array(&self) -> [f64; 4] {
        [
            self.advancing,
            self.accumulation,
            self.distribution,
            self.declining,
        ]
    }
}

/// The six tracked Fibonacci levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FibLevel {
    Ext1272,
    Ext1618,
    Ext2000,
    Ret382,
    Ret500,
    Ret618,
}

impl FibLevel {
    pub const ALL: [FibLevel; 6] = [
        FibLevel::Ext1272,
        FibLevel::Ext1618,
        FibLevel::Ext2000,
        FibLevel::Ret382,
        FibLevel::Ret500,
        FibLevel::Ret618,
    ];

    pub fn ratio(self) -> f64 {
        match self {
            FibLevel::Ext1272 => 1.272,
            FibLevel::Ext1618 => 1.618,
            FibLevel::Ext2000 => 2.0,
            FibLevel::Ret382 => 0.382,
            FibLevel::Ret500 => 0.5,
            FibLevel::Ret618 => 0.618,
        }
    }

    pub fn is_extension(self) -> bool {
        matches!(self, FibLevel::Ext1272 | FibLevel::Ext1618 | FibLevel::Ext2000)
    }

    pub fn index(self) -> usize {
        match self {
            FibLevel::Ext1272 => 0,
            FibLevel::Ext1618 => 1,
            FibLevel::Ext2000 => 2,
            FibLevel::Ret382 => 3,
            FibLevel::Ret500 => 4,
            FibLevel::Ret618 => 5,
        }
    }
}

/// Direction of the last completed swing leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwingLeg {
    /// Swing low came first, then the swing high
    Up,
    /// Swing high came first, then the swing low
    Down,
}

/// Last swing high/low pair from the zigzag
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingPair {
    pub high: f64,
    pub low: f64,
    pub leg: SwingLeg,
}

impl SwingPair {
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Absolute price of a Fibonacci level projected from this leg
    pub fn level_price(&self, level: FibLevel) -> f64 {
        let r = self.range();
        let k = level.ratio();
        match (self.leg, level.is_extension()) {
            (SwingLeg::Up, true) => self.low + r * k,
            (SwingLeg::Up, false) => self.high - r * k,
            (SwingLeg::Down, true) => self.high - r * k,
            (SwingLeg::Down, false) => self.low + r * k,
        }
    }
}

/// Structural snapshot at one bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralFeatures {
    pub regime: RegimeMix,
    /// Volatility tier: 0 low, 1 mid, 2 high
    pub vol_regime: u8,
    /// (close - support) / ATR
    pub dist_to_support: Option<f64>,
    /// (resistance - close) / ATR
    pub dist_to_resistance: Option<f64>,
    pub support_strength: f64,
    pub resistance_strength: f64,
    /// Signed (level - close) / ATR, ordered as `FibLevel::ALL`
    pub fib_distances: [f64; 6],
    pub atr: f64,
    pub swing: Option<SwingPair>,
    /// Close of the bar the snapshot belongs to
    pub close: f64,
}

impl StructuralFeatures {
    /// Defaults returned when fewer than `MIN_HISTORY` bars exist
    pub fn neutral(close: f64) -> Self {
        Self {
            regime: RegimeMix::neutral(),
            vol_regime: 1,
            dist_to_support: None,
            dist_to_resistance: None,
            support_strength: 0.0,
            resistance_strength: 0.0,
            fib_distances: [0.0; 6],
            atr: 0.0,
            swing: None,
            close,
        }
    }

    /// Finite positive ATR and both S/R distances known
    pub fn is_complete(&self) -> bool {
        self.atr.is_finite()
            && self.atr > 0.0
            && self.dist_to_support.map_or(false, f64::is_finite)
            && self.dist_to_resistance.map_or(false, f64::is_finite)
    }

    pub fn support_price(&self) -> Option<f64> {
        self.dist_to_support.map(|d| self.close - d * self.atr)
    }

    pub fn resistance_price(&self) -> Option<f64> {
        self.dist_to_resistance.map(|d| self.close + d * self.atr)
    }

    pub fn fib_price(&self, level: FibLevel) -> Option<f64> {
        self.swing.map(|s| s.level_price(level))
    }

    pub fn fib_distance(&self, level: FibLevel) -> f64 {
        self.fib_distances[level.index()]
    }
}

/// Computes structural features over a candle series.
///
/// ATR and the regime SMA are precomputed once; everything else is derived
/// from trailing windows at query time.
pub struct StructuralFeatureExtractor<'a> {
    candles: &'a [Candle],
    atr: Vec<f64>,
    sma: Vec<f64>,
}

impl<'a> StructuralFeatureExtractor<'a> {
    pub fn new(candles: &'a [Candle]) -> Self {
        Self {
            atr: atr_series(candles, ATR_PERIOD),
            sma: sma_series(candles, REGIME_SMA_PERIOD),
            candles,
        }
    }

    /// ATR at an index, clamped to the series
    pub fn atr_at(&self, index: usize) -> f64 {
        if self.atr.is_empty() {
            return 0.0;
        }
        self.atr[index.min(self.atr.len() - 1)]
    }

    /// Features as of bar `index`, using only bars `0..=index`
    pub fn extract(&self, index: usize) -> StructuralFeatures {
        if self.candles.is_empty() {
            return StructuralFeatures::neutral(0.0);
        }
        let i = index.min(self.candles.len() - 1);
        let close = self.candles[i].close;
        if i + 1 < MIN_HISTORY {
            return StructuralFeatures::neutral(close);
        }

        let atr = self.atr[i];
        let (dist_to_support, support_strength, dist_to_resistance, resistance_strength) =
            self.support_resistance(i, atr);
        let swing = self.swing_pair(i);

        let mut fib_distances = [0.0; 6];
        if let Some(pair) = swing.filter(|_| atr > 0.0) {
            for level in FibLevel::ALL {
                let d = (pair.level_price(level) - close) / atr;
                fib_distances[level.index()] = if d.is_finite() {
                    d.clamp(-FIB_CLIP, FIB_CLIP)
                } else {
                    0.0
                };
            }
        }

        StructuralFeatures {
            regime: self.regime(i),
            vol_regime: self.vol_regime(i),
            dist_to_support,
            dist_to_resistance,
            support_strength,
            resistance_strength,
            fib_distances,
            atr,
            swing,
            close,
        }
    }

    fn regime(&self, i: usize) -> RegimeMix {
        let sma_now = self.sma[i];
        let earliest = REGIME_SMA_PERIOD - 1;
        let sma_prev = self.sma[i.saturating_sub(SLOPE_LOOKBACK).max(earliest)];
        if !(sma_now > 0.0 && sma_prev > 0.0) {
            return RegimeMix::neutral();
        }
        let slope = (sma_now - sma_prev) / sma_prev;
        let close = self.candles[i].close;

        let phase = if slope > SLOPE_THRESHOLD {
            (close > sma_now).then_some(MarketPhase::Advancing)
        } else if slope < -SLOPE_THRESHOLD {
            if close < sma_now {
                Some(MarketPhase::Declining)
            } else {
                Some(MarketPhase::Distribution)
            }
        } else if close < sma_now {
            Some(MarketPhase::Accumulation)
        } else if close > sma_now {
            Some(MarketPhase::Distribution)
        } else {
            None
        };

        phase.map_or_else(RegimeMix::neutral, RegimeMix::dominant)
    }

    fn vol_regime(&self, i: usize) -> u8 {
        let start = (i + 1).saturating_sub(VOL_WINDOW).max(ATR_PERIOD.min(i));
        let window = &self.atr[start..=i];
        let current = self.atr[i];
        if window.len() < 3 || !(current > 0.0) {
            return 1;
        }
        let below = window.iter().filter(|&&a| a < current).count();
        let rank = below as f64 / window.len() as f64;
        if rank < 1.0 / 3.0 {
            0
        } else if rank < 2.0 / 3.0 {
            1
        } else {
            2
        }
    }

    /// Nearest clustered support below and resistance above the close
    fn support_resistance(&self, i: usize, atr: f64) -> (Option<f64>, f64, Option<f64>, f64) {
        if !(atr > 0.0) {
            return (None, 0.0, None, 0.0);
        }
        let start = (i + 1).saturating_sub(SR_WINDOW);
        let window = &self.candles[start..=i];
        let close = self.candles[i].close;

        let mut pivots = Vec::new();
        if window.len() > 2 * PIVOT_RADIUS {
            for j in PIVOT_RADIUS..window.len() - PIVOT_RADIUS {
                let neighbours = (j - PIVOT_RADIUS..=j + PIVOT_RADIUS).filter(|&k| k != j);
                if neighbours.clone().all(|k| window[j].high >= window[k].high) {
                    pivots.push(window[j].high);
                }
                if neighbours.clone().all(|k| window[j].low <= window[k].low) {
                    pivots.push(window[j].low);
                }
            }
        }

        let levels = cluster_levels(pivots);
        let support = levels
            .iter()
            .filter(|(price, _)| *price < close)
            .max_by(|a, b| a.0.total_cmp(&b.0));
        let resistance = levels
            .iter()
            .filter(|(price, _)| *price > close)
            .min_by(|a, b| a.0.total_cmp(&b.0));

        let strength = |touches: usize| (touches as f64 / FULL_STRENGTH_TOUCHES).min(1.0);
        let (ds, ss) = support
            .map(|&(p, t)| (Some((close - p) / atr), strength(t)))
            .unwrap_or((None, 0.0));
        let (dr, rs) = resistance
            .map(|&(p, t)| (Some((p - close) / atr), strength(t)))
            .unwrap_or((None, 0.0));
        (ds, ss, dr, rs)
    }

    /// Zigzag over the trailing window, confirmed by a 3% reversal
    fn swing_pair(&self, i: usize) -> Option<SwingPair> {
        #[derive(Clone, Copy)]
        enum State {
            Unset,
            Up,
            Down,
        }

        let start = (i + 1).saturating_sub(SWING_WINDOW);
        let window = &self.candles[start..=i];
        let first = window.first()?;

        let mut state = State::Unset;
        let mut ext_high = first.high;
        let mut ext_low = first.low;
        // confirmed pivots as (price, is_high)
        let mut pivots: Vec<(f64, bool)> = Vec::new();

        for bar in &window[1..] {
            match state {
                State::Unset => {
                    ext_high = ext_high.max(bar.high);
                    ext_low = ext_low.min(bar.low);
                    if bar.low <= ext_high * (1.0 - SWING_REVERSAL) {
                        pivots.push((ext_high, true));
                        state = State::Down;
                        ext_low = bar.low;
                    } else if bar.high >= ext_low * (1.0 + SWING_REVERSAL) {
                        pivots.push((ext_low, false));
                        state = State::Up;
                        ext_high = bar.high;
                    }
                }
                State::Up => {
                    if bar.high > ext_high {
                        ext_high = bar.high;
                    } else if bar.low <= ext_high * (1.0 - SWING_REVERSAL) {
                        pivots.push((ext_high, true));
                        state = State::Down;
                        ext_low = bar.low;
                    }
                }
                State::Down => {
                    if bar.low < ext_low {
                        ext_low = bar.low;
                    } else if bar.high >= ext_low * (1.0 + SWING_REVERSAL) {
                        pivots.push((ext_low, false));
                        state = State::Up;
                        ext_high = bar.high;
                    }
                }
            }
        }

        // a single confirmed pivot pairs with the running extreme
        match state {
            State::Up if pivots.len() == 1 => pivots.push((ext_high, true)),
            State::Down if pivots.len() == 1 => pivots.push((ext_low, false)),
            _ => {}
        }

        let n = pivots.len();
        if n < 2 {
            return None;
        }
        let (a, a_is_high) = pivots[n - 2];
        let (b, _) = pivots[n - 1];
        let pair = if a_is_high {
            SwingPair {
                high: a,
                low: b,
                leg: SwingLeg::Down,
            }
        } else {
            SwingPair {
                high: b,
                low: a,
                leg: SwingLeg::Up,
            }
        };
        (pair.range() > 0.0).then_some(pair)
    }
}

/// Cluster pivot prices within ±1% of the running cluster mean.
///
/// Returns (mean price, touches) for clusters with enough touches.
fn cluster_levels(mut prices: Vec<f64>) -> Vec<(f64, usize)> {
    prices.retain(|p| p.is_finite());
    prices.sort_by(f64::total_cmp);

    let mut levels = Vec::new();
    let mut sum = 0.0;
    let mut count = 0usize;
    for p in prices {
        if count > 0 {
            let mean = sum / count as f64;
            if (p - mean).abs() / mean > CLUSTER_TOLERANCE {
                if count >= MIN_TOUCHES {
                    levels.push((mean, count));
                }
                sum = 0.0;
                count = 0;
            }
        }
        sum += p;
        count += 1;
    }
    if count >= MIN_TOUCHES {
        levels.push((sum / count as f64, count));
    }
    levels
}

/// Mean true range over the trailing `period` bars (fewer at the start)
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<f64> {
    let tr: Vec<f64> = candles
        .iter()
        .enumerate()
        .map(|(i, c)| c.true_range(i.checked_sub(1).map(|p| candles[p].close)))
        .collect();

    let mut out = Vec::with_capacity(tr.len());
    let mut sum = 0.0;
    for i in 0..tr.len() {
        sum += tr[i];
        if i >= period {
            sum -= tr[i - period];
        }
        out.push(sum / (i + 1).min(period) as f64);
    }
    out
}

/// Simple moving average of closes; 0.0 until the window is full
pub fn sma_series(candles: &[Candle], period: usize) -> Vec<f64> {
    let mut out = vec![0.0; candles.len()];
    let mut sum = 0.0;
    for (i, c) in candles.iter().enumerate() {
        sum += c.close;
        if i >= period {
            sum -= candles[i - period].close;
        }
        if i + 1 >= period {
            out[i] = sum / period as f64;
        }
    }
    out
}
